//! Client facade over the pipeline and sync manager

use std::sync::Arc;

use connexa_domain::{
    ApiRequest, ApiResponse, ConflictRecord, ExecuteOutcome, ExecutionError, OfflineSettings, QueuedOperation,
    Result, SyncReport, VersionContext,
};
use serde_json::Value;
use uuid::Uuid;

use super::service::RequestPipeline;
use crate::sync::SyncManager;

/// The surface resource wrappers are built on.
///
/// Cheap to clone; clones share the pipeline, breaker, limiter and queue.
#[derive(Clone)]
pub struct ResilientClient {
    pipeline: Arc<RequestPipeline>,
    sync: Arc<SyncManager>,
}

impl ResilientClient {
    pub fn new(pipeline: Arc<RequestPipeline>, sync: Arc<SyncManager>) -> Self {
        Self { pipeline, sync }
    }

    /// Wire a sync manager configured by `offline` onto `pipeline`
    pub fn assemble(pipeline: RequestPipeline, offline: &OfflineSettings) -> Self {
        let pipeline = Arc::new(pipeline);
        let sync = Arc::new(SyncManager::new(
            pipeline.clone(),
            offline.conflict_strategy,
            offline.max_operation_retries,
        ));
        Self { pipeline, sync }
    }

    /// See [`RequestPipeline::execute`]
    pub async fn execute(&self, request: ApiRequest) -> std::result::Result<ExecuteOutcome, ExecutionError> {
        self.pipeline.execute(request).await
    }

    pub fn is_online(&self) -> bool {
        self.pipeline.is_online()
    }

    pub async fn pending_operation_count(&self) -> Result<usize> {
        self.pipeline.pending_operation_count().await
    }

    /// Replay the offline queue now instead of waiting for the health monitor
    pub async fn sync_now(&self) -> Result<SyncReport> {
        self.sync.sync_now().await
    }

    pub async fn resolve_conflict(&self, conflict_id: Uuid, data: Value) -> Result<ApiResponse> {
        self.sync.resolve_conflict(conflict_id, data).await
    }

    pub async fn conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.sync.conflicts().await
    }

    pub async fn failed_operations(&self) -> Result<Vec<QueuedOperation>> {
        self.sync.failed_operations().await
    }

    /// Version in use, detecting it on first call
    pub async fn version(&self) -> Result<VersionContext> {
        self.pipeline.adapter().detect_version().await
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync
    }
}
