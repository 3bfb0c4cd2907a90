//! Sync manager - replays the offline queue once the API is reachable

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use connexa_domain::{
    ApiRequest, ApiResponse, ConflictRecord, ConflictStrategy, ConnexaError, ErrorKind, HttpMethod,
    OperationStatus, QueuedOperation, Result, SyncReport,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::conflict::{detect_conflict, resolve, Resolution};
use crate::offline::{item_cache_key, OfflineStore};
use crate::pipeline::RequestPipeline;

enum Replay {
    Completed,
    Conflict(ConflictRecord),
    Failed(ConnexaError),
}

/// Drains the offline queue in enqueue order and reconciles conflicts
pub struct SyncManager {
    pipeline: Arc<RequestPipeline>,
    store: Arc<dyn OfflineStore>,
    strategy: ConflictStrategy,
    max_operation_retries: u32,
    drain_lock: Mutex<()>,
}

impl SyncManager {
    pub fn new(pipeline: Arc<RequestPipeline>, strategy: ConflictStrategy, max_operation_retries: u32) -> Self {
        let store = pipeline.store().clone();
        Self { pipeline, store, strategy, max_operation_retries, drain_lock: Mutex::new(()) }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Replay every pending operation, oldest first.
    ///
    /// Only one drain runs at a time. A transient failure keeps the operation
    /// pending and holds back later operations of the same resource family
    /// until the next drain. An open circuit stops the drain altogether.
    #[instrument(skip(self), fields(strategy = ?self.strategy))]
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let _drain = self.drain_lock.lock().await;
        let pending = self.store.list_pending().await?;
        let mut report = SyncReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        info!(pending = pending.len(), "replaying offline queue");

        let mut held_families: HashSet<String> = HashSet::new();
        let mut halted = false;

        for mut operation in pending {
            if halted || held_families.contains(&operation.service) {
                report.deferred.push(operation.id);
                continue;
            }

            match self.replay(&operation).await {
                Replay::Completed => {
                    operation.mark_completed();
                    self.store.update_operation(&operation).await?;
                    debug!(operation_id = %operation.id, "queued operation replayed");
                    report.succeeded.push(operation.id);
                }
                Replay::Conflict(record) => {
                    self.store.save_conflict(&record).await?;
                    operation.status = OperationStatus::Conflict;
                    self.store.update_operation(&operation).await?;
                    warn!(
                        operation_id = %operation.id,
                        conflict_id = %record.id,
                        resource_id = %record.resource_id,
                        "queued operation parked for manual resolution"
                    );
                    report.conflicts.push(operation.id);
                }
                Replay::Failed(ConnexaError::CircuitOpen { retry_in }) => {
                    warn!(?retry_in, "circuit open, stopping queue replay");
                    report.deferred.push(operation.id);
                    halted = true;
                }
                Replay::Failed(error) if error.is_retryable() => {
                    let exhausted = operation.record_retry(error.to_string(), self.max_operation_retries);
                    self.store.update_operation(&operation).await?;
                    if exhausted {
                        warn!(operation_id = %operation.id, %error, "queued operation out of retries");
                        report.failed.push(operation.id);
                    } else {
                        debug!(
                            operation_id = %operation.id,
                            retry_count = operation.retry_count,
                            %error,
                            "queued operation deferred"
                        );
                        report.deferred.push(operation.id);
                    }
                    held_families.insert(operation.service.clone());
                }
                Replay::Failed(error) => {
                    warn!(operation_id = %operation.id, %error, "queued operation failed");
                    operation.mark_failed(error.to_string());
                    self.store.update_operation(&operation).await?;
                    report.failed.push(operation.id);
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            conflicts = report.conflicts.len(),
            deferred = report.deferred.len(),
            "offline queue replay finished"
        );
        Ok(report)
    }

    async fn replay(&self, operation: &QueuedOperation) -> Replay {
        let request = match operation.to_request() {
            Ok(request) => request,
            Err(error) => return Replay::Failed(error),
        };

        let targets_existing = matches!(operation.method, HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete)
            && operation.resource_id().is_some();
        if targets_existing {
            let mut read = ApiRequest::get(request.path_template.clone()).without_offline_queue();
            read.path_params = request.path_params.clone();

            match self.pipeline.execute_live(&read).await {
                Ok(remote) => {
                    if detect_conflict(operation.base_snapshot.as_ref(), &remote.body) {
                        return self.reconcile(operation, request, remote.body).await;
                    }
                }
                Err(error) if error.kind() == ErrorKind::NotFound => {
                    return if operation.method == HttpMethod::Delete {
                        Replay::Completed
                    } else {
                        Replay::Failed(error.source)
                    };
                }
                Err(error) => return Replay::Failed(error.source),
            }
        }

        self.send(&request).await
    }

    async fn reconcile(&self, operation: &QueuedOperation, mut request: ApiRequest, remote: Value) -> Replay {
        info!(operation_id = %operation.id, strategy = ?self.strategy, "conflict detected during replay");

        match resolve(self.strategy, operation, &remote) {
            Resolution::Discard => {
                if let Some(key) = item_cache_key(&request) {
                    let ttl = self.pipeline.settings().cache_ttl;
                    if let Err(error) = self.store.set(&key, &remote, ttl).await {
                        warn!(key = %key, %error, "could not cache server state");
                    }
                }
                Replay::Completed
            }
            Resolution::Apply(body) => {
                request.body = body;
                self.send(&request).await
            }
            Resolution::Park => Replay::Conflict(ConflictRecord {
                id: Uuid::new_v4(),
                operation_id: operation.id,
                service: operation.service.clone(),
                resource_id: operation.resource_id().unwrap_or_default().to_string(),
                local: operation.kwargs.clone(),
                remote,
                detected_at: Utc::now(),
            }),
        }
    }

    async fn send(&self, request: &ApiRequest) -> Replay {
        match self.pipeline.execute_live(request).await {
            Ok(_) => Replay::Completed,
            Err(error) if error.kind() == ErrorKind::NotFound && request.method == HttpMethod::Delete => {
                Replay::Completed
            }
            Err(error) => Replay::Failed(error.source),
        }
    }

    /// Apply an operator's resolution to a parked conflict.
    ///
    /// `data` replaces the queued body (ignored for deletes). On success the
    /// operation completes and the conflict record is removed; on failure
    /// both are left as they were.
    pub async fn resolve_conflict(&self, conflict_id: Uuid, data: Value) -> Result<ApiResponse> {
        let _drain = self.drain_lock.lock().await;

        let record = self
            .store
            .list_conflicts()
            .await?
            .into_iter()
            .find(|record| record.id == conflict_id)
            .ok_or_else(|| ConnexaError::NotFound { resource: format!("conflict {conflict_id}") })?;
        let mut operation = self
            .store
            .get_operation(record.operation_id)
            .await?
            .ok_or_else(|| ConnexaError::NotFound { resource: format!("queued operation {}", record.operation_id) })?;

        let mut request = operation.to_request()?;
        if operation.method != HttpMethod::Delete {
            request.body = Some(data);
        }
        let response = self.pipeline.execute_live(&request).await.map_err(|error| error.source)?;

        operation.mark_completed();
        self.store.update_operation(&operation).await?;
        self.store.remove_conflict(conflict_id).await?;
        info!(%conflict_id, operation_id = %operation.id, "conflict resolved");
        Ok(response)
    }

    /// Conflicts awaiting an operator
    pub async fn conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.store.list_conflicts().await
    }

    /// Operations that ran out of retries or failed permanently
    pub async fn failed_operations(&self) -> Result<Vec<QueuedOperation>> {
        self.store.list_by_status(OperationStatus::Failed).await
    }
}
