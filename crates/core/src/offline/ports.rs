//! Port interface for the durable offline store

use std::time::Duration;

use async_trait::async_trait;
use connexa_domain::{CacheEntry, ConflictRecord, OperationStatus, QueuedOperation, Result};
use serde_json::Value;
use uuid::Uuid;

/// Durable cache of last-known-good reads plus the queue of deferred writes
///
/// Implementations must be safe to call concurrently from caller tasks and
/// the background health monitor, and must survive process restarts.
#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Raw cache entry, including expired ones
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store a value under `key` for `ttl`
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;

    /// Remove a cache entry
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every cache entry whose key starts with `prefix`
    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize>;

    /// Persist a new queued operation
    async fn enqueue(&self, operation: &QueuedOperation) -> Result<Uuid>;

    /// Pending operations, oldest first
    async fn list_pending(&self) -> Result<Vec<QueuedOperation>>;

    /// Operations in `status`, oldest first
    async fn list_by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>>;

    async fn get_operation(&self, id: Uuid) -> Result<Option<QueuedOperation>>;

    /// Persist status, retry count and last error of an existing operation
    async fn update_operation(&self, operation: &QueuedOperation) -> Result<()>;

    /// Set the status (and optionally the error) of an existing operation
    async fn update_status(&self, id: Uuid, status: OperationStatus, error: Option<&str>) -> Result<()>;

    async fn pending_count(&self) -> Result<usize>;

    async fn save_conflict(&self, record: &ConflictRecord) -> Result<()>;

    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>>;

    /// Remove a conflict record, returning it if it existed
    async fn remove_conflict(&self, id: Uuid) -> Result<Option<ConflictRecord>>;

    /// Unexpired cached value
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_entry(key).await?.filter(|entry| !entry.is_expired()).map(|entry| entry.value))
    }

    /// Unexpired cached value or `default`
    async fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key).await?.unwrap_or(default))
    }
}
