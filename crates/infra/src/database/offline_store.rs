//! SQLite-backed implementation of the offline store port.
//!
//! Cache entries, the write queue and conflict records live in one database
//! file so they survive restarts. Queue order is the autoincrement `seq`
//! column. All statements run on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use connexa_core::OfflineStore;
use connexa_domain::{
    CacheEntry, ConflictRecord, ConnexaError, OperationStatus, QueuedOperation, Result as DomainResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tokio::task;
use uuid::Uuid;

use super::manager::{map_sql_error, DbManager};
use crate::errors::{map_join_error, InfraError};

/// Durable offline cache and write queue
pub struct SqliteOfflineStore {
    db: Arc<DbManager>,
}

impl SqliteOfflineStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<DbManager> {
        &self.db
    }

    async fn with_conn<T, F>(&self, work: F) -> DomainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> DomainResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> DomainResult<T> {
            let conn = db.get_connection()?;
            work(&conn)
        })
        .await
        .map_err(map_join_error)?
    }

    /// Drop completed operations; returns how many were removed
    pub async fn purge_completed(&self) -> DomainResult<usize> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM queued_operations WHERE status = ?1", params![OperationStatus::Completed.as_str()])
                .map_err(map_sql_error)
        })
        .await
    }
}

#[async_trait]
impl OfflineStore for SqliteOfflineStore {
    async fn get_entry(&self, key: &str) -> DomainResult<Option<CacheEntry>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(CACHE_SELECT_SQL, params![key], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })
                .optional()
                .map_err(map_sql_error)?;
            raw.map(|(value, stored_at, expires_at)| {
                Ok(CacheEntry {
                    key,
                    value: from_json(&value)?,
                    stored_at: parse_time(&stored_at)?,
                    expires_at: parse_time(&expires_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> DomainResult<()> {
        let key = key.to_string();
        let value = to_json(value)?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.with_conn(move |conn| {
            conn.execute(CACHE_UPSERT_SQL, params![key, value, now.to_rfc3339(), expires_at.to_rfc3339()])
                .map(|_| ())
                .map_err(map_sql_error)
        })
        .await
    }

    async fn delete(&self, key: &str) -> DomainResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key]).map(|_| ()).map_err(map_sql_error)
        })
        .await
    }

    async fn invalidate_prefix(&self, prefix: &str) -> DomainResult<usize> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1", params![prefix])
                .map_err(map_sql_error)
        })
        .await
    }

    async fn enqueue(&self, operation: &QueuedOperation) -> DomainResult<Uuid> {
        let row = OperationRow::from_operation(operation)?;
        let id = operation.id;
        self.with_conn(move |conn| {
            conn.execute(
                OPERATION_INSERT_SQL,
                params![
                    row.id,
                    row.service,
                    row.method,
                    row.path_template,
                    row.args,
                    row.kwargs,
                    row.idempotency_key,
                    row.base_snapshot,
                    row.enqueued_at,
                    row.status,
                    row.retry_count,
                    row.last_error,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(id)
        })
        .await
    }

    async fn list_pending(&self) -> DomainResult<Vec<QueuedOperation>> {
        self.list_by_status(OperationStatus::Pending).await
    }

    async fn list_by_status(&self, status: OperationStatus) -> DomainResult<Vec<QueuedOperation>> {
        self.with_conn(move |conn| {
            let sql = format!("{OPERATION_SELECT_SQL} WHERE status = ?1 ORDER BY seq");
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![status.as_str()], OperationRow::from_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            rows.into_iter().map(OperationRow::into_operation).collect()
        })
        .await
    }

    async fn get_operation(&self, id: Uuid) -> DomainResult<Option<QueuedOperation>> {
        self.with_conn(move |conn| {
            let sql = format!("{OPERATION_SELECT_SQL} WHERE id = ?1");
            conn.query_row(&sql, params![id.to_string()], OperationRow::from_row)
                .optional()
                .map_err(map_sql_error)?
                .map(OperationRow::into_operation)
                .transpose()
        })
        .await
    }

    async fn update_operation(&self, operation: &QueuedOperation) -> DomainResult<()> {
        let id = operation.id;
        let status = operation.status;
        let retry_count = operation.retry_count;
        let last_error = operation.last_error.clone();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE queued_operations SET status = ?2, retry_count = ?3, last_error = ?4 WHERE id = ?1",
                    params![id.to_string(), status.as_str(), retry_count, last_error],
                )
                .map_err(map_sql_error)?;
            ensure_found(changed, id)
        })
        .await
    }

    async fn update_status(&self, id: Uuid, status: OperationStatus, error: Option<&str>) -> DomainResult<()> {
        let error = error.map(str::to_string);
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE queued_operations SET status = ?2, last_error = COALESCE(?3, last_error) WHERE id = ?1",
                    params![id.to_string(), status.as_str(), error],
                )
                .map_err(map_sql_error)?;
            ensure_found(changed, id)
        })
        .await
    }

    async fn pending_count(&self) -> DomainResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM queued_operations WHERE status = ?1",
                    params![OperationStatus::Pending.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            usize::try_from(count).map_err(|_| ConnexaError::Storage(format!("invalid row count {count}")))
        })
        .await
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> DomainResult<()> {
        let values = (
            record.id.to_string(),
            record.operation_id.to_string(),
            record.service.clone(),
            record.resource_id.clone(),
            to_json(&record.local)?,
            to_json(&record.remote)?,
            record.detected_at.to_rfc3339(),
        );
        self.with_conn(move |conn| {
            conn.execute(
                CONFLICT_UPSERT_SQL,
                params![values.0, values.1, values.2, values.3, values.4, values.5, values.6],
            )
            .map(|_| ())
            .map_err(map_sql_error)
        })
        .await
    }

    async fn list_conflicts(&self) -> DomainResult<Vec<ConflictRecord>> {
        self.with_conn(|conn| {
            let sql = format!("{CONFLICT_SELECT_SQL} ORDER BY detected_at, id");
            let mut stmt = conn.prepare(&sql).map_err(map_sql_error)?;
            let rows = stmt
                .query_map([], ConflictRow::from_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;
            rows.into_iter().map(ConflictRow::into_record).collect()
        })
        .await
    }

    async fn remove_conflict(&self, id: Uuid) -> DomainResult<Option<ConflictRecord>> {
        self.with_conn(move |conn| {
            let sql = format!("{CONFLICT_SELECT_SQL} WHERE id = ?1");
            let existing = conn
                .query_row(&sql, params![id.to_string()], ConflictRow::from_row)
                .optional()
                .map_err(map_sql_error)?;
            if existing.is_some() {
                conn.execute("DELETE FROM conflict_records WHERE id = ?1", params![id.to_string()])
                    .map_err(map_sql_error)?;
            }
            existing.map(ConflictRow::into_record).transpose()
        })
        .await
    }
}

/// Column values of a `queued_operations` row
struct OperationRow {
    id: String,
    service: String,
    method: String,
    path_template: String,
    args: String,
    kwargs: String,
    idempotency_key: String,
    base_snapshot: Option<String>,
    enqueued_at: String,
    status: String,
    retry_count: u32,
    last_error: Option<String>,
}

impl OperationRow {
    fn from_operation(operation: &QueuedOperation) -> DomainResult<Self> {
        Ok(Self {
            id: operation.id.to_string(),
            service: operation.service.clone(),
            method: operation.method.as_str().to_string(),
            path_template: operation.path_template.clone(),
            args: serde_json::to_string(&operation.args).map_err(|err| ConnexaError::from(InfraError::from(err)))?,
            kwargs: to_json(&operation.kwargs)?,
            idempotency_key: operation.idempotency_key.clone(),
            base_snapshot: operation.base_snapshot.as_ref().map(to_json).transpose()?,
            enqueued_at: operation.enqueued_at.to_rfc3339(),
            status: operation.status.as_str().to_string(),
            retry_count: operation.retry_count,
            last_error: operation.last_error.clone(),
        })
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            service: row.get(1)?,
            method: row.get(2)?,
            path_template: row.get(3)?,
            args: row.get(4)?,
            kwargs: row.get(5)?,
            idempotency_key: row.get(6)?,
            base_snapshot: row.get(7)?,
            enqueued_at: row.get(8)?,
            status: row.get(9)?,
            retry_count: row.get(10)?,
            last_error: row.get(11)?,
        })
    }

    fn into_operation(self) -> DomainResult<QueuedOperation> {
        Ok(QueuedOperation {
            id: parse_uuid(&self.id)?,
            service: self.service,
            method: self.method.parse().map_err(|_| ConnexaError::Storage(format!("unknown method '{}'", self.method)))?,
            path_template: self.path_template,
            args: serde_json::from_str(&self.args).map_err(|err| ConnexaError::from(InfraError::from(err)))?,
            kwargs: from_json(&self.kwargs)?,
            idempotency_key: self.idempotency_key,
            base_snapshot: self.base_snapshot.as_deref().map(from_json).transpose()?,
            enqueued_at: parse_time(&self.enqueued_at)?,
            status: self.status.parse()?,
            retry_count: self.retry_count,
            last_error: self.last_error,
        })
    }
}

struct ConflictRow {
    id: String,
    operation_id: String,
    service: String,
    resource_id: String,
    local: String,
    remote: String,
    detected_at: String,
}

impl ConflictRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            operation_id: row.get(1)?,
            service: row.get(2)?,
            resource_id: row.get(3)?,
            local: row.get(4)?,
            remote: row.get(5)?,
            detected_at: row.get(6)?,
        })
    }

    fn into_record(self) -> DomainResult<ConflictRecord> {
        Ok(ConflictRecord {
            id: parse_uuid(&self.id)?,
            operation_id: parse_uuid(&self.operation_id)?,
            service: self.service,
            resource_id: self.resource_id,
            local: from_json(&self.local)?,
            remote: from_json(&self.remote)?,
            detected_at: parse_time(&self.detected_at)?,
        })
    }
}

fn ensure_found(changed: usize, id: Uuid) -> DomainResult<()> {
    if changed == 0 {
        return Err(ConnexaError::NotFound { resource: format!("queued operation {id}") });
    }
    Ok(())
}

fn to_json(value: &Value) -> DomainResult<String> {
    serde_json::to_string(value).map_err(|err| InfraError::from(err).into())
}

fn from_json(raw: &str) -> DomainResult<Value> {
    serde_json::from_str(raw).map_err(|err| InfraError::from(err).into())
}

fn parse_time(raw: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| ConnexaError::Storage(format!("invalid stored timestamp '{raw}': {err}")))
}

fn parse_uuid(raw: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| ConnexaError::Storage(format!("invalid stored id '{raw}': {err}")))
}

const CACHE_SELECT_SQL: &str = "SELECT value, stored_at, expires_at FROM cache_entries WHERE key = ?1";

const CACHE_UPSERT_SQL: &str = "INSERT INTO cache_entries (key, value, stored_at, expires_at)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, stored_at = excluded.stored_at,
        expires_at = excluded.expires_at";

const OPERATION_INSERT_SQL: &str = "INSERT INTO queued_operations (
        id, service, method, path_template, args, kwargs, idempotency_key, base_snapshot,
        enqueued_at, status, retry_count, last_error
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const OPERATION_SELECT_SQL: &str = "SELECT
        id, service, method, path_template, args, kwargs, idempotency_key, base_snapshot,
        enqueued_at, status, retry_count, last_error
    FROM queued_operations";

const CONFLICT_UPSERT_SQL: &str = "INSERT OR REPLACE INTO conflict_records (
        id, operation_id, service, resource_id, local, remote, detected_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const CONFLICT_SELECT_SQL: &str =
    "SELECT id, operation_id, service, resource_id, local, remote, detected_at FROM conflict_records";

#[cfg(test)]
mod tests {
    use connexa_domain::ApiRequest;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::database::DbManagerConfig;

    fn open(dir: &TempDir) -> SqliteOfflineStore {
        let db = DbManager::open(dir.path().join("offline.db"), DbManagerConfig::default()).unwrap();
        SqliteOfflineStore::new(Arc::new(db))
    }

    /// Validates `SqliteOfflineStore::get_entry` behavior for the expiry
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a zero-TTL entry is still readable raw but hidden from `get`.
    /// - Confirms prefix invalidation only removes matching keys.
    #[tokio::test]
    async fn test_cache_expiry_and_invalidation() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.set("networks:list", &json!([1, 2]), Duration::ZERO).await.unwrap();
        store.set("networks:id=n1", &json!({"id": "n1"}), Duration::from_secs(60)).await.unwrap();
        store.set("users:list", &json!([]), Duration::from_secs(60)).await.unwrap();

        let raw = store.get_entry("networks:list").await.unwrap().unwrap();
        assert!(raw.is_expired());
        assert_eq!(store.get("networks:list").await.unwrap(), None);
        assert_eq!(store.get("networks:id=n1").await.unwrap(), Some(json!({"id": "n1"})));

        assert_eq!(store.invalidate_prefix("networks:").await.unwrap(), 2);
        assert!(store.get_entry("users:list").await.unwrap().is_some());
    }

    /// Validates `SqliteOfflineStore::list_pending` behavior for the queue
    /// order scenario.
    ///
    /// Assertions:
    /// - Confirms pending operations come back in enqueue order with every
    ///   field intact.
    /// - Confirms status updates remove operations from the pending list.
    #[tokio::test]
    async fn test_queue_order_and_status() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let first = QueuedOperation::from_request(
            &ApiRequest::patch("/networks/{id}", json!({"name": "a"})).path_param("id", "n1"),
            Some(json!({"id": "n1", "name": "old"})),
        )
        .unwrap();
        let second = QueuedOperation::from_request(&ApiRequest::post("/networks", json!({"name": "b"})), None).unwrap();
        store.enqueue(&first).await.unwrap();
        store.enqueue(&second).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[0].args, vec!["n1".to_string()]);
        assert_eq!(pending[0].base_snapshot, first.base_snapshot);
        assert_eq!(pending[1].id, second.id);

        let mut done = pending[0].clone();
        done.mark_completed();
        store.update_operation(&done).await.unwrap();
        store.update_status(second.id, OperationStatus::Failed, Some("boom")).await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        let failed = store.list_by_status(OperationStatus::Failed).await.unwrap();
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));
        assert_eq!(store.purge_completed().await.unwrap(), 1);
    }

    /// Validates `SqliteOfflineStore::update_operation` behavior for the
    /// unknown operation scenario.
    ///
    /// Assertions:
    /// - Confirms updating a missing operation is a not-found error.
    #[tokio::test]
    async fn test_update_unknown_operation() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let error = store.update_status(Uuid::new_v4(), OperationStatus::Completed, None).await.unwrap_err();
        assert!(matches!(error, ConnexaError::NotFound { .. }));
    }

    /// Validates `SqliteOfflineStore::remove_conflict` behavior for the
    /// record lifecycle scenario.
    ///
    /// Assertions:
    /// - Confirms a saved conflict is listed, returned on removal and gone
    ///   afterwards.
    #[tokio::test]
    async fn test_conflict_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let record = ConflictRecord {
            id: Uuid::new_v4(),
            operation_id: Uuid::new_v4(),
            service: "networks".into(),
            resource_id: "n1".into(),
            local: json!({"name": "mine"}),
            remote: json!({"name": "theirs"}),
            detected_at: Utc::now(),
        };

        store.save_conflict(&record).await.unwrap();
        assert_eq!(store.list_conflicts().await.unwrap(), vec![record.clone()]);
        assert_eq!(store.remove_conflict(record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.remove_conflict(record.id).await.unwrap(), None);
        assert!(store.list_conflicts().await.unwrap().is_empty());
    }
}
