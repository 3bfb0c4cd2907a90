//! Rate limit counters shared between processes through a SQLite file.
//!
//! Each `(bucket, window_id)` pair is one row carrying an expiry so stale
//! windows can be purged. Increments run inside an immediate transaction so
//! concurrent processes never both take the last slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use connexa_common::{CounterStore, CounterStoreError};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};

use super::manager::DbManager;

/// Expired rows are swept every this many increments
const PURGE_EVERY: u64 = 256;

/// [`CounterStore`] backed by the `rate_limit_counters` table
pub struct SqliteCounterStore {
    db: Arc<DbManager>,
    increments: AtomicU64,
}

impl SqliteCounterStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db, increments: AtomicU64::new(0) }
    }

    /// Delete rows whose window has expired
    pub fn purge_expired(&self) -> Result<usize, CounterStoreError> {
        let conn = self.db.get_connection().map_err(unavailable)?;
        let removed = conn
            .execute("DELETE FROM rate_limit_counters WHERE expires_at <= ?1", params![unix_now()])
            .map_err(unavailable)?;
        if removed > 0 {
            debug!(removed, "purged expired rate limit counters");
        }
        Ok(removed)
    }

    fn maybe_purge(&self) {
        let seen = self.increments.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % PURGE_EVERY == 0 {
            if let Err(err) = self.purge_expired() {
                warn!(error = %err, "failed to purge rate limit counters");
            }
        }
    }
}

impl CounterStore for SqliteCounterStore {
    fn count(&self, bucket: &str, window_id: u64) -> Result<u64, CounterStoreError> {
        let conn = self.db.get_connection().map_err(unavailable)?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM rate_limit_counters WHERE bucket = ?1 AND window_id = ?2",
                params![bucket, to_i64(window_id)?],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;
        count.map_or(Ok(0), to_u64)
    }

    fn try_increment(
        &self,
        bucket: &str,
        window_id: u64,
        limit: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, CounterStoreError> {
        let window = to_i64(window_id)?;
        let expires_at = unix_now().saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

        let mut conn = self.db.get_connection().map_err(unavailable)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate).map_err(unavailable)?;
        let current: i64 = tx
            .query_row(
                "SELECT count FROM rate_limit_counters WHERE bucket = ?1 AND window_id = ?2",
                params![bucket, window],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?
            .unwrap_or(0);

        if to_u64(current)? >= limit {
            tx.rollback().map_err(unavailable)?;
            return Ok(None);
        }

        tx.execute(INCREMENT_SQL, params![bucket, window, expires_at]).map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;
        self.maybe_purge();
        Ok(Some(to_u64(current)? + 1))
    }
}

const INCREMENT_SQL: &str = "INSERT INTO rate_limit_counters (bucket, window_id, count, expires_at)
    VALUES (?1, ?2, 1, ?3)
    ON CONFLICT(bucket, window_id) DO UPDATE SET count = count + 1,
        expires_at = MAX(expires_at, excluded.expires_at)";

fn unavailable(err: impl std::fmt::Display) -> CounterStoreError {
    CounterStoreError::Unavailable(err.to_string())
}

fn to_i64(value: u64) -> Result<i64, CounterStoreError> {
    i64::try_from(value).map_err(|_| CounterStoreError::Unavailable(format!("value {value} out of range")))
}

fn to_u64(value: i64) -> Result<u64, CounterStoreError> {
    u64::try_from(value).map_err(|_| CounterStoreError::Unavailable(format!("negative counter {value}")))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
