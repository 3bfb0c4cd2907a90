//! Database connection manager backed by an r2d2 SQLite pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use connexa_domain::{ConnexaError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::info;

use crate::errors::InfraError;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A pooled SQLite connection
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Pool settings
#[derive(Debug, Clone)]
pub struct DbManagerConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
}

impl Default for DbManagerConfig {
    fn default() -> Self {
        Self { max_size: 4, connection_timeout: Duration::from_secs(10) }
    }
}

/// Owns the connection pool for one database file.
///
/// Connections run in WAL mode with a busy timeout so several processes can
/// share the file; the schema is created on open.
pub struct DbManager {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl std::fmt::Debug for DbManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbManager").field("path", &self.path).finish_non_exhaustive()
    }
}

impl DbManager {
    /// Open (creating if needed) the database at `db_path` and migrate it.
    pub fn open<P: AsRef<Path>>(db_path: P, config: DbManagerConfig) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                ConnexaError::Storage(format!("cannot create directory {}: {err}", parent.display()))
            })?;
        }

        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;\nPRAGMA synchronous=NORMAL;\nPRAGMA wal_autocheckpoint=1000;")
        });

        let pool = Pool::builder()
            .max_size(config.max_size.max(1))
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|err| ConnexaError::from(InfraError::from(err)))?;

        let manager = Self { pool, path };
        manager.run_migrations()?;
        info!(db_path = %manager.path.display(), max_connections = config.max_size, "sqlite pool initialised");
        Ok(manager)
    }

    /// Acquire a connection from the pool.
    pub fn get_connection(&self) -> Result<DbConnection> {
        self.pool.get().map_err(|err| InfraError::from(err).into())
    }

    /// Ensure the full schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA_SQL).map_err(map_sql_error)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, CAST(strftime('%s','now') AS INTEGER))",
            params![SCHEMA_VERSION],
        )
        .map_err(map_sql_error)?;
        Ok(())
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify the database answers a trivial query.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", params![], |row| row.get::<_, i32>(0)).map_err(map_sql_error)?;
        Ok(())
    }
}

pub(crate) fn map_sql_error(err: rusqlite::Error) -> ConnexaError {
    InfraError::from(err).into()
}
