//! Conversions from external infrastructure errors into domain errors.

use connexa_domain::ConnexaError;
use r2d2::Error as PoolError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use tokio::task::JoinError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub ConnexaError);

impl From<InfraError> for ConnexaError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<ConnexaError> for InfraError {
    fn from(value: ConnexaError) -> Self {
        InfraError(value)
    }
}

trait IntoConnexaError {
    fn into_connexa(self) -> ConnexaError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → ConnexaError */
/* -------------------------------------------------------------------------- */

impl IntoConnexaError for SqlError {
    fn into_connexa(self) -> ConnexaError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => ConnexaError::Storage("database is busy".into()),
                    (ErrorCode::DatabaseLocked, _) => ConnexaError::Storage("database is locked".into()),
                    (ErrorCode::ConstraintViolation, 2067 | 1555) => {
                        ConnexaError::Storage("unique constraint violation".into())
                    }
                    (ErrorCode::NotADatabase, _) => {
                        ConnexaError::Storage("file is not a database".into())
                    }
                    _ => ConnexaError::Storage(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => ConnexaError::Storage("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                ConnexaError::Storage(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                ConnexaError::Storage(format!("invalid column type for '{name}': {ty}"))
            }
            RE::InvalidPath(path) => {
                ConnexaError::Storage(format!("invalid database path: {}", path.to_string_lossy()))
            }
            other => ConnexaError::Storage(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_connexa())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → ConnexaError */
/* -------------------------------------------------------------------------- */

impl From<PoolError> for InfraError {
    fn from(value: PoolError) -> Self {
        InfraError(ConnexaError::Storage(format!("connection pool unavailable: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → ConnexaError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(ConnexaError::Storage(format!("stored JSON is malformed: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → ConnexaError */
/* -------------------------------------------------------------------------- */

impl IntoConnexaError for HttpError {
    fn into_connexa(self) -> ConnexaError {
        if self.is_timeout() {
            return ConnexaError::Timeout("HTTP request timed out".into());
        }

        if self.is_connect() {
            return ConnexaError::Network(format!("HTTP connection failure: {self}"));
        }

        if self.is_builder() {
            return ConnexaError::Configuration(format!("invalid HTTP request: {self}"));
        }

        if let Some(status) = self.status() {
            return ConnexaError::from_status(
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown status"),
                None,
                None,
            );
        }

        ConnexaError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_connexa())
    }
}

/// A blocking storage task panicked or was cancelled
pub fn map_join_error(err: JoinError) -> ConnexaError {
    ConnexaError::Internal(format!("blocking task failed: {err}"))
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
