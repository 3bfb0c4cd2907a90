//! Scheduler error types

use std::time::Duration;

use connexa_domain::ConnexaError;
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::error::Elapsed;

use crate::errors::InfraError;

/// Background task lifecycle errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// The task did not stop within the join timeout
    #[error("Scheduler did not stop within {duration:?}")]
    Timeout {
        duration: Duration,
        #[source]
        source: Elapsed,
    },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(#[from] JoinError),
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let connexa_err = match err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                ConnexaError::Configuration(err.to_string())
            }
            _ => ConnexaError::Internal(err.to_string()),
        };
        InfraError(connexa_err)
    }
}

impl From<SchedulerError> for ConnexaError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
