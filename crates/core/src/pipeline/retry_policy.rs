//! Retry classification for API errors

use std::time::Duration;

use connexa_common::resilience::{RetryDecision, RetryPolicy};
use connexa_domain::{ConnexaError, RetrySettings};

/// Decides which [`ConnexaError`]s earn another attempt.
///
/// Network failures and timeouts are always retried. Server errors and rate
/// limits are retried when their status is in the configured set. A server
/// `retry_after` hint replaces the computed backoff, capped at
/// `max_retry_after`. Everything else stops immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRetryPolicy {
    retryable_statuses: Vec<u16>,
    max_retry_after: Duration,
}

impl ApiRetryPolicy {
    pub fn new(retryable_statuses: Vec<u16>, max_retry_after: Duration) -> Self {
        Self { retryable_statuses, max_retry_after }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.retryable_statuses.clone(), settings.backoff_max())
    }

    fn status_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

impl Default for ApiRetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy<ConnexaError> for ApiRetryPolicy {
    fn should_retry(&self, error: &ConnexaError, _attempt: u32) -> RetryDecision {
        match error {
            ConnexaError::RateLimit { retry_after: Some(hint), .. } => {
                RetryDecision::RetryAfter((*hint).min(self.max_retry_after))
            }
            ConnexaError::RateLimit { retry_after: None, .. } if self.status_retryable(429) => {
                RetryDecision::Retry
            }
            ConnexaError::Server { status, .. } if self.status_retryable(*status) => RetryDecision::Retry,
            ConnexaError::Timeout(_) | ConnexaError::Network(_) => RetryDecision::Retry,
            _ => RetryDecision::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `ApiRetryPolicy::should_retry` behavior for the error kind
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms transient kinds retry and client errors stop.
    /// - Confirms a 501 outside the configured set stops.
    /// - Confirms a rate limit hint becomes the delay, capped.
    #[test]
    fn test_retry_classification() {
        let policy = ApiRetryPolicy::new(vec![429, 500, 503], Duration::from_secs(10));

        assert_eq!(policy.should_retry(&ConnexaError::Network("reset".into()), 0), RetryDecision::Retry);
        assert_eq!(policy.should_retry(&ConnexaError::Timeout("slow".into()), 0), RetryDecision::Retry);
        assert_eq!(
            policy.should_retry(&ConnexaError::Server { status: 503, message: "x".into() }, 0),
            RetryDecision::Retry
        );
        assert_eq!(
            policy.should_retry(&ConnexaError::Server { status: 501, message: "x".into() }, 0),
            RetryDecision::Stop
        );
        assert_eq!(
            policy.should_retry(&ConnexaError::Validation { message: "bad".into(), details: None }, 0),
            RetryDecision::Stop
        );
        assert_eq!(
            policy.should_retry(&ConnexaError::Authentication { status: Some(401), message: "no".into() }, 0),
            RetryDecision::Stop
        );

        let hinted = ConnexaError::RateLimit { message: "slow down".into(), retry_after: Some(Duration::from_secs(2)) };
        assert_eq!(policy.should_retry(&hinted, 0), RetryDecision::RetryAfter(Duration::from_secs(2)));

        let long = ConnexaError::RateLimit { message: "later".into(), retry_after: Some(Duration::from_secs(600)) };
        assert_eq!(policy.should_retry(&long, 0), RetryDecision::RetryAfter(Duration::from_secs(10)));
    }

    /// Validates `ApiRetryPolicy::should_retry` behavior for the circuit open
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a breaker rejection is never retried.
    #[test]
    fn test_circuit_open_stops() {
        let policy = ApiRetryPolicy::default();
        assert_eq!(policy.should_retry(&ConnexaError::CircuitOpen { retry_in: None }, 0), RetryDecision::Stop);
    }
}
