//! Configuration structures for the client runtime
//!
//! Every section deserializes with defaults, so a config file only needs to
//! name what it changes. Durations are stored as integer seconds or
//! milliseconds (the field suffix says which) and exposed as [`Duration`]
//! through accessors.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConnexaError;
use crate::types::{ApiVersion, ConflictStrategy};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConnexaConfig {
    pub api: ApiConfig,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub offline: OfflineSettings,
    pub health: HealthSettings,
}

/// Remote API endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Pin a protocol version and skip detection
    pub api_version: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Shape callers expect responses in
    pub caller_version: ApiVersion,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_version: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: format!("connexa-client/{}", env!("CARGO_PKG_VERSION")),
            caller_version: ApiVersion::V1_1_0,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Parsed version pin, if any
    pub fn pinned_version(&self) -> Result<Option<ApiVersion>, ConnexaError> {
        self.api_version.as_deref().map(str::parse).transpose()
    }
}

/// Retry behaviour for transient failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter: bool,
    /// Statuses treated as transient in addition to 5xx
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            jitter: true,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

impl RetrySettings {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u64,
    pub recovery_timeout_secs: u64,
    pub failure_window_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout_secs: 60, failure_window_secs: 60 }
    }
}

impl CircuitBreakerSettings {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }
}

/// Granularity of rate limit buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// One bucket per resource family
    Endpoint,
    /// One bucket for the whole account
    #[default]
    Account,
}

/// Outgoing rate limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub limit: u64,
    pub window_secs: u64,
    pub sliding: bool,
    pub scope: RateLimitScope,
    pub max_wait_ms: u64,
    /// Shared counter database; enables account-wide limits across processes
    pub shared_store_path: Option<PathBuf>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 100,
            window_secs: 60,
            sliding: true,
            scope: RateLimitScope::Account,
            max_wait_ms: 2_000,
            shared_store_path: None,
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Offline cache and write queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSettings {
    pub enabled: bool,
    pub store_path: PathBuf,
    pub default_ttl_secs: u64,
    /// Replay failures tolerated before an operation is marked failed
    pub max_operation_retries: u32,
    pub conflict_strategy: ConflictStrategy,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: PathBuf::from("connexa-offline.db"),
            default_ttl_secs: 300,
            max_operation_retries: 5,
            conflict_strategy: ConflictStrategy::ServerWins,
        }
    }
}

impl OfflineSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Background health monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self { enabled: true, interval_secs: 30 }
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ConnexaConfig {
    /// Configuration for `base_url` with every other setting defaulted
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self { api: ApiConfig { base_url: base_url.into(), ..ApiConfig::default() }, ..Self::default() }
    }

    /// Check internal consistency. URL syntax is checked by the loader.
    pub fn validate(&self) -> Result<(), ConnexaError> {
        let invalid = |message: &str| Err(ConnexaError::Configuration(message.to_string()));

        if self.api.base_url.trim().is_empty() {
            return invalid("api.base_url is required");
        }
        self.api.pinned_version()?;
        if self.api.request_timeout_secs == 0 {
            return invalid("api.request_timeout_secs must be greater than 0");
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return invalid("retry.backoff_base_ms must not exceed retry.backoff_max_ms");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold must be greater than 0");
        }
        if self.circuit_breaker.recovery_timeout_secs == 0 {
            return invalid("circuit_breaker.recovery_timeout_secs must be greater than 0");
        }
        if self.rate_limit.enabled && (self.rate_limit.limit == 0 || self.rate_limit.window_secs == 0) {
            return invalid("rate_limit.limit and rate_limit.window_secs must be greater than 0");
        }
        if self.health.enabled && self.health.interval_secs == 0 {
            return invalid("health.interval_secs must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `ConnexaConfig` deserialization behavior for the partial
    /// document scenario.
    ///
    /// Assertions:
    /// - Confirms unspecified sections keep their defaults.
    /// - Confirms named fields override defaults.
    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ConnexaConfig = serde_json::from_str(
            r#"{"api": {"base_url": "https://acme.api.openvpn.com"},
                "offline": {"conflict_strategy": "client_wins"}}"#,
        )
        .unwrap();

        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.offline.conflict_strategy, ConflictStrategy::ClientWins);
        assert!(config.validate().is_ok());
    }

    /// Validates `ConnexaConfig::validate` behavior for the missing URL and
    /// bad version scenario.
    ///
    /// Assertions:
    /// - Confirms a missing base URL is rejected.
    /// - Confirms an unknown pinned version is rejected.
    /// - Confirms inverted backoff bounds are rejected.
    #[test]
    fn test_validation_failures() {
        assert!(ConnexaConfig::default().validate().is_err());

        let mut config = ConnexaConfig::for_base_url("https://acme.api.openvpn.com");
        config.api.api_version = Some("3.0".into());
        assert!(config.validate().is_err());

        let mut config = ConnexaConfig::for_base_url("https://acme.api.openvpn.com");
        config.retry.backoff_base_ms = 60_000;
        assert!(config.validate().is_err());
    }
}
