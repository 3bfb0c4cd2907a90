//! Resilience patterns for talking to an unreliable remote service
//!
//! - **Circuit breaker**: stops calling a backend that keeps failing and
//!   admits a single probe once the recovery timeout has passed.
//! - **Retry**: bounded attempts with exponential backoff and jitter, aware
//!   of caller deadlines.
//! - **Rate limiter**: fixed or sliding window counters per bucket, stored
//!   locally or in a shared [`CounterStore`].
//!
//! All time-dependent logic reads time through [`Clock`] so tests can use
//! [`MockClock`].

pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitState, ConfigError, ConfigResult, ResilienceError, ResilienceResult,
};
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use rate_limiter::{
    CounterStore, CounterStoreError, LocalCounterStore, RateDecision, RateLimitConfig,
    RateLimitError, RateLimiter, WindowKind,
};
pub use retry::{
    policies, retry_with_policy, BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder,
    RetryDecision, RetryError, RetryExecutor, RetryOutcome, RetryPolicy, RetryResult,
};
