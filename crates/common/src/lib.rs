//! Generic building blocks shared across Connexa crates.
//!
//! Nothing in here knows about the remote API. The resilience primitives are
//! generic over error types and clocks, and the domain-aware wiring lives in
//! `connexa-core`.
//!
//! # Feature Tiers
//!
//! - `foundation`: error derive support (`thiserror`) for the runtime tier
//! - `runtime`: async resilience primitives (circuit breaker, retry, rate
//!   limiting); pulls in `tokio`, `tracing`, `dashmap` and `rand`

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

#[cfg(feature = "runtime")]
pub mod resilience;

#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffStrategy, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, CounterStore,
    CounterStoreError, Jitter, LocalCounterStore, MockClock, RateDecision, RateLimitConfig,
    RateLimitError, RateLimiter, ResilienceError, RetryConfig, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy, SharedClock, SystemClock, WindowKind,
};
