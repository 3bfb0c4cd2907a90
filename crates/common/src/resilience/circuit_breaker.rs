//! Circuit breaker for guarding calls to an unreliable backend
//!
//! The breaker moves between three states:
//!
//! - `CLOSED`: calls pass through. Qualifying failures increment a rolling
//!   counter; reaching `failure_threshold` inside `failure_window` opens the
//!   circuit.
//! - `OPEN`: calls fail fast without touching the backend until
//!   `recovery_timeout` has elapsed since the trip.
//! - `HALF_OPEN`: exactly one probe call is admitted. Success closes the
//!   circuit and clears the counter, failure re-opens it and restarts the
//!   timeout.
//!
//! Callers decide which failures qualify. [`CircuitBreaker::execute_classified`]
//! takes a predicate, and [`CircuitBreaker::permit`] hands an orchestrator a
//! [`CallPermit`] to settle with the outcome it classified itself. A permit
//! dropped unsettled, for example because the caller's future was
//! cancelled, gives its half-open probe slot back.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};

//==============================================================================
// Error Types
//==============================================================================

/// Simple configuration error for validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors that can occur in resilience operations
///
/// Generic over the underlying operation error type `E` so the original error
/// is preserved alongside the resilience-specific variants.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// The underlying operation failed
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, admitting a single probe
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of qualifying failures before opening the circuit
    pub failure_threshold: u64,
    /// Time to wait before transitioning from open to half-open
    pub recovery_timeout: Duration,
    /// Failures older than this no longer count toward the threshold.
    /// `None` keeps counting until a success resets the counter.
    pub failure_window: Option<Duration>,
    /// Whether a success in the closed state clears the failure counter
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            failure_window: Some(Duration::from_secs(60)),
            reset_on_success: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "recovery_timeout must be greater than 0".to_string(),
            });
        }

        if matches!(self.failure_window, Some(window) if window.is_zero()) {
            return Err(ConfigError::Invalid {
                message: "failure_window must be greater than 0 when set".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn failure_window(mut self, window: Option<Duration>) -> Self {
        self.config.failure_window = window;
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Metrics
//==============================================================================

/// Point-in-time snapshot of circuit breaker counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u64,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub times_opened: u64,
}

//==============================================================================
// Circuit Breaker
//==============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u64,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    /// Ticket of the half-open probe currently out, if any
    probe_in_flight: Option<u64>,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            first_failure_at: None,
            opened_at: None,
            probe_in_flight: None,
        }
    }
}

/// Thread-safe circuit breaker
///
/// All state transitions happen under one mutex scoped to this breaker, so
/// concurrent callers observe a consistent state and at most one of them
/// receives the half-open probe permit.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    clock: C,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
    times_opened: AtomicU64,
    probe_tickets: AtomicU64,
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker on the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner::closed()),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
            probe_tickets: AtomicU64::new(0),
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Circuit breaker state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Move OPEN to HALF_OPEN once the recovery timeout has elapsed.
    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let due = inner
            .opened_at
            .map_or(true, |opened| now.saturating_duration_since(opened) >= self.config.recovery_timeout);
        if due {
            info!("Circuit breaker transitioning OPEN -> HALF_OPEN");
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = None;
        }
    }

    fn trip(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.probe_in_flight = None;
        self.times_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Current state, applying any due OPEN to HALF_OPEN transition
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.refresh(&mut inner, self.clock.now());
        inner.state
    }

    /// Whether the breaker is currently rejecting traffic
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Time remaining until an open circuit admits a probe, if it is open
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let inner = self.lock_inner();
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = inner
            .opened_at
            .map_or(self.config.recovery_timeout, |opened| self.clock.now().saturating_duration_since(opened));
        Some(self.config.recovery_timeout.saturating_sub(elapsed))
    }

    /// Try to obtain permission for one call.
    ///
    /// Returns `true` when the call may proceed. In the half-open state only
    /// the first caller gets `true` until its outcome is recorded or released.
    /// Every `true` must be followed by exactly one of `record_success`,
    /// `record_failure` or `release`; prefer [`CircuitBreaker::permit`] when
    /// the call can be cancelled.
    pub fn try_acquire(&self) -> bool {
        self.admit().is_some()
    }

    /// Obtain a [`CallPermit`] for one call, or `None` when rejected.
    pub fn permit(&self) -> Option<CallPermit<'_, C>> {
        self.admit().map(|probe| CallPermit { breaker: self, probe, settled: false })
    }

    // Outer `None` rejects; `Some(Some(ticket))` is the half-open probe.
    fn admit(&self) -> Option<Option<u64>> {
        let mut inner = self.lock_inner();
        self.refresh(&mut inner, self.clock.now());

        let admitted = match inner.state {
            CircuitState::Closed => Some(None),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight.is_some() {
                    None
                } else {
                    let ticket = self.probe_tickets.fetch_add(1, Ordering::Relaxed);
                    debug!(ticket, "Circuit breaker admitting half-open probe");
                    inner.probe_in_flight = Some(ticket);
                    Some(Some(ticket))
                }
            }
        };

        if admitted.is_some() {
            self.total_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::Closed => {
                if self.config.reset_on_success {
                    inner.failure_count = 0;
                    inner.first_failure_at = None;
                }
            }
            CircuitState::HalfOpen => {
                info!("Circuit breaker probe succeeded, transitioning HALF_OPEN -> CLOSED");
                *inner = BreakerInner::closed();
            }
            // Late result from a call admitted before the trip.
            CircuitState::Open => {}
        }
    }

    /// Record a qualifying failure
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => {
                let window_expired = match (self.config.failure_window, inner.first_failure_at) {
                    (Some(window), Some(first)) => now.saturating_duration_since(first) > window,
                    _ => false,
                };
                if window_expired || inner.first_failure_at.is_none() {
                    inner.failure_count = 0;
                    inner.first_failure_at = Some(now);
                }
                inner.failure_count += 1;

                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    self.trip(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker probe failed, transitioning HALF_OPEN -> OPEN");
                self.trip(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a permit whose outcome says nothing about backend health.
    ///
    /// Used for failures outside the qualifying set (for example validation
    /// errors): the counter is untouched and a half-open probe slot is freed.
    pub fn release(&self) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = None;
        }
    }

    /// Free the probe slot only if `ticket` still holds it
    fn abandon_probe(&self, ticket: u64) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight == Some(ticket) {
            debug!(ticket, "Half-open probe abandoned, slot freed");
            inner.probe_in_flight = None;
        }
    }

    /// Force the circuit open, e.g. after an external health signal
    pub fn force_open(&self) {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        if inner.state != CircuitState::Open {
            warn!("Circuit breaker forced OPEN");
            self.trip(&mut inner, now);
        }
    }

    /// Reset to the closed state and clear the failure counter
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        *inner = BreakerInner::closed();
        info!("Circuit breaker reset to CLOSED");
    }

    /// Snapshot of the breaker counters
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.lock_inner();
        self.refresh(&mut inner, self.clock.now());
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            times_opened: self.times_opened.load(Ordering::Relaxed),
        }
    }

    /// Execute an async operation, counting every error as a failure
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Execute an async operation, counting only errors accepted by `qualifies`
    #[instrument(skip(self, operation, qualifies))]
    pub async fn execute_classified<F, Fut, T, E, Q>(
        &self,
        operation: F,
        qualifies: Q,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
        Q: Fn(&E) -> bool,
    {
        let Some(permit) = self.permit() else {
            debug!("Circuit breaker rejected call");
            return Err(ResilienceError::CircuitOpen);
        };

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                if qualifies(&error) {
                    permit.failure();
                } else {
                    permit.release();
                }
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }
}

/// Permission for one call through a [`CircuitBreaker`].
///
/// Settle it with [`CallPermit::success`], [`CallPermit::failure`] or
/// [`CallPermit::release`]. Dropping it unsettled behaves like `release`
/// for the half-open probe it may hold, so a cancelled probe never leaves
/// the breaker stuck in HALF_OPEN.
#[must_use = "an unsettled permit is released when dropped"]
pub struct CallPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    probe: Option<u64>,
    settled: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    /// Whether this permit is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }

    /// The outcome says nothing about backend health
    pub fn release(self) {
        // Drop frees the probe slot.
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(ticket) = self.probe {
            self.breaker.abandon_probe(ticket);
        }
    }
}

impl<C: Clock> fmt::Debug for CallPermit<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit").field("probe", &self.probe).field("settled", &self.settled).finish()
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for circuit breaker transitions
    //!
    //! Time-dependent behavior runs on `MockClock` so no test sleeps.

    use std::sync::Arc;

    use super::*;
    use crate::resilience::clock::MockClock;

    #[derive(Debug, Error)]
    enum ProbeError {
        #[error("backend down")]
        Backend,
        #[error("bad input")]
        Validation,
    }

    fn breaker(threshold: u64, clock: MockClock) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .recovery_timeout(Duration::from_secs(30))
            .failure_window(Some(Duration::from_secs(60)))
            .build()
            .expect("valid config");
        CircuitBreaker::with_clock(config, clock).expect("breaker")
    }

    /// Validates `CircuitBreakerConfig::validate` behavior for the zero
    /// threshold scenario.
    ///
    /// Assertions:
    /// - Confirms a zero `failure_threshold` is rejected.
    /// - Confirms a zero `failure_window` is rejected.
    #[test]
    fn test_config_validation_rejects_zero_values() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().failure_window(Some(Duration::ZERO)).build().is_err());
        assert!(CircuitBreakerConfig::builder().failure_window(None).build().is_ok());
    }

    /// Validates `CircuitBreaker::record_failure` behavior for the threshold
    /// trip scenario.
    ///
    /// Assertions:
    /// - Confirms the circuit stays closed below the threshold.
    /// - Confirms the call after the threshold is rejected without running.
    #[test]
    fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(3, MockClock::new());

        for _ in 0..2 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert!(breaker.try_acquire());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
        assert_eq!(breaker.metrics().rejected_calls, 1);
    }

    /// Validates `CircuitBreaker::try_acquire` behavior for the single
    /// half-open probe scenario.
    ///
    /// Assertions:
    /// - Confirms the circuit reports HALF_OPEN after the recovery timeout.
    /// - Confirms only one of many callers receives the probe permit.
    /// - Confirms a successful probe closes the circuit.
    #[test]
    fn test_half_open_admits_exactly_one_probe() {
        let clock = MockClock::new();
        let breaker = breaker(1, clock.clone());
        assert!(breaker.try_acquire());
        breaker.record_failure();

        clock.advance(Duration::from_secs(31));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let admitted = (0..10).filter(|_| breaker.try_acquire()).count();
        assert_eq!(admitted, 1);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_count, 0);
    }

    /// Validates `CircuitBreaker::record_failure` behavior for the failed
    /// probe scenario.
    ///
    /// Assertions:
    /// - Confirms a failed probe re-opens the circuit.
    /// - Confirms the recovery timeout restarts from the probe failure.
    #[test]
    fn test_failed_probe_restarts_timeout() {
        let clock = MockClock::new();
        let breaker = breaker(1, clock.clone());
        assert!(breaker.try_acquire());
        breaker.record_failure();

        clock.advance(Duration::from_secs(31));
        assert!(breaker.try_acquire());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(20));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.time_until_half_open(), Some(Duration::from_secs(10)));
        clock.advance(Duration::from_secs(10));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    /// Validates `CircuitBreaker::release` behavior for the non-qualifying
    /// probe outcome scenario.
    ///
    /// Assertions:
    /// - Confirms releasing the probe keeps the circuit half-open.
    /// - Confirms another caller can then take the probe.
    #[test]
    fn test_release_frees_probe_slot() {
        let clock = MockClock::new();
        let breaker = breaker(1, clock.clone());
        assert!(breaker.try_acquire());
        breaker.record_failure();
        clock.advance(Duration::from_secs(30));

        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());
        breaker.release();

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire());
    }

    /// Validates `CircuitBreaker::record_failure` behavior for the failure
    /// window expiry scenario.
    ///
    /// Assertions:
    /// - Confirms failures spread wider than the window never trip.
    #[test]
    fn test_failures_outside_window_do_not_accumulate() {
        let clock = MockClock::new();
        let breaker = breaker(2, clock.clone());

        assert!(breaker.try_acquire());
        breaker.record_failure();
        clock.advance(Duration::from_secs(61));
        assert!(breaker.try_acquire());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_count, 1);
    }

    /// Validates `CircuitBreaker::execute_classified` behavior for the
    /// non-qualifying error scenario.
    ///
    /// Assertions:
    /// - Confirms validation errors never open the circuit.
    /// - Confirms backend errors do.
    #[tokio::test]
    async fn test_execute_classified_ignores_validation_errors() {
        let breaker = breaker(2, MockClock::new());
        let qualifies = |e: &ProbeError| matches!(e, ProbeError::Backend);

        for _ in 0..5 {
            let result: ResilienceResult<(), ProbeError> =
                breaker.execute_classified(|| async { Err(ProbeError::Validation) }, qualifies).await;
            assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..2 {
            let _ = breaker.execute_classified(|| async { Err::<(), _>(ProbeError::Backend) }, qualifies).await;
        }
        let rejected: ResilienceResult<(), ProbeError> = breaker.execute(|| async { Ok(()) }).await;
        assert!(matches!(rejected, Err(ResilienceError::CircuitOpen)));
    }

    /// Validates `CircuitBreaker::try_acquire` behavior for the concurrent
    /// probe race scenario.
    ///
    /// Assertions:
    /// - Confirms exactly one of many threads wins the half-open permit.
    #[test]
    fn test_concurrent_threads_share_one_probe() {
        let clock = MockClock::new();
        let breaker = Arc::new(breaker(1, clock.clone()));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        clock.advance(Duration::from_secs(30));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                std::thread::spawn(move || breaker.try_acquire())
            })
            .collect();
        let admitted = handles.into_iter().filter_map(|h| h.join().ok()).filter(|ok| *ok).count();

        assert_eq!(admitted, 1);
    }

    /// Validates `CallPermit` drop behavior for the cancelled probe scenario.
    ///
    /// Assertions:
    /// - Confirms dropping an unsettled probe permit frees the slot.
    /// - Confirms the next probe can close the circuit.
    #[test]
    fn test_dropped_probe_permit_frees_slot() {
        let clock = MockClock::new();
        let breaker = breaker(1, clock.clone());
        breaker.permit().expect("closed circuit admits").failure();
        clock.advance(Duration::from_secs(30));

        let probe = breaker.permit().expect("half-open admits one probe");
        assert!(probe.is_probe());
        assert!(breaker.permit().is_none());
        drop(probe);

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let retry = breaker.permit().expect("slot freed by drop");
        retry.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Validates `CallPermit` drop behavior for the stale probe scenario.
    ///
    /// Assertions:
    /// - Confirms an old probe permit dropped late does not free the slot
    ///   held by a newer probe.
    #[test]
    fn test_stale_probe_permit_leaves_newer_probe_alone() {
        let clock = MockClock::new();
        let breaker = breaker(1, clock.clone());
        breaker.permit().expect("closed circuit admits").failure();
        clock.advance(Duration::from_secs(30));

        let stale = breaker.permit().expect("first probe");
        breaker.force_open();
        clock.advance(Duration::from_secs(30));
        let current = breaker.permit().expect("second probe after re-open");

        drop(stale);
        assert!(breaker.permit().is_none());
        current.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
