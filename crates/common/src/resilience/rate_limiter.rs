//! Window-based rate limiting with pluggable counter storage
//!
//! [`RateLimiter`] enforces `limit` calls per `window` for each bucket key
//! using either a fixed window counter or a sliding window approximation
//! (the previous window's count weighted by how much of it still overlaps the
//! sliding interval). Counters live behind the [`CounterStore`] trait: the
//! in-process [`LocalCounterStore`] covers a single process, while a shared
//! store (e.g. a file-backed database with TTL rows) enforces an
//! account-wide limit across processes.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use super::circuit_breaker::{ConfigError, ConfigResult};
use super::clock::{Clock, SystemClock};

/// Counting strategy for a rate limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Counter resets at every window boundary
    Fixed,
    /// Previous window contributes proportionally to its remaining overlap
    Sliding,
}

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum calls per window per bucket
    pub limit: u64,
    /// Window length
    pub window: Duration,
    /// Counting strategy
    pub kind: WindowKind,
    /// Longest time [`RateLimiter::acquire`] blocks before giving up
    pub max_wait: Duration,
    /// Upper bound of the random delay added to each wait
    pub wait_jitter: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
            kind: WindowKind::Sliding,
            max_wait: Duration::from_secs(2),
            wait_jitter: Duration::from_millis(50),
        }
    }
}

impl RateLimitConfig {
    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.limit == 0 {
            return Err(ConfigError::Invalid { message: "limit must be greater than 0".to_string() });
        }
        if self.window.as_millis() == 0 {
            return Err(ConfigError::Invalid {
                message: "window must be at least one millisecond".to_string(),
            });
        }
        Ok(())
    }
}

/// Result of a single `check_and_consume`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the call may proceed (a slot was consumed)
    pub allowed: bool,
    /// How long to wait before the next attempt can succeed; zero if allowed
    pub retry_after: Duration,
    /// Slots left in the current window after this decision
    pub remaining: u64,
}

impl RateDecision {
    fn allow(remaining: u64) -> Self {
        Self { allowed: true, retry_after: Duration::ZERO, remaining }
    }

    fn reject(retry_after: Duration) -> Self {
        Self { allowed: false, retry_after: retry_after.max(Duration::from_millis(1)), remaining: 0 }
    }
}

/// Errors raised by counter storage backends
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CounterStoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by [`RateLimiter::acquire`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for bucket '{bucket}', retry after {retry_after:?}")]
    Exceeded { bucket: String, retry_after: Duration },
}

/// Storage for per-bucket window counters
///
/// Implementations must make `try_increment` atomic with respect to other
/// callers sharing the same store, including callers in other processes for
/// shared stores.
pub trait CounterStore: Send + Sync {
    /// Current count for `bucket` in window `window_id`
    fn count(&self, bucket: &str, window_id: u64) -> Result<u64, CounterStoreError>;

    /// Increment the counter if it is below `limit`.
    ///
    /// Returns the new count, or `None` when the limit was already reached.
    /// `ttl` tells persistent stores how long the row must be kept.
    fn try_increment(
        &self,
        bucket: &str,
        window_id: u64,
        limit: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, CounterStoreError>;
}

#[derive(Debug, Clone, Copy, Default)]
struct WindowCounts {
    window_id: u64,
    current: u64,
    previous: u64,
}

impl WindowCounts {
    fn roll(&mut self, window_id: u64) {
        if window_id == self.window_id {
            return;
        }
        self.previous = if window_id == self.window_id + 1 { self.current } else { 0 };
        self.current = 0;
        self.window_id = window_id;
    }

    fn get(&self, window_id: u64) -> u64 {
        if window_id == self.window_id {
            self.current
        } else if window_id + 1 == self.window_id {
            self.previous
        } else {
            0
        }
    }
}

/// In-process counter store
///
/// Keeps only the current and previous window per bucket, so memory stays
/// bounded by the number of buckets.
#[derive(Debug, Default)]
pub struct LocalCounterStore {
    buckets: DashMap<String, WindowCounts>,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for LocalCounterStore {
    fn count(&self, bucket: &str, window_id: u64) -> Result<u64, CounterStoreError> {
        Ok(self.buckets.get(bucket).map_or(0, |counts| counts.get(window_id)))
    }

    fn try_increment(
        &self,
        bucket: &str,
        window_id: u64,
        limit: u64,
        _ttl: Duration,
    ) -> Result<Option<u64>, CounterStoreError> {
        let mut entry = self
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(|| WindowCounts { window_id, ..WindowCounts::default() });
        entry.roll(window_id);
        if entry.current >= limit {
            return Ok(None);
        }
        entry.current += 1;
        Ok(Some(entry.current))
    }
}

/// Window rate limiter over a [`CounterStore`]
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    clock: C,
    // epoch millis until which a bucket rejects everything (server 429 hints)
    blocked_until: DashMap<String, u64>,
}

impl RateLimiter<SystemClock> {
    /// Create a process-local limiter on the system clock
    pub fn local(config: RateLimitConfig) -> ConfigResult<Self> {
        Self::with_store(config, Arc::new(LocalCounterStore::new()), SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a limiter over an explicit store and clock
    pub fn with_store(config: RateLimitConfig, store: Arc<dyn CounterStore>, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, store, clock, blocked_until: DashMap::new() })
    }

    /// Configuration in effect
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn window_millis(&self) -> u64 {
        self.config.window.as_millis() as u64
    }

    /// Check the bucket and consume one slot if allowed
    pub fn check_and_consume(&self, bucket: &str) -> Result<RateDecision, CounterStoreError> {
        let now_ms = self.clock.millis_since_epoch();

        let blocked = self.blocked_until.get(bucket).map(|until| *until);
        if let Some(until) = blocked {
            if now_ms < until {
                return Ok(RateDecision::reject(Duration::from_millis(until - now_ms)));
            }
            self.blocked_until.remove(bucket);
        }

        let window_ms = self.window_millis();
        let window_id = now_ms / window_ms;
        let into_window = now_ms % window_ms;
        let ttl = self.config.window * 2;

        match self.config.kind {
            WindowKind::Fixed => {
                match self.store.try_increment(bucket, window_id, self.config.limit, ttl)? {
                    Some(count) => Ok(RateDecision::allow(self.config.limit - count)),
                    None => Ok(RateDecision::reject(Duration::from_millis(window_ms - into_window))),
                }
            }
            WindowKind::Sliding => {
                let previous =
                    if window_id == 0 { 0 } else { self.store.count(bucket, window_id - 1)? };
                let overlap = 1.0 - (into_window as f64 / window_ms as f64);
                let weighted_previous = (previous as f64 * overlap).floor() as u64;
                let allowance = self.config.limit.saturating_sub(weighted_previous);

                match self.store.try_increment(bucket, window_id, allowance, ttl)? {
                    Some(count) => Ok(RateDecision::allow(allowance - count)),
                    None => {
                        let current = self.store.count(bucket, window_id)?;
                        Ok(RateDecision::reject(self.sliding_retry_after(
                            previous,
                            current,
                            into_window,
                        )))
                    }
                }
            }
        }
    }

    // Time until floor(previous * (1 - f)) + current < limit, or the window end
    // when the current window alone is full.
    fn sliding_retry_after(&self, previous: u64, current: u64, into_window: u64) -> Duration {
        let window_ms = self.window_millis();
        let until_window_end = window_ms - into_window;
        if current >= self.config.limit || previous == 0 {
            return Duration::from_millis(until_window_end);
        }
        let headroom = (self.config.limit - current) as f64;
        let needed_fraction = 1.0 - headroom / previous as f64;
        let needed_ms = (needed_fraction * window_ms as f64).ceil() as u64 + 1;
        Duration::from_millis(needed_ms.saturating_sub(into_window).min(until_window_end).max(1))
    }

    /// Reject everything on `bucket` for `duration`, e.g. after a server 429
    pub fn block_for(&self, bucket: &str, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let until = self.clock.millis_since_epoch().saturating_add(millis);
        debug!(bucket, ?duration, "Rate limiter bucket blocked by server hint");
        self.blocked_until
            .entry(bucket.to_string())
            .and_modify(|current| *current = (*current).max(until))
            .or_insert(until);
    }

    /// Consume a slot, waiting up to `max_wait` (plus jitter) for one to free up.
    ///
    /// A counter store failure lets the call through with a warning.
    pub async fn acquire(&self, bucket: &str) -> Result<(), RateLimitError> {
        let started = Instant::now();

        loop {
            let decision = match self.check_and_consume(bucket) {
                Ok(decision) => decision,
                Err(error) => {
                    warn!(bucket, %error, "Rate limit counter store failed, allowing call");
                    return Ok(());
                }
            };
            if decision.allowed {
                return Ok(());
            }

            let remaining_budget = self.config.max_wait.saturating_sub(started.elapsed());
            if decision.retry_after > remaining_budget {
                debug!(bucket, retry_after = ?decision.retry_after, "Rate limit wait budget exhausted");
                return Err(RateLimitError::Exceeded {
                    bucket: bucket.to_string(),
                    retry_after: decision.retry_after,
                });
            }

            let jitter = jitter_up_to(self.config.wait_jitter);
            let wait = (decision.retry_after + jitter).min(remaining_budget.max(decision.retry_after));
            debug!(bucket, ?wait, "Rate limited, waiting for a free slot");
            tokio::time::sleep(wait).await;
        }
    }
}

fn jitter_up_to(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

impl<C: Clock> fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.config).finish_non_exhaustive()
    }
}
