//! Request pipeline - orchestrates one outbound call
//!
//! Each attempt passes the rate limiter, then the circuit breaker, is planned
//! by the version adapter and sent over the transport. The retry executor
//! loops attempts under the request deadline. When the request cannot be
//! resolved live, reads fall back to the offline cache and writes are
//! deferred to the offline queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use connexa_common::resilience::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CounterStore, LocalCounterStore, RateLimitConfig,
    RateLimitError, RateLimiter, RetryConfig, RetryError, RetryExecutor, SharedClock, SystemClock, WindowKind,
};
use connexa_domain::constants::VERSION_PROBE_PATH;
use connexa_domain::{
    ApiRequest, ApiResponse, Attempt, AttemptOutcome, ConnexaConfig, ConnexaError, ExecuteOutcome,
    ExecutionError, QueuedOperation, RateLimitScope, Result,
};
use tracing::{debug, info, instrument, warn};

use super::retry_policy::ApiRetryPolicy;
use crate::offline::{derive_cache_key, invalidation_prefixes, item_cache_key, OfflineStore};
use crate::transport::{into_result, Transport, WireRequest};
use crate::version::VersionAdapter;

const ACCOUNT_BUCKET: &str = "account";

/// Longest a server 429 hint may block a limiter bucket
pub const MAX_SERVER_BLOCK: Duration = Duration::from_secs(3600);

/// Pipeline knobs derived from [`ConnexaConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub request_timeout: Duration,
    pub offline_enabled: bool,
    pub cache_ttl: Duration,
    pub rate_limit_scope: RateLimitScope,
}

impl PipelineSettings {
    pub fn from_config(config: &ConnexaConfig) -> Self {
        Self {
            request_timeout: config.api.request_timeout(),
            offline_enabled: config.offline.enabled,
            cache_ttl: config.offline.default_ttl(),
            rate_limit_scope: config.rate_limit.scope,
        }
    }
}

/// Single entry point for every outbound API call
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    adapter: Arc<VersionAdapter>,
    breaker: Arc<CircuitBreaker<SharedClock>>,
    limiter: Option<Arc<RateLimiter<SharedClock>>>,
    store: Arc<dyn OfflineStore>,
    retry: RetryExecutor<ApiRetryPolicy>,
    settings: PipelineSettings,
    online: AtomicBool,
}

impl RequestPipeline {
    pub fn builder(
        config: ConnexaConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn OfflineStore>,
    ) -> RequestPipelineBuilder {
        RequestPipelineBuilder::new(config, transport, store)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker<SharedClock>> {
        &self.breaker
    }

    pub fn adapter(&self) -> &Arc<VersionAdapter> {
        &self.adapter
    }

    pub fn store(&self) -> &Arc<dyn OfflineStore> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Execute a request, falling back to the offline store when it cannot
    /// be resolved live.
    ///
    /// Returns `Completed` with a live or cached response, `Queued` for a
    /// deferred write, or the unresolved error with attempt context.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path_template))]
    pub async fn execute(&self, request: ApiRequest) -> std::result::Result<ExecuteOutcome, ExecutionError> {
        match self.execute_live(&request).await {
            Ok(response) => Ok(ExecuteOutcome::Completed(response)),
            Err(error) => self.fall_back(&request, error).await,
        }
    }

    /// Execute against the live API only: retries, no cache or queue
    /// fallback. Cache maintenance still runs on success.
    pub async fn execute_live(&self, request: &ApiRequest) -> std::result::Result<ApiResponse, ExecutionError> {
        let deadline = request.deadline.map(|budget| Instant::now() + budget);
        let mut sequence = 0u32;

        let outcome = self
            .retry
            .execute_with_outcome(
                move || {
                    sequence += 1;
                    self.attempt(request, sequence, deadline)
                },
                deadline,
            )
            .await;
        let elapsed = outcome.total_elapsed();

        match outcome.result {
            Ok(response) => {
                self.maintain_cache(request, &response).await;
                Ok(response)
            }
            Err(error) => {
                let attempts = error.attempts();
                let source = match error {
                    RetryError::AttemptsExhausted { source, .. } | RetryError::NonRetryable { source, .. } => {
                        source
                    }
                    RetryError::DeadlineExceeded { last_error, .. } => ConnexaError::Timeout(match last_error {
                        Some(last) => format!("deadline exceeded after {attempts} attempt(s), last error: {last}"),
                        None => format!("deadline exceeded after {attempts} attempt(s)"),
                    }),
                    RetryError::InvalidConfiguration { message } => ConnexaError::Configuration(message),
                };
                debug!(attempts, ?elapsed, kind = ?source.kind(), "request unresolved");
                Err(ExecutionError::new(source, attempts, elapsed))
            }
        }
    }

    /// Whether the API answered recently and the breaker admits calls
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire) && !self.breaker.is_open()
    }

    /// Queued writes awaiting replay
    pub async fn pending_operation_count(&self) -> Result<usize> {
        self.store.pending_count().await
    }

    /// Send one lightweight probe through the breaker.
    ///
    /// Drives the half-open probe when the recovery timeout has elapsed.
    /// Any answer below 500 counts as healthy.
    #[instrument(skip(self))]
    pub async fn probe_health(&self) -> bool {
        let Some(permit) = self.breaker.permit() else {
            debug!(retry_in = ?self.breaker.time_until_half_open(), "health probe skipped, circuit open");
            return false;
        };

        let timeout = self.settings.request_timeout;
        let request = WireRequest::get(VERSION_PROBE_PATH).with_timeout(timeout);
        let result = match tokio::time::timeout(timeout, self.transport.send(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ConnexaError::Timeout(format!("health probe got no response within {timeout:?}"))),
        };

        match result {
            Ok(response) if response.status < 500 => {
                permit.success();
                self.set_online(true);
                true
            }
            Ok(response) => {
                debug!(status = response.status, "health probe answered with server error");
                permit.failure();
                false
            }
            Err(error) => {
                debug!(%error, "health probe failed");
                permit.failure();
                self.set_online(false);
                false
            }
        }
    }

    async fn attempt(
        &self,
        request: &ApiRequest,
        sequence: u32,
        deadline: Option<Instant>,
    ) -> Result<ApiResponse> {
        let started_at = Utc::now();
        let started = Instant::now();

        let result = self.gated_call(request, deadline).await;

        let record = Attempt {
            idempotency_key: request.idempotency_key.clone(),
            sequence,
            started_at,
            latency: started.elapsed(),
            outcome: match &result {
                Ok(_) => AttemptOutcome::Success,
                Err(ConnexaError::Timeout(_)) => AttemptOutcome::Timeout,
                Err(error) => AttemptOutcome::Failure(error.kind()),
            },
        };
        debug!(
            attempt = record.sequence,
            idempotency_key = %record.idempotency_key,
            latency_ms = record.latency.as_millis() as u64,
            outcome = ?record.outcome,
            "attempt finished"
        );
        result
    }

    async fn gated_call(&self, request: &ApiRequest, deadline: Option<Instant>) -> Result<ApiResponse> {
        let bucket = self.bucket_for(request);
        if let Some(limiter) = &self.limiter {
            limiter.acquire(&bucket).await.map_err(|error| match error {
                RateLimitError::Exceeded { bucket, retry_after } => ConnexaError::RateLimit {
                    message: format!("client-side limit reached for bucket '{bucket}'"),
                    retry_after: Some(retry_after),
                },
            })?;
        }

        let Some(permit) = self.breaker.permit() else {
            return Err(ConnexaError::CircuitOpen { retry_in: self.breaker.time_until_half_open() });
        };

        // Cancelling this future drops the permit, which frees a half-open probe slot.
        let result = self.call(request, deadline).await;
        self.record_outcome(permit, &bucket, &result);
        result
    }

    async fn call(&self, request: &ApiRequest, deadline: Option<Instant>) -> Result<ApiResponse> {
        let context = self.adapter.detect_version().await?;
        let mut plan = self.adapter.plan(&context, request)?;

        let timeout = match deadline {
            Some(deadline) => {
                deadline.saturating_duration_since(Instant::now()).min(self.settings.request_timeout)
            }
            None => self.settings.request_timeout,
        };
        plan.wire_request_mut().timeout = Some(timeout);

        let response = match tokio::time::timeout(timeout, self.transport.send(plan.wire_request())).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnexaError::Timeout(format!("no response within {timeout:?}"))),
        };
        let response = into_result(response)?;
        let status = response.status;
        let body = self.adapter.adapt_response(request, &plan, response.body)?;
        Ok(ApiResponse::live(status, body))
    }

    fn record_outcome(&self, permit: CallPermit<'_, SharedClock>, bucket: &str, result: &Result<ApiResponse>) {
        match result {
            Ok(_) => {
                permit.success();
                self.set_online(true);
            }
            Err(error) if error.counts_toward_breaker() => {
                permit.failure();
                if matches!(error, ConnexaError::Network(_) | ConnexaError::Timeout(_)) {
                    self.set_online(false);
                }
            }
            Err(error) => {
                permit.release();
                if let (ConnexaError::RateLimit { retry_after: Some(hint), .. }, Some(limiter)) =
                    (error, &self.limiter)
                {
                    limiter.block_for(bucket, (*hint).min(MAX_SERVER_BLOCK));
                }
            }
        }
    }

    fn bucket_for(&self, request: &ApiRequest) -> String {
        match self.settings.rate_limit_scope {
            RateLimitScope::Account => ACCOUNT_BUCKET.to_string(),
            RateLimitScope::Endpoint => format!("endpoint:{}", request.family()),
        }
    }

    fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::AcqRel);
        if previous != online {
            if online {
                info!("API reachable again");
            } else {
                warn!("API unreachable, switching to offline mode");
            }
        }
    }

    async fn maintain_cache(&self, request: &ApiRequest, response: &ApiResponse) {
        if !self.settings.offline_enabled {
            return;
        }
        if request.method.is_write() {
            for prefix in invalidation_prefixes(request) {
                match self.store.invalidate_prefix(&prefix).await {
                    Ok(removed) if removed > 0 => debug!(prefix = %prefix, removed, "cache invalidated"),
                    Ok(_) => {}
                    Err(error) => warn!(prefix = %prefix, %error, "cache invalidation failed"),
                }
            }
        } else if let Some(key) = derive_cache_key(request) {
            if let Err(error) = self.store.set(&key, &response.body, self.settings.cache_ttl).await {
                warn!(key = %key, %error, "cache refresh failed");
            }
        }
    }

    async fn fall_back(
        &self,
        request: &ApiRequest,
        error: ExecutionError,
    ) -> std::result::Result<ExecuteOutcome, ExecutionError> {
        if !self.settings.offline_enabled || !error.source.allows_offline_fallback() {
            return Err(error);
        }

        if request.method.is_write() {
            if !request.allow_offline_queue {
                return Err(error);
            }
            return self.enqueue(request, error).await;
        }

        let Some(key) = derive_cache_key(request) else {
            return Err(error);
        };
        match self.store.get_entry(&key).await {
            Ok(Some(entry)) => {
                let stale = entry.is_expired();
                info!(key = %key, stale, cause = %error.source, "serving read from offline cache");
                Ok(ExecuteOutcome::Completed(ApiResponse::cached(entry.value, stale)))
            }
            Ok(None) => Err(error),
            Err(store_error) => {
                warn!(key = %key, %store_error, "offline cache lookup failed");
                Err(error)
            }
        }
    }

    async fn enqueue(
        &self,
        request: &ApiRequest,
        error: ExecutionError,
    ) -> std::result::Result<ExecuteOutcome, ExecutionError> {
        let base_snapshot = match item_cache_key(request) {
            Some(key) => match self.store.get_entry(&key).await {
                Ok(entry) => entry.map(|entry| entry.value),
                Err(store_error) => {
                    warn!(key = %key, %store_error, "could not read base snapshot");
                    None
                }
            },
            None => None,
        };

        let operation = match QueuedOperation::from_request(request, base_snapshot) {
            Ok(operation) => operation,
            Err(build_error) => {
                warn!(%build_error, "write could not be captured for replay");
                return Err(error);
            }
        };

        match self.store.enqueue(&operation).await {
            Ok(operation_id) => {
                info!(
                    operation_id = %operation_id,
                    service = %operation.service,
                    method = %operation.method,
                    cause = %error.source,
                    "write queued for replay"
                );
                Ok(ExecuteOutcome::Queued { operation_id })
            }
            Err(store_error) => {
                warn!(%store_error, "offline queue rejected write");
                Err(error)
            }
        }
    }
}

/// Assembles a [`RequestPipeline`] from configuration and injected ports
pub struct RequestPipelineBuilder {
    config: ConnexaConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn OfflineStore>,
    clock: SharedClock,
    counter_store: Option<Arc<dyn CounterStore>>,
    retry_config: Option<RetryConfig>,
}

impl RequestPipelineBuilder {
    pub fn new(config: ConnexaConfig, transport: Arc<dyn Transport>, store: Arc<dyn OfflineStore>) -> Self {
        Self { config, transport, store, clock: Arc::new(SystemClock), counter_store: None, retry_config: None }
    }

    /// Clock for the breaker and limiter windows
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Counter store shared with other limiters or processes
    pub fn counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    /// Override the retry loop derived from `retry` settings
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    pub fn build(self) -> Result<RequestPipeline> {
        let config = self.config;
        config.validate()?;

        let breaker_config = CircuitBreakerConfig::builder()
            .failure_threshold(config.circuit_breaker.failure_threshold)
            .recovery_timeout(config.circuit_breaker.recovery_timeout())
            .failure_window(Some(config.circuit_breaker.failure_window()))
            .build()
            .map_err(|e| ConnexaError::Configuration(e.to_string()))?;
        let breaker = CircuitBreaker::with_clock(breaker_config, self.clock.clone())
            .map_err(|e| ConnexaError::Configuration(e.to_string()))?;

        let limiter = if config.rate_limit.enabled {
            let limit_config = RateLimitConfig {
                limit: config.rate_limit.limit,
                window: config.rate_limit.window(),
                kind: if config.rate_limit.sliding { WindowKind::Sliding } else { WindowKind::Fixed },
                max_wait: config.rate_limit.max_wait(),
                ..RateLimitConfig::default()
            };
            let store = self.counter_store.unwrap_or_else(|| Arc::new(LocalCounterStore::new()));
            let limiter = RateLimiter::with_store(limit_config, store, self.clock.clone())
                .map_err(|e| ConnexaError::Configuration(e.to_string()))?;
            Some(Arc::new(limiter))
        } else {
            None
        };

        let retry_config = match self.retry_config {
            Some(retry_config) => retry_config,
            None => {
                let builder = RetryConfig::builder()
                    .max_attempts(config.retry.max_retries.saturating_add(1))
                    .exponential_backoff(config.retry.backoff_base(), config.retry.backoff_max());
                let builder = if config.retry.jitter { builder.full_jitter() } else { builder.no_jitter() };
                builder.build().map_err(retry_config_error)?
            }
        };
        let retry = RetryExecutor::new(retry_config, ApiRetryPolicy::from_settings(&config.retry));

        let adapter = VersionAdapter::new(self.transport.clone())
            .pinned(config.api.pinned_version()?)
            .with_caller_version(config.api.caller_version)
            .with_probe_timeout(config.api.request_timeout());

        Ok(RequestPipeline {
            transport: self.transport,
            adapter: Arc::new(adapter),
            breaker: Arc::new(breaker),
            limiter,
            store: self.store,
            retry,
            settings: PipelineSettings::from_config(&config),
            online: AtomicBool::new(true),
        })
    }
}

fn retry_config_error(error: RetryError<()>) -> ConnexaError {
    match error {
        RetryError::InvalidConfiguration { message } => ConnexaError::Configuration(message),
        other => ConnexaError::Configuration(format!("{other:?}")),
    }
}
