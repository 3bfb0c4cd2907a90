//! Periodic connectivity probe and queue drain.
//!
//! Each tick sends one probe through the pipeline's circuit breaker. That is
//! what moves an open circuit to half-open once the recovery timeout has
//! passed, and what flips the online flag back on. When the probe succeeds
//! and writes are waiting, the offline queue is replayed.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use connexa_core::ResilientClient;
//! use connexa_infra::scheduling::{HealthMonitor, HealthMonitorConfig};
//!
//! # async fn example(client: ResilientClient) -> Result<(), connexa_infra::scheduling::SchedulerError> {
//! let mut monitor = HealthMonitor::for_client(
//!     &client,
//!     HealthMonitorConfig { interval: Duration::from_secs(30) },
//! );
//!
//! monitor.start().await?;
//! // ... application runs ...
//! monitor.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use connexa_core::{RequestPipeline, ResilientClient, SyncManager};
use connexa_domain::{HealthSettings, SyncReport};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::scheduling::error::{SchedulerError, SchedulerResult};

type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Health monitor configuration
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Time between probes
    pub interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30) }
    }
}

impl From<&HealthSettings> for HealthMonitorConfig {
    fn from(settings: &HealthSettings) -> Self {
        Self { interval: settings.interval() }
    }
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Probe failed or the circuit is still open
    Unhealthy,
    /// Healthy and the queue was empty
    Idle,
    /// Healthy and the queue was replayed
    Synced(SyncReport),
}

/// Background task that probes the API and drains the offline queue
pub struct HealthMonitor {
    pipeline: Arc<RequestPipeline>,
    sync: Arc<SyncManager>,
    config: HealthMonitorConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl HealthMonitor {
    pub fn new(pipeline: Arc<RequestPipeline>, sync: Arc<SyncManager>, config: HealthMonitorConfig) -> Self {
        Self {
            pipeline,
            sync,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Monitor sharing the pipeline and sync manager of `client`
    pub fn for_client(client: &ResilientClient, config: HealthMonitorConfig) -> Self {
        Self::new(Arc::clone(client.pipeline()), Arc::clone(client.sync_manager()), config)
    }

    /// Start the background task.
    ///
    /// # Errors
    ///
    /// Returns error if the monitor is already running
    #[instrument(skip(self), fields(interval = ?self.config.interval))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        // fresh token so a stopped monitor can be restarted
        self.cancellation_token = CancellationToken::new();

        let pipeline = Arc::clone(&self.pipeline);
        let sync = Arc::clone(&self.sync);
        let interval = self.config.interval;
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::monitor_loop(pipeline, sync, interval, cancel).await;
        });
        *self.task_handle.lock().await = Some(handle);

        info!("Health monitor started");
        Ok(())
    }

    /// Stop the background task and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns error if the monitor is not running or does not stop in time
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            let join_timeout = Duration::from_secs(5);
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|source| SchedulerError::Timeout { duration: join_timeout, source })??;
        }

        info!("Health monitor stopped");
        Ok(())
    }

    /// A monitor is running while its task handle exists and has not finished.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Run a single probe-and-drain cycle.
    pub async fn tick(pipeline: &RequestPipeline, sync: &SyncManager) -> TickOutcome {
        if !pipeline.probe_health().await {
            debug!("health probe reported unhealthy");
            return TickOutcome::Unhealthy;
        }

        match pipeline.pending_operation_count().await {
            Ok(0) => TickOutcome::Idle,
            Ok(pending) => {
                info!(pending, "connectivity restored, replaying offline queue");
                match sync.sync_now().await {
                    Ok(report) => {
                        info!(
                            succeeded = report.succeeded.len(),
                            failed = report.failed.len(),
                            conflicts = report.conflicts.len(),
                            deferred = report.deferred.len(),
                            "offline queue replay finished"
                        );
                        TickOutcome::Synced(report)
                    }
                    Err(err) => {
                        error!(error = %err, "offline queue replay failed");
                        TickOutcome::Idle
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "could not count pending operations");
                TickOutcome::Idle
            }
        }
    }

    async fn monitor_loop(
        pipeline: Arc<RequestPipeline>,
        sync: Arc<SyncManager>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Health monitor loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    Self::tick(&pipeline, &sync).await;
                }
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
