//! Assembles clients from configuration.
//!
//! Every [`ClientFactory::build`] call produces an independent client with
//! its own breaker, limiter and version cache. Clients only share state
//! through the files they are pointed at: the offline database and the
//! optional shared rate limit database.

use std::sync::Arc;

use connexa_common::CounterStore;
use connexa_core::{OfflineStore, RequestPipeline, ResilientClient, Transport};
use connexa_domain::{ConnexaConfig, Result};
use tracing::info;

use crate::config;
use crate::database::{DbManager, DbManagerConfig, SqliteCounterStore, SqliteOfflineStore};
use crate::http::{AccessTokenProvider, HttpTransport};
use crate::scheduling::{HealthMonitor, HealthMonitorConfig};

/// A built client plus its (not yet started) health monitor
pub struct ClientBundle {
    pub client: ResilientClient,
    /// `None` when `health.enabled` is false
    pub monitor: Option<HealthMonitor>,
}

/// Builds [`ResilientClient`]s backed by HTTP and SQLite
#[derive(Debug, Clone)]
pub struct ClientFactory {
    config: ConnexaConfig,
    db_config: DbManagerConfig,
}

impl ClientFactory {
    pub fn new(config: ConnexaConfig) -> Self {
        Self { config, db_config: DbManagerConfig::default() }
    }

    /// Pool settings for the SQLite databases
    pub fn with_db_config(mut self, db_config: DbManagerConfig) -> Self {
        self.db_config = db_config;
        self
    }

    pub fn config(&self) -> &ConnexaConfig {
        &self.config
    }

    /// Build a client that authenticates through `tokens`.
    pub fn build(&self, tokens: Arc<dyn AccessTokenProvider>) -> Result<ResilientClient> {
        config::validate(&self.config)?;
        let api = &self.config.api;
        let transport = HttpTransport::builder(api.base_url.clone())
            .timeout(api.request_timeout())
            .connect_timeout(api.connect_timeout())
            .user_agent(api.user_agent.clone())
            .token_provider(tokens)
            .build()?;
        self.build_with_transport(Arc::new(transport))
    }

    /// Build a client over an arbitrary transport, keeping the SQLite stores.
    pub fn build_with_transport(&self, transport: Arc<dyn Transport>) -> Result<ResilientClient> {
        let offline_db = Arc::new(DbManager::open(&self.config.offline.store_path, self.db_config.clone())?);
        let store: Arc<dyn OfflineStore> = Arc::new(SqliteOfflineStore::new(Arc::clone(&offline_db)));

        let mut builder = RequestPipeline::builder(self.config.clone(), transport, store);
        if let Some(path) = &self.config.rate_limit.shared_store_path {
            let counter_db = if path == offline_db.path() {
                offline_db
            } else {
                Arc::new(DbManager::open(path, self.db_config.clone())?)
            };
            let counters: Arc<dyn CounterStore> = Arc::new(SqliteCounterStore::new(counter_db));
            builder = builder.counter_store(counters);
        }

        let client = ResilientClient::assemble(builder.build()?, &self.config.offline);
        info!(
            base_url = %self.config.api.base_url,
            offline_store = %self.config.offline.store_path.display(),
            shared_limits = self.config.rate_limit.shared_store_path.is_some(),
            "client assembled"
        );
        Ok(client)
    }

    /// Build a client and, if enabled, a health monitor bound to it.
    pub fn build_bundle(&self, tokens: Arc<dyn AccessTokenProvider>) -> Result<ClientBundle> {
        let client = self.build(tokens)?;
        let monitor = self
            .config
            .health
            .enabled
            .then(|| HealthMonitor::for_client(&client, HealthMonitorConfig::from(&self.config.health)));
        Ok(ClientBundle { client, monitor })
    }
}
