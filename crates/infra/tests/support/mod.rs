//! Shared helpers for infra integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use connexa_core::ResilientClient;
use connexa_domain::ConnexaConfig;
use connexa_infra::{ClientFactory, StaticToken};
use serde_json::Value;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "integration-token";

/// A mock API plus a scratch directory for the SQLite files.
pub struct TestEnv {
    pub server: MockServer,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn start() -> Self {
        Self { server: MockServer::start().await, dir: TempDir::new().expect("temp dir created") }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Single attempt per call, pinned to 1.1.0, limiter off, no background
    /// monitor.
    pub fn config(&self) -> ConnexaConfig {
        let mut config = ConnexaConfig::for_base_url(self.server.uri());
        config.api.api_version = Some("1.1.0".into());
        config.api.request_timeout_secs = 5;
        config.retry.max_retries = 0;
        config.retry.backoff_base_ms = 1;
        config.retry.backoff_max_ms = 10;
        config.rate_limit.enabled = false;
        config.offline.store_path = self.path("offline.db");
        config.health.enabled = false;
        config
    }

    /// A fresh client over `config`, as a newly started process would build it.
    pub fn client(&self, config: &ConnexaConfig) -> ResilientClient {
        ClientFactory::new(config.clone()).build(Arc::new(StaticToken::new(TOKEN))).expect("client built")
    }

    pub async fn respond(&self, http_method: &str, api_path: &str, status: u16, body: Value) {
        Mock::given(method(http_method))
            .and(path(api_path))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }
}
