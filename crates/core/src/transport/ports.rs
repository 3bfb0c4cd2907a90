//! Port interface for the wire transport

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use connexa_domain::{HttpMethod, Result};
use serde_json::Value;

/// A fully resolved request as it goes on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: HttpMethod,
    /// Absolute path including the versioned API root
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub idempotency_key: Option<String>,
    /// Per-call deadline covering connect and read
    pub timeout: Option<Duration>,
}

impl WireRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
            idempotency_key: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response as received from the wire, any status
#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub status: u16,
    /// Parsed JSON body, `Value::Null` when empty
    pub body: Value,
    /// `Retry-After` header, when present
    pub retry_after: Option<Duration>,
}

impl WireResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body, retry_after: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the remote API
///
/// Implementations return `Ok` for every HTTP response, including error
/// statuses, and `Err` only when no response was received (connection
/// failure, timeout). Mapping statuses to error kinds is done by
/// [`super::classify`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &WireRequest) -> Result<WireResponse>;
}
