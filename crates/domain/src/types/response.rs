//! Responses, execution outcomes and per-attempt records

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::ErrorKind;

/// Where a response body came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ResponseSource {
    /// Answered by the remote API during this call
    Live,
    /// Served from the offline cache because the live call failed.
    /// `stale` is set when the entry was past its expiry.
    Cache { stale: bool },
}

/// A response in the caller-facing shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    pub source: ResponseSource,
}

impl ApiResponse {
    pub fn live(status: u16, body: Value) -> Self {
        Self { status, body, source: ResponseSource::Live }
    }

    pub fn cached(body: Value, stale: bool) -> Self {
        Self { status: 200, body, source: ResponseSource::Cache { stale } }
    }

    pub fn is_from_cache(&self) -> bool {
        matches!(self.source, ResponseSource::Cache { .. })
    }

    /// Items of a normalized list response
    pub fn items(&self) -> Option<&Vec<Value>> {
        self.body.get("items").and_then(Value::as_array)
    }
}

/// Result of `execute` that is not an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ExecuteOutcome {
    /// The request completed (live or from cache)
    Completed(ApiResponse),
    /// The write was accepted into the offline queue and will be replayed
    Queued { operation_id: Uuid },
}

impl ExecuteOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Queued { .. } => None,
        }
    }

    pub fn into_response(self) -> Option<ApiResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Queued { .. } => None,
        }
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure(ErrorKind),
    Timeout,
}

/// One try of a request; discarded once the request resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub idempotency_key: String,
    /// 1-based attempt number
    pub sequence: u32,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    pub outcome: AttemptOutcome,
}
