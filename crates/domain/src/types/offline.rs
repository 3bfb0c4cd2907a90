//! Offline cache entries, queued writes and sync conflicts

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::request::{ApiRequest, HttpMethod};
use crate::errors::ConnexaError;

/// A cached read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Lifecycle of a queued write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Completed,
    Failed,
    /// Parked until an operator resolves the recorded conflict
    Conflict,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ConnexaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            other => Err(ConnexaError::Storage(format!("unknown operation status '{other}'"))),
        }
    }
}

/// A write deferred while the API was unreachable
///
/// `service` is the resource family, `method` the HTTP method, `args` the
/// path parameter values in template order and `kwargs` the request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub service: String,
    pub method: HttpMethod,
    pub path_template: String,
    pub args: Vec<String>,
    pub kwargs: Value,
    pub idempotency_key: String,
    /// Server state of the target resource last seen before the write was
    /// queued; used to detect remote divergence on replay
    pub base_snapshot: Option<Value>,
    pub enqueued_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Capture a write request for later replay
    pub fn from_request(request: &ApiRequest, base_snapshot: Option<Value>) -> Result<Self, ConnexaError> {
        let args = request
            .placeholders()
            .into_iter()
            .map(|name| {
                request.path_params.get(name).cloned().ok_or_else(|| ConnexaError::Validation {
                    message: format!("missing path parameter '{name}'"),
                    details: None,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: Uuid::new_v4(),
            service: request.family().to_string(),
            method: request.method,
            path_template: request.path_template.clone(),
            args,
            kwargs: request.body.clone().unwrap_or_else(|| Value::Object(Map::new())),
            idempotency_key: request.idempotency_key.clone(),
            base_snapshot,
            enqueued_at: Utc::now(),
            status: OperationStatus::Pending,
            retry_count: 0,
            last_error: None,
        })
    }

    /// Rebuild the request for replay.
    ///
    /// The idempotency key is preserved and offline queueing is disabled so a
    /// replay failure is reported instead of re-queued.
    pub fn to_request(&self) -> Result<ApiRequest, ConnexaError> {
        let mut request = ApiRequest::new(self.method, self.path_template.clone())
            .with_idempotency_key(self.idempotency_key.clone())
            .without_offline_queue();
        let placeholders: Vec<String> = request.placeholders().into_iter().map(str::to_string).collect();
        if placeholders.len() != self.args.len() {
            return Err(ConnexaError::Storage(format!(
                "queued operation {} has {} args for {} placeholders",
                self.id,
                self.args.len(),
                placeholders.len()
            )));
        }
        for (name, value) in placeholders.into_iter().zip(self.args.iter()) {
            request.path_params.insert(name, value.clone());
        }
        if self.method != HttpMethod::Delete {
            request.body = Some(self.kwargs.clone());
        }
        Ok(request)
    }

    /// Id of the target resource for item-level writes
    pub fn resource_id(&self) -> Option<&str> {
        if self.path_template.trim_end_matches('/').ends_with('}') {
            self.args.last().map(String::as_str)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Pending
    }

    pub fn mark_completed(&mut self) {
        self.status = OperationStatus::Completed;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.last_error = Some(error.into());
    }

    /// Count a failed replay. Returns `true` when the retry budget is spent
    /// and the operation moved to `Failed`.
    pub fn record_retry(&mut self, error: impl Into<String>, max_retries: u32) -> bool {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        if self.retry_count >= max_retries {
            self.status = OperationStatus::Failed;
            true
        } else {
            false
        }
    }
}

/// Policy for reconciling a queued write with diverged server state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Discard the local write and adopt server state
    #[default]
    ServerWins,
    /// Force the local write over server state
    ClientWins,
    /// Keep the newer-by-timestamp value of each differing field
    Merge,
    /// Park the conflict for an operator
    Manual,
}

impl FromStr for ConflictStrategy {
    type Err = ConnexaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "server_wins" => Ok(Self::ServerWins),
            "client_wins" => Ok(Self::ClientWins),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(ConnexaError::Configuration(format!("unknown conflict strategy '{other}'"))),
        }
    }
}

/// A queued write whose target diverged server-side, awaiting resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub operation_id: Uuid,
    pub service: String,
    pub resource_id: String,
    pub local: Value,
    pub remote: Value,
    pub detected_at: DateTime<Utc>,
}

/// Result of one queue drain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Operations that reached `Completed` (including server-wins discards)
    pub succeeded: Vec<Uuid>,
    /// Operations that reached `Failed`
    pub failed: Vec<Uuid>,
    /// Operations parked as conflicts for manual resolution
    pub conflicts: Vec<Uuid>,
    /// Operations still pending after a transient failure
    pub deferred: Vec<Uuid>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty() && self.conflicts.is_empty() && self.deferred.is_empty()
    }
}
