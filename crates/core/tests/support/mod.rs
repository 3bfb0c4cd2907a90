//! Shared test helpers for `connexa-core` integration tests.
//!
//! Provides an in-memory stand-in for the remote API that speaks both
//! protocol versions, plus an in-memory offline store, so pipeline and sync
//! scenarios run without sockets or files.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use connexa_core::transport::{Transport, WireRequest, WireResponse};
use connexa_core::{OfflineStore, RequestPipeline, ResilientClient};
use connexa_domain::constants::VERSION_PROBE_PATH;
use connexa_domain::{
    ApiVersion, CacheEntry, ConflictRecord, ConnexaConfig, ConnexaError, HttpMethod, OperationStatus,
    QueuedOperation, Result as DomainResult,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// A failure the fake server produces instead of its normal answer
#[derive(Debug, Clone)]
pub enum Injected {
    /// Answer with this status and optional `Retry-After`
    Status(u16, Option<Duration>),
    /// Drop the connection before answering
    Network,
    /// Apply the request, then lose the response
    DropResponse,
    /// Stall for this long before answering normally
    Delay(Duration),
}

#[derive(Default)]
struct ServerState {
    version: Option<ApiVersion>,
    offline: bool,
    injected: VecDeque<Injected>,
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    idempotent_creates: HashMap<String, Value>,
    next_id: u64,
    requests: Vec<WireRequest>,
}

/// In-memory Cloud Connexa API.
///
/// Collections are keyed by their path relative to the versioned root
/// (`networks`, `networks/net_1/routes`). Under 1.0 the single-resource
/// endpoints of `dns-records` and `user-groups` are not served and the
/// version probe answers 404. POSTs carrying a known idempotency key return
/// the resource created the first time.
pub struct FakeConnexaServer {
    state: Mutex<ServerState>,
    calls: AtomicUsize,
}

impl FakeConnexaServer {
    pub fn new(version: ApiVersion) -> Arc<Self> {
        let state = ServerState { version: Some(version), ..ServerState::default() };
        Arc::new(Self { state: Mutex::new(state), calls: AtomicUsize::new(0) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    /// Add a resource as if created earlier
    pub fn seed(&self, collection: &str, resource: Value) {
        let id = resource["id"].as_str().expect("seeded resource needs a string id").to_string();
        let mut resource = resource;
        if resource.get("updated_at").is_none() {
            resource["updated_at"] = json!(timestamp());
        }
        self.lock().collections.entry(collection.to_string()).or_default().insert(id, resource);
    }

    /// Simulate an edit made by someone else; bumps `updated_at`
    pub fn edit_remote(&self, collection: &str, id: &str, patch: Value) {
        let mut state = self.lock();
        let resource = state
            .collections
            .get_mut(collection)
            .and_then(|items| items.get_mut(id))
            .expect("edited resource must exist");
        merge_into(resource, &patch);
        resource["updated_at"] = json!(timestamp());
    }

    pub fn resource(&self, collection: &str, id: &str) -> Option<Value> {
        self.lock().collections.get(collection).and_then(|items| items.get(id)).cloned()
    }

    pub fn resources(&self, collection: &str) -> Vec<Value> {
        self.lock().collections.get(collection).map(|items| items.values().cloned().collect()).unwrap_or_default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn inject(&self, failure: Injected) {
        self.lock().injected.push_back(failure);
    }

    pub fn inject_n(&self, count: usize, failure: Injected) {
        for _ in 0..count {
            self.inject(failure.clone());
        }
    }

    /// Requests that reached the server (probes included)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.lock().requests.clone()
    }

    /// Requests to anything but the version probe
    pub fn resource_requests(&self) -> Vec<WireRequest> {
        self.requests().into_iter().filter(|r| r.path != VERSION_PROBE_PATH).collect()
    }

    fn handle(&self, request: &WireRequest) -> WireResponse {
        let mut state = self.lock();
        let version = state.version.unwrap_or(ApiVersion::V1_1_0);

        if request.path == VERSION_PROBE_PATH {
            return match version {
                ApiVersion::V1_1_0 => WireResponse::new(200, json!({"version": "1.1.0"})),
                ApiVersion::V1_0 => not_found("version"),
            };
        }

        let Some(relative) = request.path.strip_prefix(&version.path_prefix()) else {
            return not_found(&request.path);
        };
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return not_found(relative);
        }
        let is_item = segments.len() % 2 == 0;
        let (collection, id) = if is_item {
            (segments[..segments.len() - 1].join("/"), Some(segments[segments.len() - 1].to_string()))
        } else {
            (segments.join("/"), None)
        };
        let family = collection.rsplit('/').next().unwrap_or_default().to_string();

        if is_item && version == ApiVersion::V1_0 && matches!(family.as_str(), "dns-records" | "user-groups") {
            return not_found(relative);
        }

        match (request.method, id) {
            (HttpMethod::Get, None) => {
                let items: Vec<Value> = state
                    .collections
                    .get(&collection)
                    .map(|items| {
                        items
                            .values()
                            .filter(|item| match request.query.get("id") {
                                Some(wanted) => item["id"].as_str() == Some(wanted.as_str()),
                                None => true,
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                let total = items.len();
                let body = match version {
                    ApiVersion::V1_0 => json!({
                        "data": items,
                        "pagination": {"total": total, "page": 1, "per_page": 100, "has_more": false}
                    }),
                    ApiVersion::V1_1_0 => Value::Array(items),
                };
                WireResponse::new(200, body)
            }
            (HttpMethod::Get, Some(id)) => match state.collections.get(&collection).and_then(|c| c.get(&id)) {
                Some(item) => WireResponse::new(200, item.clone()),
                None => not_found(&id),
            },
            (HttpMethod::Post, None) => {
                if let Some(key) = &request.idempotency_key {
                    if let Some(existing) = state.idempotent_creates.get(key) {
                        return WireResponse::new(201, existing.clone());
                    }
                }
                let Some(Value::Object(body)) = request.body.clone() else {
                    return WireResponse::new(400, json!({"error": {"message": "body must be an object"}}));
                };
                state.next_id += 1;
                let id = format!("{}_{:03}", family.replace('-', "_"), state.next_id);
                let now = timestamp();
                let mut resource = Value::Object(body);
                resource["id"] = json!(id);
                resource["created_at"] = json!(now);
                resource["updated_at"] = json!(now);
                state.collections.entry(collection).or_default().insert(id, resource.clone());
                if let Some(key) = &request.idempotency_key {
                    state.idempotent_creates.insert(key.clone(), resource.clone());
                }
                WireResponse::new(201, resource)
            }
            (HttpMethod::Put | HttpMethod::Patch, Some(id)) => {
                let Some(resource) = state.collections.get_mut(&collection).and_then(|c| c.get_mut(&id)) else {
                    return not_found(&id);
                };
                let patch = request.body.clone().unwrap_or(Value::Null);
                if request.method == HttpMethod::Put {
                    let mut replaced = patch;
                    replaced["id"] = json!(id);
                    *resource = replaced;
                } else {
                    merge_into(resource, &patch);
                }
                resource["updated_at"] = json!(timestamp());
                WireResponse::new(200, resource.clone())
            }
            (HttpMethod::Delete, Some(id)) => {
                match state.collections.get_mut(&collection).and_then(|c| c.remove(&id)) {
                    Some(_) => WireResponse::new(204, Value::Null),
                    None => not_found(&id),
                }
            }
            _ => WireResponse::new(405, json!({"error": {"message": "method not allowed"}})),
        }
    }
}

#[async_trait]
impl Transport for FakeConnexaServer {
    async fn send(&self, request: &WireRequest) -> DomainResult<WireResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            if state.offline {
                return Err(ConnexaError::Network("connection refused".into()));
            }
            state.injected.pop_front()
        };

        match injected {
            Some(Injected::Status(status, retry_after)) => Ok(WireResponse {
                status,
                body: json!({"error": {"message": format!("injected {status}")}}),
                retry_after,
            }),
            Some(Injected::Network) => Err(ConnexaError::Network("connection reset".into())),
            Some(Injected::DropResponse) => {
                let _applied = self.handle(request);
                Err(ConnexaError::Network("response lost".into()))
            }
            Some(Injected::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.handle(request))
            }
            None => Ok(self.handle(request)),
        }
    }
}

fn not_found(what: &str) -> WireResponse {
    WireResponse::new(404, json!({"error": {"message": format!("{what} not found")}}))
}

fn merge_into(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Default)]
struct StoreState {
    cache: HashMap<String, CacheEntry>,
    operations: Vec<QueuedOperation>,
    conflicts: Vec<ConflictRecord>,
}

/// Offline store kept in memory; queue order is insertion order
#[derive(Default)]
pub struct InMemoryOfflineStore {
    state: Mutex<StoreState>,
}

impl InMemoryOfflineStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Force an entry's expiry into the past
    pub fn expire(&self, key: &str) {
        if let Some(entry) = self.state.lock().unwrap().cache.get_mut(key) {
            entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    pub fn cache_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().unwrap().cache.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl OfflineStore for InMemoryOfflineStore {
    async fn get_entry(&self, key: &str) -> DomainResult<Option<CacheEntry>> {
        Ok(self.state.lock().unwrap().cache.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> DomainResult<()> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| ConnexaError::Storage(e.to_string()))?;
        let entry = CacheEntry { key: key.to_string(), value: value.clone(), stored_at: now, expires_at: now + ttl };
        self.state.lock().unwrap().cache.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> DomainResult<()> {
        self.state.lock().unwrap().cache.remove(key);
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> DomainResult<usize> {
        let mut state = self.state.lock().unwrap();
        let before = state.cache.len();
        state.cache.retain(|key, _| !key.starts_with(prefix));
        Ok(before - state.cache.len())
    }

    async fn enqueue(&self, operation: &QueuedOperation) -> DomainResult<Uuid> {
        self.state.lock().unwrap().operations.push(operation.clone());
        Ok(operation.id)
    }

    async fn list_pending(&self) -> DomainResult<Vec<QueuedOperation>> {
        self.list_by_status(OperationStatus::Pending).await
    }

    async fn list_by_status(&self, status: OperationStatus) -> DomainResult<Vec<QueuedOperation>> {
        Ok(self.state.lock().unwrap().operations.iter().filter(|op| op.status == status).cloned().collect())
    }

    async fn get_operation(&self, id: Uuid) -> DomainResult<Option<QueuedOperation>> {
        Ok(self.state.lock().unwrap().operations.iter().find(|op| op.id == id).cloned())
    }

    async fn update_operation(&self, operation: &QueuedOperation) -> DomainResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .operations
            .iter_mut()
            .find(|op| op.id == operation.id)
            .ok_or_else(|| ConnexaError::Storage(format!("unknown operation {}", operation.id)))?;
        stored.status = operation.status;
        stored.retry_count = operation.retry_count;
        stored.last_error = operation.last_error.clone();
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: OperationStatus, error: Option<&str>) -> DomainResult<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .operations
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or_else(|| ConnexaError::Storage(format!("unknown operation {id}")))?;
        stored.status = status;
        if let Some(error) = error {
            stored.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn pending_count(&self) -> DomainResult<usize> {
        Ok(self.state.lock().unwrap().operations.iter().filter(|op| op.is_pending()).count())
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> DomainResult<()> {
        self.state.lock().unwrap().conflicts.push(record.clone());
        Ok(())
    }

    async fn list_conflicts(&self) -> DomainResult<Vec<ConflictRecord>> {
        Ok(self.state.lock().unwrap().conflicts.clone())
    }

    async fn remove_conflict(&self, id: Uuid) -> DomainResult<Option<ConflictRecord>> {
        let mut state = self.state.lock().unwrap();
        let position = state.conflicts.iter().position(|record| record.id == id);
        Ok(position.map(|index| state.conflicts.remove(index)))
    }
}

/// Configuration tuned for fast, deterministic tests: millisecond backoff,
/// no jitter, no client-side rate limit and a breaker that stays closed
/// unless a test lowers the threshold.
pub fn test_config() -> ConnexaConfig {
    let mut config = ConnexaConfig::for_base_url("http://connexa.test");
    config.api.request_timeout_secs = 5;
    config.retry.max_retries = 2;
    config.retry.backoff_base_ms = 1;
    config.retry.backoff_max_ms = 5;
    config.retry.jitter = false;
    config.circuit_breaker.failure_threshold = 50;
    config.rate_limit.enabled = false;
    config.health.enabled = false;
    config
}

/// Client over the fake server and an in-memory store
pub fn client_for(
    server: &Arc<FakeConnexaServer>,
    store: &Arc<InMemoryOfflineStore>,
    config: ConnexaConfig,
) -> ResilientClient {
    let offline = config.offline.clone();
    let pipeline = RequestPipeline::builder(config, server.clone(), store.clone())
        .build()
        .expect("test config must be valid");
    ResilientClient::assemble(pipeline, &offline)
}

/// Body of a completed outcome
pub fn body_of(outcome: connexa_domain::ExecuteOutcome) -> Value {
    outcome.into_response().expect("expected a completed response").body
}

/// A JSON object without the server-managed timestamps
pub fn without_timestamps(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !matches!(k.as_str(), "created_at" | "updated_at"))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}
