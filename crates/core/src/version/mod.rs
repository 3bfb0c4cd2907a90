//! Protocol version detection and request/response adaptation
//!
//! The adapter resolves a [`VersionContext`] once per session and every call
//! branches on it explicitly: a request is turned into a [`CallPlan`] that is
//! either a direct call or a list-and-select emulation, and responses are
//! reshaped into the caller's expected DTO shape.

pub mod dto;

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use connexa_domain::constants::{
    FAMILY_DNS_RECORDS, FAMILY_IP_SERVICES, FAMILY_NETWORKS, FAMILY_USER_GROUPS, VERSION_PROBE_PATH,
};
use connexa_domain::{
    ApiRequest, ApiVersion, ConnexaError, Feature, ResourceOp, Result, VersionContext, VersionSource,
};
pub use dto::{default_rules, normalize_list, DtoConverter, FieldRule};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::transport::{error_from_response, Transport, WireRequest};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LIST_FILTER_PARAM: &str = "id";

/// How a request is carried out under the detected version
#[derive(Debug, Clone, PartialEq)]
pub enum CallPlan {
    /// The request maps onto a native endpoint
    Direct(WireRequest),
    /// Single-resource read synthesized from the collection listing
    ListAndSelect { list: WireRequest, id: String },
}

impl CallPlan {
    pub fn wire_request(&self) -> &WireRequest {
        match self {
            Self::Direct(request) => request,
            Self::ListAndSelect { list, .. } => list,
        }
    }

    pub fn wire_request_mut(&mut self) -> &mut WireRequest {
        match self {
            Self::Direct(request) => request,
            Self::ListAndSelect { list, .. } => list,
        }
    }

    pub fn is_emulated(&self) -> bool {
        matches!(self, Self::ListAndSelect { .. })
    }
}

/// Makes the two wire protocols look like one to callers
pub struct VersionAdapter {
    transport: Arc<dyn Transport>,
    pinned: Option<ApiVersion>,
    caller_version: ApiVersion,
    converter: DtoConverter,
    probe_timeout: Duration,
    list_filter_param: Option<String>,
    context: RwLock<Option<VersionContext>>,
    probe_guard: Mutex<()>,
}

impl VersionAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pinned: None,
            caller_version: ApiVersion::V1_1_0,
            converter: DtoConverter::default(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            list_filter_param: Some(DEFAULT_LIST_FILTER_PARAM.to_string()),
            context: RwLock::new(None),
            probe_guard: Mutex::new(()),
        }
    }

    /// Skip detection and always use `version`
    pub fn pinned(mut self, version: Option<ApiVersion>) -> Self {
        self.pinned = version;
        self
    }

    /// DTO shape callers expect
    pub fn with_caller_version(mut self, version: ApiVersion) -> Self {
        self.caller_version = version;
        self
    }

    pub fn with_converter(mut self, converter: DtoConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Server-side filter used when emulating single reads; `None` lists
    /// the whole collection
    pub fn with_list_filter_param(mut self, param: Option<String>) -> Self {
        self.list_filter_param = param;
        self
    }

    pub fn caller_version(&self) -> ApiVersion {
        self.caller_version
    }

    /// Context established earlier in this session, if any
    pub fn cached_context(&self) -> Option<VersionContext> {
        self.context.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Resolve the session's version, probing at most once.
    ///
    /// Concurrent callers wait for a single in-flight probe. A probe that
    /// fails without an answer is not cached, so the next call probes again.
    #[instrument(skip(self))]
    pub async fn detect_version(&self) -> Result<VersionContext> {
        if let Some(context) = self.cached_context() {
            return Ok(context);
        }

        let _guard = self.probe_guard.lock().await;
        if let Some(context) = self.cached_context() {
            return Ok(context);
        }

        let context = match self.pinned {
            Some(version) => VersionContext::new(version, VersionSource::Pinned),
            None => VersionContext::new(self.probe().await?, VersionSource::Probe),
        };
        info!(version = %context.version, source = ?context.source, "API version resolved");
        self.store_context(Some(context.clone()));
        Ok(context)
    }

    /// Drop the cached context and detect again
    pub async fn reprobe(&self) -> Result<VersionContext> {
        {
            let _guard = self.probe_guard.lock().await;
            self.store_context(None);
        }
        self.detect_version().await
    }

    fn store_context(&self, context: Option<VersionContext>) {
        *self.context.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = context;
    }

    async fn probe(&self) -> Result<ApiVersion> {
        let request = WireRequest::get(VERSION_PROBE_PATH).with_timeout(self.probe_timeout);
        let response = self.transport.send(&request).await.map_err(|err| {
            warn!(error = %err, "version probe failed");
            err
        })?;

        match response.status {
            200..=299 => Ok(ApiVersion::V1_1_0),
            401 | 403 | 429 | 500..=599 => Err(error_from_response(&response)),
            status => {
                debug!(status, "version probe not served, assuming 1.0");
                Ok(ApiVersion::V1_0)
            }
        }
    }

    /// Decide how `request` runs under `context`.
    ///
    /// Fails with `FeatureNotSupported` when a needed capability is missing
    /// and cannot be emulated.
    pub fn plan(&self, context: &VersionContext, request: &ApiRequest) -> Result<CallPlan> {
        let mut emulate_read = false;
        for feature in needed_features(request) {
            if context.supports(feature) {
                continue;
            }
            match emulation(feature, request) {
                Emulation::ListAndSelect => emulate_read = true,
                Emulation::ShapeConversion => {}
                Emulation::Impossible => {
                    return Err(ConnexaError::FeatureNotSupported {
                        feature: feature.as_str().to_string(),
                        version: context.version.to_string(),
                    });
                }
            }
        }

        let prefix = context.version.path_prefix();
        if emulate_read {
            let id = request.resource_id().map(str::to_string).ok_or_else(|| ConnexaError::Validation {
                message: format!("missing resource id for '{}'", request.path_template),
                details: None,
            })?;
            let mut list = WireRequest::get(format!("{prefix}{}", request.render_collection_path()?));
            list.query = request.query.clone();
            if let Some(param) = &self.list_filter_param {
                list.query.insert(param.clone(), id.clone());
            }
            list.idempotency_key = Some(request.idempotency_key.clone());
            return Ok(CallPlan::ListAndSelect { list, id });
        }

        let mut wire = WireRequest::new(request.method, format!("{prefix}{}", request.render_path()?));
        wire.query = request.query.clone();
        wire.body = request.body.clone().map(|body| self.to_wire(context, request.family(), body));
        wire.idempotency_key = Some(request.idempotency_key.clone());
        Ok(CallPlan::Direct(wire))
    }

    /// Reshape a successful response body for the caller
    pub fn adapt_response(&self, request: &ApiRequest, plan: &CallPlan, body: Value) -> Result<Value> {
        let family = request.family();
        match plan {
            CallPlan::ListAndSelect { id, .. } => {
                let listing = normalize_list(body);
                let item = listing
                    .get("items")
                    .and_then(Value::as_array)
                    .and_then(|items| items.iter().find(|item| id_matches(item, id)))
                    .cloned()
                    .ok_or_else(|| ConnexaError::NotFound { resource: format!("{family}/{id}") })?;
                Ok(self.to_caller(family, item))
            }
            CallPlan::Direct(_) if request.operation() == ResourceOp::List => {
                Ok(self.to_caller(family, normalize_list(body)))
            }
            CallPlan::Direct(_) => Ok(self.to_caller(family, body)),
        }
    }

    /// Caller-shaped payload to the wire shape of `context`
    pub fn to_wire(&self, context: &VersionContext, family: &str, payload: Value) -> Value {
        self.converter.to_version(family, payload, context.version)
    }

    /// Wire payload to the caller shape
    pub fn to_caller(&self, family: &str, payload: Value) -> Value {
        self.converter.to_version(family, payload, self.caller_version)
    }
}

enum Emulation {
    ListAndSelect,
    ShapeConversion,
    Impossible,
}

fn emulation(feature: Feature, request: &ApiRequest) -> Emulation {
    match feature {
        Feature::DnsSingleRecord | Feature::UserGroupSingle | Feature::NetworkSingle
            if request.operation() == ResourceOp::Get =>
        {
            Emulation::ListAndSelect
        }
        Feature::IpServiceWithoutRouting => Emulation::ShapeConversion,
        _ => Emulation::Impossible,
    }
}

/// Capabilities a request depends on: those implied by its family and shape
/// plus those the caller declared
fn needed_features(request: &ApiRequest) -> BTreeSet<Feature> {
    let mut features: BTreeSet<Feature> = request.required_features.iter().copied().collect();
    let item = request.targets_item();
    match request.family() {
        FAMILY_DNS_RECORDS if item => features.insert(Feature::DnsSingleRecord),
        FAMILY_DNS_RECORDS => features.insert(Feature::DnsList),
        FAMILY_USER_GROUPS if item => features.insert(Feature::UserGroupSingle),
        FAMILY_USER_GROUPS => features.insert(Feature::UserGroupList),
        FAMILY_NETWORKS if item => features.insert(Feature::NetworkSingle),
        FAMILY_IP_SERVICES if !item && request.operation() == ResourceOp::List => {
            features.insert(Feature::IpServiceList)
        }
        _ => false,
    };
    features
}

fn id_matches(item: &Value, id: &str) -> bool {
    match item.get("id") {
        Some(Value::String(value)) => value == id,
        Some(Value::Number(value)) => value.to_string() == id,
        _ => false,
    }
}
