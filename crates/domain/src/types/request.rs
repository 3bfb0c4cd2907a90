//! Outbound request model
//!
//! A request names a resource by path template (`/networks/{id}`) plus
//! parameters instead of a pre-rendered URL. Keeping the template lets the
//! pipeline derive the resource family, the operation kind and the cache key
//! without string guessing at every call site.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::version::Feature;
use crate::errors::ConnexaError;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the method mutates server state
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = ConnexaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(ConnexaError::Internal(format!("unknown HTTP method '{other}'"))),
        }
    }
}

/// What a request does to its resource family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceOp {
    List,
    Get,
    Create,
    Update,
    Delete,
    /// Anything that does not fit the collection/item pattern
    Action,
}

impl ResourceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Action => "action",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Param(&'a str),
}

fn segments(template: &str) -> impl Iterator<Item = Segment<'_>> {
    template.split('/').filter(|s| !s.is_empty()).map(|s| {
        match s.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
            Some(name) => Segment::Param(name),
            None => Segment::Literal(s),
        }
    })
}

/// An outbound API request
///
/// Immutable once handed to the pipeline. Retries reuse the same value, and
/// therefore the same idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Resource path template relative to the versioned API root,
    /// e.g. `/networks/{id}`
    pub path_template: String,
    pub path_params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub idempotency_key: String,
    /// Overall budget for all attempts of this request
    pub deadline: Option<Duration>,
    /// Whether a write may be deferred to the offline queue
    pub allow_offline_queue: bool,
    /// Capabilities the caller cannot do without
    pub required_features: Vec<Feature>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path_template: impl Into<String>) -> Self {
        Self {
            method,
            path_template: path_template.into(),
            path_params: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
            idempotency_key: Uuid::new_v4().to_string(),
            deadline: None,
            allow_offline_queue: true,
            required_features: Vec::new(),
        }
    }

    pub fn get(path_template: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path_template)
    }

    pub fn post(path_template: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path_template).with_body(body)
    }

    pub fn patch(path_template: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Patch, path_template).with_body(body)
    }

    pub fn put(path_template: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Put, path_template).with_body(body)
    }

    pub fn delete(path_template: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path_template)
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn without_offline_queue(mut self) -> Self {
        self.allow_offline_queue = false;
        self
    }

    pub fn require(mut self, feature: Feature) -> Self {
        if !self.required_features.contains(&feature) {
            self.required_features.push(feature);
        }
        self
    }

    /// Placeholder names in template order
    pub fn placeholders(&self) -> Vec<&str> {
        segments(&self.path_template)
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Resource family: the last literal segment of the template
    /// (`/networks/{network_id}/routes/{id}` is `routes`)
    pub fn family(&self) -> &str {
        segments(&self.path_template)
            .filter_map(|s| match s {
                Segment::Literal(name) => Some(name),
                Segment::Param(_) => None,
            })
            .last()
            .unwrap_or("")
    }

    /// Whether the template addresses a single item (ends in a placeholder)
    pub fn targets_item(&self) -> bool {
        matches!(segments(&self.path_template).last(), Some(Segment::Param(_)))
    }

    /// Value of the trailing placeholder, if the template addresses an item
    pub fn resource_id(&self) -> Option<&str> {
        match segments(&self.path_template).last() {
            Some(Segment::Param(name)) => self.path_params.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Operation implied by the method and template shape
    pub fn operation(&self) -> ResourceOp {
        match (self.method, self.targets_item()) {
            (HttpMethod::Get, false) => ResourceOp::List,
            (HttpMethod::Get, true) => ResourceOp::Get,
            (HttpMethod::Post, false) => ResourceOp::Create,
            (HttpMethod::Put | HttpMethod::Patch, true) => ResourceOp::Update,
            (HttpMethod::Delete, true) => ResourceOp::Delete,
            _ => ResourceOp::Action,
        }
    }

    /// Render the template with the path parameters
    pub fn render_path(&self) -> Result<String, ConnexaError> {
        render(&self.path_template, &self.path_params)
    }

    /// Render the collection path of an item request (template minus its
    /// trailing placeholder)
    pub fn render_collection_path(&self) -> Result<String, ConnexaError> {
        let mut parts: Vec<&str> = self.path_template.split('/').filter(|s| !s.is_empty()).collect();
        if self.targets_item() {
            parts.pop();
        }
        render(&format!("/{}", parts.join("/")), &self.path_params)
    }
}

fn render(template: &str, params: &BTreeMap<String, String>) -> Result<String, ConnexaError> {
    let mut rendered = String::with_capacity(template.len());
    for segment in segments(template) {
        rendered.push('/');
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Param(name) => {
                let value = params.get(name).ok_or_else(|| ConnexaError::Validation {
                    message: format!("missing path parameter '{name}' for '{template}'"),
                    details: None,
                })?;
                rendered.push_str(value);
            }
        }
    }
    if rendered.is_empty() {
        rendered.push('/');
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Validates `ApiRequest::operation` behavior for the method and template
    /// shape scenario.
    ///
    /// Assertions:
    /// - Confirms collection and item templates map to list/get/create/
    ///   update/delete.
    #[test]
    fn test_operation_classification() {
        assert_eq!(ApiRequest::get("/networks").operation(), ResourceOp::List);
        assert_eq!(ApiRequest::get("/networks/{id}").operation(), ResourceOp::Get);
        assert_eq!(ApiRequest::post("/networks", json!({})).operation(), ResourceOp::Create);
        assert_eq!(ApiRequest::patch("/networks/{id}", json!({})).operation(), ResourceOp::Update);
        assert_eq!(ApiRequest::delete("/networks/{id}").operation(), ResourceOp::Delete);
        assert_eq!(ApiRequest::post("/networks/{id}/restart", json!({})).operation(), ResourceOp::Action);
    }

    /// Validates `ApiRequest::render_path` behavior for the nested resource
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms placeholders are substituted in order.
    /// - Confirms the family is the last literal segment.
    /// - Confirms the collection path drops the trailing id.
    #[test]
    fn test_render_nested_paths() {
        let request = ApiRequest::get("/networks/{network_id}/routes/{id}")
            .path_param("network_id", "net_1")
            .path_param("id", "r_9");

        assert_eq!(request.render_path().unwrap(), "/networks/net_1/routes/r_9");
        assert_eq!(request.render_collection_path().unwrap(), "/networks/net_1/routes");
        assert_eq!(request.family(), "routes");
        assert_eq!(request.resource_id(), Some("r_9"));
        assert_eq!(request.placeholders(), vec!["network_id", "id"]);
    }

    /// Validates `ApiRequest::render_path` behavior for the missing parameter
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a missing parameter is a validation error.
    #[test]
    fn test_render_missing_param_is_validation_error() {
        let err = ApiRequest::get("/networks/{id}").render_path().unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Validation);
    }

    /// Validates `ApiRequest::new` behavior for the idempotency key scenario.
    ///
    /// Assertions:
    /// - Confirms each request gets a distinct key and clones share it.
    #[test]
    fn test_idempotency_keys() {
        let a = ApiRequest::post("/networks", json!({"name": "n1"}));
        let b = ApiRequest::post("/networks", json!({"name": "n1"}));
        assert_ne!(a.idempotency_key, b.idempotency_key);
        assert_eq!(a.clone().idempotency_key, a.idempotency_key);
    }
}
