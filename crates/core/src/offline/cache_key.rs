//! Deterministic cache key derivation
//!
//! Keys have the form `{scope}:{selector}` where `scope` is the rendered
//! collection path without the leading slash (`networks`,
//! `networks/net_1/routes`) and `selector` is `list` for collection reads or
//! `id={id}` for item reads. Query parameters are appended in sorted order:
//!
//! - `GET /networks` is `networks:list`
//! - `GET /networks?page=2&name=a` is `networks:list?name=a&page=2`
//! - `GET /networks/{id}` with `id=net_1` is `networks:id=net_1`
//!
//! A write invalidates `{scope}:` (list and item entries of the family) and,
//! for item writes, everything nested under `{scope}/{id}/`.

use std::collections::BTreeMap;

use connexa_domain::{ApiRequest, ResourceOp};

fn scope(request: &ApiRequest) -> Option<String> {
    request.render_collection_path().ok().map(|path| path.trim_start_matches('/').to_string())
}

fn query_suffix(query: &BTreeMap<String, String>) -> String {
    if query.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("?{}", pairs.join("&"))
}

/// Cache key for a read request; `None` for writes or unrenderable paths
pub fn derive_cache_key(request: &ApiRequest) -> Option<String> {
    let scope = scope(request)?;
    match request.operation() {
        ResourceOp::List => Some(format!("{scope}:list{}", query_suffix(&request.query))),
        ResourceOp::Get => {
            let id = request.resource_id()?;
            Some(format!("{scope}:id={id}{}", query_suffix(&request.query)))
        }
        _ => None,
    }
}

/// Cache key of the item a request targets, regardless of method
pub fn item_cache_key(request: &ApiRequest) -> Option<String> {
    let scope = scope(request)?;
    request.resource_id().map(|id| format!("{scope}:id={id}"))
}

/// Prefixes to invalidate after a successful write
pub fn invalidation_prefixes(request: &ApiRequest) -> Vec<String> {
    let Some(scope) = scope(request) else {
        return Vec::new();
    };
    let mut prefixes = vec![format!("{scope}:")];
    if let Some(id) = request.resource_id() {
        prefixes.push(format!("{scope}/{id}/"));
    }
    prefixes
}
