//! DTO shape differences between protocol versions
//!
//! A [`FieldRule`] names a field that exists up to some version and is gone
//! from `removed_in` onward. Converting toward a version that lacks the field
//! strips it; converting toward a version that has it synthesizes the rule's
//! default when absent. For any value in the newer shape,
//! `to_version(V1_1_0, to_version(V1_0, x)) == x`.

use connexa_domain::constants::FAMILY_IP_SERVICES;
use connexa_domain::ApiVersion;
use serde_json::{json, Map, Value};

/// A field present in older protocol versions only
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub family: String,
    pub field: String,
    pub removed_in: ApiVersion,
    pub default: Value,
}

impl FieldRule {
    fn present_in(&self, version: ApiVersion) -> bool {
        version < self.removed_in
    }
}

/// Rules for the resource families served by the remote API
pub fn default_rules() -> Vec<FieldRule> {
    vec![FieldRule {
        family: FAMILY_IP_SERVICES.to_string(),
        field: "routing".to_string(),
        removed_in: ApiVersion::V1_1_0,
        default: json!({"type": "default", "routes": []}),
    }]
}

/// Converts resource payloads between protocol shapes
#[derive(Debug, Clone, PartialEq)]
pub struct DtoConverter {
    rules: Vec<FieldRule>,
}

impl Default for DtoConverter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl DtoConverter {
    pub fn new(rules: Vec<FieldRule>) -> Self {
        Self { rules }
    }

    /// Reshape `value` (a single resource, an array of them, or a normalized
    /// list envelope) for `target`
    pub fn to_version(&self, family: &str, value: Value, target: ApiVersion) -> Value {
        let rules: Vec<&FieldRule> = self.rules.iter().filter(|r| r.family == family).collect();
        if rules.is_empty() {
            return value;
        }
        match value {
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|item| reshape(&rules, item, target)).collect())
            }
            Value::Object(mut map) if map.get("items").is_some_and(Value::is_array) => {
                if let Some(Value::Array(items)) = map.remove("items") {
                    let items = items.into_iter().map(|item| reshape(&rules, item, target)).collect();
                    map.insert("items".to_string(), Value::Array(items));
                }
                Value::Object(map)
            }
            other => reshape(&rules, other, target),
        }
    }
}

fn reshape(rules: &[&FieldRule], value: Value, target: ApiVersion) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };
    for rule in rules {
        if rule.present_in(target) {
            map.entry(rule.field.clone()).or_insert_with(|| rule.default.clone());
        } else {
            map.remove(&rule.field);
        }
    }
    Value::Object(map)
}

/// Normalize any list response to `{items: [...], pagination: {...}}`.
///
/// Accepts a bare array, `{items: [...]}` or `{data: [...], pagination}`.
/// Missing pagination is synthesized as a single complete page.
pub fn normalize_list(body: Value) -> Value {
    let (items, pagination) = match body {
        Value::Array(items) => (items, None),
        Value::Object(mut map) => {
            let items = match map.remove("items").or_else(|| map.remove("data")) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let pagination = map.remove("pagination").filter(Value::is_object).or_else(|| {
                let keys = ["total", "page", "per_page", "has_more"];
                let flat: Map<String, Value> =
                    keys.iter().filter_map(|k| map.remove(*k).map(|v| ((*k).to_string(), v))).collect();
                (!flat.is_empty()).then_some(Value::Object(flat))
            });
            (items, pagination)
        }
        Value::Null => (Vec::new(), None),
        other => (vec![other], None),
    };

    let count = items.len();
    let mut pagination = match pagination {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    pagination.entry("total").or_insert_with(|| json!(count));
    pagination.entry("page").or_insert_with(|| json!(1));
    pagination.entry("per_page").or_insert_with(|| json!(count));
    pagination.entry("has_more").or_insert_with(|| json!(false));

    json!({"items": items, "pagination": pagination})
}
