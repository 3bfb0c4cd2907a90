//! Conflict detection and resolution for queued writes
//!
//! Detection compares the server state captured when a write was queued with
//! the state re-fetched at replay time: a differing revision counter, a
//! differing `updated_at`, or any differing non-metadata field is a conflict.

use chrono::{DateTime, Utc};
use connexa_domain::constants::{METADATA_FIELDS, UPDATED_AT_FIELD, VERSION_FIELD};
use connexa_domain::{ConflictStrategy, HttpMethod, QueuedOperation};
use serde_json::{Map, Value};

/// What to do with a conflicting queued write
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Drop the local write and adopt server state
    Discard,
    /// Send the write with this body (`None` for deletes)
    Apply(Option<Value>),
    /// Leave the operation for an operator
    Park,
}

/// Whether `remote` diverged from the snapshot taken at enqueue time.
///
/// Without a snapshot there is nothing to compare and the write applies.
pub fn detect_conflict(base: Option<&Value>, remote: &Value) -> bool {
    let Some(base) = base else {
        return false;
    };

    for field in [VERSION_FIELD, UPDATED_AT_FIELD] {
        if let (Some(before), Some(after)) = (base.get(field), remote.get(field)) {
            if before != after {
                return true;
            }
        }
    }

    business_fields(base) != business_fields(remote)
}

fn business_fields(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => {
            map.iter().filter(|(k, _)| !METADATA_FIELDS.contains(&k.as_str())).map(|(k, v)| (k.clone(), v.clone())).collect()
        }
        _ => Map::new(),
    }
}

/// Parse the server's last-modified timestamp of a resource
pub fn updated_at(value: &Value) -> Option<DateTime<Utc>> {
    value
        .get(UPDATED_AT_FIELD)
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Field-wise merge of a local write into diverged server state.
///
/// Fields the server left untouched since `base` take the local value. Fields
/// changed on both sides go to whichever side is newer: the local write is
/// dated `local_at`, the server side by its `updated_at` (a server value
/// without a timestamp loses). Metadata fields are never sent.
pub fn merge_fields(local: &Value, base: Option<&Value>, remote: &Value, local_at: DateTime<Utc>) -> Value {
    let mut merged = business_fields(remote);
    let remote_at = updated_at(remote);
    let local_newer = remote_at.map_or(true, |remote_at| local_at > remote_at);

    if let Value::Object(local) = local {
        for (field, local_value) in local {
            if METADATA_FIELDS.contains(&field.as_str()) {
                continue;
            }
            let remote_value = remote.get(field);
            if remote_value == Some(local_value) {
                continue;
            }
            let remote_changed = match base {
                Some(base) => base.get(field) != remote_value,
                None => true,
            };
            if !remote_changed || local_newer {
                merged.insert(field.clone(), local_value.clone());
            }
        }
    }

    Value::Object(merged)
}

/// Apply `strategy` to a queued write whose target diverged to `remote`
pub fn resolve(strategy: ConflictStrategy, operation: &QueuedOperation, remote: &Value) -> Resolution {
    match strategy {
        ConflictStrategy::ServerWins => Resolution::Discard,
        ConflictStrategy::ClientWins if operation.method == HttpMethod::Delete => Resolution::Apply(None),
        ConflictStrategy::ClientWins => Resolution::Apply(Some(operation.kwargs.clone())),
        ConflictStrategy::Merge if operation.method == HttpMethod::Delete => {
            // An edit made after the delete was queued outlives it
            match updated_at(remote) {
                Some(remote_at) if remote_at > operation.enqueued_at => Resolution::Discard,
                _ => Resolution::Apply(None),
            }
        }
        ConflictStrategy::Merge => Resolution::Apply(Some(merge_fields(
            &operation.kwargs,
            operation.base_snapshot.as_ref(),
            remote,
            operation.enqueued_at,
        ))),
        ConflictStrategy::Manual => Resolution::Park,
    }
}
