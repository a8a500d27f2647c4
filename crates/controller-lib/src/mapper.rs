//! Document mapping
//!
//! Dynamic custom resources and typed namespaces both end up as a generic
//! JSON document before they reach the upserter.

use crate::error::{SyncError, SyncResult};
use crate::models::MappedObject;
use k8s_openapi::api::core::v1::Namespace;
use serde::Serialize;
use serde_json::Value;

/// Extract the synchronization key and metadata from a raw object
pub fn map_object(raw: Value) -> SyncResult<MappedObject> {
    let metadata = raw.get("metadata");
    let field = |key: &str| {
        metadata
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let name = field("name");
    let identifier = match field("uid") {
        Some(uid) if !uid.is_empty() => uid,
        _ => return Err(SyncError::MissingIdentifier { name }),
    };

    Ok(MappedObject {
        identifier,
        namespace: field("namespace"),
        name: name.unwrap_or_default(),
        body: raw,
    })
}

/// Serialize a typed object into the generic document shape
pub fn to_raw<K: Serialize>(object: &K) -> SyncResult<Value> {
    Ok(serde_json::to_value(object)?)
}

pub fn namespace_to_raw(namespace: &Namespace) -> SyncResult<Value> {
    to_raw(namespace)
}
