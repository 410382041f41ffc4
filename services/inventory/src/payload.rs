//! Payload merging
//!
//! Discoverers build a record's configuration documents incrementally from
//! several provider calls. Every function here is best-effort: a fragment
//! that cannot be applied is logged and the existing document is returned
//! unchanged, so enrichment never fails a discovery.
//!
//! Merge rules:
//! - object fields in the fragment overwrite or add at the same path,
//!   nested objects merge recursively, untouched fields are preserved
//! - arrays and scalars are replaced wholesale
//! - a null fragment adds nothing
//! - a non-object fragment cannot be applied onto an object

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Merge a single fragment into an optional existing document.
pub fn merge(existing: Option<Value>, fragment: Value) -> Option<Value> {
    match (existing, fragment) {
        (existing, Value::Null) => existing,
        (None, fragment) => Some(fragment),
        (Some(Value::Object(mut base)), Value::Object(patch)) => {
            merge_object(&mut base, patch);
            Some(Value::Object(base))
        }
        (Some(existing @ Value::Object(_)), fragment) => {
            warn!(
                fragment_kind = kind(&fragment),
                "Cannot merge a non-object fragment into an object document"
            );
            Some(existing)
        }
        (Some(_), fragment) => Some(fragment),
    }
}

/// Serialize `fragment` and merge it.
pub fn merge_serialized<T: Serialize + ?Sized>(existing: Option<Value>, fragment: &T) -> Option<Value> {
    match serde_json::to_value(fragment) {
        Ok(value) => merge(existing, value),
        Err(e) => {
            warn!(error = %e, "Failed to serialize payload fragment");
            existing
        }
    }
}

/// Merge each named value one level deeper, under its own key.
pub fn merge_named<I, K, V>(existing: Option<Value>, named: I) -> Option<Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Serialize,
{
    named.into_iter().fold(existing, |acc, (key, value)| {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                let mut wrapper = Map::new();
                wrapper.insert(key, value);
                merge(acc, Value::Object(wrapper))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize named payload fragment");
                acc
            }
        }
    })
}

/// Merge fragments in order, skipping absent ones.
pub fn merge_all<I>(existing: Option<Value>, fragments: I) -> Option<Value>
where
    I: IntoIterator<Item = Option<Value>>,
{
    fragments
        .into_iter()
        .flatten()
        .fold(existing, |acc, fragment| merge(acc, fragment))
}

/// Parse a raw JSON text fragment and merge it.
pub fn merge_json_str(existing: Option<Value>, fragment: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(fragment) {
        Ok(value) => merge(existing, value),
        Err(e) => {
            warn!(error = %e, "Failed to parse payload fragment");
            existing
        }
    }
}

/// Convert a list of tag-like objects into a JSON array.
///
/// Items that fail to serialize are skipped.
pub fn tags_to_array<T: Serialize>(tags: &[T]) -> Value {
    let items = tags
        .iter()
        .filter_map(|tag| match serde_json::to_value(tag) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "Skipping tag that failed to serialize");
                None
            }
        })
        .collect();

    Value::Array(items)
}

/// Convert key/value pairs into a flat tag object. Later keys win.
pub fn tags_to_object<I, K, V>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let map = pairs
        .into_iter()
        .map(|(k, v)| (k.into(), Value::String(v.into())))
        .collect::<Map<String, Value>>();

    Value::Object(map)
}

fn merge_object(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if let Value::Object(nested) = value {
            if let Some(Value::Object(target)) = base.get_mut(&key) {
                merge_object(target, nested);
                continue;
            }
            base.insert(key, Value::Object(nested));
        } else {
            base.insert(key, value);
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
