//! Canonical JSON and payload digests.
//!
//! A value tree is serialized with sorted object keys and no whitespace;
//! money and timestamps are already normalized to their canonical string
//! forms by the time they enter a `Value`. `payload_hash` is the lowercase
//! hex SHA-256 of that document. Identical inputs always produce identical
//! digests.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Byte-stable JSON document for `value`.
///
/// `serde_json::Map` is BTreeMap-backed, so object keys serialize in sorted
/// order; nested objects inherit the same property. Compact separators are
/// the serializer default.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).expect("JSON value trees always serialize")
}

/// Hex SHA-256 over the canonical serialization of `value`.
pub fn payload_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute `output_hash` over `fields` and append it, returning the
/// finished response object. Every tool response ends with this field.
pub fn stamp_output_hash(mut fields: Map<String, Value>) -> Value {
    let hash = payload_hash(&Value::Object(fields.clone()));
    fields.insert("output_hash".to_string(), Value::String(hash));
    Value::Object(fields)
}

/// The hash a stamped response claims, if present.
pub fn claimed_output_hash(response: &Value) -> Option<&str> {
    response.get("output_hash").and_then(Value::as_str)
}
