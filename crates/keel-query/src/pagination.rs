//! Opaque pagination cursors.
//!
//! A cursor is the base64url encoding of canonical JSON
//! `{"v":1, "<sort-key>": "<value>", …}` over a listing's sort tuple.
//! Listings fetch `limit + 1` rows; the extra row yields a `next_cursor`
//! over the last in-page row.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use keel_core::constants::{CURSOR_VERSION, MAX_PAGE_LIMIT};
use keel_core::error::KeelError;
use keel_core::hashing::canonical_json;

pub fn encode_cursor(sort_keys: &[(&str, &str)]) -> String {
    let mut fields = Map::new();
    fields.insert("v".to_string(), json!(CURSOR_VERSION));
    for (key, value) in sort_keys {
        fields.insert((*key).to_string(), json!(value));
    }
    URL_SAFE.encode(canonical_json(&Value::Object(fields)).as_bytes())
}

pub fn decode_cursor(
    cursor: &str,
    required_keys: &[&str],
) -> Result<BTreeMap<String, String>, KeelError> {
    let raw = URL_SAFE
        .decode(cursor.as_bytes())
        .map_err(|_| KeelError::InvalidCursor("not base64url".into()))?;
    let value: Value = serde_json::from_slice(&raw)
        .map_err(|_| KeelError::InvalidCursor("not a JSON object".into()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| KeelError::InvalidCursor("not a JSON object".into()))?;
    if obj.get("v").and_then(Value::as_u64) != Some(CURSOR_VERSION) {
        return Err(KeelError::InvalidCursor("unsupported cursor version".into()));
    }
    let mut keys = BTreeMap::new();
    for key in required_keys {
        let value = obj
            .get(*key)
            .and_then(Value::as_str)
            .ok_or_else(|| KeelError::InvalidCursor(format!("missing sort key '{key}'")))?;
        keys.insert((*key).to_string(), value.to_string());
    }
    Ok(keys)
}

/// Clamp a requested page size into `1..=MAX_PAGE_LIMIT`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

/// Keep the first `limit` rows and, when an extra row proves more data
/// exists, produce a cursor over the last in-page row.
pub fn paginate<T>(
    mut rows: Vec<T>,
    limit: usize,
    cursor_for: impl Fn(&T) -> String,
) -> (Vec<T>, Option<String>) {
    if rows.len() > limit {
        rows.truncate(limit);
        let next = cursor_for(rows.last().expect("limit >= 1"));
        (rows, Some(next))
    } else {
        (rows, None)
    }
}
