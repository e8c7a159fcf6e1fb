//! Tool handlers, grouped by subsystem.

pub mod accounts;
pub mod approvals;
pub mod config_tools;
pub mod ledger;
pub mod periods;
pub mod posture_tools;
pub mod queries;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use keel_core::error::KeelError;
use keel_core::event;
use keel_core::hashing::{claimed_output_hash, stamp_output_hash};
use keel_engine::Invocation;

use crate::ToolDeps;

/// Schema-validate a payload into a typed input. Unknown fields, missing
/// fields, and mistyped values (a JSON float where money belongs) all
/// land here.
pub(crate) fn parse_input<T: DeserializeOwned>(payload: Value) -> Result<T, KeelError> {
    serde_json::from_value(payload).map_err(|e| KeelError::Validation(e.to_string()))
}

/// Stamp a read response and append its event row. Read tools tolerate a
/// logging failure: the caller still receives the result.
pub(crate) fn finish_read(
    deps: &ToolDeps,
    inv: &Invocation,
    mut fields: Map<String, Value>,
    correlation_id: &str,
) -> Result<Value, KeelError> {
    fields.insert("correlation_id".into(), Value::String(correlation_id.to_string()));
    let response = stamp_output_hash(fields);
    let output_hash = claimed_output_hash(&response).unwrap_or_default();
    let entry = event::ok_entry(
        &inv.tool_name,
        &inv.correlation_id,
        &inv.input_hash,
        output_hash,
        inv.elapsed_ms(),
    );
    if let Err(error) = deps.db.append_event(&entry) {
        warn!(tool = %inv.tool_name, %error, "event log append failed on read path");
    }
    Ok(response)
}
