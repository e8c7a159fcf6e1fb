use serde_json::Value;

use keel_core::error::KeelError;
use keel_engine::inputs::{BundleInput, ObligationInput, SnapshotInput};
use keel_engine::Invocation;

use super::parse_input;
use crate::ToolDeps;

pub fn record_transaction_bundle(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: BundleInput = parse_input(payload)?;
    deps.engine.record_transaction_bundle(inv, input)
}

pub fn record_balance_snapshot(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: SnapshotInput = parse_input(payload)?;
    deps.engine.record_balance_snapshot(inv, input)
}

pub fn create_or_update_obligation(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: ObligationInput = parse_input(payload)?;
    deps.engine.create_or_update_obligation(inv, input)
}
