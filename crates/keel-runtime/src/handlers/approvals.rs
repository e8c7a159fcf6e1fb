use serde_json::Value;

use keel_core::error::KeelError;
use keel_engine::inputs::DecisionInput;
use keel_engine::Invocation;

use super::parse_input;
use crate::ToolDeps;

pub fn approve_proposed_transaction(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: DecisionInput = parse_input(payload)?;
    deps.engine.approve_proposed_transaction(inv, input)
}

pub fn reject_proposed_transaction(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: DecisionInput = parse_input(payload)?;
    deps.engine.reject_proposed_transaction(inv, input)
}
