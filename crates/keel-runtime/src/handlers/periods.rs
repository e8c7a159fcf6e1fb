use serde_json::Value;

use keel_core::error::KeelError;
use keel_engine::inputs::PeriodInput;
use keel_engine::Invocation;

use super::parse_input;
use crate::ToolDeps;

pub fn close_period(deps: &ToolDeps, inv: &Invocation, payload: Value) -> Result<Value, KeelError> {
    let input: PeriodInput = parse_input(payload)?;
    deps.engine.close_period(inv, input)
}

pub fn lock_period(deps: &ToolDeps, inv: &Invocation, payload: Value) -> Result<Value, KeelError> {
    let input: PeriodInput = parse_input(payload)?;
    deps.engine.lock_period(inv, input)
}
