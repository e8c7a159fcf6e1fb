use serde_json::Value;

use keel_core::error::KeelError;
use keel_engine::inputs::{CreateAccountInput, UpdateAccountMetadataInput};
use keel_engine::Invocation;

use super::parse_input;
use crate::ToolDeps;

pub fn create_account(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: CreateAccountInput = parse_input(payload)?;
    deps.engine.create_account(inv, input)
}

pub fn update_account_metadata(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: UpdateAccountMetadataInput = parse_input(payload)?;
    deps.engine.update_account_metadata(inv, input)
}
