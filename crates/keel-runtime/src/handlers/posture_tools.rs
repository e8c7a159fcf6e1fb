use serde_json::Value;

use keel_core::error::KeelError;
use keel_engine::Invocation;
use keel_posture::consolidation::{consolidation_fields, ConsolidationRequest};
use keel_posture::debt::{debt_fields, DebtRequest};
use keel_posture::posture::{posture_fields, PostureInputs, PostureRequest};
use keel_posture::simulation::{simulation_fields, SimulationRequest};

use super::{finish_read, parse_input};
use crate::ToolDeps;

pub fn compute_capital_posture(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let request: PostureRequest = parse_input(payload)?;
    let inputs = PostureInputs::parse(&request)?;
    finish_read(deps, inv, posture_fields(inputs), &request.correlation_id)
}

pub fn compute_consolidated_posture(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let request: ConsolidationRequest = parse_input(payload)?;
    let fields = consolidation_fields(&request)?;
    finish_read(deps, inv, fields, &request.correlation_id)
}

pub fn simulate_spend(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let request: SimulationRequest = parse_input(payload)?;
    let fields = simulation_fields(&request)?;
    finish_read(deps, inv, fields, &request.correlation_id)
}

pub fn analyze_debt(deps: &ToolDeps, inv: &Invocation, payload: Value) -> Result<Value, KeelError> {
    let request: DebtRequest = parse_input(payload)?;
    let fields = debt_fields(&request)?;
    finish_read(deps, inv, fields, &request.correlation_id)
}
