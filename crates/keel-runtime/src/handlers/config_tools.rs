use serde::Deserialize;
use serde_json::{json, Map, Value};

use keel_core::error::KeelError;
use keel_core::money;
use keel_engine::inputs::{DecisionInput, ProposeConfigChangeInput};
use keel_engine::Invocation;

use super::{finish_read, parse_input};
use crate::ToolDeps;

pub fn propose_config_change(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: ProposeConfigChangeInput = parse_input(payload)?;
    deps.engine.propose_config_change(inv, input)
}

pub fn approve_config_change(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: DecisionInput = parse_input(payload)?;
    deps.engine.approve_config_change(inv, input)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GetConfigInput {
    correlation_id: String,
}

/// Effective runtime settings: static configuration overlaid with
/// committed config changes. Token identities never leave the process.
pub fn get_config(deps: &ToolDeps, inv: &Invocation, payload: Value) -> Result<Value, KeelError> {
    let input: GetConfigInput = parse_input(payload)?;

    let mut fields = Map::new();
    fields.insert("app_env".into(), json!(deps.config.app_env));
    fields.insert("money_precision".into(), json!(deps.config.money_precision));
    fields.insert(
        "balance_source_policy".into(),
        json!(deps.engine.effective_balance_policy()?.as_str()),
    );
    fields.insert(
        "approval_threshold_amount".into(),
        json!(money::format_amount(deps.engine.effective_threshold()?)),
    );
    fields.insert(
        "egress_allowlist".into(),
        json!(deps.config.egress_allowlist),
    );
    finish_read(deps, inv, fields, &input.correlation_id)
}
