//! Admin-gated runtime configuration changes.
//!
//! A settings change is proposed like any other gated write and applied on
//! approval to a persisted override map consulted by the policy engine and
//! `get_config`, so the change takes effect without a restart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use keel_core::config::BalanceSourcePolicy;
use keel_core::constants::DEFAULT_ENTITY_ID;
use keel_core::error::KeelError;
use keel_core::event;
use keel_core::hashing::{canonical_json, stamp_output_hash};
use keel_core::records::{new_id, DecisionAction, Proposal, ProposalStatus};
use keel_core::{money, time};
use keel_store::{StagedWrite, StoreDb};

use crate::approval::CONFIG_TOOL;
use crate::inputs::{DecisionInput, ProposeConfigChangeInput};
use crate::{Engine, Invocation};

const OVERRIDES_META_KEY: &str = "config_overrides";

/// The change a config proposal carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigChangeRequest {
    pub scope: String,
    pub change_payload: Value,
}

/// A committed override for `scope`, if any.
pub fn read_override(db: &StoreDb, scope: &str) -> Result<Option<String>, KeelError> {
    let Some(raw) = db.get_meta(OVERRIDES_META_KEY)? else {
        return Ok(None);
    };
    let overrides: BTreeMap<String, String> =
        serde_json::from_slice(&raw).map_err(|e| KeelError::Serialization(e.to_string()))?;
    Ok(overrides.get(scope).cloned())
}

fn change_value(change_payload: &Value) -> Result<&str, KeelError> {
    change_payload
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            KeelError::Validation("change_payload must carry a string 'value' field".into())
        })
}

fn validate_change(scope: &str, change_payload: &Value) -> Result<(), KeelError> {
    let value = change_value(change_payload)?;
    match scope {
        "approval_threshold_amount" => {
            let amount = money::parse_amount(value)?;
            if amount.is_sign_negative() {
                return Err(KeelError::Validation(
                    "approval threshold must be non-negative".into(),
                ));
            }
            Ok(())
        }
        "balance_source_policy" => BalanceSourcePolicy::parse(value).map(|_| ()),
        other => Err(KeelError::Validation(format!(
            "config scope must be approval_threshold_amount|balance_source_policy, got '{other}'"
        ))),
    }
}

impl Engine {
    pub fn propose_config_change(
        &self,
        inv: &Invocation,
        input: ProposeConfigChangeInput,
    ) -> Result<Value, KeelError> {
        validate_change(&input.scope, &input.change_payload)?;

        let _guard = self.db.write_guard();

        if let Some(existing) =
            self.db
                .proposal_for_key(CONFIG_TOOL, &input.source_system, &input.external_id)?
        {
            let response = Self::config_proposed_response(
                &existing.proposal_id,
                "idempotent-replay",
                &input.correlation_id,
            );
            let output_hash = Self::response_hash(&response)?;
            self.db.append_event(&event::ok_entry(
                &inv.tool_name,
                &inv.correlation_id,
                &inv.input_hash,
                &output_hash,
                inv.elapsed_ms(),
            ))?;
            return Ok(response);
        }

        let request = ConfigChangeRequest {
            scope: input.scope.clone(),
            change_payload: input.change_payload.clone(),
        };
        let proposal = Proposal {
            proposal_id: new_id(),
            tool_name: CONFIG_TOOL.to_string(),
            source_system: input.source_system.clone(),
            external_id: input.external_id.clone(),
            correlation_id: input.correlation_id.clone(),
            input_hash: inv.input_hash.clone(),
            policy_threshold_amount: "0.0000".to_string(),
            impact_amount: "0.0000".to_string(),
            status: ProposalStatus::Proposed,
            matched_rule_id: None,
            required_approvals: 1,
            entity_id: DEFAULT_ENTITY_ID.to_string(),
            request_payload: canonical_json(
                &serde_json::to_value(&request)
                    .map_err(|e| KeelError::Serialization(e.to_string()))?,
            ),
            response_payload: None,
            output_hash: None,
            approved_transaction_id: None,
            decision_reason: None,
            created_at: time::format_utc(time::now_utc()),
        };
        let response = Self::config_proposed_response(
            &proposal.proposal_id,
            "proposed",
            &input.correlation_id,
        );
        let output_hash = Self::response_hash(&response)?;

        let mut staged = StagedWrite::new();
        self.db.stage_insert_proposal(&mut staged, &proposal)?;
        self.db.stage_proposal_result(
            &mut staged,
            &proposal.proposal_id,
            ProposalStatus::Proposed,
            &canonical_json(&response),
            &output_hash,
            None,
            None,
        )?;
        self.db.stage_event(
            &mut staged,
            &event::ok_entry(
                &inv.tool_name,
                &inv.correlation_id,
                &inv.input_hash,
                &output_hash,
                inv.elapsed_ms(),
            ),
        )?;
        self.db.commit(staged)?;
        Ok(response)
    }

    pub fn approve_config_change(
        &self,
        inv: &Invocation,
        input: DecisionInput,
    ) -> Result<Value, KeelError> {
        let _guard = self.db.write_guard();
        let proposal = self
            .db
            .get_proposal(&input.proposal_id)?
            .filter(|p| p.tool_name == CONFIG_TOOL)
            .ok_or_else(|| KeelError::UnknownProposal(input.proposal_id.clone()))?;

        match proposal.status {
            ProposalStatus::Rejected => {
                let response = Self::config_decision_response(
                    &proposal,
                    "rejected",
                    0,
                    None,
                    &input.correlation_id,
                );
                let output_hash = Self::response_hash(&response)?;
                self.db.append_event(&event::ok_entry(
                    &inv.tool_name,
                    &inv.correlation_id,
                    &inv.input_hash,
                    &output_hash,
                    inv.elapsed_ms(),
                ))?;
                Ok(response)
            }
            ProposalStatus::Committed => {
                let applied: Value = serde_json::from_str(&proposal.request_payload)
                    .map_err(|e| KeelError::Serialization(e.to_string()))?;
                let response = Self::config_decision_response(
                    &proposal,
                    "already_applied",
                    1,
                    Some(applied),
                    &input.correlation_id,
                );
                let output_hash = Self::response_hash(&response)?;
                self.db.append_event(&event::ok_entry(
                    &inv.tool_name,
                    &inv.correlation_id,
                    &inv.input_hash,
                    &output_hash,
                    inv.elapsed_ms(),
                ))?;
                Ok(response)
            }
            ProposalStatus::Proposed => {
                let request: ConfigChangeRequest =
                    serde_json::from_str(&proposal.request_payload)
                        .map_err(|e| KeelError::Serialization(e.to_string()))?;
                validate_change(&request.scope, &request.change_payload)?;
                let value = change_value(&request.change_payload)?.to_string();

                let mut overrides: BTreeMap<String, String> =
                    match self.db.get_meta(OVERRIDES_META_KEY)? {
                        Some(raw) => serde_json::from_slice(&raw)
                            .map_err(|e| KeelError::Serialization(e.to_string()))?,
                        None => BTreeMap::new(),
                    };
                overrides.insert(request.scope.clone(), value);

                let applied = serde_json::to_value(&request)
                    .map_err(|e| KeelError::Serialization(e.to_string()))?;
                let response = Self::config_decision_response(
                    &proposal,
                    "applied",
                    1,
                    Some(applied),
                    &input.correlation_id,
                );
                let output_hash = Self::response_hash(&response)?;

                let mut staged = StagedWrite::new();
                self.db.stage_put_meta(
                    &mut staged,
                    OVERRIDES_META_KEY,
                    &serde_json::to_vec(&overrides)
                        .map_err(|e| KeelError::Serialization(e.to_string()))?,
                )?;
                self.db.stage_insert_decision(
                    &mut staged,
                    &keel_core::records::Decision {
                        decision_id: new_id(),
                        proposal_id: proposal.proposal_id.clone(),
                        action: DecisionAction::Approve,
                        correlation_id: inv.correlation_id.clone(),
                        approver_id: input.approver_id.clone(),
                        reason: input.reason.clone(),
                        created_at: time::format_utc(time::now_utc()),
                    },
                )?;
                self.db.stage_proposal_result(
                    &mut staged,
                    &proposal.proposal_id,
                    ProposalStatus::Committed,
                    &canonical_json(&response),
                    &output_hash,
                    input.reason.as_deref(),
                    None,
                )?;
                self.db.stage_event(
                    &mut staged,
                    &event::ok_entry(
                        &inv.tool_name,
                        &inv.correlation_id,
                        &inv.input_hash,
                        &output_hash,
                        inv.elapsed_ms(),
                    ),
                )?;
                self.db.commit(staged)?;
                Ok(response)
            }
        }
    }

    fn config_proposed_response(proposal_id: &str, status: &str, correlation_id: &str) -> Value {
        let mut fields = Map::new();
        fields.insert("status".into(), json!(status));
        fields.insert("proposal_id".into(), json!(proposal_id));
        fields.insert("required_approvals".into(), json!(1));
        fields.insert("approvals_received".into(), json!(0));
        fields.insert("correlation_id".into(), json!(correlation_id));
        stamp_output_hash(fields)
    }

    fn config_decision_response(
        proposal: &Proposal,
        status: &str,
        approvals_received: u32,
        applied_change: Option<Value>,
        correlation_id: &str,
    ) -> Value {
        let mut fields = Map::new();
        fields.insert("status".into(), json!(status));
        fields.insert("proposal_id".into(), json!(proposal.proposal_id));
        fields.insert("approvals_received".into(), json!(approvals_received));
        fields.insert("required_approvals".into(), json!(1));
        fields.insert(
            "applied_change".into(),
            applied_change.unwrap_or(Value::Null),
        );
        fields.insert("correlation_id".into(), json!(correlation_id));
        stamp_output_hash(fields)
    }
}
