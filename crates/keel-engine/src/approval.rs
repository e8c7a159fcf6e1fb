//! Approval proposals and the commit/reject state machine.
//!
//! `proposed → {committed, rejected}`, terminal. Single-party approvals
//! commit the ledger bundle in the same staged write as the decision;
//! M-of-N approvals require distinct approvers and only commit when the
//! quorum is reached. Duplicate decisions are deterministic no-ops with
//! byte-stable responses.

use serde_json::{json, Map, Value};
use tracing::info;

use keel_core::error::KeelError;
use keel_core::event;
use keel_core::hashing::{canonical_json, stamp_output_hash};
use keel_core::records::{new_id, Decision, DecisionAction, Proposal, ProposalStatus};
use keel_core::{money, time};
use keel_store::StagedWrite;

use crate::inputs::{BundleInput, DecisionInput};
use crate::policy::PolicyDecision;
use crate::{Engine, Invocation};

pub(crate) const BUNDLE_TOOL: &str = "record_transaction_bundle";
pub(crate) const CONFIG_TOOL: &str = "propose_config_change";

impl Engine {
    /// Route a gated bundle into the approval workflow. Idempotent on the
    /// proposal's `(tool_name, source_system, external_id)` key: a replay
    /// returns the persisted proposed response byte-for-byte.
    pub(crate) fn divert_bundle_to_proposal(
        &self,
        inv: &Invocation,
        input: &BundleInput,
        decision: &PolicyDecision,
        entity_id: &str,
    ) -> Result<Value, KeelError> {
        if let Some(existing) =
            self.db
                .proposal_for_key(BUNDLE_TOOL, &input.source_system, &input.external_id)?
        {
            let response = Self::stored_response(&existing)?;
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

        let mut normalized = input.clone();
        normalized.entity_id = Some(entity_id.to_string());
        let request_payload = canonical_json(
            &serde_json::to_value(&normalized)
                .map_err(|e| KeelError::Serialization(e.to_string()))?,
        );

        let proposal = Proposal {
            proposal_id: new_id(),
            tool_name: BUNDLE_TOOL.to_string(),
            source_system: input.source_system.clone(),
            external_id: input.external_id.clone(),
            correlation_id: input.correlation_id.clone(),
            input_hash: inv.input_hash.clone(),
            policy_threshold_amount: money::format_amount(decision.threshold_amount),
            impact_amount: money::format_amount(decision.impact_amount),
            status: ProposalStatus::Proposed,
            matched_rule_id: decision.matched_rule_id.clone(),
            required_approvals: decision.required_approvals.max(1),
            entity_id: entity_id.to_string(),
            request_payload,
            response_payload: None,
            output_hash: None,
            approved_transaction_id: None,
            decision_reason: None,
            created_at: time::format_utc(time::now_utc()),
        };
        let response = Self::proposed_response(&proposal);
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
        info!(proposal_id = %proposal.proposal_id, "diverted bundle into approval workflow");
        Ok(response)
    }

    pub fn approve_proposed_transaction(
        &self,
        inv: &Invocation,
        input: DecisionInput,
    ) -> Result<Value, KeelError> {
        let _guard = self.db.write_guard();
        let proposal = self
            .db
            .get_proposal(&input.proposal_id)?
            .ok_or_else(|| KeelError::UnknownProposal(input.proposal_id.clone()))?;
        if proposal.tool_name != BUNDLE_TOOL {
            return Err(KeelError::Other(format!(
                "proposal {} belongs to {}; use its own approval tool",
                proposal.proposal_id, proposal.tool_name
            )));
        }

        match proposal.status {
            ProposalStatus::Rejected => Err(KeelError::ProposalAlreadyRejected),
            ProposalStatus::Committed => {
                // Replayed approve: the stored commit response, unchanged.
                let response = Self::stored_response(&proposal)?;
                let output_hash = Self::response_hash(&response)?;
                let mut staged = StagedWrite::new();
                self.db
                    .stage_insert_decision(&mut staged, &Self::decision_row(&proposal, inv, &input, DecisionAction::Approve))?;
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
            ProposalStatus::Proposed => {
                let required = proposal.required_approvals.max(1);
                let mut staged = StagedWrite::new();

                if required > 1 {
                    if input.approver_id.is_none() {
                        return Err(KeelError::ApproverRequired);
                    }
                    let decision =
                        Self::decision_row(&proposal, inv, &input, DecisionAction::Approve);
                    let inserted = self.db.stage_insert_decision(&mut staged, &decision)?;
                    let received =
                        self.db.distinct_approvals(&proposal.proposal_id)? + u32::from(inserted);

                    if received < required {
                        let response = Self::partial_response(&proposal, required, received);
                        let output_hash = Self::response_hash(&response)?;
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
                        return Ok(response);
                    }
                    return self.commit_approved_bundle(inv, &input, &proposal, staged);
                }

                self.db
                    .stage_insert_decision(&mut staged, &Self::decision_row(&proposal, inv, &input, DecisionAction::Approve))?;
                self.commit_approved_bundle(inv, &input, &proposal, staged)
            }
        }
    }

    pub fn reject_proposed_transaction(
        &self,
        inv: &Invocation,
        input: DecisionInput,
    ) -> Result<Value, KeelError> {
        let _guard = self.db.write_guard();
        let proposal = self
            .db
            .get_proposal(&input.proposal_id)?
            .ok_or_else(|| KeelError::UnknownProposal(input.proposal_id.clone()))?;

        match proposal.status {
            ProposalStatus::Committed => Err(KeelError::ProposalAlreadyCommitted),
            ProposalStatus::Rejected => {
                let response = Self::stored_response(&proposal)?;
                let output_hash = Self::response_hash(&response)?;
                let mut staged = StagedWrite::new();
                self.db
                    .stage_insert_decision(&mut staged, &Self::decision_row(&proposal, inv, &input, DecisionAction::Reject))?;
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
            ProposalStatus::Proposed => {
                let mut fields = Map::new();
                fields.insert("status".into(), json!("rejected"));
                fields.insert("proposal_id".into(), json!(proposal.proposal_id));
                fields.insert("reason".into(), json!(input.reason));
                fields.insert("correlation_id".into(), json!(proposal.correlation_id));
                let response = stamp_output_hash(fields);
                let output_hash = Self::response_hash(&response)?;

                let mut staged = StagedWrite::new();
                self.db.stage_proposal_result(
                    &mut staged,
                    &proposal.proposal_id,
                    ProposalStatus::Rejected,
                    &canonical_json(&response),
                    &output_hash,
                    input.reason.as_deref(),
                    None,
                )?;
                self.db
                    .stage_insert_decision(&mut staged, &Self::decision_row(&proposal, inv, &input, DecisionAction::Reject))?;
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

    /// Commit the bundle a proposal carries: ledger rows, canonical
    /// response, proposal transition, and event in one staged write. A
    /// loser of the `(source_system, external_id)` race returns the
    /// winner's persisted response byte-for-byte.
    fn commit_approved_bundle(
        &self,
        inv: &Invocation,
        input: &DecisionInput,
        proposal: &Proposal,
        mut staged: StagedWrite,
    ) -> Result<Value, KeelError> {
        let bundle: BundleInput = serde_json::from_str(&proposal.request_payload)
            .map_err(|e| KeelError::Serialization(e.to_string()))?;
        let entity_id = bundle.entity().to_string();
        let (tx, postings) = self.build_bundle_rows(&bundle, &proposal.input_hash, &entity_id)?;

        let response = match self.db.stage_transaction_bundle(&mut staged, &tx, &postings) {
            Ok(()) => {
                let mut fields = Map::new();
                fields.insert("status".into(), json!("committed"));
                fields.insert("proposal_id".into(), json!(proposal.proposal_id));
                fields.insert("transaction_id".into(), json!(tx.transaction_id));
                fields.insert(
                    "posting_ids".into(),
                    json!(postings.iter().map(|p| p.posting_id.clone()).collect::<Vec<_>>()),
                );
                if proposal.required_approvals > 1 {
                    fields.insert(
                        "required_approvals".into(),
                        json!(proposal.required_approvals),
                    );
                    fields.insert(
                        "approvals_received".into(),
                        json!(proposal.required_approvals),
                    );
                }
                fields.insert("correlation_id".into(), json!(proposal.correlation_id));
                let response = stamp_output_hash(fields);
                let output_hash = Self::response_hash(&response)?;
                self.db.stage_transaction_response(
                    &mut staged,
                    &tx.transaction_id,
                    &canonical_json(&response),
                    &output_hash,
                )?;
                response
            }
            Err(KeelError::DuplicateExternalId { .. }) => {
                // A concurrent approve won the unique-key race. Surface its
                // persisted response unchanged.
                self.stored_transaction_response(&bundle.source_system, &bundle.external_id)?
                    .ok_or_else(|| {
                        KeelError::Storage(format!(
                            "transaction for ({}, {}) exists without a stored response",
                            bundle.source_system, bundle.external_id
                        ))
                    })?
            }
            Err(other) => return Err(other),
        };

        let output_hash = Self::response_hash(&response)?;
        let transaction_id = response
            .get("transaction_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.db.stage_proposal_result(
            &mut staged,
            &proposal.proposal_id,
            ProposalStatus::Committed,
            &canonical_json(&response),
            &output_hash,
            input.reason.as_deref(),
            transaction_id.as_deref(),
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
        info!(proposal_id = %proposal.proposal_id, "committed approved proposal");
        Ok(response)
    }

    /// The exact response persisted on the ledger transaction row.
    fn stored_transaction_response(
        &self,
        source_system: &str,
        external_id: &str,
    ) -> Result<Option<Value>, KeelError> {
        let Some(tx_id) = self
            .db
            .transaction_id_for_external(source_system, external_id)?
        else {
            return Ok(None);
        };
        let tx = self
            .db
            .get_transaction(&tx_id)?
            .ok_or_else(|| KeelError::Storage(format!("dangling external id index for {tx_id}")))?;
        match tx.response_payload {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| KeelError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn decision_row(
        proposal: &Proposal,
        inv: &Invocation,
        input: &DecisionInput,
        action: DecisionAction,
    ) -> Decision {
        Decision {
            decision_id: new_id(),
            proposal_id: proposal.proposal_id.clone(),
            action,
            correlation_id: inv.correlation_id.clone(),
            approver_id: input.approver_id.clone(),
            reason: input.reason.clone(),
            created_at: time::format_utc(time::now_utc()),
        }
    }

    /// The response persisted when a proposal is created.
    pub(crate) fn proposed_response(proposal: &Proposal) -> Value {
        let mut fields = Map::new();
        fields.insert("status".into(), json!("proposed"));
        fields.insert("proposal_id".into(), json!(proposal.proposal_id));
        fields.insert("correlation_id".into(), json!(proposal.correlation_id));
        fields.insert(
            "approval_threshold_amount".into(),
            json!(proposal.policy_threshold_amount),
        );
        fields.insert("impact_amount".into(), json!(proposal.impact_amount));
        fields.insert("matched_rule_id".into(), json!(proposal.matched_rule_id));
        fields.insert(
            "required_approvals".into(),
            json!(proposal.required_approvals),
        );
        fields.insert("approvals_received".into(), json!(0));
        stamp_output_hash(fields)
    }

    /// Quorum progress for an M-of-N proposal. Built from the proposal row
    /// and the distinct-approver count only, so replays are byte-stable.
    fn partial_response(proposal: &Proposal, required: u32, received: u32) -> Value {
        let mut fields = Map::new();
        fields.insert("status".into(), json!("proposed"));
        fields.insert("proposal_id".into(), json!(proposal.proposal_id));
        fields.insert("required_approvals".into(), json!(required));
        fields.insert("approvals_received".into(), json!(received));
        fields.insert("correlation_id".into(), json!(proposal.correlation_id));
        stamp_output_hash(fields)
    }

    /// A proposal's persisted response, rebuilt deterministically when the
    /// row predates response persistence.
    pub(crate) fn stored_response(proposal: &Proposal) -> Result<Value, KeelError> {
        match &proposal.response_payload {
            Some(raw) => {
                serde_json::from_str(raw).map_err(|e| KeelError::Serialization(e.to_string()))
            }
            None => Ok(Self::proposed_response(proposal)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        bundle, invocation, seed_two_accounts, test_engine, threshold_rule,
    };
    use crate::inputs::PeriodInput;

    fn decision_input(proposal_id: &str, approver: Option<&str>, correlation: &str) -> DecisionInput {
        DecisionInput {
            proposal_id: proposal_id.to_string(),
            correlation_id: correlation.to_string(),
            approver_id: approver.map(str::to_string),
            reason: None,
        }
    }

    /// Threshold gating: a ±250 bundle against a global threshold of 1000
    /// commits directly, but a matched rule at 100 diverts it; the first
    /// approve commits and the second returns the stored response.
    #[test]
    fn threshold_gating_then_single_party_approve() {
        let engine = test_engine("approval_threshold");
        let (a, e) = seed_two_accounts(&engine);
        engine
            .db
            .put_policy_rule(&threshold_rule("rule-100", "100.0000", 1))
            .unwrap();

        let proposed = engine
            .record_transaction_bundle(
                &invocation(BUNDLE_TOOL, "c1"),
                bundle("t", "e-gated", &a, &e, "250.0000", "c1"),
            )
            .unwrap();
        assert_eq!(proposed["status"], "proposed");
        assert_eq!(proposed["approval_threshold_amount"], "100.0000");
        assert_eq!(proposed["impact_amount"], "250.0000");
        assert_eq!(proposed["required_approvals"], 1);
        let proposal_id = proposed["proposal_id"].as_str().unwrap().to_string();

        // Replaying the gated write returns the persisted proposed
        // response byte-for-byte.
        let replayed = engine
            .record_transaction_bundle(
                &invocation(BUNDLE_TOOL, "c2"),
                bundle("t", "e-gated", &a, &e, "250.0000", "c2"),
            )
            .unwrap();
        assert_eq!(replayed, proposed);

        let committed = engine
            .approve_proposed_transaction(
                &invocation("approve_proposed_transaction", "c3"),
                decision_input(&proposal_id, None, "c3"),
            )
            .unwrap();
        assert_eq!(committed["status"], "committed");
        assert_eq!(committed["proposal_id"], proposal_id.as_str());
        assert_eq!(committed["posting_ids"].as_array().unwrap().len(), 2);

        // A second identical approve returns the stored commit response
        // unchanged.
        let replay = engine
            .approve_proposed_transaction(
                &invocation("approve_proposed_transaction", "c4"),
                decision_input(&proposal_id, None, "c4"),
            )
            .unwrap();
        assert_eq!(replay, committed);

        let stored = engine.db.get_proposal(&proposal_id).unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Committed);
        assert!(stored.approved_transaction_id.is_some());
    }

    /// M-of-N quorum: two distinct approvers commit, duplicates no-op.
    #[test]
    fn m_of_n_quorum_commits_exactly_once() {
        let engine = test_engine("approval_quorum");
        let (a, e) = seed_two_accounts(&engine);
        engine
            .db
            .put_policy_rule(&threshold_rule("rule-2", "100.0000", 2))
            .unwrap();

        let proposed = engine
            .record_transaction_bundle(
                &invocation(BUNDLE_TOOL, "c1"),
                bundle("t", "e-quorum", &a, &e, "250.0000", "c1"),
            )
            .unwrap();
        let proposal_id = proposed["proposal_id"].as_str().unwrap().to_string();
        assert_eq!(proposed["required_approvals"], 2);

        // Approver without an id is rejected for multi-party rules.
        assert!(matches!(
            engine
                .approve_proposed_transaction(
                    &invocation("approve_proposed_transaction", "c2"),
                    decision_input(&proposal_id, None, "c2"),
                )
                .unwrap_err(),
            KeelError::ApproverRequired
        ));

        let first = engine
            .approve_proposed_transaction(
                &invocation("approve_proposed_transaction", "c3"),
                decision_input(&proposal_id, Some("approver-a"), "c3"),
            )
            .unwrap();
        assert_eq!(first["status"], "proposed");
        assert_eq!(first["approvals_received"], 1);

        // Same approver again: deterministic no-op, same bytes.
        let duplicate = engine
            .approve_proposed_transaction(
                &invocation("approve_proposed_transaction", "c4"),
                decision_input(&proposal_id, Some("approver-a"), "c4"),
            )
            .unwrap();
        assert_eq!(duplicate, first);

        let committed = engine
            .approve_proposed_transaction(
                &invocation("approve_proposed_transaction", "c5"),
                decision_input(&proposal_id, Some("approver-b"), "c5"),
            )
            .unwrap();
        assert_eq!(committed["status"], "committed");
        assert_eq!(committed["approvals_received"], 2);

        // A third approve from an existing approver reports the committed
        // response.
        let after = engine
            .approve_proposed_transaction(
                &invocation("approve_proposed_transaction", "c6"),
                decision_input(&proposal_id, Some("approver-a"), "c6"),
            )
            .unwrap();
        assert_eq!(after, committed);

        // Exactly one ledger transaction exists for the key.
        assert!(engine
            .db
            .transaction_id_for_external("t", "e-quorum")
            .unwrap()
            .is_some());
        assert_eq!(engine.db.iter_transactions().unwrap().len(), 1);
        assert_eq!(engine.db.distinct_approvals(&proposal_id).unwrap(), 2);
    }

    #[test]
    fn reject_then_approve_is_an_error() {
        let engine = test_engine("approval_reject");
        let (a, e) = seed_two_accounts(&engine);
        engine
            .db
            .put_policy_rule(&threshold_rule("rule-100", "100.0000", 1))
            .unwrap();

        let proposed = engine
            .record_transaction_bundle(
                &invocation(BUNDLE_TOOL, "c1"),
                bundle("t", "e-reject", &a, &e, "250.0000", "c1"),
            )
            .unwrap();
        let proposal_id = proposed["proposal_id"].as_str().unwrap().to_string();

        let mut reject = decision_input(&proposal_id, None, "c2");
        reject.reason = Some("out of budget".to_string());
        let rejected = engine
            .reject_proposed_transaction(&invocation("reject_proposed_transaction", "c2"), reject)
            .unwrap();
        assert_eq!(rejected["status"], "rejected");
        assert_eq!(rejected["reason"], "out of budget");

        // Rejecting again returns the stored response unchanged.
        let again = engine
            .reject_proposed_transaction(
                &invocation("reject_proposed_transaction", "c3"),
                decision_input(&proposal_id, None, "c3"),
            )
            .unwrap();
        assert_eq!(again, rejected);

        assert!(matches!(
            engine
                .approve_proposed_transaction(
                    &invocation("approve_proposed_transaction", "c4"),
                    decision_input(&proposal_id, None, "c4"),
                )
                .unwrap_err(),
            KeelError::ProposalAlreadyRejected
        ));

        // No ledger transaction was ever created.
        assert!(engine
            .db
            .transaction_id_for_external("t", "e-reject")
            .unwrap()
            .is_none());
    }

    #[test]
    fn reject_after_commit_is_an_error() {
        let engine = test_engine("approval_reject_committed");
        let (a, e) = seed_two_accounts(&engine);
        engine
            .db
            .put_policy_rule(&threshold_rule("rule-100", "100.0000", 1))
            .unwrap();

        let proposed = engine
            .record_transaction_bundle(
                &invocation(BUNDLE_TOOL, "c1"),
                bundle("t", "e-rc", &a, &e, "250.0000", "c1"),
            )
            .unwrap();
        let proposal_id = proposed["proposal_id"].as_str().unwrap().to_string();
        engine
            .approve_proposed_transaction(
                &invocation("approve_proposed_transaction", "c2"),
                decision_input(&proposal_id, None, "c2"),
            )
            .unwrap();

        assert!(matches!(
            engine
                .reject_proposed_transaction(
                    &invocation("reject_proposed_transaction", "c3"),
                    decision_input(&proposal_id, None, "c3"),
                )
                .unwrap_err(),
            KeelError::ProposalAlreadyCommitted
        ));
    }

    /// Closed-period adjusting entries always route through approval.
    #[test]
    fn closed_period_adjusting_entry_is_proposed() {
        let engine = test_engine("approval_closed_period");
        let (a, e) = seed_two_accounts(&engine);

        engine
            .close_period(
                &invocation("close_period", "c0"),
                PeriodInput {
                    period_key: "2026-01".to_string(),
                    correlation_id: "c0".to_string(),
                    entity_id: None,
                    actor_id: None,
                },
            )
            .unwrap();

        // Non-adjusting write fails closed.
        let plain = bundle("t", "e-closed", &a, &e, "10.0000", "c1");
        assert!(matches!(
            engine
                .record_transaction_bundle(&invocation(BUNDLE_TOOL, "c1"), plain)
                .unwrap_err(),
            KeelError::PeriodClosedRequiresAdjustingEntry
        ));

        // An adjusting entry is accepted but forced into approval even
        // under the threshold.
        let mut adjusting = bundle("t", "e-closed", &a, &e, "10.0000", "c2");
        adjusting.is_adjusting_entry = true;
        adjusting.adjusting_reason_code = Some("correction".to_string());
        let proposed = engine
            .record_transaction_bundle(&invocation(BUNDLE_TOOL, "c2"), adjusting)
            .unwrap();
        assert_eq!(proposed["status"], "proposed");
    }

    #[test]
    fn unknown_proposal_is_an_error() {
        let engine = test_engine("approval_unknown");
        assert!(matches!(
            engine
                .approve_proposed_transaction(
                    &invocation("approve_proposed_transaction", "c1"),
                    decision_input("missing", None, "c1"),
                )
                .unwrap_err(),
            KeelError::UnknownProposal(_)
        ));
    }
}
