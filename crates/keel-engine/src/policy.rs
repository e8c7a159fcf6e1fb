//! Policy rule evaluation.
//!
//! Active rules are scanned in `(priority asc, rule_id asc)` order; the
//! first rule whose dimension filters and velocity predicate all match
//! supplies the threshold and quorum. No match falls back to the global
//! threshold with a single required approval.

use chrono::Duration;
use rust_decimal::Decimal;

use keel_core::error::KeelError;
use keel_core::records::PolicyRule;
use keel_core::{money, time};

use crate::inputs::BundleInput;
use crate::Engine;

#[derive(Clone, Debug)]
pub struct PolicyDecision {
    pub approval_required: bool,
    pub threshold_amount: Decimal,
    pub impact_amount: Decimal,
    pub required_approvals: u32,
    pub matched_rule_id: Option<String>,
}

impl Engine {
    pub fn evaluate_transaction_policy(
        &self,
        payload: &BundleInput,
        impact_amount: Decimal,
        tool_name: &str,
        force_approval: bool,
    ) -> Result<PolicyDecision, KeelError> {
        let mut threshold_amount = self.effective_threshold()?;
        let mut required_approvals = 1u32;
        let mut matched_rule_id = None;
        let mut velocity_forced = false;

        for rule in self.db.active_policy_rules()? {
            if self.rule_matches(&rule, payload, tool_name)? {
                threshold_amount = money::parse_amount(&rule.threshold_amount)?;
                required_approvals = rule.required_approvals.max(1);
                matched_rule_id = Some(rule.rule_id.clone());
                // A velocity rule only matches once its limit is reached.
                velocity_forced = rule.velocity_limit_count.is_some();
                break;
            }
        }

        let approval_required =
            force_approval || velocity_forced || impact_amount > threshold_amount;
        Ok(PolicyDecision {
            approval_required,
            threshold_amount,
            impact_amount: money::quantize(impact_amount),
            required_approvals,
            matched_rule_id,
        })
    }

    fn rule_matches(
        &self,
        rule: &PolicyRule,
        payload: &BundleInput,
        tool_name: &str,
    ) -> Result<bool, KeelError> {
        if let Some(rule_tool) = &rule.tool_name {
            if rule_tool != tool_name {
                return Ok(false);
            }
        }
        if let Some(rule_entity) = &rule.entity_id {
            if rule_entity != payload.entity() {
                return Ok(false);
            }
        }
        if let Some(category) = &rule.transaction_category {
            if Some(category.as_str()) != payload.transaction_category.as_deref() {
                return Ok(false);
            }
        }
        if let Some(risk_band) = &rule.risk_band {
            if Some(risk_band.as_str()) != payload.risk_band.as_deref() {
                return Ok(false);
            }
        }
        self.velocity_match(rule, payload)
    }

    /// Velocity predicate: prior transactions for `(source_system,
    /// entity_id)` inside the window ending at the payload date. A window
    /// that matches zero rows falls back to the cumulative count — coarse
    /// timestamps would otherwise defeat a "first N" rule.
    fn velocity_match(&self, rule: &PolicyRule, payload: &BundleInput) -> Result<bool, KeelError> {
        let (Some(limit), Some(window_seconds)) =
            (rule.velocity_limit_count, rule.velocity_window_seconds)
        else {
            return Ok(true);
        };

        let tx_date = payload.parsed_date()?;
        let window_start = tx_date - Duration::seconds(window_seconds);
        let entity = payload.entity();

        let mut observed: u64 = 0;
        let mut cumulative: u64 = 0;
        for tx in self.db.iter_transactions()? {
            if tx.source_system != payload.source_system || tx.entity_id != entity {
                continue;
            }
            cumulative += 1;
            let recorded = time::parse_utc(&tx.transaction_date)?;
            if recorded >= window_start && recorded <= tx_date {
                observed += 1;
            }
        }
        if observed == 0 {
            observed = cumulative;
        }
        Ok(observed >= limit)
    }
}
