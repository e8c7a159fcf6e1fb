//! Accounting-period lifecycle: open → closed → locked.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use keel_core::error::KeelError;
use keel_core::event;
use keel_core::hashing::stamp_output_hash;
use keel_core::records::{new_id, AccountingPeriod, PeriodStatus};
use keel_core::time;
use keel_store::StagedWrite;

use crate::inputs::PeriodInput;
use crate::{Engine, Invocation};

impl Engine {
    /// Gate a ledger write against its accounting period.
    ///
    /// Returns `force_approval`: adjusting entries into closed periods and
    /// lock overrides always route through the approval workflow.
    pub fn enforce_period_write_constraints(
        &self,
        tx_date: DateTime<Utc>,
        entity_id: &str,
        is_adjusting_entry: bool,
        override_period_lock: bool,
    ) -> Result<bool, KeelError> {
        let period_key = time::period_key_for(tx_date);
        let Some(period) = self.db.get_period(&period_key, entity_id)? else {
            return Ok(false);
        };
        match period.status {
            PeriodStatus::Open => Ok(false),
            PeriodStatus::Closed => {
                if !is_adjusting_entry {
                    return Err(KeelError::PeriodClosedRequiresAdjustingEntry);
                }
                Ok(true)
            }
            PeriodStatus::Locked => {
                if !override_period_lock {
                    return Err(KeelError::PeriodLocked);
                }
                Ok(true)
            }
        }
    }

    pub fn close_period(&self, inv: &Invocation, input: PeriodInput) -> Result<Value, KeelError> {
        self.set_period_status(inv, input, PeriodStatus::Closed)
    }

    pub fn lock_period(&self, inv: &Invocation, input: PeriodInput) -> Result<Value, KeelError> {
        self.set_period_status(inv, input, PeriodStatus::Locked)
    }

    /// Idempotent status upsert. Locked is terminal: neither close nor
    /// lock regresses it, both report `already_locked`.
    fn set_period_status(
        &self,
        inv: &Invocation,
        input: PeriodInput,
        target: PeriodStatus,
    ) -> Result<Value, KeelError> {
        if !time::is_period_key(&input.period_key) {
            return Err(KeelError::InvalidPeriodKey(input.period_key.clone()));
        }
        let entity_id = input.entity().to_string();
        if !self.db.entity_exists(&entity_id) {
            return Err(KeelError::UnknownEntity(entity_id));
        }

        let _guard = self.db.write_guard();
        let now = time::format_utc(time::now_utc());

        let existing = self.db.get_period(&input.period_key, &entity_id)?;
        let (period, result, mutated) = match existing {
            None => {
                let period = AccountingPeriod {
                    period_id: new_id(),
                    period_key: input.period_key.clone(),
                    entity_id: entity_id.clone(),
                    status: target,
                    actor_id: input.actor_id.clone(),
                    correlation_id: input.correlation_id.clone(),
                    closed_at: Some(now.clone()),
                    locked_at: (target == PeriodStatus::Locked).then(|| now.clone()),
                };
                (period, target.as_str(), true)
            }
            Some(period) if period.status == PeriodStatus::Locked => {
                (period, "already_locked", false)
            }
            Some(period) if target == PeriodStatus::Closed && period.status == PeriodStatus::Closed => {
                (period, "already_closed", false)
            }
            Some(mut period) => {
                period.status = target;
                period.actor_id = input.actor_id.clone();
                period.correlation_id = input.correlation_id.clone();
                if period.closed_at.is_none() {
                    period.closed_at = Some(now.clone());
                }
                if target == PeriodStatus::Locked {
                    period.locked_at = Some(now.clone());
                }
                (period, target.as_str(), true)
            }
        };

        let mut fields = Map::new();
        fields.insert("status".into(), json!(result));
        fields.insert("period_key".into(), json!(period.period_key));
        fields.insert("entity_id".into(), json!(period.entity_id));
        fields.insert("state".into(), json!(period.status.as_str()));
        fields.insert("closed_at".into(), json!(period.closed_at));
        fields.insert("locked_at".into(), json!(period.locked_at));
        fields.insert("correlation_id".into(), json!(input.correlation_id));
        let response = stamp_output_hash(fields);
        let output_hash = Self::response_hash(&response)?;

        let mut staged = StagedWrite::new();
        if mutated {
            self.db.stage_put_period(&mut staged, &period)?;
        }
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
