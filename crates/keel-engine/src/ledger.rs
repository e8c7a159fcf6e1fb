//! Ledger bundle recording, snapshots, and obligations.

use serde_json::{json, Map, Value};
use tracing::info;

use keel_core::constants::{CURRENCY_CODE, DEFAULT_ENTITY_ID};
use keel_core::error::KeelError;
use keel_core::event;
use keel_core::hashing::{canonical_json, stamp_output_hash};
use keel_core::records::{
    new_id, BalanceSnapshot, Cadence, LedgerTransaction, Obligation, Posting,
};
use keel_core::{money, time};
use keel_store::StagedWrite;

use crate::inputs::{
    metadata_text, BundleInput, FulfillObligationInput, ObligationInput, SnapshotInput,
};
use crate::{Engine, Invocation};

impl Engine {
    /// Record a balanced double-entry bundle.
    ///
    /// Idempotent on `(source_system, external_id)`; diverts into the
    /// approval workflow when the period lifecycle or a policy rule says
    /// so; otherwise commits the bundle, its canonical response, and the
    /// event-log row in one staged write.
    pub fn record_transaction_bundle(
        &self,
        inv: &Invocation,
        input: BundleInput,
    ) -> Result<Value, KeelError> {
        if input.postings.is_empty() {
            return Err(KeelError::Validation(
                "postings must contain at least one entry".into(),
            ));
        }
        for posting in &input.postings {
            if posting.currency != CURRENCY_CODE {
                return Err(KeelError::CurrencyMismatch {
                    expected: CURRENCY_CODE.to_string(),
                    got: posting.currency.clone(),
                });
            }
        }
        let amounts = input.amounts()?;
        money::ensure_balanced(&amounts)?;
        let impact = money::impact_amount(&amounts);
        let tx_date = input.parsed_date()?;
        let entity_id = input.entity().to_string();

        if !self.db.entity_exists(&entity_id) {
            return Err(KeelError::UnknownEntity(entity_id));
        }
        for posting in &input.postings {
            if !self.db.account_exists(&posting.account_id) {
                return Err(KeelError::UnknownAccount(posting.account_id.clone()));
            }
        }

        let _guard = self.db.write_guard();

        if let Some(replay) =
            self.resolve_transaction_idempotency(&input.source_system, &input.external_id)?
        {
            let output_hash = Self::response_hash(&replay)?;
            self.db.append_event(&event::ok_entry(
                &inv.tool_name,
                &inv.correlation_id,
                &inv.input_hash,
                &output_hash,
                inv.elapsed_ms(),
            ))?;
            return Ok(replay);
        }

        let force_approval = self.enforce_period_write_constraints(
            tx_date,
            &entity_id,
            input.is_adjusting_entry,
            input.override_period_lock,
        )?;
        let decision = self.evaluate_transaction_policy(
            &input,
            impact,
            "record_transaction_bundle",
            force_approval,
        )?;

        if decision.approval_required {
            return self.divert_bundle_to_proposal(inv, &input, &decision, &entity_id);
        }

        let mut staged = StagedWrite::new();
        let (tx, postings) = self.build_bundle_rows(&input, &inv.input_hash, &entity_id)?;
        self.db.stage_transaction_bundle(&mut staged, &tx, &postings)?;

        let mut fields = Map::new();
        fields.insert("status".into(), json!("committed"));
        fields.insert("transaction_id".into(), json!(tx.transaction_id));
        fields.insert(
            "posting_ids".into(),
            json!(postings.iter().map(|p| p.posting_id.clone()).collect::<Vec<_>>()),
        );
        fields.insert("correlation_id".into(), json!(input.correlation_id));
        let response = stamp_output_hash(fields);
        let output_hash = Self::response_hash(&response)?;

        self.db.stage_transaction_response(
            &mut staged,
            &tx.transaction_id,
            &canonical_json(&response),
            &output_hash,
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
        info!(transaction_id = %tx.transaction_id, "committed transaction bundle");
        Ok(response)
    }

    /// Canonical stored response for an already-recorded external id, with
    /// `status` overridden to `idempotent-replay`. Byte-identical across
    /// invocations: the payload and its `output_hash` were persisted with
    /// the original commit.
    pub fn resolve_transaction_idempotency(
        &self,
        source_system: &str,
        external_id: &str,
    ) -> Result<Option<Value>, KeelError> {
        let Some(transaction_id) = self
            .db
            .transaction_id_for_external(source_system, external_id)?
        else {
            return Ok(None);
        };
        let tx = self
            .db
            .get_transaction(&transaction_id)?
            .ok_or_else(|| KeelError::Storage(format!("dangling external id index for {transaction_id}")))?;
        let Some(stored) = tx.response_payload else {
            return Ok(None);
        };
        let mut response: Value = serde_json::from_str(&stored)
            .map_err(|e| KeelError::Serialization(e.to_string()))?;
        if let Some(obj) = response.as_object_mut() {
            obj.insert("status".into(), json!("idempotent-replay"));
        }
        Ok(Some(response))
    }

    /// Build the transaction row and its postings in canonical order
    /// `(account_id, amount-as-string, memo)` so replays are byte-stable.
    pub(crate) fn build_bundle_rows(
        &self,
        input: &BundleInput,
        input_hash: &str,
        entity_id: &str,
    ) -> Result<(LedgerTransaction, Vec<Posting>), KeelError> {
        let now = time::format_utc(time::now_utc());
        let transaction_id = new_id();
        let tx = LedgerTransaction {
            transaction_id: transaction_id.clone(),
            source_system: input.source_system.clone(),
            external_id: input.external_id.clone(),
            transaction_date: time::format_utc(input.parsed_date()?),
            description: input.description.clone(),
            correlation_id: input.correlation_id.clone(),
            input_hash: input_hash.to_string(),
            entity_id: entity_id.to_string(),
            is_adjusting_entry: input.is_adjusting_entry,
            adjusting_reason_code: input.adjusting_reason_code.clone(),
            response_payload: None,
            output_hash: None,
            created_at: now,
        };

        let mut ordered = input.postings.clone();
        ordered.sort_by(|a, b| {
            let amount_a = money::format_amount(money::parse_amount(&a.amount).unwrap_or_default());
            let amount_b = money::format_amount(money::parse_amount(&b.amount).unwrap_or_default());
            (&a.account_id, amount_a, a.memo.as_deref().unwrap_or(""))
                .cmp(&(&b.account_id, amount_b, b.memo.as_deref().unwrap_or("")))
        });

        let postings = ordered
            .into_iter()
            .map(|p| {
                Ok(Posting {
                    posting_id: new_id(),
                    transaction_id: transaction_id.clone(),
                    account_id: p.account_id,
                    amount: money::format_amount(money::parse_amount(&p.amount)?),
                    currency: p.currency,
                    memo: p.memo,
                })
            })
            .collect::<Result<Vec<_>, KeelError>>()?;

        Ok((tx, postings))
    }

    /// Upsert an external balance snapshot on `(account_id, snapshot_date)`.
    pub fn record_balance_snapshot(
        &self,
        inv: &Invocation,
        input: SnapshotInput,
    ) -> Result<Value, KeelError> {
        if input.currency != CURRENCY_CODE {
            return Err(KeelError::CurrencyMismatch {
                expected: CURRENCY_CODE.to_string(),
                got: input.currency.clone(),
            });
        }
        let snapshot_date = time::parse_date(&input.snapshot_date)?.to_string();
        let balance = money::format_amount(money::parse_amount(&input.balance)?);
        if !self.db.account_exists(&input.account_id) {
            return Err(KeelError::UnknownAccount(input.account_id.clone()));
        }
        let entity_id = input
            .entity_id
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTITY_ID.to_string());
        if !self.db.entity_exists(&entity_id) {
            return Err(KeelError::UnknownEntity(entity_id));
        }

        let _guard = self.db.write_guard();
        let now = time::format_utc(time::now_utc());
        let snapshot = BalanceSnapshot {
            snapshot_id: new_id(),
            source_system: input.source_system.clone(),
            account_id: input.account_id.clone(),
            snapshot_date: snapshot_date.clone(),
            balance,
            currency: input.currency.clone(),
            source_artifact_id: input.source_artifact_id.clone(),
            entity_id,
            created_at: now.clone(),
            updated_at: now,
        };

        let mut staged = StagedWrite::new();
        let (snapshot_id, created) = self.db.stage_upsert_snapshot(&mut staged, snapshot)?;

        let mut fields = Map::new();
        fields.insert(
            "status".into(),
            json!(if created { "recorded" } else { "updated" }),
        );
        fields.insert("snapshot_id".into(), json!(snapshot_id));
        fields.insert("account_id".into(), json!(input.account_id));
        fields.insert("snapshot_date".into(), json!(snapshot_date));
        fields.insert("correlation_id".into(), json!(input.correlation_id));
        let response = stamp_output_hash(fields);
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
        Ok(response)
    }

    /// Upsert an obligation on `(source_system, name, account_id)`.
    pub fn create_or_update_obligation(
        &self,
        inv: &Invocation,
        input: ObligationInput,
    ) -> Result<Value, KeelError> {
        let cadence = Cadence::parse(&input.cadence).ok_or_else(|| {
            KeelError::Validation(format!(
                "cadence must be monthly|annual|custom, got '{}'",
                input.cadence
            ))
        })?;
        let expected_amount = money::format_amount(money::parse_amount(&input.expected_amount)?);
        let next_due_date = time::parse_date(&input.next_due_date)?.to_string();
        if !self.db.account_exists(&input.account_id) {
            return Err(KeelError::UnknownAccount(input.account_id.clone()));
        }

        let _guard = self.db.write_guard();
        let now = time::format_utc(time::now_utc());
        let obligation = Obligation {
            obligation_id: new_id(),
            source_system: input.source_system.clone(),
            name: input.name.clone(),
            account_id: input.account_id.clone(),
            cadence,
            expected_amount,
            variability_flag: input.variability_flag,
            next_due_date,
            metadata: metadata_text(&input.metadata),
            active: true,
            fulfilled_by_transaction_id: None,
            fulfilled_at: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let mut staged = StagedWrite::new();
        let (obligation_id, created) = self.db.stage_upsert_obligation(&mut staged, obligation)?;

        let mut fields = Map::new();
        fields.insert(
            "status".into(),
            json!(if created { "created" } else { "updated" }),
        );
        fields.insert("obligation_id".into(), json!(obligation_id));
        fields.insert("active".into(), json!(true));
        fields.insert("correlation_id".into(), json!(input.correlation_id));
        let response = stamp_output_hash(fields);
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
        Ok(response)
    }

    /// Mark an obligation fulfilled. Idempotent: fulfilling twice keeps
    /// the first fulfillment record.
    pub fn fulfill_obligation(
        &self,
        inv: &Invocation,
        input: FulfillObligationInput,
    ) -> Result<Value, KeelError> {
        let fulfilled_at = match &input.fulfilled_at {
            Some(raw) => time::format_utc(time::parse_utc(raw)?),
            None => time::format_utc(time::now_utc()),
        };
        if let Some(tx_id) = &input.fulfilled_by_transaction_id {
            if self.db.get_transaction(tx_id)?.is_none() {
                return Err(KeelError::Storage(format!("unknown transaction {tx_id}")));
            }
        }

        let _guard = self.db.write_guard();
        let mut staged = StagedWrite::new();
        let obligation = self.db.stage_fulfill_obligation(
            &mut staged,
            &input.obligation_id,
            input.fulfilled_by_transaction_id.as_deref(),
            &fulfilled_at,
        )?;

        let mut fields = Map::new();
        fields.insert("status".into(), json!("fulfilled"));
        fields.insert("obligation_id".into(), json!(obligation.obligation_id));
        fields.insert("active".into(), json!(obligation.active));
        fields.insert(
            "fulfilled_by_transaction_id".into(),
            json!(obligation.fulfilled_by_transaction_id),
        );
        fields.insert("fulfilled_at".into(), json!(obligation.fulfilled_at));
        fields.insert("correlation_id".into(), json!(input.correlation_id));
        let response = stamp_output_hash(fields);
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
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bundle, invocation, test_engine};

    #[test]
    fn balanced_commit_then_idempotent_replay() {
        let engine = test_engine("ledger_replay");
        let (asset, equity) = engine_accounts(&engine);

        let input = bundle("t", "e1", &asset, &equity, "10.0000", "c1");
        let first = engine
            .record_transaction_bundle(&invocation("record_transaction_bundle", "c1"), input)
            .unwrap();
        assert_eq!(first["status"], "committed");
        assert_eq!(first["posting_ids"].as_array().unwrap().len(), 2);

        // Same key, different correlation id: byte-identical replay.
        let replay_input = bundle("t", "e1", &asset, &equity, "10.0000", "c2");
        let replay = engine
            .record_transaction_bundle(
                &invocation("record_transaction_bundle", "c2"),
                replay_input,
            )
            .unwrap();
        assert_eq!(replay["status"], "idempotent-replay");
        assert_eq!(replay["transaction_id"], first["transaction_id"]);
        assert_eq!(replay["posting_ids"], first["posting_ids"]);
        assert_eq!(replay["output_hash"], first["output_hash"]);
    }

    #[test]
    fn unbalanced_bundle_rejected() {
        let engine = test_engine("ledger_unbalanced");
        let (asset, equity) = engine_accounts(&engine);
        let mut input = bundle("t", "e1", &asset, &equity, "10.0000", "c1");
        input.postings[1].amount = "-9.9999".to_string();
        assert!(matches!(
            engine
                .record_transaction_bundle(&invocation("record_transaction_bundle", "c1"), input)
                .unwrap_err(),
            KeelError::UnbalancedBundle
        ));
    }

    #[test]
    fn currency_mismatch_rejected() {
        let engine = test_engine("ledger_currency");
        let (asset, equity) = engine_accounts(&engine);
        let mut input = bundle("t", "e1", &asset, &equity, "10.0000", "c1");
        input.postings[0].currency = "EUR".to_string();
        assert!(matches!(
            engine
                .record_transaction_bundle(&invocation("record_transaction_bundle", "c1"), input)
                .unwrap_err(),
            KeelError::CurrencyMismatch { .. }
        ));
    }

    #[test]
    fn unknown_posting_account_rejected() {
        let engine = test_engine("ledger_unknown_acct");
        let (asset, _) = engine_accounts(&engine);
        let mut input = bundle("t", "e1", &asset, "missing-account", "10.0000", "c1");
        input.postings[1].account_id = "missing-account".to_string();
        assert!(matches!(
            engine
                .record_transaction_bundle(&invocation("record_transaction_bundle", "c1"), input)
                .unwrap_err(),
            KeelError::UnknownAccount(_)
        ));
    }

    #[test]
    fn postings_commit_in_canonical_order() {
        let engine = test_engine("ledger_posting_order");
        let (asset, equity) = engine_accounts(&engine);

        // Feed postings in reverse of canonical order.
        let mut input = bundle("t", "e1", &equity, &asset, "10.0000", "c1");
        input.postings.swap(0, 1);
        let response = engine
            .record_transaction_bundle(&invocation("record_transaction_bundle", "c1"), input)
            .unwrap();
        let tx_id = response["transaction_id"].as_str().unwrap();

        let stored = engine.db.postings_for_transaction(tx_id).unwrap();
        let mut account_ids: Vec<String> =
            stored.iter().map(|p| p.account_id.clone()).collect();
        let mut sorted = account_ids.clone();
        sorted.sort();
        assert_eq!(account_ids, sorted);
        account_ids.dedup();
        assert_eq!(account_ids.len(), 2);
    }

    #[test]
    fn snapshot_upsert_is_idempotent_on_natural_key() {
        let engine = test_engine("ledger_snapshot");
        let (asset, _) = engine_accounts(&engine);
        let input = SnapshotInput {
            source_system: "bank".into(),
            account_id: asset.clone(),
            snapshot_date: "2026-01-31".into(),
            balance: "95.00".into(),
            currency: "USD".into(),
            correlation_id: "c1".into(),
            source_artifact_id: None,
            entity_id: None,
        };
        let first = engine
            .record_balance_snapshot(&invocation("record_balance_snapshot", "c1"), input.clone())
            .unwrap();
        assert_eq!(first["status"], "recorded");

        let mut second_input = input;
        second_input.balance = "97.5".into();
        let second = engine
            .record_balance_snapshot(&invocation("record_balance_snapshot", "c2"), second_input)
            .unwrap();
        assert_eq!(second["status"], "updated");
        assert_eq!(second["snapshot_id"], first["snapshot_id"]);

        let stored = engine.db.get_snapshot(&asset, "2026-01-31").unwrap().unwrap();
        assert_eq!(stored.balance, "97.5000");
    }

    #[test]
    fn obligation_upsert_then_fulfill() {
        let engine = test_engine("ledger_obligation");
        let (asset, _) = engine_accounts(&engine);
        let input = ObligationInput {
            source_system: "billing".into(),
            name: "rent".into(),
            account_id: asset.clone(),
            cadence: "monthly".into(),
            expected_amount: "1500".into(),
            next_due_date: "2026-02-01".into(),
            correlation_id: "c1".into(),
            variability_flag: false,
            metadata: None,
        };
        let created = engine
            .create_or_update_obligation(
                &invocation("create_or_update_obligation", "c1"),
                input.clone(),
            )
            .unwrap();
        assert_eq!(created["status"], "created");

        let updated = engine
            .create_or_update_obligation(&invocation("create_or_update_obligation", "c2"), input)
            .unwrap();
        assert_eq!(updated["status"], "updated");
        assert_eq!(updated["obligation_id"], created["obligation_id"]);

        let obligation_id = created["obligation_id"].as_str().unwrap().to_string();
        let fulfilled = engine
            .fulfill_obligation(
                &invocation("fulfill_obligation", "c3"),
                FulfillObligationInput {
                    obligation_id: obligation_id.clone(),
                    correlation_id: "c3".into(),
                    fulfilled_by_transaction_id: None,
                    fulfilled_at: Some("2026-02-01T00:00:00Z".into()),
                },
            )
            .unwrap();
        assert_eq!(fulfilled["status"], "fulfilled");
        assert_eq!(fulfilled["active"], false);

        let stored = engine.db.get_obligation(&obligation_id).unwrap().unwrap();
        assert!(!stored.active);
        assert!(stored.fulfilled_at.is_some());
    }

    fn engine_accounts(engine: &Engine) -> (String, String) {
        crate::testutil::seed_two_accounts(engine)
    }
}
