//! Shared helpers for engine tests.

use std::sync::Arc;

use serde_json::json;

use keel_core::constants::DEFAULT_ENTITY_ID;
use keel_core::hashing::payload_hash;
use keel_core::records::{new_id, Account, AccountType, PolicyRule};
use keel_core::AppConfig;
use keel_store::{StagedWrite, StoreDb};

use crate::inputs::{BundleInput, PostingInput};
use crate::{Engine, Invocation};

pub(crate) fn test_engine(name: &str) -> Engine {
    let dir = std::env::temp_dir().join(format!("keel_engine_test_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    let db = Arc::new(StoreDb::open(&dir).expect("open temp db"));
    let config = Arc::new(AppConfig::for_db_path(&dir));
    Engine::new(db, config)
}

pub(crate) fn invocation(tool: &str, correlation_id: &str) -> Invocation {
    let input_hash = payload_hash(&json!({ "correlation_id": correlation_id }));
    Invocation::new(tool, correlation_id, &input_hash)
}

pub(crate) fn seed_account(engine: &Engine, code: &str, account_type: AccountType) -> String {
    let account_id = new_id();
    let account = Account {
        account_id: account_id.clone(),
        code: code.to_string(),
        name: format!("Account {code}"),
        account_type,
        parent_account_id: None,
        entity_id: DEFAULT_ENTITY_ID.to_string(),
        metadata: "{}".to_string(),
        created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
    };
    let mut staged = StagedWrite::new();
    engine
        .db
        .stage_insert_account(&mut staged, &account)
        .unwrap();
    engine.db.commit(staged).unwrap();
    account_id
}

/// Seed one asset and one equity account, returning their ids.
pub(crate) fn seed_two_accounts(engine: &Engine) -> (String, String) {
    (
        seed_account(engine, "1000", AccountType::Asset),
        seed_account(engine, "3000", AccountType::Equity),
    )
}

/// A balanced two-posting bundle: `+amount` on `debit_account`,
/// `-amount` on `credit_account`.
pub(crate) fn bundle(
    source_system: &str,
    external_id: &str,
    debit_account: &str,
    credit_account: &str,
    amount: &str,
    correlation_id: &str,
) -> BundleInput {
    BundleInput {
        source_system: source_system.to_string(),
        external_id: external_id.to_string(),
        date: "2026-01-01T00:00:00Z".to_string(),
        description: "test bundle".to_string(),
        correlation_id: correlation_id.to_string(),
        entity_id: None,
        transaction_category: None,
        risk_band: None,
        is_adjusting_entry: false,
        adjusting_reason_code: None,
        override_period_lock: false,
        postings: vec![
            PostingInput {
                account_id: debit_account.to_string(),
                amount: amount.to_string(),
                currency: "USD".to_string(),
                memo: None,
            },
            PostingInput {
                account_id: credit_account.to_string(),
                amount: format!("-{amount}"),
                currency: "USD".to_string(),
                memo: None,
            },
        ],
    }
}

/// A plain threshold rule with no dimension filters.
pub(crate) fn threshold_rule(rule_id: &str, threshold: &str, required_approvals: u32) -> PolicyRule {
    PolicyRule {
        rule_id: rule_id.to_string(),
        priority: 100,
        tool_name: None,
        entity_id: None,
        transaction_category: None,
        risk_band: None,
        velocity_limit_count: None,
        velocity_window_seconds: None,
        threshold_amount: threshold.to_string(),
        required_approvals,
        active: true,
        metadata: "{}".to_string(),
    }
}
