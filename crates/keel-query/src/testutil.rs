//! Shared helpers for query tests: seed rows straight into a temp store.

use keel_core::constants::DEFAULT_ENTITY_ID;
use keel_core::records::{
    new_id, Account, AccountType, BalanceSnapshot, LedgerTransaction, Posting,
};
use keel_store::{StagedWrite, StoreDb};

pub(crate) fn temp_store(name: &str) -> StoreDb {
    let dir = std::env::temp_dir().join(format!("keel_query_test_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    StoreDb::open(&dir).expect("open temp db")
}

pub(crate) fn seed_account(db: &StoreDb, code: &str, name: &str) -> String {
    seed_account_with_parent(db, code, name, None)
}

pub(crate) fn seed_account_with_parent(
    db: &StoreDb,
    code: &str,
    name: &str,
    parent_account_id: Option<String>,
) -> String {
    let account_id = new_id();
    let account = Account {
        account_id: account_id.clone(),
        code: code.to_string(),
        name: name.to_string(),
        account_type: AccountType::Asset,
        parent_account_id,
        entity_id: DEFAULT_ENTITY_ID.to_string(),
        metadata: "{}".to_string(),
        created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
    };
    let mut staged = StagedWrite::new();
    db.stage_insert_account(&mut staged, &account).unwrap();
    db.commit(staged).unwrap();
    account_id
}

/// One transaction with a single posting of `amount` on `account_id`.
pub(crate) fn seed_transaction(
    db: &StoreDb,
    external_id: &str,
    transaction_date: &str,
    account_id: &str,
    amount: &str,
) -> String {
    let transaction_id = new_id();
    let tx = LedgerTransaction {
        transaction_id: transaction_id.clone(),
        source_system: "test".to_string(),
        external_id: external_id.to_string(),
        transaction_date: transaction_date.to_string(),
        description: format!("seed {external_id}"),
        correlation_id: "seed".to_string(),
        input_hash: "0".repeat(64),
        entity_id: DEFAULT_ENTITY_ID.to_string(),
        is_adjusting_entry: false,
        adjusting_reason_code: None,
        response_payload: Some(r#"{"status":"committed"}"#.to_string()),
        output_hash: Some("0".repeat(64)),
        created_at: transaction_date.to_string(),
    };
    let posting = Posting {
        posting_id: new_id(),
        transaction_id: transaction_id.clone(),
        account_id: account_id.to_string(),
        amount: amount.to_string(),
        currency: "USD".to_string(),
        memo: None,
    };
    let mut staged = StagedWrite::new();
    db.stage_transaction_bundle(&mut staged, &tx, std::slice::from_ref(&posting))
        .unwrap();
    db.commit(staged).unwrap();
    transaction_id
}

pub(crate) fn seed_snapshot(
    db: &StoreDb,
    snapshot_id: &str,
    account_id: &str,
    snapshot_date: &str,
    balance: &str,
) {
    let snapshot = BalanceSnapshot {
        snapshot_id: snapshot_id.to_string(),
        source_system: "bank".to_string(),
        account_id: account_id.to_string(),
        snapshot_date: snapshot_date.to_string(),
        balance: balance.to_string(),
        currency: "USD".to_string(),
        source_artifact_id: None,
        entity_id: DEFAULT_ENTITY_ID.to_string(),
        created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
    };
    let mut staged = StagedWrite::new();
    db.stage_upsert_snapshot(&mut staged, snapshot).unwrap();
    db.commit(staged).unwrap();
}
