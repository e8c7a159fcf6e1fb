//! Reconciliation of ledger balances against external snapshots.

use rust_decimal::Decimal;
use serde_json::{json, Value};

use keel_core::config::BalanceSourcePolicy;
use keel_core::constants::{
    CURRENCY_CODE, OFFSET_ACCOUNT_PLACEHOLDER, RECONCILIATION_SOURCE_SYSTEM,
};
use keel_core::error::KeelError;
use keel_core::money;
use keel_store::StoreDb;

use crate::balances::account_balance_context;

/// A non-committing adjustment the caller must edit before recording: the
/// offset leg points at a placeholder account that never resolves.
fn suggested_adjustment_bundle(
    account_id: &str,
    as_of_date: &str,
    method: BalanceSourcePolicy,
    delta: Decimal,
) -> Value {
    let delta_text = money::format_amount(delta);
    json!({
        "status": "proposed",
        "auto_commit": false,
        "source_system": RECONCILIATION_SOURCE_SYSTEM,
        "external_id": format!("reconcile:{account_id}:{as_of_date}:{}:{delta_text}", method.as_str()),
        "date": as_of_date,
        "description": format!("Suggested reconciliation adjustment for account {account_id}"),
        "postings": [
            {
                "account_id": account_id,
                "amount": delta_text,
                "currency": CURRENCY_CODE,
                "memo": "Apply reconciliation delta to target account",
            },
            {
                "account_id": OFFSET_ACCOUNT_PLACEHOLDER,
                "amount": money::format_amount(-delta),
                "currency": CURRENCY_CODE,
                "memo": "Select balancing account before recording",
            },
        ],
    })
}

/// Compare ledger and snapshot balances for one account as of a date.
/// When `method` selects a snapshot source and a nonzero delta exists, a
/// suggested adjustment bundle accompanies the result.
pub fn reconcile_account(
    db: &StoreDb,
    account_id: &str,
    as_of_date: &str,
    method: BalanceSourcePolicy,
) -> Result<Value, KeelError> {
    let Some(context) = account_balance_context(db, account_id, as_of_date)? else {
        return Ok(json!({
            "status": "account_not_found",
            "account_id": account_id,
            "as_of_date": as_of_date,
            "method": method.as_str(),
            "ledger_balance": Value::Null,
            "snapshot_balance": Value::Null,
            "snapshot_date": Value::Null,
            "delta": Value::Null,
            "suggested_adjustment_bundle": Value::Null,
            "source_used": "none",
        }));
    };

    let ledger_balance = money::quantize(context.ledger_balance);
    let snapshot_balance = context.snapshot_balance.map(money::quantize);
    let delta = snapshot_balance.map(|snapshot| money::quantize(snapshot - ledger_balance));

    let source_used = match method {
        BalanceSourcePolicy::LedgerOnly => "ledger",
        BalanceSourcePolicy::SnapshotOnly => {
            if snapshot_balance.is_some() {
                "snapshot"
            } else {
                "none"
            }
        }
        BalanceSourcePolicy::BestAvailable => {
            if snapshot_balance.is_some() {
                "snapshot"
            } else {
                "ledger"
            }
        }
    };

    let suggestion = match delta {
        Some(delta)
            if delta != Decimal::ZERO && method != BalanceSourcePolicy::LedgerOnly =>
        {
            suggested_adjustment_bundle(account_id, as_of_date, method, delta)
        }
        _ => Value::Null,
    };

    Ok(json!({
        "status": "ok",
        "account_id": account_id,
        "as_of_date": as_of_date,
        "method": method.as_str(),
        "ledger_balance": money::format_amount(ledger_balance),
        "snapshot_balance": snapshot_balance.map(money::format_amount),
        "snapshot_date": context.snapshot_date,
        "delta": delta.map(money::format_amount),
        "suggested_adjustment_bundle": suggestion,
        "source_used": source_used,
    }))
}
