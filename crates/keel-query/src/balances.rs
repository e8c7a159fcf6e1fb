//! As-of balance computation with source-selection policy.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use keel_core::config::BalanceSourcePolicy;
use keel_core::constants::CURRENCY_CODE;
use keel_core::error::KeelError;
use keel_core::{money, time};
use keel_store::StoreDb;

/// Ledger and snapshot balances for one account as of a date.
#[derive(Clone, Debug)]
pub struct BalanceContext {
    pub ledger_balance: Decimal,
    pub snapshot_balance: Option<Decimal>,
    pub snapshot_date: Option<String>,
}

/// Signed posting sums per account over transactions dated `<= as_of`.
fn ledger_totals(db: &StoreDb, as_of: NaiveDate) -> Result<BTreeMap<String, Decimal>, KeelError> {
    let mut totals: BTreeMap<String, Decimal> = BTreeMap::new();
    for tx in db.iter_transactions()? {
        let tx_date = time::parse_utc(&tx.transaction_date)?.date_naive();
        if tx_date > as_of {
            continue;
        }
        for posting in db.postings_for_transaction(&tx.transaction_id)? {
            let amount = money::parse_amount(&posting.amount)?;
            *totals.entry(posting.account_id).or_insert(Decimal::ZERO) += amount;
        }
    }
    Ok(totals)
}

/// Most recent snapshot per account with `snapshot_date <= as_of`, ties on
/// date broken by `snapshot_id` descending.
fn latest_snapshots(
    db: &StoreDb,
    as_of: NaiveDate,
) -> Result<BTreeMap<String, (Decimal, String)>, KeelError> {
    let mut latest: BTreeMap<String, (String, String, Decimal)> = BTreeMap::new();
    for snapshot in db.iter_snapshots()? {
        let date = time::parse_date(&snapshot.snapshot_date)?;
        if date > as_of {
            continue;
        }
        let balance = money::parse_amount(&snapshot.balance)?;
        let candidate = (
            snapshot.snapshot_date.clone(),
            snapshot.snapshot_id.clone(),
            balance,
        );
        match latest.get(&snapshot.account_id) {
            Some((best_date, best_id, _))
                if (best_date.as_str(), best_id.as_str())
                    >= (candidate.0.as_str(), candidate.1.as_str()) => {}
            _ => {
                latest.insert(snapshot.account_id.clone(), candidate);
            }
        }
    }
    Ok(latest
        .into_iter()
        .map(|(account_id, (date, _, balance))| (account_id, (balance, date)))
        .collect())
}

/// Per-account balance rows ordered `(code, account_id)`, one per account,
/// with the policy-selected balance alongside both sources.
pub fn account_balances_as_of(
    db: &StoreDb,
    as_of_date: &str,
    policy: BalanceSourcePolicy,
) -> Result<Vec<Value>, KeelError> {
    let as_of = time::parse_date(as_of_date)?;
    let totals = ledger_totals(db, as_of)?;
    let snapshots = latest_snapshots(db, as_of)?;

    let mut accounts = db.iter_accounts()?;
    accounts.sort_by(|a, b| {
        a.code
            .cmp(&b.code)
            .then_with(|| a.account_id.cmp(&b.account_id))
    });

    let mut rows = Vec::with_capacity(accounts.len());
    for account in accounts {
        let ledger_balance = totals
            .get(&account.account_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let snapshot = snapshots.get(&account.account_id);
        let snapshot_balance = snapshot.map(|(balance, _)| *balance);
        let snapshot_date = snapshot.map(|(_, date)| date.clone());

        let (balance, source_used) = select_balance(policy, ledger_balance, snapshot_balance);

        rows.push(json!({
            "account_id": account.account_id,
            "code": account.code,
            "name": account.name,
            "account_type": account.account_type.as_str(),
            "balance": balance.map(money::format_amount),
            "currency": CURRENCY_CODE,
            "source_used": source_used,
            "ledger_balance": money::format_amount(ledger_balance),
            "snapshot_balance": snapshot_balance.map(money::format_amount),
            "snapshot_date": snapshot_date,
        }));
    }
    Ok(rows)
}

/// Apply the source policy: the selected balance and the source label.
pub fn select_balance(
    policy: BalanceSourcePolicy,
    ledger_balance: Decimal,
    snapshot_balance: Option<Decimal>,
) -> (Option<Decimal>, &'static str) {
    match policy {
        BalanceSourcePolicy::LedgerOnly => (Some(ledger_balance), "ledger"),
        BalanceSourcePolicy::SnapshotOnly => match snapshot_balance {
            Some(balance) => (Some(balance), "snapshot"),
            None => (None, "none"),
        },
        BalanceSourcePolicy::BestAvailable => match snapshot_balance {
            Some(balance) => (Some(balance), "snapshot"),
            None => (Some(ledger_balance), "ledger"),
        },
    }
}

/// Both balance sources for a single account, or `None` if the account
/// does not exist.
pub fn account_balance_context(
    db: &StoreDb,
    account_id: &str,
    as_of_date: &str,
) -> Result<Option<BalanceContext>, KeelError> {
    if db.get_account(account_id)?.is_none() {
        return Ok(None);
    }
    let as_of = time::parse_date(as_of_date)?;
    let ledger_balance = ledger_totals(db, as_of)?
        .remove(account_id)
        .unwrap_or(Decimal::ZERO);
    let snapshot = latest_snapshots(db, as_of)?.remove(account_id);
    Ok(Some(BalanceContext {
        ledger_balance,
        snapshot_balance: snapshot.as_ref().map(|(balance, _)| *balance),
        snapshot_date: snapshot.map(|(_, date)| date),
    }))
}
