//! Paged listings with stable sort orders.
//!
//! Sort tuples: accounts `(code asc, account_id asc)`, transactions
//! `(transaction_date desc, transaction_id asc)`, obligations
//! `(next_due_date asc, obligation_id asc)`, proposals
//! `(created_at desc, proposal_id asc)`. Canonical timestamp strings
//! compare chronologically, so string ordering is date ordering.

use serde_json::{json, Value};

use keel_core::error::KeelError;
use keel_core::records::{Account, LedgerTransaction, Obligation, Proposal};
use keel_store::StoreDb;

use crate::pagination::{clamp_limit, decode_cursor, encode_cursor, paginate};

pub struct Page {
    pub rows: Vec<Value>,
    pub next_cursor: Option<String>,
}

fn parsed_metadata(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
}

fn account_row(account: &Account) -> Value {
    json!({
        "account_id": account.account_id,
        "code": account.code,
        "name": account.name,
        "account_type": account.account_type.as_str(),
        "parent_account_id": account.parent_account_id,
        "entity_id": account.entity_id,
        "metadata": parsed_metadata(&account.metadata),
    })
}

pub fn accounts_page(
    db: &StoreDb,
    limit: usize,
    cursor: Option<&str>,
) -> Result<Page, KeelError> {
    let limit = clamp_limit(limit);
    let after = cursor
        .map(|c| decode_cursor(c, &["code", "account_id"]))
        .transpose()?;

    let mut accounts = db.iter_accounts()?;
    accounts.sort_by(|a, b| {
        a.code
            .cmp(&b.code)
            .then_with(|| a.account_id.cmp(&b.account_id))
    });
    if let Some(after) = after {
        accounts.retain(|a| {
            (a.code.as_str(), a.account_id.as_str())
                > (after["code"].as_str(), after["account_id"].as_str())
        });
    }
    accounts.truncate(limit + 1);

    let (rows, next_cursor) = paginate(accounts, limit, |tail| {
        encode_cursor(&[("code", &tail.code), ("account_id", &tail.account_id)])
    });
    Ok(Page {
        rows: rows.iter().map(account_row).collect(),
        next_cursor,
    })
}

fn transaction_row(tx: &LedgerTransaction) -> Value {
    json!({
        "transaction_id": tx.transaction_id,
        "source_system": tx.source_system,
        "external_id": tx.external_id,
        "transaction_date": tx.transaction_date,
        "description": tx.description,
        "correlation_id": tx.correlation_id,
        "entity_id": tx.entity_id,
        "is_adjusting_entry": tx.is_adjusting_entry,
        "adjusting_reason_code": tx.adjusting_reason_code,
    })
}

pub fn transactions_page(
    db: &StoreDb,
    limit: usize,
    cursor: Option<&str>,
) -> Result<Page, KeelError> {
    let limit = clamp_limit(limit);
    let after = cursor
        .map(|c| decode_cursor(c, &["transaction_date", "transaction_id"]))
        .transpose()?;

    let mut transactions = db.iter_transactions()?;
    transactions.sort_by(|a, b| {
        b.transaction_date
            .cmp(&a.transaction_date)
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
    });
    if let Some(after) = after {
        let date = after["transaction_date"].as_str();
        let id = after["transaction_id"].as_str();
        transactions.retain(|t| {
            t.transaction_date.as_str() < date
                || (t.transaction_date == date && t.transaction_id.as_str() > id)
        });
    }
    transactions.truncate(limit + 1);

    let (rows, next_cursor) = paginate(transactions, limit, |tail| {
        encode_cursor(&[
            ("transaction_date", &tail.transaction_date),
            ("transaction_id", &tail.transaction_id),
        ])
    });
    Ok(Page {
        rows: rows.iter().map(transaction_row).collect(),
        next_cursor,
    })
}

fn obligation_row(obligation: &Obligation) -> Value {
    json!({
        "obligation_id": obligation.obligation_id,
        "source_system": obligation.source_system,
        "name": obligation.name,
        "account_id": obligation.account_id,
        "cadence": obligation.cadence.as_str(),
        "expected_amount": obligation.expected_amount,
        "variability_flag": obligation.variability_flag,
        "next_due_date": obligation.next_due_date,
        "metadata": parsed_metadata(&obligation.metadata),
        "active": obligation.active,
        "fulfilled_by_transaction_id": obligation.fulfilled_by_transaction_id,
        "fulfilled_at": obligation.fulfilled_at,
    })
}

pub fn obligations_page(
    db: &StoreDb,
    limit: usize,
    cursor: Option<&str>,
    active_only: bool,
) -> Result<Page, KeelError> {
    let limit = clamp_limit(limit);
    let after = cursor
        .map(|c| decode_cursor(c, &["next_due_date", "obligation_id"]))
        .transpose()?;

    let mut obligations = db.iter_obligations()?;
    if active_only {
        obligations.retain(|o| o.active);
    }
    obligations.sort_by(|a, b| {
        a.next_due_date
            .cmp(&b.next_due_date)
            .then_with(|| a.obligation_id.cmp(&b.obligation_id))
    });
    if let Some(after) = after {
        obligations.retain(|o| {
            (o.next_due_date.as_str(), o.obligation_id.as_str())
                > (after["next_due_date"].as_str(), after["obligation_id"].as_str())
        });
    }
    obligations.truncate(limit + 1);

    let (rows, next_cursor) = paginate(obligations, limit, |tail| {
        encode_cursor(&[
            ("next_due_date", &tail.next_due_date),
            ("obligation_id", &tail.obligation_id),
        ])
    });
    Ok(Page {
        rows: rows.iter().map(obligation_row).collect(),
        next_cursor,
    })
}

fn proposal_row(proposal: &Proposal) -> Value {
    json!({
        "proposal_id": proposal.proposal_id,
        "tool_name": proposal.tool_name,
        "source_system": proposal.source_system,
        "external_id": proposal.external_id,
        "status": proposal.status.as_str(),
        "policy_threshold_amount": proposal.policy_threshold_amount,
        "impact_amount": proposal.impact_amount,
        "matched_rule_id": proposal.matched_rule_id,
        "required_approvals": proposal.required_approvals,
        "entity_id": proposal.entity_id,
        "approved_transaction_id": proposal.approved_transaction_id,
        "created_at": proposal.created_at,
    })
}

pub fn proposals_page(
    db: &StoreDb,
    limit: usize,
    cursor: Option<&str>,
    status: Option<&str>,
) -> Result<Page, KeelError> {
    let limit = clamp_limit(limit);
    let after = cursor
        .map(|c| decode_cursor(c, &["created_at", "proposal_id"]))
        .transpose()?;

    let mut proposals = db.iter_proposals()?;
    if let Some(status) = status {
        proposals.retain(|p| p.status.as_str() == status);
    }
    proposals.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.proposal_id.cmp(&b.proposal_id))
    });
    if let Some(after) = after {
        let created = after["created_at"].as_str();
        let id = after["proposal_id"].as_str();
        proposals.retain(|p| {
            p.created_at.as_str() < created
                || (p.created_at == created && p.proposal_id.as_str() > id)
        });
    }
    proposals.truncate(limit + 1);

    let (rows, next_cursor) = paginate(proposals, limit, |tail| {
        encode_cursor(&[
            ("created_at", &tail.created_at),
            ("proposal_id", &tail.proposal_id),
        ])
    });
    Ok(Page {
        rows: rows.iter().map(proposal_row).collect(),
        next_cursor,
    })
}

/// A proposal with its stored response, for `get_proposal`.
pub fn proposal_detail(db: &StoreDb, proposal_id: &str) -> Result<Option<Value>, KeelError> {
    let Some(proposal) = db.get_proposal(proposal_id)? else {
        return Ok(None);
    };
    let mut row = proposal_row(&proposal);
    let response: Option<Value> = proposal
        .response_payload
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| KeelError::Serialization(e.to_string()))?;
    if let Some(obj) = row.as_object_mut() {
        obj.insert("response_payload".into(), response.unwrap_or(Value::Null));
        obj.insert("correlation_id".into(), json!(proposal.correlation_id));
    }
    Ok(Some(row))
}

/// One transaction with its postings, looked up by idempotency key.
pub fn transaction_with_postings_by_external_id(
    db: &StoreDb,
    source_system: &str,
    external_id: &str,
) -> Result<Option<Value>, KeelError> {
    let Some(transaction_id) = db.transaction_id_for_external(source_system, external_id)? else {
        return Ok(None);
    };
    let Some(tx) = db.get_transaction(&transaction_id)? else {
        return Ok(None);
    };
    let postings: Vec<Value> = db
        .postings_for_transaction(&transaction_id)?
        .iter()
        .map(|p| {
            json!({
                "posting_id": p.posting_id,
                "account_id": p.account_id,
                "amount": p.amount,
                "currency": p.currency,
                "memo": p.memo,
            })
        })
        .collect();
    let mut row = transaction_row(&tx);
    if let Some(obj) = row.as_object_mut() {
        obj.insert("postings".into(), Value::Array(postings));
        obj.insert("output_hash".into(), json!(tx.output_hash));
    }
    Ok(Some(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_account, seed_transaction, temp_store};

    #[test]
    fn accounts_page_walks_in_code_order() {
        let db = temp_store("listings_accounts");
        for code in ["3000", "1000", "2000"] {
            seed_account(&db, code, &format!("Account {code}"));
        }

        let first = accounts_page(&db, 2, None).unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.rows[0]["code"], "1000");
        assert_eq!(first.rows[1]["code"], "2000");
        let cursor = first.next_cursor.expect("more rows exist");

        let second = accounts_page(&db, 2, Some(&cursor)).unwrap();
        assert_eq!(second.rows.len(), 1);
        assert_eq!(second.rows[0]["code"], "3000");
        assert!(second.next_cursor.is_none());
    }

    #[test]
    fn transactions_page_is_newest_first() {
        let db = temp_store("listings_transactions");
        let cash = seed_account(&db, "1000", "Cash");
        seed_transaction(&db, "e1", "2026-01-01T00:00:00.000000Z", &cash, "1.0000");
        seed_transaction(&db, "e2", "2026-03-01T00:00:00.000000Z", &cash, "1.0000");
        seed_transaction(&db, "e3", "2026-02-01T00:00:00.000000Z", &cash, "1.0000");

        let page = transactions_page(&db, 10, None).unwrap();
        let dates: Vec<&str> = page
            .rows
            .iter()
            .map(|r| r["transaction_date"].as_str().unwrap())
            .collect();
        assert_eq!(
            dates,
            vec![
                "2026-03-01T00:00:00.000000Z",
                "2026-02-01T00:00:00.000000Z",
                "2026-01-01T00:00:00.000000Z",
            ]
        );
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn transactions_cursor_resumes_mid_listing() {
        let db = temp_store("listings_tx_cursor");
        let cash = seed_account(&db, "1000", "Cash");
        for i in 1..=5 {
            seed_transaction(
                &db,
                &format!("e{i}"),
                &format!("2026-01-0{i}T00:00:00.000000Z"),
                &cash,
                "1.0000",
            );
        }

        let first = transactions_page(&db, 2, None).unwrap();
        assert_eq!(first.rows.len(), 2);
        let cursor = first.next_cursor.unwrap();
        let second = transactions_page(&db, 2, Some(&cursor)).unwrap();
        assert_eq!(second.rows.len(), 2);
        // No overlap between pages.
        let seen: Vec<&str> = first
            .rows
            .iter()
            .chain(second.rows.iter())
            .map(|r| r["external_id"].as_str().unwrap())
            .collect();
        let mut deduped = seen.clone();
        deduped.dedup();
        assert_eq!(seen.len(), deduped.len());
    }

    #[test]
    fn external_id_lookup_includes_postings() {
        let db = temp_store("listings_external");
        let cash = seed_account(&db, "1000", "Cash");
        seed_transaction(&db, "e1", "2026-01-01T00:00:00.000000Z", &cash, "7.5000");

        let row = transaction_with_postings_by_external_id(&db, "test", "e1")
            .unwrap()
            .unwrap();
        assert_eq!(row["external_id"], "e1");
        assert_eq!(row["postings"][0]["amount"], "7.5000");

        assert!(transaction_with_postings_by_external_id(&db, "test", "missing")
            .unwrap()
            .is_none());
    }
}
