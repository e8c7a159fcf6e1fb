use serde::Deserialize;
use serde_json::{Map, Value};

use keel_core::config::BalanceSourcePolicy;
use keel_core::constants::DEFAULT_PAGE_LIMIT;
use keel_core::error::KeelError;
use keel_engine::Invocation;
use keel_query::{balances, listings, reconcile, tree};

use super::{finish_read, parse_input};
use crate::ToolDeps;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PageInput {
    correlation_id: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    cursor: Option<String>,
}

impl PageInput {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT)
    }
}

pub fn list_accounts(deps: &ToolDeps, inv: &Invocation, payload: Value) -> Result<Value, KeelError> {
    let input: PageInput = parse_input(payload)?;
    let page = listings::accounts_page(&deps.db, input.limit(), input.cursor.as_deref())?;
    let mut fields = Map::new();
    fields.insert("accounts".into(), Value::Array(page.rows));
    fields.insert("next_cursor".into(), opt_string(page.next_cursor));
    finish_read(deps, inv, fields, &input.correlation_id)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AccountTreeInput {
    correlation_id: String,
    #[serde(default)]
    root_account_id: Option<String>,
}

pub fn get_account_tree(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: AccountTreeInput = parse_input(payload)?;
    let tree = tree::account_tree(&deps.db, input.root_account_id.as_deref())?;
    let fields = tree
        .as_object()
        .cloned()
        .unwrap_or_default();
    finish_read(deps, inv, fields, &input.correlation_id)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BalancesInput {
    correlation_id: String,
    as_of_date: String,
    #[serde(default)]
    source_policy: Option<String>,
}

pub fn get_account_balances(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: BalancesInput = parse_input(payload)?;
    let policy = match &input.source_policy {
        Some(raw) => BalanceSourcePolicy::parse(raw)?,
        None => deps.engine.effective_balance_policy()?,
    };
    let rows = balances::account_balances_as_of(&deps.db, &input.as_of_date, policy)?;
    let mut fields = Map::new();
    fields.insert("as_of_date".into(), Value::String(input.as_of_date.clone()));
    fields.insert(
        "source_policy".into(),
        Value::String(policy.as_str().to_string()),
    );
    fields.insert("balances".into(), Value::Array(rows));
    finish_read(deps, inv, fields, &input.correlation_id)
}

pub fn list_transactions(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: PageInput = parse_input(payload)?;
    let page = listings::transactions_page(&deps.db, input.limit(), input.cursor.as_deref())?;
    let mut fields = Map::new();
    fields.insert("transactions".into(), Value::Array(page.rows));
    fields.insert("next_cursor".into(), opt_string(page.next_cursor));
    finish_read(deps, inv, fields, &input.correlation_id)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalIdInput {
    correlation_id: String,
    source_system: String,
    external_id: String,
}

pub fn get_transaction_by_external_id(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: ExternalIdInput = parse_input(payload)?;
    let transaction = listings::transaction_with_postings_by_external_id(
        &deps.db,
        &input.source_system,
        &input.external_id,
    )?;
    let mut fields = Map::new();
    fields.insert("transaction".into(), transaction.unwrap_or(Value::Null));
    finish_read(deps, inv, fields, &input.correlation_id)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ObligationsInput {
    correlation_id: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    active_only: bool,
}

pub fn list_obligations(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: ObligationsInput = parse_input(payload)?;
    let page = listings::obligations_page(
        &deps.db,
        input.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        input.cursor.as_deref(),
        input.active_only,
    )?;
    let mut fields = Map::new();
    fields.insert("obligations".into(), Value::Array(page.rows));
    fields.insert("next_cursor".into(), opt_string(page.next_cursor));
    finish_read(deps, inv, fields, &input.correlation_id)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ProposalsInput {
    correlation_id: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

pub fn list_proposals(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: ProposalsInput = parse_input(payload)?;
    if let Some(status) = &input.status {
        if !matches!(status.as_str(), "proposed" | "committed" | "rejected") {
            return Err(KeelError::Validation(format!(
                "status must be proposed|committed|rejected, got '{status}'"
            )));
        }
    }
    let page = listings::proposals_page(
        &deps.db,
        input.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        input.cursor.as_deref(),
        input.status.as_deref(),
    )?;
    let mut fields = Map::new();
    fields.insert("proposals".into(), Value::Array(page.rows));
    fields.insert("next_cursor".into(), opt_string(page.next_cursor));
    finish_read(deps, inv, fields, &input.correlation_id)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GetProposalInput {
    correlation_id: String,
    proposal_id: String,
}

pub fn get_proposal(deps: &ToolDeps, inv: &Invocation, payload: Value) -> Result<Value, KeelError> {
    let input: GetProposalInput = parse_input(payload)?;
    let proposal = listings::proposal_detail(&deps.db, &input.proposal_id)?;
    let mut fields = Map::new();
    fields.insert("proposal".into(), proposal.unwrap_or(Value::Null));
    finish_read(deps, inv, fields, &input.correlation_id)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReconcileInput {
    correlation_id: String,
    account_id: String,
    as_of_date: String,
    method: String,
}

pub fn reconcile_account(
    deps: &ToolDeps,
    inv: &Invocation,
    payload: Value,
) -> Result<Value, KeelError> {
    let input: ReconcileInput = parse_input(payload)?;
    let method = BalanceSourcePolicy::parse(&input.method)?;
    let result =
        reconcile::reconcile_account(&deps.db, &input.account_id, &input.as_of_date, method)?;
    let fields = result.as_object().cloned().unwrap_or_default();
    finish_read(deps, inv, fields, &input.correlation_id)
}

fn opt_string(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}
