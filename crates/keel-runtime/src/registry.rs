//! The tool registry.
//!
//! Every tool registers its class, required capability, and a static
//! descriptor alongside its handler, so the runtime can never forget the
//! write/read failure policy or the authorization requirement for a new
//! tool.

use serde_json::{json, Value};

use keel_core::error::KeelError;
use keel_engine::Invocation;

use crate::handlers;
use crate::ToolDeps;

/// Failure policy class: write tools fail closed when the event log
/// cannot be appended; read tools tolerate it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolClass {
    Read,
    Write,
}

impl ToolClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolClass::Read => "read",
            ToolClass::Write => "write",
        }
    }
}

pub type Handler = fn(&ToolDeps, &Invocation, Value) -> Result<Value, KeelError>;

pub struct ToolSpec {
    pub name: &'static str,
    pub class: ToolClass,
    /// Default capability; `tool_capabilities` config overrides it.
    pub capability: &'static str,
    pub summary: &'static str,
    pub required_fields: &'static [&'static str],
    pub handler: Handler,
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "create_account",
        class: ToolClass::Write,
        capability: "tools:write",
        summary: "Create a ledger account",
        required_fields: &["code", "name", "account_type", "correlation_id"],
        handler: handlers::accounts::create_account,
    },
    ToolSpec {
        name: "update_account_metadata",
        class: ToolClass::Write,
        capability: "tools:write",
        summary: "Update an account's name or metadata",
        required_fields: &["account_id", "correlation_id"],
        handler: handlers::accounts::update_account_metadata,
    },
    ToolSpec {
        name: "record_transaction_bundle",
        class: ToolClass::Write,
        capability: "tools:write",
        summary: "Record a balanced double-entry transaction bundle",
        required_fields: &[
            "source_system",
            "external_id",
            "date",
            "description",
            "postings",
            "correlation_id",
        ],
        handler: handlers::ledger::record_transaction_bundle,
    },
    ToolSpec {
        name: "record_balance_snapshot",
        class: ToolClass::Write,
        capability: "tools:write",
        summary: "Upsert an external balance snapshot",
        required_fields: &[
            "source_system",
            "account_id",
            "snapshot_date",
            "balance",
            "currency",
            "correlation_id",
        ],
        handler: handlers::ledger::record_balance_snapshot,
    },
    ToolSpec {
        name: "create_or_update_obligation",
        class: ToolClass::Write,
        capability: "tools:write",
        summary: "Upsert a recurring obligation",
        required_fields: &[
            "source_system",
            "name",
            "account_id",
            "cadence",
            "expected_amount",
            "next_due_date",
            "correlation_id",
        ],
        handler: handlers::ledger::create_or_update_obligation,
    },
    ToolSpec {
        name: "approve_proposed_transaction",
        class: ToolClass::Write,
        capability: "tools:approve",
        summary: "Approve a gated transaction proposal",
        required_fields: &["proposal_id", "correlation_id"],
        handler: handlers::approvals::approve_proposed_transaction,
    },
    ToolSpec {
        name: "reject_proposed_transaction",
        class: ToolClass::Write,
        capability: "tools:approve",
        summary: "Reject a gated transaction proposal",
        required_fields: &["proposal_id", "correlation_id"],
        handler: handlers::approvals::reject_proposed_transaction,
    },
    ToolSpec {
        name: "propose_config_change",
        class: ToolClass::Write,
        capability: "tools:admin",
        summary: "Propose a runtime configuration change",
        required_fields: &[
            "source_system",
            "external_id",
            "scope",
            "change_payload",
            "correlation_id",
        ],
        handler: handlers::config_tools::propose_config_change,
    },
    ToolSpec {
        name: "approve_config_change",
        class: ToolClass::Write,
        capability: "tools:admin",
        summary: "Approve and apply a configuration change",
        required_fields: &["proposal_id", "correlation_id"],
        handler: handlers::config_tools::approve_config_change,
    },
    ToolSpec {
        name: "close_period",
        class: ToolClass::Write,
        capability: "tools:write",
        summary: "Close an accounting period",
        required_fields: &["period_key", "correlation_id"],
        handler: handlers::periods::close_period,
    },
    ToolSpec {
        name: "lock_period",
        class: ToolClass::Write,
        capability: "tools:write",
        summary: "Lock an accounting period",
        required_fields: &["period_key", "correlation_id"],
        handler: handlers::periods::lock_period,
    },
    ToolSpec {
        name: "list_accounts",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "List accounts with cursor pagination",
        required_fields: &["correlation_id"],
        handler: handlers::queries::list_accounts,
    },
    ToolSpec {
        name: "get_account_tree",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Fetch the account hierarchy",
        required_fields: &["correlation_id"],
        handler: handlers::queries::get_account_tree,
    },
    ToolSpec {
        name: "get_account_balances",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Compute as-of balances under a source policy",
        required_fields: &["as_of_date", "correlation_id"],
        handler: handlers::queries::get_account_balances,
    },
    ToolSpec {
        name: "list_transactions",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "List transactions, newest first",
        required_fields: &["correlation_id"],
        handler: handlers::queries::list_transactions,
    },
    ToolSpec {
        name: "get_transaction_by_external_id",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Fetch one transaction with postings by idempotency key",
        required_fields: &["source_system", "external_id", "correlation_id"],
        handler: handlers::queries::get_transaction_by_external_id,
    },
    ToolSpec {
        name: "list_obligations",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "List obligations by due date",
        required_fields: &["correlation_id"],
        handler: handlers::queries::list_obligations,
    },
    ToolSpec {
        name: "list_proposals",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "List approval proposals, newest first",
        required_fields: &["correlation_id"],
        handler: handlers::queries::list_proposals,
    },
    ToolSpec {
        name: "get_proposal",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Fetch one approval proposal with its response",
        required_fields: &["proposal_id", "correlation_id"],
        handler: handlers::queries::get_proposal,
    },
    ToolSpec {
        name: "get_config",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Report effective runtime configuration",
        required_fields: &["correlation_id"],
        handler: handlers::config_tools::get_config,
    },
    ToolSpec {
        name: "reconcile_account",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Reconcile an account against its snapshots",
        required_fields: &["account_id", "as_of_date", "method", "correlation_id"],
        handler: handlers::queries::reconcile_account,
    },
    ToolSpec {
        name: "compute_capital_posture",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Compute capital posture and risk band",
        required_fields: &[
            "liquidity",
            "fixed_burn",
            "variable_burn",
            "minimum_reserve",
            "correlation_id",
        ],
        handler: handlers::posture_tools::compute_capital_posture,
    },
    ToolSpec {
        name: "compute_consolidated_posture",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Consolidate posture across entities",
        required_fields: &["entity_ids", "entities", "correlation_id"],
        handler: handlers::posture_tools::compute_consolidated_posture,
    },
    ToolSpec {
        name: "simulate_spend",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Project liquidity under planned spends",
        required_fields: &[
            "starting_liquidity",
            "start_date",
            "horizon_periods",
            "correlation_id",
        ],
        handler: handlers::posture_tools::simulate_spend,
    },
    ToolSpec {
        name: "analyze_debt",
        class: ToolClass::Read,
        capability: "tools:read",
        summary: "Rank liabilities and apply an optional payoff",
        required_fields: &["liabilities", "correlation_id"],
        handler: handlers::posture_tools::analyze_debt,
    },
];

pub fn lookup_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|spec| spec.name == name)
}

/// Registered tool names, sorted.
pub fn tool_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = TOOLS.iter().map(|spec| spec.name).collect();
    names.sort_unstable();
    names
}

/// Transport-facing descriptor derived from the registration.
pub fn tool_descriptor(spec: &ToolSpec) -> Value {
    json!({
        "name": spec.name,
        "mode": spec.class.as_str(),
        "capability": spec.capability,
        "summary": spec.summary,
        "required_fields": spec.required_fields,
    })
}
