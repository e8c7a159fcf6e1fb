//! Persisted record types.
//!
//! Rows are bincode-encoded into sled trees by the store. Monetary amounts
//! are canonical fixed-4dp strings, timestamps canonical UTC strings, and
//! metadata/payload fields canonical JSON text — the exact representations
//! that feed the payload hashes, so a decoded row re-serializes
//! byte-identically.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Fresh row identifier (UUID v4, hyphenated).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ── Entities ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub code: String,
    pub name: String,
    /// Canonical JSON object.
    pub metadata: String,
    pub created_at: String,
}

// ── Accounts ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Equity => "equity",
            AccountType::Income => "income",
            AccountType::Expense => "expense",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "asset" => Some(AccountType::Asset),
            "liability" => Some(AccountType::Liability),
            "equity" => Some(AccountType::Equity),
            "income" => Some(AccountType::Income),
            "expense" => Some(AccountType::Expense),
            _ => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    /// Unique within a database.
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub parent_account_id: Option<String>,
    pub entity_id: String,
    /// Canonical JSON object.
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

// ── Ledger transactions & postings ───────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub transaction_id: String,
    pub source_system: String,
    pub external_id: String,
    /// Canonical UTC timestamp.
    pub transaction_date: String,
    pub description: String,
    pub correlation_id: String,
    pub input_hash: String,
    pub entity_id: String,
    pub is_adjusting_entry: bool,
    pub adjusting_reason_code: Option<String>,
    /// Canonical JSON of the committed response. NULL→value exactly once.
    pub response_payload: Option<String>,
    pub output_hash: Option<String>,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Posting {
    pub posting_id: String,
    pub transaction_id: String,
    pub account_id: String,
    /// Canonical fixed-4dp signed amount.
    pub amount: String,
    pub currency: String,
    pub memo: Option<String>,
}

// ── Balance snapshots ────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub snapshot_id: String,
    pub source_system: String,
    pub account_id: String,
    /// ISO calendar date. `(account_id, snapshot_date)` is unique.
    pub snapshot_date: String,
    pub balance: String,
    pub currency: String,
    pub source_artifact_id: Option<String>,
    pub entity_id: String,
    pub created_at: String,
    pub updated_at: String,
}

// ── Obligations ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Monthly,
    Annual,
    Custom,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Monthly => "monthly",
            Cadence::Annual => "annual",
            Cadence::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "monthly" => Some(Cadence::Monthly),
            "annual" => Some(Cadence::Annual),
            "custom" => Some(Cadence::Custom),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Obligation {
    pub obligation_id: String,
    pub source_system: String,
    pub name: String,
    pub account_id: String,
    pub cadence: Cadence,
    pub expected_amount: String,
    pub variability_flag: bool,
    pub next_due_date: String,
    /// Canonical JSON object.
    pub metadata: String,
    pub active: bool,
    pub fulfilled_by_transaction_id: Option<String>,
    pub fulfilled_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ── Approval proposals & decisions ───────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Committed,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Committed => "committed",
            ProposalStatus::Rejected => "rejected",
        }
    }

    /// Committed and rejected proposals never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Proposed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub tool_name: String,
    pub source_system: String,
    pub external_id: String,
    pub correlation_id: String,
    pub input_hash: String,
    pub policy_threshold_amount: String,
    pub impact_amount: String,
    pub status: ProposalStatus,
    pub matched_rule_id: Option<String>,
    pub required_approvals: u32,
    pub entity_id: String,
    /// Canonical JSON of the pending write.
    pub request_payload: String,
    pub response_payload: Option<String>,
    pub output_hash: Option<String>,
    pub approved_transaction_id: Option<String>,
    pub decision_reason: Option<String>,
    pub created_at: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Approve => "approve",
            DecisionAction::Reject => "reject",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub proposal_id: String,
    pub action: DecisionAction,
    pub correlation_id: String,
    pub approver_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: String,
}

// ── Accounting periods ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Open,
    Closed,
    Locked,
}

impl PeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodStatus::Open => "open",
            PeriodStatus::Closed => "closed",
            PeriodStatus::Locked => "locked",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountingPeriod {
    pub period_id: String,
    /// `YYYY-MM`. `(period_key, entity_id)` is unique.
    pub period_key: String,
    pub entity_id: String,
    pub status: PeriodStatus,
    pub actor_id: Option<String>,
    pub correlation_id: String,
    pub closed_at: Option<String>,
    pub locked_at: Option<String>,
}

// ── Policy rules ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyRule {
    pub rule_id: String,
    /// Lower value = stronger rule.
    pub priority: i64,
    pub tool_name: Option<String>,
    pub entity_id: Option<String>,
    pub transaction_category: Option<String>,
    pub risk_band: Option<String>,
    pub velocity_limit_count: Option<u64>,
    pub velocity_window_seconds: Option<i64>,
    pub threshold_amount: String,
    pub required_approvals: u32,
    pub active: bool,
    /// Canonical JSON object.
    pub metadata: String,
}

// ── Event log ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event_id: String,
    pub tool_name: String,
    pub correlation_id: String,
    pub input_hash: String,
    pub output_hash: String,
    pub event_timestamp: String,
    pub duration_ms: u64,
    pub status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub actor_id: Option<String>,
    pub authn_method: Option<String>,
    pub authorization_result: Option<String>,
    pub violation_code: Option<String>,
}
