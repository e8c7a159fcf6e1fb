//! Wire inputs for write-class tools.
//!
//! Money arrives as strings (a JSON float is a type error), timestamps as
//! RFC 3339 strings, metadata as arbitrary JSON objects. Unknown fields
//! are rejected. These structs round-trip through canonical JSON — a
//! proposal's stored `request_payload` deserializes back into the same
//! input.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use keel_core::constants::DEFAULT_ENTITY_ID;
use keel_core::error::KeelError;
use keel_core::{hashing, money, time};

fn is_false(v: &bool) -> bool {
    !*v
}

/// Canonical JSON text for a metadata object (`{}` when absent).
pub fn metadata_text(metadata: &Option<Value>) -> String {
    match metadata {
        Some(value) => hashing::canonical_json(value),
        None => "{}".to_string(),
    }
}

// ── record_transaction_bundle ────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostingInput {
    pub account_id: String,
    pub amount: String,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleInput {
    pub source_system: String,
    pub external_id: String,
    pub date: String,
    pub description: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_band: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_adjusting_entry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusting_reason_code: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub override_period_lock: bool,
    pub postings: Vec<PostingInput>,
}

impl BundleInput {
    pub fn entity(&self) -> &str {
        self.entity_id.as_deref().unwrap_or(DEFAULT_ENTITY_ID)
    }

    pub fn parsed_date(&self) -> Result<DateTime<Utc>, KeelError> {
        time::parse_utc(&self.date)
    }

    pub fn amounts(&self) -> Result<Vec<Decimal>, KeelError> {
        self.postings
            .iter()
            .map(|p| money::parse_amount(&p.amount))
            .collect()
    }
}

// ── create_account / update_account_metadata ─────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAccountInput {
    pub code: String,
    pub name: String,
    pub account_type: String,
    pub correlation_id: String,
    #[serde(default)]
    pub parent_account_id: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAccountMetadataInput {
    pub account_id: String,
    pub correlation_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

// ── record_balance_snapshot ──────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotInput {
    pub source_system: String,
    pub account_id: String,
    pub snapshot_date: String,
    pub balance: String,
    pub currency: String,
    pub correlation_id: String,
    #[serde(default)]
    pub source_artifact_id: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
}

// ── create_or_update_obligation / fulfill_obligation ─────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObligationInput {
    pub source_system: String,
    pub name: String,
    pub account_id: String,
    pub cadence: String,
    pub expected_amount: String,
    pub next_due_date: String,
    pub correlation_id: String,
    #[serde(default)]
    pub variability_flag: bool,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FulfillObligationInput {
    pub obligation_id: String,
    pub correlation_id: String,
    #[serde(default)]
    pub fulfilled_by_transaction_id: Option<String>,
    #[serde(default)]
    pub fulfilled_at: Option<String>,
}

// ── approvals ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionInput {
    pub proposal_id: String,
    pub correlation_id: String,
    #[serde(default)]
    pub approver_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

// ── periods ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodInput {
    pub period_key: String,
    pub correlation_id: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
}

impl PeriodInput {
    pub fn entity(&self) -> &str {
        self.entity_id.as_deref().unwrap_or(DEFAULT_ENTITY_ID)
    }
}

// ── config changes ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposeConfigChangeInput {
    pub source_system: String,
    pub external_id: String,
    pub scope: String,
    pub change_payload: Value,
    pub correlation_id: String,
}
