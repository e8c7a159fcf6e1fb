//! keel-engine — the write path of the keel ledger.
//!
//! One engine over the store: ledger bundle recording, policy evaluation,
//! the accounting-period lifecycle, and the approval state machine. Every
//! mutation stages its rows (event-log entry included) and commits once,
//! under the store's write guard.

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde_json::Value;

use keel_core::config::BalanceSourcePolicy;
use keel_core::error::KeelError;
use keel_core::{money, AppConfig};
use keel_store::StoreDb;

pub mod accounts;
pub mod approval;
pub mod config_changes;
pub mod inputs;
pub mod ledger;
pub mod periods;
pub mod policy;

#[cfg(test)]
pub(crate) mod testutil;

/// One invocation's identity as seen by the engine: the tool being run,
/// the caller's correlation id, the digest of the raw payload, and the
/// dispatch start time for event durations.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub tool_name: String,
    pub correlation_id: String,
    pub input_hash: String,
    pub started: Instant,
}

impl Invocation {
    pub fn new(tool_name: &str, correlation_id: &str, input_hash: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            correlation_id: correlation_id.to_string(),
            input_hash: input_hash.to_string(),
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub struct Engine {
    pub db: Arc<StoreDb>,
    pub config: Arc<AppConfig>,
}

impl Engine {
    pub fn new(db: Arc<StoreDb>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// The global approval threshold, read through the committed
    /// config-change overlay.
    pub fn effective_threshold(&self) -> Result<Decimal, KeelError> {
        if let Some(raw) = config_changes::read_override(&self.db, "approval_threshold_amount")? {
            return money::parse_amount(&raw);
        }
        Ok(self.config.approval_threshold_amount)
    }

    /// The default as-of balance source policy, read through the committed
    /// config-change overlay.
    pub fn effective_balance_policy(&self) -> Result<BalanceSourcePolicy, KeelError> {
        if let Some(raw) = config_changes::read_override(&self.db, "balance_source_policy")? {
            return BalanceSourcePolicy::parse(&raw);
        }
        Ok(self.config.balance_source_policy)
    }

    /// Stamped output hash a response claims; responses built by this
    /// engine always carry one.
    pub(crate) fn response_hash(response: &Value) -> Result<String, KeelError> {
        keel_core::hashing::claimed_output_hash(response)
            .map(str::to_string)
            .ok_or_else(|| KeelError::Storage("response is missing its output_hash".into()))
    }
}
