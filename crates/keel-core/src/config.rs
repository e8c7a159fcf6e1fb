//! Runtime configuration.
//!
//! Read from the environment exactly once at process start into an
//! explicit `AppConfig` value that is threaded through the runtime. Tests
//! construct configs directly instead of mutating the environment.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::constants::DEFAULT_APPROVAL_THRESHOLD;
use crate::error::KeelError;
use crate::money;

/// Which balance source an as-of query selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceSourcePolicy {
    LedgerOnly,
    SnapshotOnly,
    BestAvailable,
}

impl BalanceSourcePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceSourcePolicy::LedgerOnly => "ledger_only",
            BalanceSourcePolicy::SnapshotOnly => "snapshot_only",
            BalanceSourcePolicy::BestAvailable => "best_available",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, KeelError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ledger_only" => Ok(BalanceSourcePolicy::LedgerOnly),
            "snapshot_only" => Ok(BalanceSourcePolicy::SnapshotOnly),
            "best_available" => Ok(BalanceSourcePolicy::BestAvailable),
            other => Err(KeelError::Validation(format!(
                "balance source policy must be ledger_only|snapshot_only|best_available, got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for BalanceSourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One token identity from `KEEL_AUTH_TOKENS_JSON`.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenIdentity {
    pub actor_id: String,
    pub capabilities: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub app_env: String,
    pub db_path: PathBuf,
    /// Fixed at 4; present for operator visibility only.
    pub money_precision: u32,
    pub balance_source_policy: BalanceSourcePolicy,
    pub approval_threshold_amount: Decimal,
    pub token_identities: BTreeMap<String, TokenIdentity>,
    pub tool_capabilities: BTreeMap<String, String>,
    pub egress_allowlist: Vec<String>,
}

fn default_token_identities() -> BTreeMap<String, TokenIdentity> {
    let mut map = BTreeMap::new();
    map.insert(
        "dev-admin-token".to_string(),
        TokenIdentity {
            actor_id: "actor-admin".to_string(),
            capabilities: vec![
                "tools:read".into(),
                "tools:write".into(),
                "tools:approve".into(),
                "tools:admin".into(),
            ],
        },
    );
    map.insert(
        "dev-reader-token".to_string(),
        TokenIdentity {
            actor_id: "actor-reader".to_string(),
            capabilities: vec!["tools:read".into()],
        },
    );
    map
}

fn parse_token_identities(raw: &str) -> Result<BTreeMap<String, TokenIdentity>, KeelError> {
    let parsed: BTreeMap<String, TokenIdentity> = serde_json::from_str(raw)
        .map_err(|e| KeelError::Validation(format!("KEEL_AUTH_TOKENS_JSON: {e}")))?;
    for (token, identity) in &parsed {
        if token.is_empty() || identity.actor_id.is_empty() {
            return Err(KeelError::Validation(
                "KEEL_AUTH_TOKENS_JSON tokens and actor ids must be non-empty".into(),
            ));
        }
        if identity.capabilities.iter().any(String::is_empty) {
            return Err(KeelError::Validation(
                "KEEL_AUTH_TOKENS_JSON capabilities must be non-empty strings".into(),
            ));
        }
    }
    Ok(parsed)
}

fn parse_tool_capabilities(raw: &str) -> Result<BTreeMap<String, String>, KeelError> {
    let parsed: BTreeMap<String, String> = serde_json::from_str(raw)
        .map_err(|e| KeelError::Validation(format!("KEEL_TOOL_CAPABILITIES_JSON: {e}")))?;
    if parsed.iter().any(|(k, v)| k.is_empty() || v.is_empty()) {
        return Err(KeelError::Validation(
            "KEEL_TOOL_CAPABILITIES_JSON keys and values must be non-empty".into(),
        ));
    }
    Ok(parsed)
}

fn parse_allowlist(raw: &str) -> Vec<String> {
    let mut hosts: Vec<String> = raw
        .split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

impl AppConfig {
    /// Load configuration from the environment, applying dev defaults.
    pub fn from_env() -> Result<Self, KeelError> {
        let db_path = env::var("KEEL_DB_PATH").unwrap_or_else(|_| "./data/keel".to_string());

        let balance_source_policy = match env::var("KEEL_BALANCE_SOURCE_POLICY") {
            Ok(raw) => BalanceSourcePolicy::parse(&raw)?,
            Err(_) => BalanceSourcePolicy::BestAvailable,
        };

        let threshold_raw = env::var("KEEL_APPROVAL_THRESHOLD_AMOUNT")
            .unwrap_or_else(|_| DEFAULT_APPROVAL_THRESHOLD.to_string());
        let approval_threshold_amount = money::parse_amount(&threshold_raw)?;
        if approval_threshold_amount < Decimal::ZERO {
            return Err(KeelError::Validation(
                "approval threshold must be non-negative".into(),
            ));
        }

        let token_identities = match env::var("KEEL_AUTH_TOKENS_JSON") {
            Ok(raw) => parse_token_identities(&raw)?,
            Err(_) => default_token_identities(),
        };

        let tool_capabilities = match env::var("KEEL_TOOL_CAPABILITIES_JSON") {
            Ok(raw) => parse_tool_capabilities(&raw)?,
            Err(_) => BTreeMap::new(),
        };

        let egress_allowlist = env::var("KEEL_EGRESS_ALLOWLIST")
            .map(|raw| parse_allowlist(&raw))
            .unwrap_or_default();

        Ok(Self {
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
            db_path: PathBuf::from(db_path),
            money_precision: 4,
            balance_source_policy,
            approval_threshold_amount,
            token_identities,
            tool_capabilities,
            egress_allowlist,
        })
    }

    /// A config suitable for tests and local tools: dev defaults over the
    /// given database path, no environment reads.
    pub fn for_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            app_env: "dev".to_string(),
            db_path: db_path.into(),
            money_precision: 4,
            balance_source_policy: BalanceSourcePolicy::BestAvailable,
            approval_threshold_amount: money::parse_amount(DEFAULT_APPROVAL_THRESHOLD)
                .expect("default threshold parses"),
            token_identities: default_token_identities(),
            tool_capabilities: BTreeMap::new(),
            egress_allowlist: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parse_round_trips() {
        for raw in ["ledger_only", "snapshot_only", "best_available"] {
            assert_eq!(BalanceSourcePolicy::parse(raw).unwrap().as_str(), raw);
        }
        assert!(BalanceSourcePolicy::parse("both").is_err());
    }

    #[test]
    fn token_identities_validate_shape() {
        let parsed = parse_token_identities(
            r#"{"t1": {"actor_id": "a", "capabilities": ["tools:read"]}}"#,
        )
        .unwrap();
        assert_eq!(parsed["t1"].actor_id, "a");

        assert!(parse_token_identities(r#"{"t1": {"actor_id": "", "capabilities": []}}"#).is_err());
        assert!(parse_token_identities("[]").is_err());
    }

    #[test]
    fn allowlist_is_sorted_and_deduped() {
        assert_eq!(
            parse_allowlist("B.example, a.example,, b.example "),
            vec!["a.example".to_string(), "b.example".to_string()]
        );
    }
}
