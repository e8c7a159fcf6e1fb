//! ─── Keel Ledger Constants ──────────────────────────────────────────────────
//!
//! Deterministic financial-truth engine: one currency, one money scale,
//! one canonical serialization.

// ── Money ────────────────────────────────────────────────────────────────────

/// The only currency accepted in scope 1.
pub const CURRENCY_CODE: &str = "USD";

/// Fixed-point scale for all monetary amounts. Never varies.
pub const MONEY_SCALE: u32 = 4;

// ── Entities ─────────────────────────────────────────────────────────────────

/// The designated default entity. Seeded on first open of a fresh store.
pub const DEFAULT_ENTITY_ID: &str = "entity-primary";

pub const DEFAULT_ENTITY_CODE: &str = "PRIMARY";

pub const DEFAULT_ENTITY_NAME: &str = "Primary Entity";

// ── Correlation ids ──────────────────────────────────────────────────────────

/// Maximum accepted correlation id length. The allowed alphabet is
/// `[A-Za-z0-9._:-]`.
pub const CORRELATION_ID_MAX_LEN: usize = 128;

// ── Approval defaults ────────────────────────────────────────────────────────

/// Global fallback approval threshold when no policy rule matches.
pub const DEFAULT_APPROVAL_THRESHOLD: &str = "1000.0000";

// ── Pagination ───────────────────────────────────────────────────────────────

/// Cursor envelope version. Cursors with any other version are rejected.
pub const CURSOR_VERSION: u64 = 1;

pub const DEFAULT_PAGE_LIMIT: usize = 50;

pub const MAX_PAGE_LIMIT: usize = 200;

// ── Reconciliation ───────────────────────────────────────────────────────────

/// Source system stamped on suggested reconciliation adjustment bundles.
pub const RECONCILIATION_SOURCE_SYSTEM: &str = "keel-reconciliation";

/// Placeholder offset account in suggested adjustment bundles. The caller
/// must replace it before recording; the placeholder never resolves.
pub const OFFSET_ACCOUNT_PLACEHOLDER: &str = "__OFFSET_ACCOUNT_REQUIRED__";

// ── Trusted channel (CLI) ────────────────────────────────────────────────────

pub const CLI_ACTOR_ID: &str = "local-cli";
pub const CLI_AUTHN_METHOD: &str = "trusted_cli";
pub const CLI_AUTHORIZATION_RESULT: &str = "bypassed_trusted_channel";

/// Authentication method recorded for token-authenticated callers.
pub const AUTHN_METHOD_HEADER_TOKEN: &str = "header_token";
