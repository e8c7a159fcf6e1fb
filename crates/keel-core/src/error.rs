use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeelError {
    // ── Ledger invariants ────────────────────────────────────────────────────
    #[error("transaction bundle must balance to zero")]
    UnbalancedBundle,

    #[error("currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: String, got: String },

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("account code '{0}' already exists")]
    DuplicateAccountCode(String),

    #[error("parent account '{0}' does not exist")]
    UnknownParentAccount(String),

    #[error("account hierarchy cycle detected")]
    AccountCycle,

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("transaction already exists for ({source_system}, {external_id})")]
    DuplicateExternalId {
        source_system: String,
        external_id: String,
    },

    #[error("unknown obligation: {0}")]
    UnknownObligation(String),

    #[error("response payload already persisted for transaction {0}")]
    ResponseAlreadyPersisted(String),

    // ── Approval state machine ───────────────────────────────────────────────
    #[error("proposal not found: {0}")]
    UnknownProposal(String),

    #[error("rejected proposals cannot be approved")]
    ProposalAlreadyRejected,

    #[error("committed proposals cannot be rejected")]
    ProposalAlreadyCommitted,

    #[error("proposal {0} is terminal and cannot transition")]
    TerminalProposal(String),

    #[error("approver_id is required when a rule demands multiple approvals")]
    ApproverRequired,

    // ── Accounting periods ───────────────────────────────────────────────────
    #[error("writes into a closed period require an adjusting entry")]
    PeriodClosedRequiresAdjustingEntry,

    #[error("period is locked")]
    PeriodLocked,

    #[error("invalid period key '{0}' (expected YYYY-MM)")]
    InvalidPeriodKey(String),

    // ── Validation ───────────────────────────────────────────────────────────
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid monetary amount: {0}")]
    InvalidAmount(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    // ── Runtime ──────────────────────────────────────────────────────────────
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("event log append failed: {0}")]
    EventLog(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

impl KeelError {
    /// Structured code reported to callers and written to the event log.
    pub fn error_code(&self) -> &'static str {
        match self {
            KeelError::UnbalancedBundle => "unbalanced_bundle",
            KeelError::CurrencyMismatch { .. } => "currency_mismatch",
            KeelError::UnknownAccount(_) => "unknown_account",
            KeelError::DuplicateAccountCode(_) => "duplicate_account_code",
            KeelError::UnknownParentAccount(_) => "unknown_parent_account",
            KeelError::AccountCycle => "account_hierarchy_cycle",
            KeelError::UnknownEntity(_) => "unknown_entity",
            KeelError::DuplicateExternalId { .. } => "duplicate_external_id",
            KeelError::UnknownObligation(_) => "unknown_obligation",
            KeelError::ResponseAlreadyPersisted(_) => "response_already_persisted",
            KeelError::UnknownProposal(_) => "unknown_proposal",
            KeelError::ProposalAlreadyRejected => "proposal_already_rejected",
            KeelError::ProposalAlreadyCommitted => "proposal_already_committed",
            KeelError::TerminalProposal(_) => "terminal_proposal",
            KeelError::ApproverRequired => "approver_required",
            KeelError::PeriodClosedRequiresAdjustingEntry => {
                "period_closed_requires_adjusting_entry"
            }
            KeelError::PeriodLocked => "period_locked",
            KeelError::InvalidPeriodKey(_) => "invalid_period_key",
            KeelError::Validation(_) => "validation_error",
            KeelError::InvalidAmount(_) => "validation_error",
            KeelError::InvalidTimestamp(_) => "validation_error",
            KeelError::InvalidCursor(_) => "invalid_cursor",
            KeelError::UnknownTool(_) => "unknown_tool",
            KeelError::EventLog(_) => "event_log_failure",
            KeelError::Serialization(_) => "serialization_error",
            KeelError::Storage(_) => "storage_error",
            KeelError::Other(_) => "tool_execution_error",
        }
    }

    /// True for errors that indicate malformed input rather than a violated
    /// domain invariant. The runtime maps these to the 422 class.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            KeelError::Validation(_)
                | KeelError::InvalidAmount(_)
                | KeelError::InvalidTimestamp(_)
                | KeelError::InvalidCursor(_)
        )
    }
}
