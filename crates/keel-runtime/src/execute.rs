//! The shared tool execution path.
//!
//! Auth/authz is the transport's responsibility; everything downstream of
//! it — tool lookup, correlation-id validation, input/output hashing,
//! security-context scoping, error mapping, and fail-closed event
//! logging — runs here for every transport.

use serde_json::{json, Value};
use tracing::warn;

use keel_core::constants::CORRELATION_ID_MAX_LEN;
use keel_core::context::SecurityContext;
use keel_core::error::KeelError;
use keel_core::event::{build_entry, EventSecurity};
use keel_core::hashing::payload_hash;
use keel_engine::Invocation;

use crate::registry::{lookup_tool, ToolClass, ToolSpec};
use crate::ToolDeps;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeStatus {
    Ok,
    UnknownTool,
    ValidationError,
    ToolExecutionError,
    EventLogFailure,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Ok => "ok",
            RuntimeStatus::UnknownTool => "unknown_tool",
            RuntimeStatus::ValidationError => "validation_error",
            RuntimeStatus::ToolExecutionError => "tool_execution_error",
            RuntimeStatus::EventLogFailure => "event_log_failure",
        }
    }
}

/// Transport-agnostic result envelope from tool execution.
#[derive(Clone, Debug)]
pub struct ToolResult {
    pub success: bool,
    pub status: RuntimeStatus,
    pub payload: Value,
}

impl ToolResult {
    fn failure(status: RuntimeStatus, payload: Value) -> Self {
        Self {
            success: false,
            status,
            payload,
        }
    }
}

fn valid_correlation_id(payload: &Value) -> Option<&str> {
    let raw = payload.get("correlation_id")?.as_str()?;
    if raw.is_empty() || raw.len() > CORRELATION_ID_MAX_LEN {
        return None;
    }
    raw.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
        .then_some(raw)
}

/// Persist an error-path event. Returns false when logging failed and the
/// tool fails closed.
#[allow(clippy::too_many_arguments)]
fn try_log_event(
    deps: &ToolDeps,
    spec: &ToolSpec,
    correlation_id: &str,
    input_hash: &str,
    output_hash: &str,
    duration_ms: u64,
    status: &str,
    error_code: Option<&str>,
    security: EventSecurity,
) -> bool {
    let entry = build_entry(
        spec.name,
        correlation_id,
        input_hash,
        output_hash,
        duration_ms,
        status,
        error_code,
        error_code,
        security,
    );
    match deps.db.append_event(&entry) {
        Ok(()) => true,
        Err(error) => {
            warn!(tool = spec.name, %error, "event log append failed");
            spec.class != ToolClass::Write
        }
    }
}

fn event_log_failure_result() -> ToolResult {
    ToolResult::failure(
        RuntimeStatus::EventLogFailure,
        json!({ "error": "event_log_failure" }),
    )
}

/// Execute one tool invocation end to end.
///
/// The caller supplies the resolved security identity; pre-dispatch
/// failures (an invalid correlation id) are logged with
/// `authorization_result = denied` so the audit trail records the refusal.
pub fn execute_tool(
    deps: &ToolDeps,
    tool_name: &str,
    payload: Value,
    actor_id: &str,
    authn_method: &str,
    authorization_result: &str,
) -> ToolResult {
    let Some(spec) = lookup_tool(tool_name) else {
        let error_payload = json!({ "error": "unknown_tool", "tool": tool_name });
        let entry = build_entry(
            tool_name,
            "unknown",
            &payload_hash(&payload),
            &payload_hash(&error_payload),
            0,
            "unknown_tool",
            Some("unknown_tool"),
            Some("unknown_tool"),
            EventSecurity {
                actor_id: Some(actor_id.to_string()),
                authn_method: Some(authn_method.to_string()),
                authorization_result: Some(authorization_result.to_string()),
            },
        );
        if let Err(error) = deps.db.append_event(&entry) {
            warn!(tool = tool_name, %error, "failed to log unknown-tool refusal");
        }
        return ToolResult::failure(RuntimeStatus::UnknownTool, error_payload);
    };

    let inv = Invocation::new(spec.name, "unknown", &payload_hash(&payload));

    let Some(correlation_id) = valid_correlation_id(&payload) else {
        let error_payload = json!({
            "error": "validation_error",
            "details": [{
                "type": "value_error",
                "loc": ["body", "correlation_id"],
                "msg": format!(
                    "correlation_id is required and must match ^[A-Za-z0-9._:-]{{1,{CORRELATION_ID_MAX_LEN}}}$"
                ),
            }],
        });
        let logged = try_log_event(
            deps,
            spec,
            "unknown",
            &inv.input_hash,
            &payload_hash(&error_payload),
            inv.elapsed_ms(),
            "validation_error",
            Some("validation_error"),
            EventSecurity {
                actor_id: Some(actor_id.to_string()),
                authn_method: Some(authn_method.to_string()),
                authorization_result: Some("denied".to_string()),
            },
        );
        if !logged {
            return event_log_failure_result();
        }
        return ToolResult::failure(RuntimeStatus::ValidationError, error_payload);
    };
    let inv = Invocation {
        correlation_id: correlation_id.to_string(),
        ..inv
    };

    let _context = SecurityContext {
        actor_id: actor_id.to_string(),
        authn_method: authn_method.to_string(),
        authorization_result: authorization_result.to_string(),
    }
    .enter();

    match (spec.handler)(deps, &inv, payload) {
        Ok(response) => ToolResult {
            success: true,
            status: RuntimeStatus::Ok,
            payload: response,
        },
        Err(KeelError::EventLog(_)) => event_log_failure_result(),
        Err(error) if error.is_validation() => {
            let error_payload = json!({
                "error": "validation_error",
                "details": [{
                    "type": "value_error",
                    "loc": ["body"],
                    "msg": error.to_string(),
                }],
            });
            let logged = try_log_event(
                deps,
                spec,
                &inv.correlation_id,
                &inv.input_hash,
                &payload_hash(&error_payload),
                inv.elapsed_ms(),
                "validation_error",
                Some("validation_error"),
                EventSecurity::default(),
            );
            if !logged {
                return event_log_failure_result();
            }
            ToolResult::failure(RuntimeStatus::ValidationError, error_payload)
        }
        Err(error) => {
            let error_payload = json!({
                "error": "tool_execution_error",
                "code": error.error_code(),
                "message": error.to_string(),
            });
            let logged = try_log_event(
                deps,
                spec,
                &inv.correlation_id,
                &inv.input_hash,
                &payload_hash(&error_payload),
                inv.elapsed_ms(),
                "error",
                Some(error.error_code()),
                EventSecurity::default(),
            );
            if !logged {
                return event_log_failure_result();
            }
            ToolResult::failure(RuntimeStatus::ToolExecutionError, error_payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolDeps;
    use keel_core::AppConfig;
    use keel_store::StoreDb;
    use serde_json::json;
    use std::sync::Arc;

    fn test_deps(name: &str) -> ToolDeps {
        let dir = std::env::temp_dir().join(format!("keel_runtime_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(StoreDb::open(&dir).expect("open temp db"));
        let config = Arc::new(AppConfig::for_db_path(&dir));
        ToolDeps::new(db, config)
    }

    fn run(deps: &ToolDeps, tool: &str, payload: Value) -> ToolResult {
        execute_tool(deps, tool, payload, "actor-test", "header_token", "allowed")
    }

    #[test]
    fn unknown_tool_is_reported() {
        let deps = test_deps("unknown_tool");
        let result = run(&deps, "mint_money", json!({ "correlation_id": "c1" }));
        assert_eq!(result.status, RuntimeStatus::UnknownTool);
        assert_eq!(result.payload["tool"], "mint_money");
    }

    #[test]
    fn bad_correlation_id_is_validation_error_and_logged() {
        let deps = test_deps("bad_correlation");
        for payload in [
            json!({}),
            json!({ "correlation_id": "" }),
            json!({ "correlation_id": 7 }),
            json!({ "correlation_id": "has spaces" }),
            json!({ "correlation_id": "x".repeat(129) }),
        ] {
            let result = run(&deps, "list_accounts", payload);
            assert_eq!(result.status, RuntimeStatus::ValidationError);
            assert_eq!(result.payload["details"][0]["loc"][1], "correlation_id");
        }
        let events = deps.db.iter_events().unwrap();
        assert_eq!(events.len(), 5);
        assert!(events
            .iter()
            .all(|e| e.authorization_result.as_deref() == Some("denied")));
    }

    #[test]
    fn schema_violation_maps_to_validation_error() {
        let deps = test_deps("schema_violation");
        let result = run(
            &deps,
            "record_transaction_bundle",
            json!({ "correlation_id": "c1", "unexpected": true }),
        );
        assert_eq!(result.status, RuntimeStatus::ValidationError);
        assert_eq!(result.payload["error"], "validation_error");
    }

    #[test]
    fn invariant_violation_maps_to_tool_execution_error() {
        let deps = test_deps("invariant_violation");
        let result = run(
            &deps,
            "approve_proposed_transaction",
            json!({ "correlation_id": "c1", "proposal_id": "missing" }),
        );
        assert_eq!(result.status, RuntimeStatus::ToolExecutionError);
        assert_eq!(result.payload["code"], "unknown_proposal");
        let events = deps.db.iter_events().unwrap();
        assert_eq!(events.last().unwrap().status, "error");
    }

    #[test]
    fn write_tool_fails_closed_when_event_log_fails() {
        let deps = test_deps("fail_closed");
        deps.db.set_event_log_failure(true);
        let result = run(
            &deps,
            "create_account",
            json!({
                "correlation_id": "c1",
                "code": "1000",
                "name": "Cash",
                "account_type": "asset",
            }),
        );
        assert_eq!(result.status, RuntimeStatus::EventLogFailure);
        // Nothing was written: neither the account nor any event row.
        deps.db.set_event_log_failure(false);
        assert!(deps.db.account_id_for_code("1000").unwrap().is_none());
        assert!(deps.db.iter_events().unwrap().is_empty());
    }

    #[test]
    fn read_tool_tolerates_event_log_failure() {
        let deps = test_deps("read_tolerates");
        deps.db.set_event_log_failure(true);
        let result = run(&deps, "list_accounts", json!({ "correlation_id": "c1" }));
        assert_eq!(result.status, RuntimeStatus::Ok);
        assert!(result.payload["accounts"].is_array());
    }

    #[test]
    fn success_logs_one_event_with_ambient_context() {
        let deps = test_deps("success_event");
        let result = run(&deps, "list_accounts", json!({ "correlation_id": "c1" }));
        assert_eq!(result.status, RuntimeStatus::Ok);
        let events = deps.db.iter_events().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.tool_name, "list_accounts");
        assert_eq!(event.status, "ok");
        assert_eq!(event.actor_id.as_deref(), Some("actor-test"));
        assert_eq!(event.authorization_result.as_deref(), Some("allowed"));
        assert_eq!(
            event.output_hash,
            result.payload["output_hash"].as_str().unwrap()
        );
    }
}
