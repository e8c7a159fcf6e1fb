//! Event-log entry construction.
//!
//! Entries carry the ambient security context; explicit overrides win so
//! auth-stage failures can record a denied result without an actor.

use crate::context::SecurityContext;
use crate::records::{new_id, EventLogEntry};
use crate::time;

/// Explicit security fields for one event. `None` defers to the ambient
/// context.
#[derive(Clone, Debug, Default)]
pub struct EventSecurity {
    pub actor_id: Option<String>,
    pub authn_method: Option<String>,
    pub authorization_result: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn build_entry(
    tool_name: &str,
    correlation_id: &str,
    input_hash: &str,
    output_hash: &str,
    duration_ms: u64,
    status: &str,
    error_code: Option<&str>,
    error_message: Option<&str>,
    security: EventSecurity,
) -> EventLogEntry {
    let ambient = SecurityContext::current();
    EventLogEntry {
        event_id: new_id(),
        tool_name: tool_name.to_string(),
        correlation_id: correlation_id.to_string(),
        input_hash: input_hash.to_string(),
        output_hash: output_hash.to_string(),
        event_timestamp: time::format_utc(time::now_utc()),
        duration_ms,
        status: status.to_string(),
        error_code: error_code.map(str::to_string),
        error_message: error_message.map(str::to_string),
        actor_id: security
            .actor_id
            .or_else(|| ambient.as_ref().map(|c| c.actor_id.clone())),
        authn_method: security
            .authn_method
            .or_else(|| ambient.as_ref().map(|c| c.authn_method.clone())),
        authorization_result: security
            .authorization_result
            .or_else(|| ambient.as_ref().map(|c| c.authorization_result.clone())),
        violation_code: None,
    }
}

/// A successful tool outcome with the ambient security context.
pub fn ok_entry(
    tool_name: &str,
    correlation_id: &str,
    input_hash: &str,
    output_hash: &str,
    duration_ms: u64,
) -> EventLogEntry {
    build_entry(
        tool_name,
        correlation_id,
        input_hash,
        output_hash,
        duration_ms,
        "ok",
        None,
        None,
        EventSecurity::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambient_context_fills_security_fields() {
        let _guard = SecurityContext {
            actor_id: "actor-x".into(),
            authn_method: "header_token".into(),
            authorization_result: "allowed".into(),
        }
        .enter();
        let entry = ok_entry("list_accounts", "c1", "in", "out", 3);
        assert_eq!(entry.actor_id.as_deref(), Some("actor-x"));
        assert_eq!(entry.authorization_result.as_deref(), Some("allowed"));
    }

    #[test]
    fn explicit_fields_override_ambient() {
        let _guard = SecurityContext {
            actor_id: "actor-x".into(),
            authn_method: "header_token".into(),
            authorization_result: "allowed".into(),
        }
        .enter();
        let entry = build_entry(
            "create_account",
            "c1",
            "in",
            "out",
            1,
            "auth_error",
            Some("authentication_required"),
            None,
            EventSecurity {
                actor_id: None,
                authn_method: None,
                authorization_result: Some("denied".into()),
            },
        );
        assert_eq!(entry.authorization_result.as_deref(), Some("denied"));
        assert_eq!(entry.actor_id.as_deref(), Some("actor-x"));
    }
}
