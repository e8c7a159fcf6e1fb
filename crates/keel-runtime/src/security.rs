//! Token authentication and per-tool authorization.

use keel_core::config::AppConfig;
use keel_core::constants::AUTHN_METHOD_HEADER_TOKEN;

use crate::registry::ToolSpec;

/// A resolved caller identity.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub actor_id: String,
    pub authn_method: &'static str,
    pub capabilities: Vec<String>,
}

/// Resolve a bearer token to an identity. `None` means authentication is
/// required and missing or unknown.
pub fn authenticate_token(config: &AppConfig, token: Option<&str>) -> Option<AuthContext> {
    let token = token?;
    let identity = config.token_identities.get(token)?;
    Some(AuthContext {
        actor_id: identity.actor_id.clone(),
        authn_method: AUTHN_METHOD_HEADER_TOKEN,
        capabilities: identity.capabilities.clone(),
    })
}

/// Whether the identity may invoke the tool. Configuration overrides the
/// registered default capability per tool name.
pub fn authorize_tool(config: &AppConfig, auth: &AuthContext, spec: &ToolSpec) -> bool {
    let required = config
        .tool_capabilities
        .get(spec.name)
        .map(String::as_str)
        .unwrap_or(spec.capability);
    auth.capabilities.iter().any(|cap| cap == required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::lookup_tool;

    fn dev_config() -> AppConfig {
        AppConfig::for_db_path("/tmp/unused")
    }

    #[test]
    fn known_token_resolves_identity() {
        let config = dev_config();
        let auth = authenticate_token(&config, Some("dev-admin-token")).unwrap();
        assert_eq!(auth.actor_id, "actor-admin");
        assert!(authenticate_token(&config, Some("bogus")).is_none());
        assert!(authenticate_token(&config, None).is_none());
    }

    #[test]
    fn capabilities_gate_tools() {
        let config = dev_config();
        let reader = authenticate_token(&config, Some("dev-reader-token")).unwrap();
        let admin = authenticate_token(&config, Some("dev-admin-token")).unwrap();

        let read_tool = lookup_tool("list_accounts").unwrap();
        let write_tool = lookup_tool("record_transaction_bundle").unwrap();
        let approve_tool = lookup_tool("approve_proposed_transaction").unwrap();

        assert!(authorize_tool(&config, &reader, read_tool));
        assert!(!authorize_tool(&config, &reader, write_tool));
        assert!(!authorize_tool(&config, &reader, approve_tool));
        assert!(authorize_tool(&config, &admin, write_tool));
        assert!(authorize_tool(&config, &admin, approve_tool));
    }

    #[test]
    fn config_overrides_required_capability() {
        let mut config = dev_config();
        config
            .tool_capabilities
            .insert("list_accounts".to_string(), "tools:special".to_string());
        let reader = authenticate_token(&config, Some("dev-reader-token")).unwrap();
        let read_tool = lookup_tool("list_accounts").unwrap();
        assert!(!authorize_tool(&config, &reader, read_tool));
    }
}
