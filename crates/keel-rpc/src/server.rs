use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use keel_core::event::{build_entry, EventSecurity};
use keel_core::hashing::payload_hash;
use keel_core::records::new_id;
use keel_core::time;
use keel_runtime::security::{authenticate_token, authorize_tool};
use keel_runtime::{
    execute_tool, lookup_tool, tool_descriptor, RuntimeStatus, ToolDeps, TOOLS,
};

use crate::api::KeelApiServer;

/// Map a runtime outcome onto the HTTP status code every transport
/// reports for it.
pub fn http_status_for(status: RuntimeStatus) -> u16 {
    match status {
        RuntimeStatus::Ok => 200,
        RuntimeStatus::UnknownTool => 404,
        RuntimeStatus::ValidationError => 422,
        RuntimeStatus::ToolExecutionError => 400,
        RuntimeStatus::EventLogFailure => 500,
    }
}

fn envelope(status: &str, http_status: u16, payload: Value) -> Value {
    json!({
        "status": status,
        "http_status": http_status,
        "payload": payload,
    })
}

/// The RPC server implementation.
pub struct RpcServer {
    deps: Arc<ToolDeps>,
}

impl RpcServer {
    pub fn new(deps: Arc<ToolDeps>) -> Self {
        Self { deps }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }

    /// Best-effort audit row for an auth-stage refusal: no ambient
    /// context exists yet, so the denial is recorded explicitly.
    fn log_denied(&self, tool_name: &str, payload: &Value, status: &str, error_code: &str) {
        let correlation_id = payload
            .get("correlation_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let error_payload = json!({ "error": error_code });
        let entry = build_entry(
            tool_name,
            correlation_id,
            &payload_hash(payload),
            &payload_hash(&error_payload),
            0,
            status,
            Some(error_code),
            Some(error_code),
            EventSecurity {
                actor_id: None,
                authn_method: None,
                authorization_result: Some("denied".to_string()),
            },
        );
        if let Err(error) = self.deps.db.append_event(&entry) {
            warn!(tool = tool_name, %error, "failed to log auth refusal");
        }
    }
}

#[async_trait]
impl KeelApiServer for RpcServer {
    async fn health(&self) -> RpcResult<Value> {
        match self.deps.db.get_meta("bootstrapped") {
            Ok(_) => Ok(json!({
                "status": "ok",
                "timestamp": time::format_utc(time::now_utc()),
            })),
            Err(error) => Ok(json!({
                "status": "down",
                "error": error.to_string(),
            })),
        }
    }

    async fn list_tools(&self) -> RpcResult<Value> {
        let tools: Vec<Value> = TOOLS.iter().map(tool_descriptor).collect();
        Ok(json!({ "tools": tools, "count": tools.len() }))
    }

    async fn tool_schema(&self, name: String) -> RpcResult<Value> {
        match lookup_tool(&name) {
            Some(spec) => Ok(json!({ "tool": name, "schema": tool_descriptor(spec) })),
            None => Ok(envelope(
                "unknown_tool",
                404,
                json!({ "error": "unknown_tool", "tool": name }),
            )),
        }
    }

    async fn call_tool(
        &self,
        token: Option<String>,
        name: String,
        mut payload: Value,
    ) -> RpcResult<Value> {
        if !payload.is_object() {
            payload = json!({});
        }
        // Stdio-transport semantics: inject a server-generated
        // correlation id when the caller omits one.
        if let Some(obj) = payload.as_object_mut() {
            if !obj.contains_key("correlation_id") {
                obj.insert("correlation_id".into(), json!(new_id()));
            }
        }

        let Some(auth) = authenticate_token(&self.deps.config, token.as_deref()) else {
            self.log_denied(&name, &payload, "auth_error", "authentication_required");
            return Ok(envelope(
                "authentication_required",
                401,
                json!({ "error": "authentication_required" }),
            ));
        };

        if let Some(spec) = lookup_tool(&name) {
            if !authorize_tool(&self.deps.config, &auth, spec) {
                self.log_denied(&name, &payload, "authz_denied", "forbidden");
                return Ok(envelope("forbidden", 403, json!({ "error": "forbidden" })));
            }
        }

        let result = execute_tool(
            &self.deps,
            &name,
            payload,
            &auth.actor_id,
            auth.authn_method,
            "allowed",
        );
        Ok(envelope(
            result.status.as_str(),
            http_status_for(result.status),
            result.payload,
        ))
    }
}
