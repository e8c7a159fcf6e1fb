use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use serde_json::Value;

/// Keel JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "keel_" via `namespace = "keel"`.
#[rpc(server, namespace = "keel")]
pub trait KeelApi {
    /// Unauthenticated liveness probe: pings the store and returns
    /// `{status: "ok", timestamp}`.
    #[method(name = "health")]
    async fn health(&self) -> RpcResult<Value>;

    /// Descriptors for every registered tool (name, mode, capability,
    /// required fields).
    #[method(name = "listTools")]
    async fn list_tools(&self) -> RpcResult<Value>;

    /// The descriptor for a single tool.
    #[method(name = "toolSchema")]
    async fn tool_schema(&self, name: String) -> RpcResult<Value>;

    /// Invoke a tool. `token` maps to an identity exactly as the HTTP
    /// auth header does; a missing `correlation_id` is injected
    /// server-side. The envelope carries the runtime status, the mapped
    /// HTTP status code, and the tool payload.
    #[method(name = "callTool")]
    async fn call_tool(
        &self,
        token: Option<String>,
        name: String,
        payload: Value,
    ) -> RpcResult<Value>;
}
