//! keel-runtime — shared tool execution for every transport.
//!
//! The RPC server and the CLI both delegate to [`execute_tool`] after
//! their transport-specific concerns (auth header resolution, argument
//! parsing) are done. This crate owns the tool registry, the
//! write/read classification, the security context plumbing, and the
//! fail-closed event-logging policy.

mod execute;
mod handlers;
mod registry;
pub mod security;

use std::sync::Arc;

use keel_core::AppConfig;
use keel_engine::Engine;
use keel_store::StoreDb;

pub use execute::{execute_tool, RuntimeStatus, ToolResult};
pub use registry::{lookup_tool, tool_descriptor, tool_names, ToolClass, ToolSpec, TOOLS};

/// Shared dependencies handed to every tool handler.
pub struct ToolDeps {
    pub db: Arc<StoreDb>,
    pub config: Arc<AppConfig>,
    pub engine: Engine,
}

impl ToolDeps {
    pub fn new(db: Arc<StoreDb>, config: Arc<AppConfig>) -> Self {
        let engine = Engine::new(Arc::clone(&db), Arc::clone(&config));
        Self { db, config, engine }
    }
}
