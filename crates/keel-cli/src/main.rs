//! keel — the keel ledger CLI and server binary.
//!
//! CLI invocations are the trusted-channel path: no token auth, the
//! local operator identity is recorded on every event. Success output
//! goes to stdout, structured errors to stderr; exit code 0 on success,
//! 1 on any failure.

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use keel_core::constants::{CLI_ACTOR_ID, CLI_AUTHN_METHOD, CLI_AUTHORIZATION_RESULT};
use keel_core::records::new_id;
use keel_core::{time, AppConfig};
use keel_rpc::{http_status_for, RpcServer};
use keel_runtime::{execute_tool, lookup_tool, tool_descriptor, ToolDeps, TOOLS};
use keel_store::StoreDb;

#[derive(Parser, Debug)]
#[command(
    name = "keel",
    version,
    about = "keel — deterministic financial-truth engine"
)]
struct Cli {
    /// Directory for the persistent ledger database. Overrides
    /// KEEL_DB_PATH.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping the database and report liveness.
    Health,

    /// Discover and invoke keel tools locally.
    Tool {
        #[command(subcommand)]
        command: ToolCommand,
    },

    /// Run the JSON-RPC server.
    Serve {
        /// JSON-RPC listen address.
        #[arg(long, default_value = "127.0.0.1:8545")]
        rpc_addr: SocketAddr,
    },
}

#[derive(Subcommand, Debug)]
enum ToolCommand {
    /// List all registered tool names.
    List,

    /// Display the descriptor for a tool.
    Schema { name: String },

    /// Invoke a tool. The payload comes from --json: an inline JSON
    /// string, @file, or "-" for stdin.
    Call {
        name: String,
        #[arg(long)]
        json: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!(
                "{}",
                json!({ "status": "error", "message": error.to_string() })
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if let Some(db_path) = &cli.db_path {
        config.db_path = expand_tilde(db_path);
    } else {
        config.db_path = expand_tilde(&config.db_path);
    }

    match cli.command {
        Command::Health => {
            let deps = open_deps(&config)?;
            deps.db
                .get_meta("bootstrapped")
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!(
                "{}",
                json!({ "status": "ok", "timestamp": time::format_utc(time::now_utc()) })
            );
            Ok(())
        }

        Command::Tool { command } => run_tool_command(&config, command),

        Command::Serve { rpc_addr } => {
            let deps = Arc::new(open_deps(&config)?);
            let handle = RpcServer::new(deps)
                .start(rpc_addr)
                .await
                .context("starting RPC server")?;
            info!("server ready — ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            let _ = handle.stop();
            handle.stopped().await;
            Ok(())
        }
    }
}

fn run_tool_command(config: &AppConfig, command: ToolCommand) -> anyhow::Result<()> {
    match command {
        ToolCommand::List => {
            let tools: Vec<Value> = TOOLS.iter().map(tool_descriptor).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "tools": tools, "count": tools.len() }))?
            );
            Ok(())
        }

        ToolCommand::Schema { name } => {
            let Some(spec) = lookup_tool(&name) else {
                anyhow::bail!("unknown tool: {name}");
            };
            println!(
                "{}",
                serde_json::to_string_pretty(
                    &json!({ "tool": name, "schema": tool_descriptor(spec) })
                )?
            );
            Ok(())
        }

        ToolCommand::Call { name, json: raw } => {
            let mut payload = read_payload(raw.as_deref())?;
            if let Some(obj) = payload.as_object_mut() {
                if !obj.contains_key("correlation_id") {
                    obj.insert("correlation_id".into(), json!(new_id()));
                }
            }

            let deps = open_deps(config)?;
            let result = execute_tool(
                &deps,
                &name,
                payload,
                CLI_ACTOR_ID,
                CLI_AUTHN_METHOD,
                CLI_AUTHORIZATION_RESULT,
            );
            let rendered = serde_json::to_string_pretty(&json!({
                "status": result.status.as_str(),
                "http_status": http_status_for(result.status),
                "payload": result.payload,
            }))?;
            if result.success {
                println!("{rendered}");
                Ok(())
            } else {
                eprintln!("{rendered}");
                anyhow::bail!("tool call failed: {}", result.status.as_str());
            }
        }
    }
}

/// Payload source for `tool call`: inline JSON, `@file`, or `-` (stdin).
/// No argument means an empty object.
fn read_payload(raw: Option<&str>) -> anyhow::Result<Value> {
    let text = match raw {
        None => "{}".to_string(),
        Some("-") => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading payload from stdin")?;
            buffer
        }
        Some(path) if path.starts_with('@') => std::fs::read_to_string(&path[1..])
            .with_context(|| format!("reading payload file {}", &path[1..]))?,
        Some(inline) => inline.to_string(),
    };
    let payload: Value = serde_json::from_str(&text).context("parsing payload JSON")?;
    if !payload.is_object() {
        anyhow::bail!("payload must be a JSON object");
    }
    Ok(payload)
}

fn open_deps(config: &AppConfig) -> anyhow::Result<ToolDeps> {
    std::fs::create_dir_all(&config.db_path)
        .with_context(|| format!("creating data dir {}", config.db_path.display()))?;
    let db = Arc::new(
        StoreDb::open(&config.db_path).map_err(|e| anyhow::anyhow!("opening database: {e}"))?,
    );
    Ok(ToolDeps::new(db, Arc::new(config.clone())))
}

/// Expand a leading `~` to the user's home directory (`HOME` or
/// `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
