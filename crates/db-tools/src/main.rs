//! db-tools: tool invocation dispatch server.
//!
//! Configuration comes from `--flags`, then the environment, then `.env`.
//!
//! ```bash
//! db-tools --host 127.0.0.1 --port 9001 --path /db-tools
//! MCP_READ_ONLY=false LOG_LEVEL=DEBUG db-tools
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use db_tools::builtins::register_all;
use db_tools::logging::init_tracing;
use db_tools::{ConfigOverrides, Coordinator, MemoryKvBackend, RegistryBuilder, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "db-tools", version, about = "Tool invocation dispatch server over HTTP")]
struct Cli {
    /// Bind host (env: DB_TOOLS_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (env: DB_TOOLS_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Transport; only `http` (alias `streamable-http`) is served (env: DB_TOOLS_TRANSPORT)
    #[arg(long)]
    transport: Option<String>,

    /// Mount path for all routes (env: DB_TOOLS_PATH)
    #[arg(long)]
    path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env file is fine; variables already set take precedence.
    let _ = dotenvy::dotenv();

    let config = ServerConfig::from_env()
        .and_then(|config| {
            config.with_overrides(ConfigOverrides {
                host: cli.host,
                port: cli.port,
                transport: cli.transport,
                path: cli.path,
            })
        })
        .context("Failed to load configuration")?;

    init_tracing(&config.log).context("Failed to initialize logging")?;

    let mut builder = RegistryBuilder::new().read_only(config.read_only);
    register_all(&mut builder, Arc::new(MemoryKvBackend::new()))
        .context("Failed to register tools")?;
    let registry = builder.build();
    let tool_count = registry.len();
    let coordinator = Arc::new(Coordinator::new(registry, config.limits.clone()));

    let server = Server::start(&config, coordinator)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %server.addr(),
        path = %config.path,
        read_only = config.read_only,
        tools = tool_count,
        global_concurrency = config.limits.global_concurrency,
        log_file = ?config.log.file,
        pid = std::process::id(),
        "=== db-tools listening ==="
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!(grace_ms = config.shutdown_grace.as_millis() as u64, "shutting down");
    if tokio::time::timeout(config.shutdown_grace, server.shutdown_gracefully())
        .await
        .is_err()
    {
        tracing::warn!("shutdown grace elapsed with requests still in flight");
    }
    Ok(())
}
