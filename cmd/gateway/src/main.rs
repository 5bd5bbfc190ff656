//! Chatlog gateway - answers chat queries with Gemini and keeps the
//! conversation history in a column store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chatlog_history::{Gateway, GatewayConfig, SystemClock};
use chatlog_kv::{ColumnStore, MemoryStore, RedbStore};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod gemini;
mod server;

use config::{Config, Overrides, parse_addr};
use gemini::GeminiCompleter;

/// Chatlog gateway - HTTP chat endpoint with durable history.
///
/// The Gemini API key is read from GEMINI_API_KEY. Configuration may also
/// be supplied in ~/.chatlog/gateway.yaml.
#[derive(Parser)]
#[command(name = "chatlog-gateway")]
#[command(about = "HTTP gateway pairing AI chat completions with chat history")]
#[command(version)]
struct Cli {
    /// Config file (default is ~/.chatlog/gateway.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (e.g. ":8080" or "127.0.0.1:8080")
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// redb database file; the in-memory store is used when unset
    #[arg(long)]
    db: Option<PathBuf>,

    /// Table name inside the database
    #[arg(long)]
    table: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let overrides = Overrides {
        listen: cli.listen,
        db_path: cli.db,
        table: cli.table,
    };
    let cfg = Config::load(cli.config.as_deref(), &overrides)?;
    let addr = parse_addr(&cfg.listen)?;

    // One store handle for the whole process, shared by every request.
    let store: Arc<dyn ColumnStore> = match &cfg.db_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let store = RedbStore::open_table(path, &cfg.table)
                .with_context(|| format!("open store {}", path.display()))?;
            info!(path = %path.display(), table = store.table_name(), "using redb store");
            Arc::new(store)
        }
        None => {
            warn!("no database configured, history is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let completer = GeminiCompleter::new(cfg.gemini.clone())?;
    info!(model = %completer.config().model, "gemini completer ready");

    let gateway = Arc::new(Gateway::new(
        store,
        Arc::new(completer),
        Arc::new(SystemClock),
        GatewayConfig {
            store_timeout: cfg.store_timeout,
        },
    ));

    server::serve(addr, gateway, shutdown_signal()).await?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
