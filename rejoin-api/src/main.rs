use anyhow::Result;
use clap::Parser;
use rejoin_core::config::Config;
use rejoin_core::core_room::MemoryRoomStore;
use rejoin_core::logging::{init_logging_with_config, LogConfig};
use rejoin_core::{LogLevel, RejoinService};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

mod error;
mod handlers;
mod state;

use state::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "rejoin-api")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8449)]
    port: u16,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = LogLevel::parse(&args.log_level).unwrap_or_else(|| {
        eprintln!("Invalid log level '{}', using 'info'", args.log_level);
        LogLevel::Info
    });
    let log_config = LogConfig::new(log_level).json_format(args.json_logs);
    init_logging_with_config(log_config)?;
    rejoin_core::metrics::init_metrics();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    let store = Arc::new(MemoryRoomStore::new());
    let service = RejoinService::new(store, &config);

    // The watcher consumes membership events posted to /events.
    let (tx, rx) = mpsc::channel(256);
    let watcher = Arc::new(service.watcher());
    tokio::spawn(watcher.run(rx));

    let state = Arc::new(AppState::new(service, tx));
    let router = build_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("rejoin API listening on {}", addr);

    axum::serve(listener, router).await?;

    Ok(())
}
