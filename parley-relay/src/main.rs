//! Parley relay server: follower-gated chat relay over TCP.
//!
//! # Usage
//!
//! ```bash
//! # Run on the default address 127.0.0.1:5000
//! cargo run --bin parley-relay
//!
//! # Run on a custom address
//! cargo run --bin parley-relay -- --bind 0.0.0.0:7000
//!
//! # Manage accounts and follow edges
//! cargo run --bin parley-relay -- user add alice secret
//! cargo run --bin parley-relay -- follow alice bob
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use parley_relay::admin;
use parley_relay::config::{RelayCliArgs, RelayConfig};
use parley_relay::db::Database;
use parley_relay::server::{self, RelayState};
use parley_relay::store::Stores;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    let db = match Database::open(&config.database_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!(path = %config.database_path.display(), error = %e, "failed to open database");
            eprintln!("Error opening database: {e}");
            std::process::exit(1);
        }
    };
    let stores = Stores::new(db);

    if let Some(command) = &cli.command {
        match admin::run(command, &stores) {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
            }
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    tracing::info!(addr = %config.bind_addr, "starting parley relay server");

    let state = Arc::new(RelayState::new(stores, &config));
    let server = match server::start_server(&config.bind_addr, state).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr, error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %server.local_addr(), "relay server listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");
    server.shutdown().await;
}

/// Initialize logging.
///
/// Logs go to `file_path` when set, otherwise to stderr. `RUST_LOG`
/// overrides `level`. Returns a [`WorkerGuard`] that must be held until
/// shutdown so buffered file entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = file_path.and_then(|p| Some((p.parent()?, p.file_name()?)))
    else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
