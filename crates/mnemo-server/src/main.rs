//! mnemo-server — HTTP orchestrator binary for the memory engine.
//!
//! Chat turns flow through [`orchestrator::Orchestrator`]; everything else is
//! a thin JSON read/write over [`mnemo_core::Storage`].

mod clients;
mod config;
mod error;
mod http;
mod orchestrator;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use mnemo_core::Storage;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::http::AppState;
use crate::orchestrator::Orchestrator;

/// Parse CLI arguments, returning an optional data directory. Exits the
/// process directly for `--help`/`--version`.
fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut data_dir: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("mnemo-server {}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Persistent memory engine for a conversational assistant.");
                println!();
                println!("USAGE:");
                println!("    mnemo-server [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Custom data directory");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                Log level filter (e.g., debug, info, warn, error)");
                println!("    MNEMO_HOST, MNEMO_PORT  HTTP bind address (default 127.0.0.1:8787)");
                println!("    See DESIGN.md for the full tunable list.");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("mnemo-server {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    eprintln!("Usage: mnemo-server --data-dir <PATH>");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with("--data-dir=") => {
                let path = arg.strip_prefix("--data-dir=").unwrap_or("");
                if path.is_empty() {
                    eprintln!("error: --data-dir requires a path argument");
                    eprintln!("Usage: mnemo-server --data-dir <PATH>");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(path));
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Usage: mnemo-server [OPTIONS]");
                eprintln!("Try 'mnemo-server --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    data_dir
}

#[tokio::main]
async fn main() {
    let data_dir = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("mnemo-server v{} starting...", env!("CARGO_PKG_VERSION"));

    let db_path = data_dir.map(|dir| dir.join("mnemo.db"));
    let storage = match Storage::new(db_path) {
        Ok(s) => {
            info!("storage initialized successfully");
            Arc::new(s)
        }
        Err(e) => {
            error!("failed to initialize storage: {}", e);
            std::process::exit(1);
        }
    };

    let config = EngineConfig::shared();

    // Periodic decay sweep, mirroring the corpus's consolidation-interval
    // background task: small startup delay, then runs every N hours.
    {
        let storage = storage.clone();
        let config = config.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            loop {
                match storage.run_decay_sweep(&config.decay, Utc::now()) {
                    Ok(entries) => info!(updated = entries.len(), "periodic decay sweep complete"),
                    Err(e) => warn!("periodic decay sweep failed: {}", e),
                }
                tokio::time::sleep(std::time::Duration::from_secs(config.decay_interval_hours * 3600)).await;
            }
        });
    }

    let orchestrator = Orchestrator::new(storage.clone(), config.clone());
    let state = Arc::new(AppState { storage, config, orchestrator });

    if let Err(e) = http::serve(state).await {
        error!("server exited with error: {}", e);
        std::process::exit(1);
    }
}
