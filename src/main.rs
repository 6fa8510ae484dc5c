//! Enigma daemon - single-host encoding pipeline
//!
//! Wires up:
//! - Local adapters (JSON-backed entity store, ffmpeg, HTTP transport)
//! - Recovery, download queue and encoding worker pool
//! - Graceful shutdown on Ctrl-C

use enigma::adapters::local::{FfmpegRunner, HttpTransport, LocalStore};
use enigma::application::Engine;
use enigma::config::EngineConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    // 1. Adapters
    let store = match &config.store_path {
        Some(path) => match LocalStore::open(path) {
            Ok(store) => store,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to open entity store");
                std::process::exit(1);
            }
        },
        None => {
            info!("no store path configured, state will not survive restarts");
            LocalStore::in_memory()
        }
    };
    let runner = FfmpegRunner::new(config.encoder_program.clone());
    let transport = HttpTransport::default();

    // 2. Recovery + queues
    let running = match Engine::new(config, store, runner, transport).start().await {
        Ok(running) => running,
        Err(e) => {
            error!(error = %e, "engine failed to start");
            std::process::exit(1);
        }
    };

    let report = running.recovery_report();
    if report.total() > 0 {
        info!(
            downloads_reset = report.downloads_reset,
            encodes_reset = report.encodes_reset,
            "recovered interrupted work"
        );
    }

    // 3. Run until interrupted
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    running.shutdown().await;
}
