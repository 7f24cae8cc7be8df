//! Hermina gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────── HERMINA ────────────────────────────┐
//!                  │                                                                  │
//!   MQTT client ───┼─▶ net::listener ─▶ TLS? ─▶ proxy::mqtt ─┐                        │
//!   WS client   ───┼─▶ net::listener ─▶ TLS? ─▶ websocket ───┴─▶ session::relay ──────┼──▶ broker
//!                  │                                         (handler + interceptor)  │
//!   HTTP client ───┼─▶ axum-server ─▶ http::server (handler) ─────────────────────────┼──▶ backend
//!                  │                                                                  │
//!                  │  config · lifecycle (signals, supervisor) · observability        │
//!                  └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Without `--config` the `HERMINA_*` environment variables describe the listeners.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use hermina::config::{self, ConfigError, Validated};
use hermina::lifecycle::{signals, Shutdown};
use hermina::observability::{logging, metrics};
use hermina::session::LoggingHandler;
use hermina::Gateway;

#[derive(Parser)]
#[command(name = "hermina", version, about = "Intercepting gateway for MQTT, MQTT over WebSocket and HTTP")]
struct Cli {
    /// TOML configuration file. Defaults to the HERMINA_* environment variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

fn load(cli: &Cli) -> Result<Validated, ConfigError> {
    let mut validated = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::env::load_from_env()?,
    };
    if let Some(level) = &cli.log_level {
        validated.config.observability.log_level = level.clone();
    }
    Ok(validated)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Validated { config, skipped } = match load(&cli) {
        Ok(validated) => validated,
        Err(error) => {
            eprintln!("hermina: {error}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = logging::init(&config.observability) {
        eprintln!("hermina: cannot install logger: {error}");
    }

    for problem in &skipped {
        tracing::error!(
            listener = %problem.listener,
            field = problem.field,
            error = %problem.message,
            "Listener skipped"
        );
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listeners = config.listeners.len(),
        veto_policy = ?config.relay.veto_policy,
        shutdown_mode = ?config.relay.shutdown_mode,
        "Hermina starting"
    );

    if let Some(address) = &config.observability.metrics_address {
        match address.parse() {
            Ok(addr) => {
                if let Err(error) = metrics::init_metrics(addr) {
                    tracing::warn!(%error, "Metrics exporter not installed");
                }
            }
            Err(error) => tracing::warn!(metrics_address = %address, %error, "Invalid metrics address"),
        }
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());

    match Gateway::new(config, Arc::new(LoggingHandler)).run(shutdown).await {
        Ok(()) => {
            tracing::info!("Gateway stopped");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(%error, "Gateway terminated with error");
            ExitCode::FAILURE
        }
    }
}
