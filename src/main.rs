//! Function gateway.
//!
//! An HTTP front end for an external function execution engine.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   FUNCTION GATEWAY                   │
//!                    │                                                      │
//!  Client Request    │  ┌─────────┐   ┌─────────┐   ┌──────┐   ┌─────────┐  │
//!  ──────────────────┼─▶│   net   │──▶│  http   │──▶│ auth │──▶│ context │  │
//!                    │  │listener │   │ server  │   └──────┘   │  scope  │  │
//!                    │  └─────────┘   └─────────┘              └────┬────┘  │
//!                    │                                              ▼       │
//!  102 Processing    │                                    ┌──────────────┐  │
//!  ◀─────────────────┼────────────────────────────────────│  heartbeat   │  │
//!                    │                                    └──────┬───────┘  │
//!                    │                                           ▼          │     Execution
//!  Client Response   │                                    ┌──────────────┐  │     Engine
//!  ◀─────────────────┼────────────────────────────────────│    engine    │◀─┼────────────
//!                    │                                    └──────────────┘  │
//!                    │  ┌────────────────────────────────────────────────┐  │
//!                    │  │ health · lifecycle/drain · fatal errors · logs │  │
//!                    │  └────────────────────────────────────────────────┘  │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use function_gateway::config::{load_config, validation::validate_config, GatewayConfig};
use function_gateway::engine::HttpEngine;
use function_gateway::lifecycle::{shutdown_signal, start_server, Collaborators, StopReason};
use function_gateway::observability::{logging, metrics};
use function_gateway::security::SystemTokenAuth;

#[derive(Parser)]
#[command(name = "function-gateway")]
#[command(about = "HTTP gateway for function invocations", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("function-gateway: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => GatewayConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Err(errors) = validate_config(&config) {
        for error in errors {
            eprintln!("function-gateway: {error}");
        }
        return ExitCode::FAILURE;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "function-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let engine = match HttpEngine::new(&config.engine) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create engine client");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(endpoint = %engine.endpoint(), "Engine configured");

    let collaborators = Collaborators {
        engine: Arc::new(engine),
        authorizer: Arc::new(SystemTokenAuth::new(&config.auth.system_token)),
    };

    let handle = match start_server(&config, collaborators).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };

    let reason = tokio::select! {
        reason = handle.stopped() => reason,
        _ = shutdown_signal() => handle.stop(StopReason::Signal).await,
    };

    tracing::info!(
        reason = reason.as_str(),
        exit_code = reason.exit_code(),
        "Shutdown complete"
    );
    ExitCode::from(reason.exit_code())
}
