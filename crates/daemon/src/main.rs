//! Courier - Main Entry Point
//!
//! `courier manager` runs the dispatch manager; it spawns
//! `courier worker --target=<queue>` children on demand.

mod logging;
mod manager;
mod settings;
mod telemetry;
mod worker;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::application::{shutdown_channel, ShutdownSender};
use courier_core::domain::QueueName;
use courier_core::port::{ErrorReporter, LogReporter};
use courier_infra_http::{build_client, HttpClient, HttpErrorReporter};
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Per-tenant task dispatch over RabbitMQ", version)]
struct Cli {
    /// Config file (TOML); defaults to the platform config dir
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume pending-task notices and spawn workers
    Manager,

    /// Drain one tenant queue until idle
    Worker {
        /// Tenant queue to claim exclusively
        #[arg(long)]
        target: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("courier: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_file = settings::config_file(cli.config.as_deref());
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Manager => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;

            runtime.block_on(async {
                let _guards = logging::init(&settings.logging, "manager")?;
                info!("Courier v{} dispatch manager starting...", VERSION);

                let client = http_client(&settings)?;
                let reporter = build_reporter(&settings, &client);
                let (tx, token) = shutdown_channel();
                tokio::spawn(forward_signals(tx));

                manager::run(&settings, config_file.as_deref(), reporter, token).await
            })
        }
        Command::Worker { target } => {
            let target = QueueName::new(target).context("Invalid --target")?;

            // Handlers run as tasks on this one thread
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;

            runtime.block_on(async {
                let role = format!("worker-{}", target);
                let _guards = logging::init(&settings.logging, &role)?;
                info!(queue = %target, "Courier v{} worker starting...", VERSION);

                let client = http_client(&settings)?;
                let reporter = build_reporter(&settings, &client);
                let (tx, token) = shutdown_channel();
                tokio::spawn(forward_signals(tx));

                // Every clean exit, including a denied claim, is status 0
                worker::run(&settings, target, client, reporter, token)
                    .await
                    .map(|_| ())
            })
        }
    }
}

fn http_client(settings: &Settings) -> Result<HttpClient> {
    build_client(Duration::from_secs(settings.worker.request_timeout_secs))
        .context("Failed to build HTTP client")
}

fn build_reporter(settings: &Settings, client: &HttpClient) -> Arc<dyn ErrorReporter> {
    match settings.reporting.endpoint.as_deref() {
        Some(endpoint) if !endpoint.trim().is_empty() => {
            info!(endpoint = %endpoint, "Reporting errors over HTTP");
            Arc::new(HttpErrorReporter::new(client.clone(), endpoint))
        }
        _ => Arc::new(LogReporter),
    }
}

/// Translate SIGINT/SIGTERM into a graceful shutdown
async fn forward_signals(tx: ShutdownSender) {
    wait_for_signal().await;
    info!("Shutdown signal received. Stopping gracefully...");
    tx.shutdown();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
