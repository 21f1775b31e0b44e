//! `courier manager`: consume pending-task notices and spawn workers

use crate::settings::Settings;
use anyhow::{Context, Result};
use courier_core::application::{DispatchConfig, DispatchLimits, DispatchManager, ShutdownToken};
use courier_core::domain::QueueName;
use courier_core::port::ErrorReporter;
use courier_infra_amqp::redact_url;
use courier_infra_system::SubprocessSpawner;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const CONNECTION_NAME: &str = "courier-manager";

/// Run the dispatch manager until shutdown
///
/// A broker that cannot be reached at startup is fatal. `config_file` is the
/// file the settings were loaded from; every spawned worker is pointed at it.
pub async fn run(
    settings: &Settings,
    config_file: Option<&Path>,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: ShutdownToken,
) -> Result<()> {
    let pending_queue = QueueName::new(settings.dispatch.pending_queue.clone())
        .context("Invalid dispatch.pending_queue")?;

    info!(url = %redact_url(&settings.broker.url), "Connecting to broker...");
    let broker = courier_infra_amqp::connect(&settings.broker.url, CONNECTION_NAME)
        .await
        .context("Failed to connect to broker")?;

    let program = std::env::current_exe().context("Failed to resolve current executable")?;
    let spawner = SubprocessSpawner::new(program, worker_args(config_file));

    let config = DispatchConfig::new(pending_queue)
        .with_limits(DispatchLimits {
            global_process_limit: settings.dispatch.global_process_limit,
            consumer_per_queue: settings.dispatch.consumer_per_queue,
        })
        .with_backpressure_delay(Duration::from_secs(settings.dispatch.backpressure_delay_secs))
        .with_worker_grace(Duration::from_secs(settings.dispatch.worker_grace_secs));

    let mut manager = DispatchManager::new(Arc::new(broker), Arc::new(spawner), reporter, config);
    manager.run(shutdown).await.context("Dispatch manager failed")
}

/// Arguments placed before `--target=<queue>` when spawning a worker
fn worker_args(config_file: Option<&Path>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(path) = config_file {
        args.push("--config".to_string());
        args.push(path.to_string_lossy().into_owned());
    }
    args.push("worker".to_string());
    args
}
