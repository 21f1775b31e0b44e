//! `courier worker --target=<queue>`: drain one tenant queue, exit when idle

use crate::settings::{Settings, WorkerSettings};
use anyhow::{Context, Result};
use courier_core::application::{
    HandlerRegistry, IdlePolicy, RetryPolicy, ShutdownToken, WorkerExit, WorkerRuntime,
};
use courier_core::domain::{QueueName, TaskType};
use courier_core::port::ErrorReporter;
use courier_infra_http::{HttpClient, HttpTaskHandler};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Run one worker runtime until it exits
pub async fn run(
    settings: &Settings,
    target: QueueName,
    client: HttpClient,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: ShutdownToken,
) -> Result<WorkerExit> {
    let handlers = build_registry(&settings.worker, &client)?;
    if handlers.is_empty() {
        warn!(queue = %target, "No handlers configured; every task will be dropped");
    }

    let connection_name = format!("courier-worker-{}", target);
    let broker = courier_infra_amqp::connect(&settings.broker.url, &connection_name)
        .await
        .context("Failed to connect to broker")?;

    let runtime = WorkerRuntime::new(target, Arc::new(broker), Arc::new(handlers), reporter)
        .with_idle_policy(idle_policy(&settings.worker));

    let exit = runtime.run(shutdown).await.context("Worker runtime failed")?;
    info!(queue = %runtime.target(), exit = ?exit, "Worker stopped");
    Ok(exit)
}

/// One HTTP handler per configured route
pub fn build_registry(settings: &WorkerSettings, client: &HttpClient) -> Result<HandlerRegistry> {
    let policy = RetryPolicy::new(
        settings.max_attempts,
        Duration::from_millis(settings.backoff_unit_ms),
    );

    let mut builder = HandlerRegistry::builder();
    for route in &settings.handlers {
        let task = TaskType::parse(route.task.as_str())
            .with_context(|| format!("Invalid handler task '{}'", route.task))?;
        let handler = HttpTaskHandler::new(client.clone(), route.endpoint.as_str(), policy.clone());
        builder = builder.register(task, Arc::new(handler));
    }
    Ok(builder.build())
}

pub fn idle_policy(settings: &WorkerSettings) -> IdlePolicy {
    IdlePolicy {
        idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
        startup_timeout: Duration::from_secs(settings.startup_timeout_secs),
    }
}
