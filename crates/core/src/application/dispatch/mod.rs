// Dispatch Manager - turns pending-task notices into worker processes
//
// Consumes the shared pending-tasks queue one message at a time and decides,
// per tenant queue, whether a worker must be spawned. The process registry is
// owned here and never shared.

mod registry;

pub use registry::{ProcessRegistry, ReapSummary};

use crate::application::worker::constants::{
    BACKPRESSURE_DELAY, DEFAULT_CONSUMER_PER_QUEUE, DEFAULT_GLOBAL_PROCESS_LIMIT,
    WORKER_GRACE_PERIOD,
};
use crate::application::worker::ShutdownToken;
use crate::domain::{PendingTaskMessage, QueueName};
use crate::error::{AppError, Result};
use crate::port::{
    Broker, BrokerError, Claim, ConsumeOptions, Delivery, ErrorContext, ErrorReporter,
    ProcessSpawner,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "dispatch";

/// Concurrency limits enforced by one manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    /// Live workers across all tenant queues
    pub global_process_limit: usize,
    /// Workers assigned to a single tenant queue
    pub consumer_per_queue: usize,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            global_process_limit: DEFAULT_GLOBAL_PROCESS_LIMIT,
            consumer_per_queue: DEFAULT_CONSUMER_PER_QUEUE,
        }
    }
}

/// Admission decision for one pending message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// System is at capacity; requeue the notice
    Backpressure,
    /// Spawn one worker for the target
    Spawn,
    /// Target already has its share of workers
    AlreadyServed,
}

/// Decide what to do for a target
///
/// # Arguments
/// * `running_elsewhere` - live workers bound to other queues
/// * `assigned` - live workers bound to the target
pub fn admit(limits: &DispatchLimits, running_elsewhere: usize, assigned: usize) -> Admission {
    if running_elsewhere + 1 > limits.global_process_limit {
        return Admission::Backpressure;
    }

    let total = running_elsewhere + assigned;
    if assigned < limits.consumer_per_queue && total + 1 <= limits.global_process_limit {
        Admission::Spawn
    } else {
        Admission::AlreadyServed
    }
}

/// What happened to one pending message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Unparseable notice, acknowledged and dropped
    Malformed,
    /// Rejected with requeue, nothing spawned
    Backpressure,
    Spawned { target: QueueName, pid: Option<u32> },
    AlreadyServed { target: QueueName },
    /// Spawn error, rejected with requeue
    SpawnFailed { target: QueueName },
}

/// Manager tuning
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub pending_queue: QueueName,
    pub limits: DispatchLimits,
    pub backpressure_delay: Duration,
    pub worker_grace: Duration,
}

impl DispatchConfig {
    pub fn new(pending_queue: QueueName) -> Self {
        Self {
            pending_queue,
            limits: DispatchLimits::default(),
            backpressure_delay: BACKPRESSURE_DELAY,
            worker_grace: WORKER_GRACE_PERIOD,
        }
    }

    pub fn with_limits(mut self, limits: DispatchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_backpressure_delay(mut self, delay: Duration) -> Self {
        self.backpressure_delay = delay;
        self
    }

    pub fn with_worker_grace(mut self, grace: Duration) -> Self {
        self.worker_grace = grace;
        self
    }
}

/// Dispatch manager
pub struct DispatchManager {
    broker: Arc<dyn Broker>,
    spawner: Arc<dyn ProcessSpawner>,
    reporter: Arc<dyn ErrorReporter>,
    config: DispatchConfig,
    registry: ProcessRegistry,
}

impl DispatchManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        spawner: Arc<dyn ProcessSpawner>,
        reporter: Arc<dyn ErrorReporter>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            broker,
            spawner,
            reporter,
            config,
            registry: ProcessRegistry::new(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn live_workers(&self) -> usize {
        self.registry.live_total()
    }

    pub fn workers_for(&self, target: &QueueName) -> usize {
        self.registry.assigned_to(target)
    }

    /// Handle one pending-task notice
    ///
    /// Acknowledges unless backpressure or a spawn failure requeues it.
    pub async fn on_pending_task(&mut self, delivery: &dyn Delivery) -> DispatchOutcome {
        let notice = match PendingTaskMessage::from_slice(delivery.body()) {
            Ok(notice) => notice,
            Err(e) => {
                warn!(error = %e, "Dropping malformed pending-task message");
                self.ack(delivery).await;
                return DispatchOutcome::Malformed;
            }
        };
        let target = notice.target;

        let reaped = self.registry.reap().await;
        if reaped != ReapSummary::default() {
            debug!(
                exited = reaped.exited,
                zombies = reaped.zombies,
                vanished = reaped.vanished,
                "Reaped workers"
            );
        }

        let running_elsewhere = self.registry.running_excluding(&target);
        let assigned = self.registry.assigned_to(&target);

        match admit(&self.config.limits, running_elsewhere, assigned) {
            Admission::Backpressure => {
                info!(
                    queue = %target,
                    running = running_elsewhere,
                    limit = self.config.limits.global_process_limit,
                    "Process limit reached, requeueing"
                );
                tokio::time::sleep(self.config.backpressure_delay).await;
                self.reject(delivery).await;
                DispatchOutcome::Backpressure
            }
            Admission::AlreadyServed => {
                debug!(queue = %target, assigned, "Queue already has a worker");
                self.ack(delivery).await;
                DispatchOutcome::AlreadyServed { target }
            }
            Admission::Spawn => match self.spawner.spawn(&target).await {
                Ok(process) => {
                    let pid = process.pid();
                    info!(
                        queue = %target,
                        pid = ?pid,
                        task = notice.task.as_ref().map(|t| t.as_str()).unwrap_or("-"),
                        "Spawned worker"
                    );
                    self.registry.insert(target.clone(), process);
                    self.ack(delivery).await;
                    DispatchOutcome::Spawned { target, pid }
                }
                Err(e) => {
                    error!(queue = %target, error = %e, "Worker spawn failed");
                    let context = ErrorContext::new(COMPONENT).with_queue(target.as_str());
                    self.reporter.report(&context, &e);
                    tokio::time::sleep(self.config.backpressure_delay).await;
                    self.reject(delivery).await;
                    DispatchOutcome::SpawnFailed { target }
                }
            },
        }
    }

    /// Consume the pending-tasks queue until the stream ends or shutdown
    pub async fn run(&mut self, mut shutdown: ShutdownToken) -> Result<()> {
        let pending = self.config.pending_queue.clone();
        self.broker.declare(&pending).await?;

        let mut consumer = match self
            .broker
            .consume(&pending, ConsumeOptions::shared(1))
            .await?
        {
            Claim::Granted(consumer) => consumer,
            Claim::Denied { reason } => {
                return Err(AppError::Broker(BrokerError::AccessRefused(reason)));
            }
        };

        info!(
            queue = %pending,
            global_process_limit = self.config.limits.global_process_limit,
            consumer_per_queue = self.config.limits.consumer_per_queue,
            "Dispatch manager running"
        );

        loop {
            tokio::select! {
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => {
                        let outcome = self.on_pending_task(delivery.as_ref()).await;
                        debug!(outcome = ?outcome, "Pending task handled");
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Pending-tasks stream failed");
                        break;
                    }
                    None => {
                        warn!("Pending-tasks stream ended");
                        break;
                    }
                },
                _ = shutdown.wait() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = consumer.cancel().await {
            warn!(error = %e, "Consumer cancel failed");
        }
        self.shutdown_workers().await;

        if let Err(e) = self.broker.close_channel().await {
            warn!(error = %e, "Channel close failed");
        }
        if let Err(e) = self.broker.close_connection().await {
            warn!(error = %e, "Connection close failed");
        }

        info!("Dispatch manager stopped");
        Ok(())
    }

    /// Terminate every registered worker (SIGTERM, then SIGKILL after the grace period)
    pub async fn shutdown_workers(&mut self) -> usize {
        let live = self.registry.live_total();
        if live > 0 {
            info!(workers = live, "Stopping workers");
        }
        self.registry.terminate_all(self.config.worker_grace).await
    }

    async fn ack(&self, delivery: &dyn Delivery) {
        if let Err(e) = delivery.ack().await {
            warn!(tag = delivery.delivery_tag(), error = %e, "Ack failed");
        }
    }

    async fn reject(&self, delivery: &dyn Delivery) {
        if let Err(e) = delivery.reject(true).await {
            warn!(tag = delivery.delivery_tag(), error = %e, "Reject failed");
        }
    }
}
