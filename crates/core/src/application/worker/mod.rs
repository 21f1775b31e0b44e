// Worker Runtime - drains one tenant queue under an exclusive claim

mod activity;
pub mod constants;
mod shutdown;

pub use activity::{ActivitySnapshot, IdlePolicy, InFlightGuard, WorkerActivity};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::handlers::HandlerRegistry;
use crate::domain::{QueueName, TaskMessage};
use crate::error::Result;
use crate::port::{
    Broker, Claim, ConsumeOptions, Consumer, Delivery, ErrorContext, ErrorReporter, HandlerError,
};
use constants::IDLE_CHECK_INTERVAL;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "worker";

/// Why a worker runtime stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Idle policy fired
    Idle,
    /// Another consumer holds the queue
    ClaimDenied,
    /// External shutdown signal
    Signalled,
    /// Broker ended the consume stream
    ConsumerClosed,
}

/// Worker runtime bound to one tenant queue for its whole lifetime
pub struct WorkerRuntime {
    target: QueueName,
    broker: Arc<dyn Broker>,
    handlers: Arc<HandlerRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    policy: IdlePolicy,
    activity: WorkerActivity,
}

impl WorkerRuntime {
    pub fn new(
        target: QueueName,
        broker: Arc<dyn Broker>,
        handlers: Arc<HandlerRegistry>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            target,
            broker,
            handlers,
            reporter,
            policy: IdlePolicy::default(),
            activity: WorkerActivity::new(Instant::now()),
        }
    }

    pub fn with_idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn target(&self) -> &QueueName {
        &self.target
    }

    pub fn activity(&self) -> &WorkerActivity {
        &self.activity
    }

    /// Claim the queue, process until idle or signalled, then shut down
    ///
    /// Errors only on startup failures (declare or consume); a denied claim is
    /// a clean exit.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<WorkerExit> {
        info!(queue = %self.target, "Worker starting");

        let claim = match self.claim().await {
            Ok(claim) => claim,
            Err(e) => {
                error!(queue = %self.target, error = %e, "Worker startup failed");
                self.close_broker().await;
                return Err(e);
            }
        };

        let (exit, consumer) = match claim {
            Claim::Denied { reason } => {
                info!(
                    queue = %self.target,
                    reason = %reason,
                    "Exclusive claim denied, another worker owns this queue"
                );
                self.activity.mark_claim_failed();
                (WorkerExit::ClaimDenied, None)
            }
            Claim::Granted(mut consumer) => {
                info!(queue = %self.target, "Exclusive claim granted");
                let exit = self.consume_loop(consumer.as_mut(), &mut shutdown).await;
                (exit, Some(consumer))
            }
        };

        self.shutdown(consumer).await;
        info!(queue = %self.target, exit = ?exit, "Worker stopped");
        Ok(exit)
    }

    async fn claim(&self) -> Result<Claim> {
        self.broker.declare(&self.target).await?;
        let claim = self
            .broker
            .consume(&self.target, ConsumeOptions::exclusive())
            .await?;
        Ok(claim)
    }

    async fn consume_loop(
        &self,
        consumer: &mut dyn Consumer,
        shutdown: &mut ShutdownToken,
    ) -> WorkerExit {
        let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = consumer.next() => match next {
                    Some(Ok(delivery)) => self.dispatch(delivery).await,
                    Some(Err(e)) => {
                        warn!(queue = %self.target, error = %e, "Consume stream failed");
                        return WorkerExit::ConsumerClosed;
                    }
                    None => {
                        warn!(queue = %self.target, "Consume stream ended");
                        return WorkerExit::ConsumerClosed;
                    }
                },
                _ = idle_check.tick() => {
                    let snapshot = self.activity.snapshot();
                    if self.policy.should_terminate(&snapshot, Instant::now()) {
                        info!(
                            queue = %self.target,
                            have_run_any = snapshot.last_completion.is_some(),
                            "Worker idle, shutting down"
                        );
                        return WorkerExit::Idle;
                    }
                }
                _ = shutdown.wait() => {
                    info!(queue = %self.target, "Shutdown signal received");
                    return WorkerExit::Signalled;
                }
            }
        }
    }

    /// Parse and count the message here, then hand it to its own task
    async fn dispatch(&self, delivery: Box<dyn Delivery>) {
        let message = match TaskMessage::from_slice(delivery.body()) {
            Ok(message) => message,
            Err(e) => {
                warn!(queue = %self.target, error = %e, "Dropping malformed message");
                ack(delivery.as_ref(), &self.target).await;
                return;
            }
        };

        let guard = self.activity.begin();
        let job = MessageJob {
            target: self.target.clone(),
            handlers: Arc::clone(&self.handlers),
            reporter: Arc::clone(&self.reporter),
        };

        tokio::spawn(async move {
            job.process(delivery, message).await;
            drop(guard);
        });
    }

    /// Cancel, drain, close channel, close connection; every step is attempted
    async fn shutdown(&self, consumer: Option<Box<dyn Consumer>>) {
        if let Some(mut consumer) = consumer {
            if let Err(e) = consumer.cancel().await {
                warn!(queue = %self.target, error = %e, "Consumer cancel failed");
            }
        }

        let in_flight = self.activity.snapshot().in_flight;
        if in_flight > 0 {
            info!(queue = %self.target, in_flight, "Waiting for in-flight messages");
        }
        self.activity.wait_idle().await;

        self.close_broker().await;
    }

    async fn close_broker(&self) {
        if let Err(e) = self.broker.close_channel().await {
            warn!(queue = %self.target, error = %e, "Channel close failed");
        }
        if let Err(e) = self.broker.close_connection().await {
            warn!(queue = %self.target, error = %e, "Connection close failed");
        }
    }
}

/// State one message task needs
struct MessageJob {
    target: QueueName,
    handlers: Arc<HandlerRegistry>,
    reporter: Arc<dyn ErrorReporter>,
}

impl MessageJob {
    async fn process(self, delivery: Box<dyn Delivery>, message: TaskMessage) {
        let Some(task) = message.task() else {
            warn!(queue = %self.target, "Message has no task type, dropping");
            ack(delivery.as_ref(), &self.target).await;
            return;
        };

        let Some(handler) = self.handlers.resolve(&task) else {
            warn!(queue = %self.target, task = %task, "Unknown task type, dropping");
            ack(delivery.as_ref(), &self.target).await;
            return;
        };

        debug!(queue = %self.target, task = %task, "Processing message");
        let context = ErrorContext::new(COMPONENT)
            .with_queue(self.target.as_str())
            .with_task(task.as_str());

        // Own task so a handler panic is caught at the JoinHandle
        let payload = message.payload().clone();
        let outcome = tokio::spawn(async move { handler.process(&payload).await }).await;

        match outcome {
            Ok(Ok(result)) => {
                info!(
                    queue = %self.target,
                    task = %task,
                    detail = result.detail.as_deref().unwrap_or(""),
                    "Task completed"
                );
                ack(delivery.as_ref(), &self.target).await;
            }
            Ok(Err(e @ HandlerError::RetriesExhausted { .. })) => {
                error!(queue = %self.target, task = %task, error = %e, "Task gave up");
                self.reporter.report(&context, &e);
                ack(delivery.as_ref(), &self.target).await;
            }
            Ok(Err(e)) => {
                // Left unacknowledged; the broker redelivers after the channel closes
                warn!(queue = %self.target, task = %task, error = %e, "Task failed");
                self.reporter.report(&context, &e);
            }
            Err(join_err) => {
                error!(queue = %self.target, task = %task, error = %join_err, "Task panicked");
                let e = HandlerError::Failed(format!("handler panicked: {}", join_err));
                self.reporter.report(&context, &e);
            }
        }
    }
}

async fn ack(delivery: &dyn Delivery, queue: &QueueName) {
    if let Err(e) = delivery.ack().await {
        warn!(queue = %queue, tag = delivery.delivery_tag(), error = %e, "Ack failed");
    }
}
