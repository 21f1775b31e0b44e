// Broker Port - minimal task queue client used by manager and workers
// Acknowledgement is always manual; bodies are opaque bytes at this layer

use crate::domain::QueueName;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod mocks;

/// Broker errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    /// Exclusive access to a queue was refused (another consumer holds it)
    #[error("Access refused: {0}")]
    AccessRefused(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Acknowledgement failed: {0}")]
    Acknowledge(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Broker closed")]
    Closed,
}

/// Options for starting a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumeOptions {
    /// Request exclusive consumer access to the queue
    pub exclusive: bool,
    /// Unacknowledged deliveries allowed in flight (None = unlimited)
    pub prefetch: Option<u16>,
}

impl ConsumeOptions {
    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            prefetch: None,
        }
    }

    pub fn shared(prefetch: u16) -> Self {
        Self {
            exclusive: false,
            prefetch: Some(prefetch),
        }
    }
}

/// Queue depth snapshot (passive declare)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub messages: u32,
    pub consumers: u32,
}

/// Result of a consume request
///
/// `Denied` is an expected outcome for exclusive consumers, not an error.
pub enum Claim {
    Granted(Box<dyn Consumer>),
    Denied { reason: String },
}

impl fmt::Debug for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Claim::Granted(_) => f.write_str("Claim::Granted"),
            Claim::Denied { reason } => write!(f, "Claim::Denied({})", reason),
        }
    }
}

/// A single delivered message awaiting acknowledgement
#[async_trait]
pub trait Delivery: Send + Sync {
    fn body(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    /// True if the broker delivered this message before
    fn redelivered(&self) -> bool;

    async fn ack(&self) -> Result<(), BrokerError>;

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// Lazy stream of deliveries from one queue
#[async_trait]
pub trait Consumer: Send {
    /// Next delivery; `None` once the consumer is cancelled or the channel closes
    ///
    /// Cancel-safe: dropping the future loses no delivery.
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, BrokerError>>;

    /// Stop the consume iterator (basic.cancel)
    async fn cancel(&mut self) -> Result<(), BrokerError>;
}

/// Broker connection + channel owned by one component
#[async_trait]
pub trait Broker: Send + Sync {
    /// Idempotent durable queue declaration
    async fn declare(&self, queue: &QueueName) -> Result<(), BrokerError>;

    /// Persistent publish on the default exchange
    async fn publish(&self, routing_key: &QueueName, body: &[u8]) -> Result<(), BrokerError>;

    /// Start consuming; exclusive refusals come back as `Claim::Denied`
    async fn consume(&self, queue: &QueueName, options: ConsumeOptions)
        -> Result<Claim, BrokerError>;

    /// Message and consumer counts for an existing queue
    async fn queue_stats(&self, queue: &QueueName) -> Result<QueueStats, BrokerError>;

    async fn close_channel(&self) -> Result<(), BrokerError>;

    async fn close_connection(&self) -> Result<(), BrokerError>;
}
