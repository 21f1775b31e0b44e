// Domain Layer - Message and queue models

pub mod error;
pub mod message;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use message::{Payload, PendingTaskMessage, TaskMessage, TaskType};
pub use queue::QueueName;
