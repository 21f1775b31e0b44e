// Port Layer - Interfaces for external dependencies

pub mod broker;
pub mod error_reporter;
pub mod process;
pub mod task_handler;

// Re-exports
pub use broker::{Broker, BrokerError, Claim, ConsumeOptions, Consumer, Delivery, QueueStats};
pub use error_reporter::{ErrorContext, ErrorReporter, LogReporter};
pub use process::{ProcessError, ProcessSpawner, ProcessStatus, WorkerProcess};
pub use task_handler::{HandlerError, HandlerOutcome, TaskHandler};
