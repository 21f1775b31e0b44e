// Application Layer - Use Cases and Business Logic

pub mod dispatch;
pub mod enqueue;
pub mod handlers;
pub mod retry;
pub mod worker;

// Re-exports
pub use dispatch::{DispatchConfig, DispatchLimits, DispatchManager, DispatchOutcome};
pub use enqueue::{tenant_queue_name, EnqueueReceipt, EnqueueRequest, TaskPublisher};
pub use handlers::{HandlerRegistry, HandlerRegistryBuilder};
pub use retry::{Classify, RetryError, RetryPolicy, RetryableKind};
pub use worker::{shutdown_channel, IdlePolicy, ShutdownSender, ShutdownToken, WorkerExit, WorkerRuntime};
