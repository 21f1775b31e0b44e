// Worker runtime and dispatch constants (no magic values)
use std::time::Duration;

/// Terminate this long after the last completed message when nothing is in flight (10s)
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminate this long after start when no message ever completed (60s)
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle policy evaluation period (1s)
pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Dispatch manager wait before requeueing a pending message it cannot serve (5s)
pub const BACKPRESSURE_DELAY: Duration = Duration::from_secs(5);

/// SIGTERM to SIGKILL grace when the manager stops its workers (5s)
pub const WORKER_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Upper bound on waiting for a zombie worker to be collected (2s)
pub const ZOMBIE_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on concurrently live workers per manager
pub const DEFAULT_GLOBAL_PROCESS_LIMIT: usize = 4;

/// Default workers assigned per tenant queue
pub const DEFAULT_CONSUMER_PER_QUEUE: usize = 1;

/// Default shared pending-tasks queue
pub const DEFAULT_PENDING_QUEUE: &str = "Shopify.PendingTasks";
