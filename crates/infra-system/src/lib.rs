// Courier Infrastructure - System Adapters
// Implements: ProcessSpawner, WorkerProcess

pub mod subprocess_spawner;

pub use subprocess_spawner::{SubprocessHandle, SubprocessSpawner, DEFAULT_ENV_ALLOWLIST};
