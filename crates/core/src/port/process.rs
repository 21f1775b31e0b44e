// Process Port - spawning and supervising worker processes
// The dispatch manager owns every handle it gets back; nothing scans the OS process table

use crate::domain::QueueName;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Process errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    #[error("Signal delivery failed: {0}")]
    Signal(String),

    #[error("Wait failed: {0}")]
    Wait(String),
}

/// Non-blocking status snapshot of a child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// Exited and collected (None when killed by a signal)
    Exited(Option<i32>),
    /// The process is gone without an exit status we could collect
    Vanished,
    /// Status query failed; treated as a zombie and reaped
    Undetermined(String),
}

/// Handle to one spawned worker process
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Poll without blocking
    fn poll_status(&mut self) -> ProcessStatus;

    /// Wait for the process to exit and collect its status
    async fn reap(&mut self) -> Result<Option<i32>, ProcessError>;

    /// SIGTERM, then SIGKILL once `grace` elapses
    async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError>;
}

/// Starts worker runtimes for tenant queues
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Fire-and-forget spawn of a worker bound to `target`
    async fn spawn(&self, target: &QueueName) -> Result<Box<dyn WorkerProcess>, ProcessError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum MockState {
        Running,
        Exited(Option<i32>),
        Zombie,
        Vanished,
        Reaped,
        Terminated,
    }

    /// Test-side control over a spawned mock process
    #[derive(Clone)]
    pub struct MockProcessControl {
        pid: u32,
        target: QueueName,
        state: Arc<Mutex<MockState>>,
    }

    impl MockProcessControl {
        pub fn pid(&self) -> u32 {
            self.pid
        }

        pub fn target(&self) -> &QueueName {
            &self.target
        }

        /// Make the process exit with `code`
        pub fn exit(&self, code: i32) {
            *self.state.lock().unwrap() = MockState::Exited(Some(code));
        }

        /// Make status queries fail until the process is reaped
        pub fn become_zombie(&self) {
            *self.state.lock().unwrap() = MockState::Zombie;
        }

        /// Make the process disappear without an exit status
        pub fn vanish(&self) {
            *self.state.lock().unwrap() = MockState::Vanished;
        }

        pub fn is_running(&self) -> bool {
            *self.state.lock().unwrap() == MockState::Running
        }

        pub fn is_reaped(&self) -> bool {
            *self.state.lock().unwrap() == MockState::Reaped
        }

        pub fn is_terminated(&self) -> bool {
            *self.state.lock().unwrap() == MockState::Terminated
        }
    }

    /// Mock process handle returned by `MockSpawner`
    pub struct MockProcessHandle {
        control: MockProcessControl,
    }

    #[async_trait]
    impl WorkerProcess for MockProcessHandle {
        fn pid(&self) -> Option<u32> {
            Some(self.control.pid)
        }

        fn poll_status(&mut self) -> ProcessStatus {
            let state = self.control.state.lock().unwrap().clone();
            match state {
                MockState::Running => ProcessStatus::Running,
                MockState::Exited(code) => ProcessStatus::Exited(code),
                MockState::Zombie => ProcessStatus::Undetermined("zombie process".to_string()),
                MockState::Vanished => ProcessStatus::Vanished,
                MockState::Reaped => ProcessStatus::Exited(None),
                MockState::Terminated => ProcessStatus::Exited(None),
            }
        }

        async fn reap(&mut self) -> Result<Option<i32>, ProcessError> {
            let mut state = self.control.state.lock().unwrap();
            match *state {
                MockState::Vanished => Err(ProcessError::NoSuchProcess(self.control.pid)),
                MockState::Exited(code) => {
                    *state = MockState::Reaped;
                    Ok(code)
                }
                _ => {
                    *state = MockState::Reaped;
                    Ok(None)
                }
            }
        }

        async fn terminate(&mut self, _grace: Duration) -> Result<(), ProcessError> {
            *self.control.state.lock().unwrap() = MockState::Terminated;
            Ok(())
        }
    }

    /// Mock spawner recording every spawn request
    pub struct MockSpawner {
        next_pid: AtomicU32,
        failure: Mutex<Option<String>>,
        spawned: Mutex<Vec<MockProcessControl>>,
    }

    impl Default for MockSpawner {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockSpawner {
        pub fn new() -> Self {
            Self {
                next_pid: AtomicU32::new(1000),
                failure: Mutex::new(None),
                spawned: Mutex::new(Vec::new()),
            }
        }

        /// Fail every subsequent spawn with `message`
        pub fn fail_with(&self, message: impl Into<String>) {
            *self.failure.lock().unwrap() = Some(message.into());
        }

        pub fn succeed(&self) {
            *self.failure.lock().unwrap() = None;
        }

        pub fn spawn_count(&self) -> usize {
            self.spawned.lock().unwrap().len()
        }

        /// Targets in spawn order
        pub fn spawned_targets(&self) -> Vec<QueueName> {
            self.spawned
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.target.clone())
                .collect()
        }

        pub fn handles(&self) -> Vec<MockProcessControl> {
            self.spawned.lock().unwrap().clone()
        }

        pub fn handles_for(&self, target: &str) -> Vec<MockProcessControl> {
            self.spawned
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.target.as_str() == target)
                .cloned()
                .collect()
        }

        pub fn running_count(&self) -> usize {
            self.spawned
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.is_running())
                .count()
        }
    }

    #[async_trait]
    impl ProcessSpawner for MockSpawner {
        async fn spawn(&self, target: &QueueName) -> Result<Box<dyn WorkerProcess>, ProcessError> {
            if let Some(message) = self.failure.lock().unwrap().clone() {
                return Err(ProcessError::SpawnFailed(message));
            }

            let control = MockProcessControl {
                pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
                target: target.clone(),
                state: Arc::new(Mutex::new(MockState::Running)),
            };
            self.spawned.lock().unwrap().push(control.clone());

            Ok(Box::new(MockProcessHandle { control }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::*;
    use super::*;

    #[tokio::test]
    async fn test_mock_spawner_tracks_status() {
        let spawner = MockSpawner::new();
        let target = QueueName::new("Shopify.7.acme").unwrap();

        let mut handle = spawner.spawn(&target).await.unwrap();
        assert_eq!(handle.poll_status(), ProcessStatus::Running);

        let control = &spawner.handles_for("Shopify.7.acme")[0];
        control.exit(0);
        assert_eq!(handle.poll_status(), ProcessStatus::Exited(Some(0)));
        assert_eq!(handle.reap().await.unwrap(), Some(0));
        assert!(control.is_reaped());
    }

    #[tokio::test]
    async fn test_mock_spawner_failure() {
        let spawner = MockSpawner::new();
        spawner.fail_with("fork: resource temporarily unavailable");

        let target = QueueName::new("Shopify.7.acme").unwrap();
        assert!(matches!(
            spawner.spawn(&target).await,
            Err(ProcessError::SpawnFailed(_))
        ));
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_vanished_process_cannot_be_reaped() {
        let spawner = MockSpawner::new();
        let target = QueueName::new("Shopify.7.acme").unwrap();
        let mut handle = spawner.spawn(&target).await.unwrap();

        spawner.handles()[0].vanish();
        assert_eq!(handle.poll_status(), ProcessStatus::Vanished);
        assert!(matches!(
            handle.reap().await,
            Err(ProcessError::NoSuchProcess(_))
        ));
    }
}
