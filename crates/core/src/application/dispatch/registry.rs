// Process Registry - the dispatch manager's own record of live workers

use crate::application::worker::constants::ZOMBIE_REAP_TIMEOUT;
use crate::domain::QueueName;
use crate::port::{ProcessStatus, WorkerProcess};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counts from one reap pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub exited: usize,
    pub zombies: usize,
    pub vanished: usize,
}

/// Live worker handles keyed by the tenant queue they were spawned for
#[derive(Default)]
pub struct ProcessRegistry {
    entries: HashMap<QueueName, Vec<Box<dyn WorkerProcess>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: QueueName, process: Box<dyn WorkerProcess>) {
        self.entries.entry(target).or_default().push(process);
    }

    /// Every live handle across all queues
    pub fn live_total(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Live handles bound to queues other than `target`
    pub fn running_excluding(&self, target: &QueueName) -> usize {
        self.live_total() - self.assigned_to(target)
    }

    pub fn assigned_to(&self, target: &QueueName) -> usize {
        self.entries.get(target).map(Vec::len).unwrap_or(0)
    }

    /// Drop exited and vanished workers; wait out zombies
    ///
    /// A zombie whose reap does not finish within the timeout stays registered
    /// and keeps counting against the limits.
    pub async fn reap(&mut self) -> ReapSummary {
        let mut summary = ReapSummary::default();
        let entries = std::mem::take(&mut self.entries);

        for (target, handles) in entries {
            let mut alive = Vec::with_capacity(handles.len());

            for mut handle in handles {
                match handle.poll_status() {
                    ProcessStatus::Running => alive.push(handle),
                    ProcessStatus::Exited(code) => {
                        debug!(queue = %target, pid = ?handle.pid(), exit_code = ?code, "Worker exited");
                        summary.exited += 1;
                    }
                    ProcessStatus::Vanished => {
                        info!(queue = %target, pid = ?handle.pid(), "Worker vanished");
                        summary.vanished += 1;
                    }
                    ProcessStatus::Undetermined(reason) => {
                        warn!(queue = %target, pid = ?handle.pid(), reason = %reason, "Reaping zombie worker");
                        match tokio::time::timeout(ZOMBIE_REAP_TIMEOUT, handle.reap()).await {
                            Ok(Ok(code)) => {
                                debug!(queue = %target, exit_code = ?code, "Zombie reaped");
                                summary.zombies += 1;
                            }
                            Ok(Err(e)) => {
                                // Nothing left to wait for
                                info!(queue = %target, error = %e, "Zombie already gone");
                                summary.zombies += 1;
                            }
                            Err(_) => {
                                warn!(queue = %target, pid = ?handle.pid(), "Zombie reap timed out, keeping handle");
                                alive.push(handle);
                            }
                        }
                    }
                }
            }

            if !alive.is_empty() {
                self.entries.insert(target, alive);
            }
        }

        summary
    }

    /// Terminate every registered worker and clear the registry
    pub async fn terminate_all(&mut self, grace: Duration) -> usize {
        let entries = std::mem::take(&mut self.entries);
        let mut count = 0;

        for (target, handles) in entries {
            for mut handle in handles {
                if let Err(e) = handle.terminate(grace).await {
                    warn!(queue = %target, pid = ?handle.pid(), error = %e, "Worker terminate failed");
                }
                count += 1;
            }
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::process::mocks::MockSpawner;
    use crate::port::ProcessSpawner;

    fn q(name: &str) -> QueueName {
        QueueName::new(name).unwrap()
    }

    async fn registry_with(spawner: &MockSpawner, targets: &[&str]) -> ProcessRegistry {
        let mut registry = ProcessRegistry::new();
        for target in targets {
            let handle = spawner.spawn(&q(target)).await.unwrap();
            registry.insert(q(target), handle);
        }
        registry
    }

    #[tokio::test]
    async fn test_counts() {
        let spawner = MockSpawner::new();
        let registry = registry_with(&spawner, &["a", "a", "b"]).await;

        assert_eq!(registry.live_total(), 3);
        assert_eq!(registry.assigned_to(&q("a")), 2);
        assert_eq!(registry.running_excluding(&q("a")), 1);
        assert_eq!(registry.running_excluding(&q("c")), 3);
    }

    #[tokio::test]
    async fn test_reap_removes_exited_vanished_and_zombies() {
        let spawner = MockSpawner::new();
        let mut registry = registry_with(&spawner, &["a", "b", "c", "d"]).await;

        spawner.handles_for("a")[0].exit(0);
        spawner.handles_for("b")[0].vanish();
        spawner.handles_for("c")[0].become_zombie();

        let summary = registry.reap().await;

        assert_eq!(
            summary,
            ReapSummary {
                exited: 1,
                zombies: 1,
                vanished: 1
            }
        );
        assert_eq!(registry.live_total(), 1);
        assert_eq!(registry.assigned_to(&q("d")), 1);
        assert!(spawner.handles_for("c")[0].is_reaped());
    }

    #[tokio::test]
    async fn test_terminate_all_clears_registry() {
        let spawner = MockSpawner::new();
        let mut registry = registry_with(&spawner, &["a", "b"]).await;

        let count = registry.terminate_all(Duration::from_millis(10)).await;

        assert_eq!(count, 2);
        assert_eq!(registry.live_total(), 0);
        assert!(spawner.handles().iter().all(|h| h.is_terminated()));
    }
}
