// Worker activity tracking and the idle-shutdown policy

use super::constants::{IDLE_TIMEOUT, STARTUP_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Point-in-time view of a worker's activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub in_flight: usize,
    pub last_completion: Option<Instant>,
    pub started_at: Instant,
    pub claim_failed: bool,
}

/// Shared activity state
///
/// Every update goes through `watch::Sender::send_modify`, so the counter is
/// changed atomically and waiters see each transition.
#[derive(Clone)]
pub struct WorkerActivity {
    tx: Arc<watch::Sender<ActivitySnapshot>>,
}

impl WorkerActivity {
    pub fn new(started_at: Instant) -> Self {
        let (tx, _rx) = watch::channel(ActivitySnapshot {
            in_flight: 0,
            last_completion: None,
            started_at,
            claim_failed: false,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        *self.tx.borrow()
    }

    pub fn mark_claim_failed(&self) {
        self.tx.send_modify(|s| s.claim_failed = true);
    }

    /// Count one message as in flight until the returned guard drops
    pub fn begin(&self) -> InFlightGuard {
        self.tx.send_modify(|s| s.in_flight += 1);
        InFlightGuard {
            tx: Arc::clone(&self.tx),
        }
    }

    /// Resolve once nothing is in flight
    pub async fn wait_idle(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|s| s.in_flight == 0).await;
    }
}

/// Decrements the in-flight count and stamps completion on drop, panics included
pub struct InFlightGuard {
    tx: Arc<watch::Sender<ActivitySnapshot>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let now = Instant::now();
        self.tx.send_modify(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            s.last_completion = Some(now);
        });
    }
}

/// When an idle worker should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    pub idle_timeout: Duration,
    pub startup_timeout: Duration,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            idle_timeout: IDLE_TIMEOUT,
            startup_timeout: STARTUP_TIMEOUT,
        }
    }
}

impl IdlePolicy {
    pub fn should_terminate(&self, s: &ActivitySnapshot, now: Instant) -> bool {
        if s.in_flight > 0 {
            return false;
        }

        let long_idle = s
            .last_completion
            .map(|last| now.saturating_duration_since(last) > self.idle_timeout)
            .unwrap_or(false);
        let startup_idle = s.last_completion.is_none()
            && now.saturating_duration_since(s.started_at) > self.startup_timeout;

        long_idle || startup_idle || s.claim_failed
    }
}
