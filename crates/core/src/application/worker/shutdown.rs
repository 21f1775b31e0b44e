// Shutdown Token

use tokio::sync::watch;

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal
    ///
    /// Returns at once if shutdown was already requested. Never returns if the
    /// sender is dropped without signalling.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every token
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_when_already_signalled() {
        let (tx, mut token) = shutdown_channel();
        tx.shutdown();
        tokio::time::timeout(Duration::from_secs(1), token.wait())
            .await
            .unwrap();
        assert!(token.is_shutdown());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_does_not_signal() {
        let (tx, mut token) = shutdown_channel();
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_secs(5), token.wait()).await;
        assert!(waited.is_err());
        assert!(!token.is_shutdown());
    }
}
