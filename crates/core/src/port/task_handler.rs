// Task Handler Port - business operation invoked per tenant-queue message
// Handlers are resolved by task type once at worker startup

use crate::domain::Payload;
use async_trait::async_trait;
use thiserror::Error;

/// Successful handler result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub detail: Option<String>,
}

impl HandlerOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
        }
    }
}

/// Handler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Remote API asked us to slow down (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Remote API unreachable or temporarily failing
    #[error("Transient connection error: {0}")]
    TransientConnection(String),

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Exhausted errors are acknowledged; every other failure is left for redelivery
    pub fn is_exhausted(&self) -> bool {
        matches!(self, HandlerError::RetriesExhausted { .. })
    }
}

/// Task handler trait
///
/// Implementations:
/// - HttpTaskHandler: forwards the payload to a remote endpoint (infra-http)
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Perform the business operation for one message
    ///
    /// # Arguments
    /// * `payload` - Full message body, including the `task` field
    async fn process(&self, payload: &Payload) -> Result<HandlerOutcome, HandlerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Fail as if retries ran out
        Exhausted(u32),
        /// Always rate limited
        RateLimited,
        /// Sleep, then succeed
        Delay(Duration),
        /// Panic with message (for isolation testing)
        Panic(String),
    }

    /// Mock Task Handler for testing
    #[derive(Clone)]
    pub struct MockTaskHandler {
        behavior: Arc<Mutex<MockBehavior>>,
        payloads: Arc<Mutex<Vec<Payload>>>,
    }

    impl MockTaskHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                payloads: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_delay(delay: Duration) -> Self {
            Self::new(MockBehavior::Delay(delay))
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn call_count(&self) -> usize {
            self.payloads.lock().unwrap().len()
        }

        pub fn payloads(&self) -> Vec<Payload> {
            self.payloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskHandler for MockTaskHandler {
        async fn process(&self, payload: &Payload) -> Result<HandlerOutcome, HandlerError> {
            self.payloads.lock().unwrap().push(payload.clone());
            let behavior = self.behavior.lock().unwrap().clone();

            match behavior {
                MockBehavior::Success => Ok(HandlerOutcome::done()),
                MockBehavior::Fail(msg) => Err(HandlerError::Failed(msg)),
                MockBehavior::Exhausted(attempts) => Err(HandlerError::RetriesExhausted {
                    attempts,
                    last_error: "mock upstream unavailable".to_string(),
                }),
                MockBehavior::RateLimited => {
                    Err(HandlerError::RateLimited("mock 429".to_string()))
                }
                MockBehavior::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(HandlerOutcome::done())
                }
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg);
                }
            }
        }
    }
}
