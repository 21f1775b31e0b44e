// Error Reporter Port - fire-and-forget error sink
// Reporting must never block or fail the caller

use tracing::error;

/// Where an error happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub component: &'static str,
    pub queue: Option<String>,
    pub task: Option<String>,
}

impl ErrorContext {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            queue: None,
            task: None,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }
}

/// Error sink
///
/// Implementations:
/// - LogReporter: structured log line only
/// - HttpErrorReporter: background POST to a reporting endpoint (infra-http)
pub trait ErrorReporter: Send + Sync {
    fn report(&self, context: &ErrorContext, error: &(dyn std::error::Error + 'static));
}

/// Reporter that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, context: &ErrorContext, err: &(dyn std::error::Error + 'static)) {
        error!(
            component = context.component,
            queue = context.queue.as_deref().unwrap_or("-"),
            task = context.task.as_deref().unwrap_or("-"),
            error = %err,
            "Reported error"
        );
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Reporter that keeps every report in memory
    #[derive(Clone, Default)]
    pub struct RecordingReporter {
        reports: Arc<Mutex<Vec<(ErrorContext, String)>>>,
    }

    impl RecordingReporter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reports(&self) -> Vec<(ErrorContext, String)> {
            self.reports.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.reports.lock().unwrap().len()
        }
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, context: &ErrorContext, err: &(dyn std::error::Error + 'static)) {
            self.reports
                .lock()
                .unwrap()
                .push((context.clone(), err.to_string()));
        }
    }
}
