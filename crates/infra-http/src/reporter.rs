// HTTP error reporter - background POST of terminal errors

use chrono::{DateTime, Utc};
use courier_core::port::{ErrorContext, ErrorReporter};
use reqwest::Client;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Body posted to the reporting endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorReport {
    pub component: String,
    pub queue: Option<String>,
    pub task: Option<String>,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(context: &ErrorContext, error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            component: context.component.to_string(),
            queue: context.queue.clone(),
            task: context.task.clone(),
            error: error.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Fire-and-forget reporter; the caller never waits on the network
pub struct HttpErrorReporter {
    client: Client,
    endpoint: String,
}

impl HttpErrorReporter {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl ErrorReporter for HttpErrorReporter {
    fn report(&self, context: &ErrorContext, error: &(dyn std::error::Error + 'static)) {
        let report = ErrorReport::new(context, error);

        let Ok(handle) = Handle::try_current() else {
            warn!(error = %report.error, "No runtime available, error report dropped");
            return;
        };

        let request = self.client.post(&self.endpoint).json(&report);
        let endpoint = self.endpoint.clone();
        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(endpoint = %endpoint, "Error report delivered");
                }
                Ok(response) => {
                    warn!(endpoint = %endpoint, status = response.status().as_u16(), "Error report rejected");
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Error report failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::port::HandlerError;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::{Duration, Instant};

    #[test]
    fn test_report_body_shape() {
        let context = ErrorContext::new("worker")
            .with_queue("Shopify.1.acme")
            .with_task("Publish");
        let err = HandlerError::Failed("boom".to_string());

        let report = ErrorReport::new(&context, &err);
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["component"], "worker");
        assert_eq!(value["queue"], "Shopify.1.acme");
        assert_eq!(value["task"], "Publish");
        assert_eq!(value["error"], "Handler failed: boom");
        assert!(value["occurred_at"].is_string());
    }

    #[test]
    fn test_report_without_runtime_is_dropped() {
        let reporter = HttpErrorReporter::new(Client::new(), "http://127.0.0.1:1/errors");
        let err = HandlerError::Failed("boom".to_string());

        reporter.report(&ErrorContext::new("dispatch"), &err);
    }

    #[tokio::test]
    async fn test_report_does_not_block_and_arrives() {
        let mut server = mockito::Server::new_async().await;
        let sink = server
            .mock("POST", "/errors")
            .match_body(Matcher::PartialJson(json!({
                "component": "worker",
                "task": "Reprice",
                "error": "Retries exhausted after 15 attempts: HTTP 429",
            })))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let reporter = HttpErrorReporter::new(Client::new(), format!("{}/errors", server.url()));
        let err = HandlerError::RetriesExhausted {
            attempts: 15,
            last_error: "HTTP 429".to_string(),
        };

        let started = Instant::now();
        reporter.report(&ErrorContext::new("worker").with_task("Reprice"), &err);
        assert!(started.elapsed() < Duration::from_millis(100));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !sink.matched_async().await && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        sink.assert_async().await;
    }
}
