// HTTP task handler - forwards a task payload to a remote endpoint under backoff

use async_trait::async_trait;
use courier_core::application::RetryPolicy;
use courier_core::domain::Payload;
use courier_core::port::{HandlerError, HandlerOutcome, TaskHandler};
use reqwest::{Client, StatusCode};
use tracing::debug;

/// Longest response body excerpt kept in an error
const BODY_EXCERPT_CHARS: usize = 200;

/// Task handler that POSTs the payload as JSON
pub struct HttpTaskHandler {
    client: Client,
    endpoint: String,
    policy: RetryPolicy,
}

impl HttpTaskHandler {
    /// Create a handler
    ///
    /// # Arguments
    /// * `client` - HTTP client (carries the request timeout)
    /// * `endpoint` - URL receiving the payload
    /// * `policy` - Backoff applied to rate limits and transient failures
    pub fn new(client: Client, endpoint: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            policy,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_once(&self, payload: &Payload) -> Result<HandlerOutcome, HandlerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(endpoint = %self.endpoint, status = status.as_u16(), "Task accepted");
            return Ok(HandlerOutcome::with_detail(format!("HTTP {}", status.as_u16())));
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, excerpt(&body)))
    }
}

#[async_trait]
impl TaskHandler for HttpTaskHandler {
    async fn process(&self, payload: &Payload) -> Result<HandlerOutcome, HandlerError> {
        self.policy
            .retry(|| self.post_once(payload))
            .await
            .map_err(HandlerError::from)
    }
}

/// Map a non-success status onto a handler error
///
/// 429 is a rate limit; 500, 502, 503 and 504 are transient; anything else fails outright.
pub fn status_error(status: StatusCode, detail: String) -> HandlerError {
    let message = if detail.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), detail)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => HandlerError::RateLimited(message),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => HandlerError::TransientConnection(message),
        _ => HandlerError::Failed(message),
    }
}

fn request_error(err: reqwest::Error) -> HandlerError {
    if err.is_connect() || err.is_timeout() {
        HandlerError::TransientConnection(err.to_string())
    } else {
        HandlerError::Failed(err.to_string())
    }
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(BODY_EXCERPT_CHARS).collect()
}
