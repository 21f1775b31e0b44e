// Courier Infrastructure - HTTP Adapters
// Implements: TaskHandler (forwarding to a remote endpoint), ErrorReporter

mod reporter;
mod task_handler;

pub use reporter::{ErrorReport, HttpErrorReporter};
pub use task_handler::{status_error, HttpTaskHandler};

pub use reqwest::Client as HttpClient;

/// Client with a request timeout and the courier user agent
pub fn build_client(timeout: std::time::Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
        .build()
}
