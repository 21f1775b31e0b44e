//! OpenTelemetry span export
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name (default: courier)
//!
//! # Example
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//! OTEL_SERVICE_NAME=courier-staging \
//!     ./courier manager
//! ```

const DEFAULT_SERVICE_NAME: &str = "courier";

/// Flushes and shuts the tracer provider down when dropped
pub struct TelemetryGuard {
    #[cfg(feature = "telemetry")]
    provider: opentelemetry_sdk::trace::TracerProvider,
}

#[cfg(feature = "telemetry")]
impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("OpenTelemetry shutdown failed: {:?}", e);
        }
    }
}

fn endpoint() -> Option<String> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|e| !e.trim().is_empty())
}

fn service_name(role: &str) -> String {
    let base = std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());
    format!("{}-{}", base, role)
}

/// Build an OTLP tracer when an endpoint is configured
///
/// Must run inside a tokio runtime; the batch exporter spawns onto it.
#[cfg(feature = "telemetry")]
pub fn init_tracer(
    role: &str,
) -> anyhow::Result<Option<(opentelemetry_sdk::trace::Tracer, TelemetryGuard)>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{BatchSpanProcessor, TracerProvider};
    use opentelemetry_sdk::{runtime, Resource};

    let Some(endpoint) = endpoint() else {
        return Ok(None);
    };
    let service_name = service_name(role);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()?;

    let processor = BatchSpanProcessor::builder(exporter, runtime::Tokio).build();
    let provider = TracerProvider::builder()
        .with_span_processor(processor)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();

    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(Some((tracer, TelemetryGuard { provider })))
}

/// Without the `telemetry` feature an endpoint only produces a warning
#[cfg(not(feature = "telemetry"))]
pub fn warn_if_configured(role: &str) {
    if let Some(endpoint) = endpoint() {
        tracing::warn!(
            endpoint = %endpoint,
            service = %service_name(role),
            "OpenTelemetry endpoint set but feature 'telemetry' not enabled"
        );
        tracing::warn!("Rebuild with: cargo build --features telemetry");
    }
}
