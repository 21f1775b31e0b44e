//! Subscriber setup shared by the manager and worker roles

use crate::settings::{LogFormat, LoggingSettings};
use crate::telemetry::{self, TelemetryGuard};
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "courier=info";

/// Keeps background writers alive; drop at process exit to flush
pub struct LogGuards {
    _file: Option<WorkerGuard>,
    _telemetry: Option<TelemetryGuard>,
}

/// Install the global subscriber
///
/// # Arguments
/// * `role` - `manager` or `worker-<queue>`; names the log file and service
pub fn init(settings: &LoggingSettings, role: &str) -> Result<LogGuards> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("Failed to create env filter")?;

    let stderr_layer = match settings.format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
    };

    let (file_layer, file_guard) = match settings.dir_path() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", role));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    #[cfg(feature = "telemetry")]
    let (otel_layer, telemetry_guard) = match telemetry::init_tracer(role)? {
        Some((tracer, guard)) => (
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Some(guard),
        ),
        None => (None, None),
    };
    #[cfg(not(feature = "telemetry"))]
    let (otel_layer, telemetry_guard) = (
        None::<tracing_subscriber::layer::Identity>,
        None::<TelemetryGuard>,
    );

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(otel_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    #[cfg(not(feature = "telemetry"))]
    telemetry::warn_if_configured(role);

    Ok(LogGuards {
        _file: file_guard,
        _telemetry: telemetry_guard,
    })
}
