//! Log subscriber setup.
//!
//! Configures structured logging with:
//! - Text or JSON console output
//! - Environment-based filter (via RUST_LOG or --log-level)
//! - An optional OpenTelemetry layer that turns `tracing` spans into
//!   exported spans

use opentelemetry_sdk::trace::Tracer;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Filter used when the configured one does not parse.
pub const DEFAULT_FILTER: &str = "info,booktrace=debug";

/// Initialize logging.
///
/// When `tracer` is given, `tracing` spans are also exported through it.
///
/// # Panics
///
/// Panics if tracing has already been initialized.
pub fn init_tracing(filter: &str, format: LogFormat, tracer: Option<Tracer>) {
    log_subscriber(filter, format, tracer).init();
    tracing::info!(format = ?format, "Tracing initialized");
}

/// Build the log subscriber without installing it.
///
/// Used directly for logs emitted before the global subscriber exists,
/// e.g. while the tracer providers it exports through are being built.
pub fn log_subscriber(
    filter: &str,
    format: LogFormat,
    tracer: Option<Tracer>,
) -> impl Subscriber + Send + Sync + 'static {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {filter:?} ({err}), using {DEFAULT_FILTER:?}");
        EnvFilter::new(DEFAULT_FILTER)
    });

    let otel_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let (text_layer, json_layer) = match format {
        LogFormat::Text => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_thread_ids(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(text_layer)
        .with(json_layer)
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
