//! Test utilities for booktrace tests.
//!
//! Provides:
//! - In-memory tracer providers wired to the RPC metrics observer
//! - Error-level log capture through the test writer
//! - Book router construction with fast simulated queries
//! - Span lookup helpers

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use booktrace::book::{self, BookState, Database};
use booktrace::config::DatabaseConfig;
use booktrace::observability::rpcmetrics::{RpcMetrics, RpcMetricsObserver};
use booktrace::observability::tracing::init_test_tracing;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};

/// Synchronous tracing pipeline that keeps every finished span.
///
/// Spans reach both the exporter and the metrics as soon as they end.
pub struct TestTelemetry {
    pub provider: TracerProvider,
    pub exporter: InMemorySpanExporter,
    pub metrics: Arc<RpcMetrics>,
}

impl TestTelemetry {
    pub fn new() -> Self {
        init_test_tracing();
        let exporter = InMemorySpanExporter::default();
        let metrics = Arc::new(RpcMetrics::new().expect("metrics registry"));
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .with_span_processor(RpcMetricsObserver::new(metrics.clone()))
            .build();
        Self {
            provider,
            exporter,
            metrics,
        }
    }

    pub fn tracer(&self, name: &'static str) -> Tracer {
        self.provider.tracer(name)
    }

    /// All spans finished so far.
    pub fn spans(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().expect("finished spans")
    }

    pub fn spans_named(&self, name: &str) -> Vec<SpanData> {
        self.spans().into_iter().filter(|s| s.name == name).collect()
    }
}

impl Default for TestTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// Database settings with a short, fixed query delay.
pub fn fast_db_config() -> DatabaseConfig {
    DatabaseConfig {
        query_delay: Duration::from_millis(2),
        query_delay_stddev: Duration::ZERO,
        mutex_disabled: false,
    }
}

/// Book router whose spans all land in `telemetry`.
pub fn book_app(telemetry: &TestTelemetry, config: DatabaseConfig) -> Router {
    let db = Arc::new(Database::new(telemetry.tracer("mysql"), config));
    book::create_router(BookState::new(db, telemetry.tracer("book")))
}

/// String form of attribute `key` on `span`.
pub fn attr(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.to_string())
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    false
}
