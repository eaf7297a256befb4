//! Span processor that feeds finished spans into RPC metrics.
//!
//! The processor does no aggregation itself. Each finished client or server
//! span becomes a [`SpanCompletion`] message handed to a
//! [`CompletionHandler`], which owns the shared state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::{SpanKind, Status, TraceResult};
use opentelemetry::{Context, Value};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::trace::{Span, SpanProcessor};

use crate::error::MetricsError;

/// Attribute keys that may carry an HTTP response status.
const HTTP_STATUS_KEYS: [&str; 2] = ["http.status_code", "http.response.status_code"];

/// Direction of an RPC relative to this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    /// A call this service issued.
    Client,
    /// A call this service served.
    Server,
}

impl CallKind {
    /// Map a span kind, ignoring anything that is not an RPC.
    pub fn from_span_kind(kind: &SpanKind) -> Option<Self> {
        match kind {
            SpanKind::Client => Some(Self::Client),
            SpanKind::Server => Some(Self::Server),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finished RPC span, reduced to what the metrics need.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanCompletion {
    /// Raw span name; normalized by the handler.
    pub name: String,
    pub kind: CallKind,
    pub duration: Duration,
    pub failed: bool,
    pub http_status: Option<u16>,
}

impl SpanCompletion {
    /// Reduce a finished span. Returns `None` for spans that are not RPCs
    /// or that have no name.
    pub fn from_span_data(span: &SpanData) -> Option<Self> {
        let kind = CallKind::from_span_kind(&span.span_kind)?;
        if span.name.is_empty() {
            return None;
        }
        let duration = span
            .end_time
            .duration_since(span.start_time)
            .unwrap_or_default();
        let http_status = span
            .attributes
            .iter()
            .find(|kv| HTTP_STATUS_KEYS.contains(&kv.key.as_str()))
            .and_then(|kv| status_code(&kv.value));

        Some(Self {
            name: span.name.to_string(),
            kind,
            duration,
            failed: matches!(span.status, Status::Error { .. }),
            http_status,
        })
    }
}

fn status_code(value: &Value) -> Option<u16> {
    match value {
        Value::I64(code) => u16::try_from(*code).ok(),
        Value::String(code) => code.as_str().parse().ok(),
        _ => None,
    }
}

/// Receiver of span completions.
///
/// Called on the tracing pipeline's thread; implementations must not block
/// and must not start spans.
pub trait CompletionHandler: Send + Sync + fmt::Debug {
    fn handle(&self, completion: SpanCompletion) -> Result<(), MetricsError>;
}

/// Span processor that derives RPC metrics from finished spans.
#[derive(Debug, Clone)]
pub struct RpcMetricsObserver {
    handler: Arc<dyn CompletionHandler>,
}

impl RpcMetricsObserver {
    pub fn new(handler: Arc<dyn CompletionHandler>) -> Self {
        Self { handler }
    }
}

impl SpanProcessor for RpcMetricsObserver {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {}

    fn on_end(&self, span: SpanData) {
        let Some(completion) = SpanCompletion::from_span_data(&span) else {
            return;
        };
        if let Err(err) = self.handler.handle(completion) {
            tracing::warn!(span = %span.name, error = %err, "failed to record rpc metrics");
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> TraceResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span as _, Tracer as _, TracerProvider as _};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace::TracerProvider;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        seen: Mutex<Vec<SpanCompletion>>,
    }

    impl CompletionHandler for Recorder {
        fn handle(&self, completion: SpanCompletion) -> Result<(), MetricsError> {
            self.seen.lock().unwrap().push(completion);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl CompletionHandler for Failing {
        fn handle(&self, _completion: SpanCompletion) -> Result<(), MetricsError> {
            Err(MetricsError::Registry(prometheus::Error::Msg("boom".into())))
        }
    }

    fn provider_with(handler: Arc<dyn CompletionHandler>) -> TracerProvider {
        TracerProvider::builder()
            .with_span_processor(RpcMetricsObserver::new(handler))
            .build()
    }

    #[test]
    fn test_rpc_spans_become_completions() {
        let recorder = Arc::new(Recorder::default());
        let provider = provider_with(recorder.clone());
        let tracer = provider.tracer("test");

        let mut server = tracer
            .span_builder("HTTP GET /books/3")
            .with_kind(SpanKind::Server)
            .start(&tracer);
        server.set_attribute(KeyValue::new("http.status_code", 500_i64));
        server.set_status(Status::error("internal"));
        server.end();

        tracer
            .span_builder("SQL SELECT")
            .with_kind(SpanKind::Client)
            .start(&tracer)
            .end();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name, "HTTP GET /books/3");
        assert_eq!(seen[0].kind, CallKind::Server);
        assert!(seen[0].failed);
        assert_eq!(seen[0].http_status, Some(500));
        assert_eq!(seen[1].kind, CallKind::Client);
        assert!(!seen[1].failed);
        assert_eq!(seen[1].http_status, None);
    }

    #[test]
    fn test_internal_and_unnamed_spans_are_ignored() {
        let recorder = Arc::new(Recorder::default());
        let provider = provider_with(recorder.clone());
        let tracer = provider.tracer("test");

        tracer.start("lock wait").end();
        tracer
            .span_builder("")
            .with_kind(SpanKind::Server)
            .start(&tracer)
            .end();
        tracer
            .span_builder("publish")
            .with_kind(SpanKind::Producer)
            .start(&tracer)
            .end();

        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_errors_do_not_escape() {
        let provider = provider_with(Arc::new(Failing));
        let tracer = provider.tracer("test");
        tracer
            .span_builder("HTTP GET /books")
            .with_kind(SpanKind::Server)
            .start(&tracer)
            .end();
    }

    #[test]
    fn test_string_status_code() {
        assert_eq!(status_code(&Value::from("404")), Some(404));
        assert_eq!(status_code(&Value::I64(-1)), None);
        assert_eq!(status_code(&Value::Bool(true)), None);
    }
}
