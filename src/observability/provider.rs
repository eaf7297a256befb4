//! Tracer provider bootstrap.
//!
//! Every logical service gets its own [`TracerProvider`] so that its spans
//! carry their own `service.name`. The global propagator is shared and is
//! installed once per process no matter how many providers are built.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, Config, Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};

use super::exporter::{create_exporter, ExporterKind, TransportSettings};
use super::rpcmetrics::{CompletionHandler, RpcMetricsObserver};
use crate::error::BootstrapError;

/// How long finished spans may wait in the batch queue.
pub const BATCH_SCHEDULED_DELAY: Duration = Duration::from_millis(1000);

static PROPAGATOR: OnceLock<()> = OnceLock::new();

/// Install the W3C trace-context and baggage propagator.
///
/// Returns `true` only for the call that actually installed it.
pub fn install_propagator() -> bool {
    let mut installed = false;
    PROPAGATOR.get_or_init(|| {
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));
        installed = true;
    });
    installed
}

/// Resource describing one logical service.
pub fn service_resource(service_name: &str) -> Result<Resource, BootstrapError> {
    if service_name.trim().is_empty() {
        return Err(BootstrapError::Resource("service name is empty".to_string()));
    }
    Ok(Resource::default().merge(&Resource::new([
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("os.type", std::env::consts::OS),
    ])))
}

/// Tracing handles owned by one logical service.
#[derive(Debug, Clone)]
pub struct ServiceTracing {
    service: String,
    provider: TracerProvider,
}

impl ServiceTracing {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Tracer named after the service.
    pub fn tracer(&self) -> Tracer {
        self.provider.tracer(self.service.clone())
    }

    /// Flush pending spans and stop the exporter.
    ///
    /// Blocks until the batch worker finishes, so call it from a blocking
    /// context when running inside tokio.
    pub fn shutdown(&self) {
        for result in self.provider.force_flush() {
            if let Err(err) = result {
                tracing::warn!(service = %self.service, error = %err, "span flush failed");
            }
        }
        if let Err(err) = self.provider.shutdown() {
            tracing::warn!(service = %self.service, error = %err, "tracer provider shutdown failed");
        }
    }
}

/// Build a provider for `service_name` around an existing exporter.
///
/// Spans are batched into `exporter` and also handed to `handler` through
/// an [`RpcMetricsObserver`]. Must run inside a tokio runtime.
pub fn build_tracer_provider<E>(
    service_name: &str,
    exporter: E,
    handler: Arc<dyn CompletionHandler>,
) -> Result<ServiceTracing, BootstrapError>
where
    E: SpanExporter + 'static,
{
    let resource = service_resource(service_name)?;
    install_propagator();

    let batch = BatchSpanProcessor::builder(exporter, runtime::Tokio)
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_scheduled_delay(BATCH_SCHEDULED_DELAY)
                .build(),
        )
        .build();

    let provider = TracerProvider::builder()
        .with_span_processor(batch)
        .with_span_processor(RpcMetricsObserver::new(handler))
        .with_config(Config::default().with_resource(resource))
        .build();

    tracing::debug!(service = service_name, "tracer provider created");
    Ok(ServiceTracing {
        service: service_name.to_string(),
        provider,
    })
}

/// Build a provider for `service_name` with a freshly selected exporter.
pub fn init_tracer_provider(
    service_name: &str,
    kind: ExporterKind,
    transport: &TransportSettings,
    handler: Arc<dyn CompletionHandler>,
) -> Result<ServiceTracing, BootstrapError> {
    // validate the name before any exporter connection is set up
    service_resource(service_name)?;
    let exporter = create_exporter(kind, transport)?;
    let service = build_tracer_provider(service_name, exporter, handler)?;
    tracing::info!(service = service_name, exporter = %kind, "tracing initialized");
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::rpcmetrics::{CallKind, RpcMetrics};
    use opentelemetry::trace::{Span as _, SpanKind, Tracer as _};
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;

    #[test]
    fn test_propagator_installed_once() {
        install_propagator();
        assert!(!install_propagator());
    }

    #[test]
    fn test_empty_service_name_is_fatal() {
        let err = service_resource("  ").unwrap_err();
        assert!(matches!(err, BootstrapError::Resource(_)));
    }

    #[test]
    fn test_resource_names_service() {
        let resource = service_resource("book").unwrap();
        let name = resource
            .get(opentelemetry::Key::from_static_str("service.name"))
            .map(|v| v.to_string());
        assert_eq!(name.as_deref(), Some("book"));
        assert!(resource
            .get(opentelemetry::Key::from_static_str("os.type"))
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_exports_and_observes() {
        let metrics = Arc::new(RpcMetrics::new().unwrap());
        let exporter = InMemorySpanExporter::default();
        let service = build_tracer_provider("book", exporter.clone(), metrics.clone()).unwrap();

        let tracer = service.tracer();
        tracer
            .span_builder("HTTP GET /books")
            .with_kind(SpanKind::Server)
            .start(&tracer)
            .end();

        // the in-memory exporter forgets its spans on shutdown
        for result in service.provider().force_flush() {
            result.unwrap();
        }
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        service.shutdown();
        assert_eq!(
            metrics
                .snapshot("HTTP GET /books", CallKind::Server)
                .unwrap()
                .calls,
            1
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_each_service_gets_its_own_provider() {
        let metrics: Arc<dyn CompletionHandler> = Arc::new(RpcMetrics::new().unwrap());
        let book = build_tracer_provider("book", InMemorySpanExporter::default(), metrics.clone())
            .unwrap();
        let mysql =
            build_tracer_provider("mysql", InMemorySpanExporter::default(), metrics).unwrap();

        assert_eq!(book.service(), "book");
        assert_eq!(mysql.service(), "mysql");
        book.shutdown();
        mysql.shutdown();
    }
}
