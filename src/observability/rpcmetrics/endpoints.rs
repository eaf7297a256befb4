//! Per-endpoint RED metrics.
//!
//! Key metrics (prefixed with `booktrace_`):
//! - rpc_calls_total: Counter of completed calls per endpoint and kind
//! - rpc_errors_total: Counter of failed calls per endpoint and kind
//! - rpc_latency_seconds: Histogram of call latency, split by error
//! - rpc_http_requests_total: Counter per HTTP status class
//!
//! Handles for a given (endpoint, kind) are created once and cached; after
//! that every update is a lock-free atomic increment.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

use super::normalizer::{NameNormalizer, SimpleNameNormalizer};
use super::observer::{CallKind, CompletionHandler, SpanCompletion};
use crate::error::MetricsError;

/// Namespace of every metric in the registry.
pub const NAMESPACE: &str = "booktrace";

/// Maximum number of distinct endpoint names tracked.
pub const DEFAULT_MAX_ENDPOINTS: usize = 200;

/// Endpoint label used once the endpoint limit is reached.
pub const OTHER_ENDPOINT: &str = "other";

/// Aggregate key: normalized name plus call direction.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct EndpointKey {
    pub endpoint: String,
    pub kind: CallKind,
}

/// Point-in-time view of one endpoint's aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EndpointSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub latency_count: u64,
    /// Sum of observed latencies in seconds.
    pub latency_sum: f64,
}

/// Cached metric handles for one endpoint.
struct EndpointMetrics {
    calls: IntCounter,
    errors: IntCounter,
    latency_success: Histogram,
    latency_failure: Histogram,
    http_2xx: IntCounter,
    http_3xx: IntCounter,
    http_4xx: IntCounter,
    http_5xx: IntCounter,
}

impl EndpointMetrics {
    fn record(&self, completion: &SpanCompletion) {
        let latency = completion.duration.as_secs_f64();
        self.calls.inc();
        if completion.failed {
            self.errors.inc();
            self.latency_failure.observe(latency);
        } else {
            self.latency_success.observe(latency);
        }
        match completion.http_status {
            Some(200..=299) => self.http_2xx.inc(),
            Some(300..=399) => self.http_3xx.inc(),
            Some(400..=499) => self.http_4xx.inc(),
            Some(500..=599) => self.http_5xx.inc(),
            _ => {}
        }
    }

    fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            calls: self.calls.get(),
            errors: self.errors.get(),
            latency_count: self.latency_success.get_sample_count()
                + self.latency_failure.get_sample_count(),
            latency_sum: self.latency_success.get_sample_sum()
                + self.latency_failure.get_sample_sum(),
        }
    }
}

/// Process-wide table of RPC metrics keyed by normalized name and kind.
pub struct RpcMetrics {
    registry: Registry,
    calls: IntCounterVec,
    errors: IntCounterVec,
    latency: HistogramVec,
    http_requests: IntCounterVec,
    endpoints: RwLock<HashMap<EndpointKey, Arc<EndpointMetrics>>>,
    max_endpoints: usize,
    normalizer: Box<dyn NameNormalizer>,
}

impl RpcMetrics {
    /// Create the metrics with a fresh registry and default limits.
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_options(
            DEFAULT_MAX_ENDPOINTS,
            Box::new(SimpleNameNormalizer::default()),
        )
    }

    /// Create the metrics with a custom endpoint limit and normalizer.
    pub fn with_options(
        max_endpoints: usize,
        normalizer: Box<dyn NameNormalizer>,
    ) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let calls = IntCounterVec::new(
            Opts::new("rpc_calls_total", "Completed calls per endpoint").namespace(NAMESPACE),
            &["endpoint", "kind"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("rpc_errors_total", "Failed calls per endpoint").namespace(NAMESPACE),
            &["endpoint", "kind"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("rpc_latency_seconds", "Call latency per endpoint")
                .namespace(NAMESPACE),
            &["endpoint", "kind", "error"],
        )?;
        let http_requests = IntCounterVec::new(
            Opts::new("rpc_http_requests_total", "Calls per endpoint and HTTP status class")
                .namespace(NAMESPACE),
            &["endpoint", "kind", "status_code"],
        )?;

        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;

        Ok(Self {
            registry,
            calls,
            errors,
            latency,
            http_requests,
            endpoints: RwLock::new(HashMap::new()),
            max_endpoints,
            normalizer,
        })
    }

    /// Registry holding every RPC metric, for scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Normalize a raw operation name the way recorded keys are.
    pub fn normalize(&self, name: &str) -> String {
        self.normalizer.normalize(name)
    }

    /// Record one completed call.
    pub fn record(&self, completion: &SpanCompletion) -> Result<(), MetricsError> {
        let metrics = self.endpoint(&completion.name, completion.kind)?;
        metrics.record(completion);
        Ok(())
    }

    /// Record a call from its parts.
    pub fn observe(
        &self,
        name: &str,
        kind: CallKind,
        duration: Duration,
        failed: bool,
    ) -> Result<(), MetricsError> {
        self.record(&SpanCompletion {
            name: name.to_string(),
            kind,
            duration,
            failed,
            http_status: None,
        })
    }

    /// Aggregates for `name` (raw or normalized) and `kind`.
    pub fn snapshot(&self, name: &str, kind: CallKind) -> Option<EndpointSnapshot> {
        let key = EndpointKey {
            endpoint: self.normalize(name),
            kind,
        };
        self.read_endpoints().get(&key).map(|m| m.snapshot())
    }

    /// Every tracked key, sorted for stable output.
    pub fn keys(&self) -> Vec<EndpointKey> {
        let mut keys: Vec<EndpointKey> = self.read_endpoints().keys().cloned().collect();
        keys.sort_by(|a, b| (&a.endpoint, a.kind).cmp(&(&b.endpoint, b.kind)));
        keys
    }

    fn endpoint(&self, name: &str, kind: CallKind) -> Result<Arc<EndpointMetrics>, MetricsError> {
        let mut key = EndpointKey {
            endpoint: self.normalize(name),
            kind,
        };
        if let Some(metrics) = self.read_endpoints().get(&key) {
            return Ok(Arc::clone(metrics));
        }

        let mut endpoints = self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // another thread may have inserted while we waited for the write lock
        if let Some(metrics) = endpoints.get(&key) {
            return Ok(Arc::clone(metrics));
        }
        let known_name = endpoints.keys().any(|k| k.endpoint == key.endpoint);
        if !known_name && self.distinct_names(&endpoints) >= self.max_endpoints {
            key.endpoint = OTHER_ENDPOINT.to_string();
            if let Some(metrics) = endpoints.get(&key) {
                return Ok(Arc::clone(metrics));
            }
        }

        let metrics = Arc::new(self.create_endpoint(&key)?);
        tracing::debug!(endpoint = %key.endpoint, kind = %key.kind, "tracking new rpc endpoint");
        endpoints.insert(key, Arc::clone(&metrics));
        Ok(metrics)
    }

    fn distinct_names(&self, endpoints: &HashMap<EndpointKey, Arc<EndpointMetrics>>) -> usize {
        let mut names: Vec<&str> = endpoints
            .keys()
            .map(|k| k.endpoint.as_str())
            .filter(|name| *name != OTHER_ENDPOINT)
            .collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    fn create_endpoint(&self, key: &EndpointKey) -> Result<EndpointMetrics, MetricsError> {
        let endpoint = key.endpoint.as_str();
        let kind = key.kind.as_str();
        let status = |class: &str| {
            self.http_requests
                .get_metric_with_label_values(&[endpoint, kind, class])
        };
        Ok(EndpointMetrics {
            calls: self.calls.get_metric_with_label_values(&[endpoint, kind])?,
            errors: self.errors.get_metric_with_label_values(&[endpoint, kind])?,
            latency_success: self
                .latency
                .get_metric_with_label_values(&[endpoint, kind, "false"])?,
            latency_failure: self
                .latency
                .get_metric_with_label_values(&[endpoint, kind, "true"])?,
            http_2xx: status("2xx")?,
            http_3xx: status("3xx")?,
            http_4xx: status("4xx")?,
            http_5xx: status("5xx")?,
        })
    }

    fn read_endpoints(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<EndpointKey, Arc<EndpointMetrics>>> {
        self.endpoints.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CompletionHandler for RpcMetrics {
    fn handle(&self, completion: SpanCompletion) -> Result<(), MetricsError> {
        self.record(&completion)
    }
}

impl fmt::Debug for RpcMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMetrics")
            .field("endpoints", &self.read_endpoints().len())
            .field("max_endpoints", &self.max_endpoints)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_counts_calls_and_errors() {
        let metrics = RpcMetrics::new().unwrap();
        metrics
            .observe("/book/1", CallKind::Server, Duration::from_millis(10), false)
            .unwrap();
        metrics
            .observe("/book/2", CallKind::Server, Duration::from_millis(30), true)
            .unwrap();

        let snapshot = metrics.snapshot("/book/{id}", CallKind::Server).unwrap();
        assert_eq!(snapshot.calls, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.latency_count, 2);
        assert!((snapshot.latency_sum - 0.040).abs() < 1e-9);
    }

    #[test]
    fn test_kinds_are_separate_keys() {
        let metrics = RpcMetrics::new().unwrap();
        metrics
            .observe("SQL SELECT", CallKind::Client, Duration::ZERO, false)
            .unwrap();
        assert!(metrics.snapshot("SQL SELECT", CallKind::Server).is_none());
        assert_eq!(
            metrics.snapshot("SQL SELECT", CallKind::Client).unwrap().calls,
            1
        );
    }

    #[test]
    fn test_endpoint_limit_folds_into_other() {
        let metrics = RpcMetrics::with_options(2, Box::new(SimpleNameNormalizer::default())).unwrap();
        for name in ["a", "b", "c", "d"] {
            metrics
                .observe(name, CallKind::Server, Duration::ZERO, false)
                .unwrap();
        }
        assert!(metrics.snapshot("c", CallKind::Server).is_none());
        assert_eq!(
            metrics.snapshot(OTHER_ENDPOINT, CallKind::Server).unwrap().calls,
            2
        );
        assert_eq!(metrics.keys().len(), 3);
    }

    #[test]
    fn test_known_name_keeps_new_kind_at_limit() {
        let metrics = RpcMetrics::with_options(1, Box::new(SimpleNameNormalizer::default())).unwrap();
        metrics
            .observe("SQL SELECT", CallKind::Server, Duration::ZERO, false)
            .unwrap();
        metrics
            .observe("SQL SELECT", CallKind::Client, Duration::ZERO, false)
            .unwrap();
        metrics
            .observe("SQL INSERT", CallKind::Client, Duration::ZERO, false)
            .unwrap();

        assert_eq!(metrics.snapshot("SQL SELECT", CallKind::Client).unwrap().calls, 1);
        assert_eq!(metrics.snapshot("SQL SELECT", CallKind::Server).unwrap().calls, 1);
        assert!(metrics.snapshot("SQL INSERT", CallKind::Client).is_none());
        assert_eq!(
            metrics.snapshot(OTHER_ENDPOINT, CallKind::Client).unwrap().calls,
            1
        );
    }

    #[test]
    fn test_http_status_classes() {
        let metrics = RpcMetrics::new().unwrap();
        for status in [200, 204, 404, 503] {
            metrics
                .record(&SpanCompletion {
                    name: "HTTP GET /books".into(),
                    kind: CallKind::Server,
                    duration: Duration::from_millis(1),
                    failed: status >= 500,
                    http_status: Some(status),
                })
                .unwrap();
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains(
            r#"booktrace_rpc_http_requests_total{endpoint="HTTP-GET-/books",kind="server",status_code="2xx"} 2"#
        ));
        assert!(text.contains(
            r#"booktrace_rpc_http_requests_total{endpoint="HTTP-GET-/books",kind="server",status_code="5xx"} 1"#
        ));
    }
}
