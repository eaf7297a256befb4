//! OpenTelemetry observability infrastructure.
//!
//! Provides:
//! - Tracer providers with OTLP or stdout export
//! - W3C trace-context and baggage propagation over HTTP headers
//! - RED metrics derived from finished spans, served for Prometheus
//! - Structured logging

pub mod exporter;
pub mod prometheus;
pub mod propagation;
pub mod provider;
pub mod rpcmetrics;
pub mod tracing;
