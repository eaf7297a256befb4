//! Span exporter selection.
//!
//! Supports:
//! - `otlp`: gRPC export to a collector, TLS unless explicitly disabled
//! - `stdout`: human-readable dump of every finished span

use std::fmt;
use std::str::FromStr;

use futures::future::BoxFuture;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::Resource;
use tonic::transport::ClientTlsConfig;

use crate::error::{BootstrapError, ConfigError};

/// Collector endpoint variable.
pub const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Plaintext toggle variable (`true` / `false`).
pub const INSECURE_ENV: &str = "OTEL_EXPORTER_OTLP_INSECURE";

/// Collector address used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "localhost:4317";

/// Exporter token that used to exist and is now rejected.
const LEGACY_JAEGER: &str = "jaeger";

/// Supported span exporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterKind {
    Otlp,
    Stdout,
}

impl ExporterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Otlp => "otlp",
            Self::Stdout => "stdout",
        }
    }
}

impl FromStr for ExporterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "otlp" => Ok(Self::Otlp),
            "stdout" => Ok(Self::Stdout),
            LEGACY_JAEGER => Err(ConfigError::UnsupportedExporter(s.to_string())),
            _ => Err(ConfigError::UnknownExporter(s.to_string())),
        }
    }
}

impl fmt::Display for ExporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how the OTLP exporter connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportSettings {
    /// Collector endpoint, with or without a scheme.
    pub endpoint: Option<String>,
    /// Explicit plaintext toggle; `None` when unset or unparseable.
    pub insecure: Option<bool>,
}

impl TransportSettings {
    /// Read the settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the settings through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(ENDPOINT_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let insecure = lookup(INSECURE_ENV).and_then(|value| {
            match value.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            }
        });
        Self { endpoint, insecure }
    }

    /// Plaintext transport to the given endpoint.
    pub fn insecure(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            insecure: Some(true),
        }
    }

    /// Whether the exporter must use TLS.
    ///
    /// The explicit toggle wins, then the endpoint scheme. Anything else
    /// is secure.
    pub fn is_secure(&self) -> bool {
        if let Some(insecure) = self.insecure {
            return !insecure;
        }
        match self.endpoint.as_deref() {
            Some(endpoint) if has_scheme(endpoint, "http://") => false,
            _ => true,
        }
    }

    /// Endpoint URL with its scheme matching [`is_secure`](Self::is_secure).
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let authority = ["http://", "https://"]
            .iter()
            .find(|scheme| has_scheme(endpoint, scheme))
            .map_or(endpoint, |scheme| &endpoint[scheme.len()..]);
        let scheme = if self.is_secure() { "https" } else { "http" };
        format!("{scheme}://{authority}")
    }
}

fn has_scheme(endpoint: &str, scheme: &str) -> bool {
    endpoint
        .get(..scheme.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
}

/// The configured span exporter.
#[derive(Debug)]
pub enum SpanSink {
    Otlp(opentelemetry_otlp::SpanExporter),
    Stdout(opentelemetry_stdout::SpanExporter),
}

impl SpanSink {
    pub fn kind(&self) -> ExporterKind {
        match self {
            Self::Otlp(_) => ExporterKind::Otlp,
            Self::Stdout(_) => ExporterKind::Stdout,
        }
    }
}

impl SpanExporter for SpanSink {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        match self {
            Self::Otlp(exporter) => exporter.export(batch),
            Self::Stdout(exporter) => exporter.export(batch),
        }
    }

    fn shutdown(&mut self) {
        match self {
            Self::Otlp(exporter) => exporter.shutdown(),
            Self::Stdout(exporter) => exporter.shutdown(),
        }
    }

    fn set_resource(&mut self, resource: &Resource) {
        match self {
            Self::Otlp(exporter) => exporter.set_resource(resource),
            Self::Stdout(exporter) => exporter.set_resource(resource),
        }
    }
}

/// Build the exporter for `kind`.
///
/// The OTLP channel connects lazily, so this must run inside a tokio
/// runtime but does not need a reachable collector.
pub fn create_exporter(
    kind: ExporterKind,
    transport: &TransportSettings,
) -> Result<SpanSink, BootstrapError> {
    match kind {
        ExporterKind::Otlp => {
            let endpoint = transport.endpoint_url();
            let mut builder = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint.clone())
                .with_protocol(Protocol::Grpc);
            if transport.is_secure() {
                builder = builder.with_tls_config(ClientTlsConfig::new().with_native_roots());
            }
            let exporter = builder.build_span_exporter()?;
            tracing::info!(
                endpoint = %endpoint,
                secure = transport.is_secure(),
                "OTLP span exporter configured"
            );
            Ok(SpanSink::Otlp(exporter))
        }
        ExporterKind::Stdout => {
            tracing::info!("stdout span exporter configured");
            Ok(SpanSink::Stdout(opentelemetry_stdout::SpanExporter::default()))
        }
    }
}

/// Parse `token` and build the matching exporter.
pub fn select_exporter(
    token: &str,
    transport: &TransportSettings,
) -> Result<SpanSink, BootstrapError> {
    let kind: ExporterKind = token.parse()?;
    create_exporter(kind, transport)
}
