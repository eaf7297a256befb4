//! Error types for booktrace.
//!
//! Startup errors (`ConfigError`, `BootstrapError`) are fatal and abort the
//! process. `LockError` signals a broken caller contract. `BookError` is the
//! ordinary, non-fatal outcome of a datastore call.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Invalid configuration, surfaced before any service starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A legacy exporter that is recognized but no longer available.
    #[error("exporter type \"{0}\" is no longer supported, please use otlp")]
    UnsupportedExporter(String),

    /// An exporter token outside the known set.
    #[error("unrecognized exporter type \"{0}\" (expected otlp or stdout)")]
    UnknownExporter(String),

    /// A duration flag that could not be parsed.
    #[error("invalid duration \"{0}\": expected a number followed by ns, us, ms, s, m or h")]
    InvalidDuration(String),
}

/// Misuse of a [`TracedMutex`](crate::sync::TracedMutex).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Release was called while no caller holds the lock.
    #[error("illegal state: release of traced mutex `{lock}` which is not held")]
    NotHeld { lock: String },

    /// Release was attempted by someone other than the current holder.
    #[error("illegal state: `{caller}` released traced mutex `{lock}` held by `{holder}`")]
    NotHolder {
        lock: String,
        holder: String,
        caller: String,
    },
}

/// Errors returned by the simulated book datastore.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BookError {
    /// No book with the given ID exists.
    #[error("book not found: {0}")]
    NotFound(u32),

    /// The request carried invalid book data.
    #[error("invalid book: {0}")]
    InvalidArgument(String),
}

/// Failure to register or look up a metric.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

/// Failure to bring up a tracer provider.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The resource descriptor could not be built.
    #[error("resource creation failed: {0}")]
    Resource(String),

    /// The span exporter could not be constructed.
    #[error("cannot create exporter: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Book(#[from] BookError),

    /// Malformed request (missing or non-numeric parameters, bad body).
    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Book(BookError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Book(BookError::InvalidArgument(_)) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(status = %status, error = %self, "request failed");
        (status, self.to_string()).into_response()
    }
}

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;
