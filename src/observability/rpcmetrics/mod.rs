//! RED metrics derived from finished spans.

pub mod endpoints;
pub mod normalizer;
pub mod observer;

pub use endpoints::{EndpointKey, EndpointSnapshot, RpcMetrics};
pub use normalizer::{normalize, NameNormalizer, SimpleNameNormalizer};
pub use observer::{CallKind, CompletionHandler, RpcMetricsObserver, SpanCompletion};
