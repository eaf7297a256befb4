//! Session identity carried in request baggage.
//!
//! The session is resolved once at the edge of a request and then passed
//! explicitly to every call that needs it.

use std::fmt;

use opentelemetry::baggage::BaggageExt;
use opentelemetry::{Context, KeyValue};
use uuid::Uuid;

/// Baggage key under which callers propagate their session.
pub const SESSION_BAGGAGE_KEY: &str = "request";

/// Opaque identity of a logical caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session(String);

impl Session {
    /// Sentinel used when a context carries no session.
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The "unknown" sentinel session.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    /// A fresh, time-sortable session ID.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Look up the session in the baggage of `cx`.
    ///
    /// Empty values are treated as absent.
    pub fn lookup(cx: &Context, key: &str) -> Option<Self> {
        cx.baggage()
            .get(key)
            .map(|value| value.as_str().into_owned())
            .filter(|value| !value.is_empty())
            .map(Self)
    }

    /// Session from the baggage of `cx`, or [`Session::unknown`].
    pub fn from_context(cx: &Context) -> Self {
        Self::lookup(cx, SESSION_BAGGAGE_KEY).unwrap_or_else(Self::unknown)
    }

    /// A copy of `cx` whose baggage carries this session.
    pub fn attach(&self, cx: &Context) -> Context {
        cx.with_baggage(vec![KeyValue::new(SESSION_BAGGAGE_KEY, self.0.clone())])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_baggage_is_unknown() {
        let session = Session::from_context(&Context::new());
        assert!(session.is_unknown());
        assert_eq!(session.as_str(), "unknown");
    }

    #[test]
    fn test_attach_then_lookup() {
        let cx = Session::new("alice").attach(&Context::new());
        assert_eq!(Session::from_context(&cx), Session::new("alice"));
    }

    #[test]
    fn test_empty_value_is_absent() {
        let cx = Context::new().with_baggage(vec![KeyValue::new(SESSION_BAGGAGE_KEY, "")]);
        assert_eq!(Session::lookup(&cx, SESSION_BAGGAGE_KEY), None);
    }

    #[test]
    fn test_generated_sessions_differ() {
        let a = Session::generate();
        let b = Session::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
