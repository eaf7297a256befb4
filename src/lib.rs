//! booktrace: a book service instrumented to show where its time goes.
//!
//! Requests to the book service hit a simulated MySQL database guarded by a
//! single connection lock. Lock contention becomes visible as wait spans,
//! and every finished client or server span is folded into RED metrics.
//!
//! # Modules
//!
//! - [`book`]: Book model, simulated database and HTTP routes
//! - [`config`]: CLI and environment configuration
//! - [`delay`]: Randomized latency for simulated calls
//! - [`error`]: Error types
//! - [`observability`]: Tracer providers, exporters, propagation, RPC metrics
//! - [`server`]: HTTP server lifecycle
//! - [`session`]: Session identity carried in baggage
//! - [`sync`]: Traced mutex

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // book::BookState is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc,      // Panic docs can be verbose
    clippy::struct_excessive_bools,  // Config structs may have flags
    clippy::too_many_lines           // Some functions are inherently long
)]

pub mod book;
pub mod config;
pub mod delay;
pub mod error;
pub mod observability;
pub mod server;
pub mod session;
pub mod sync;
