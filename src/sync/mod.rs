//! Synchronization primitives with tracing built in.

pub mod mutex;

pub use mutex::{TracedMutex, TracedMutexGuard};
