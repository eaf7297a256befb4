//! The book service: a small CRUD resource over a simulated MySQL.

pub mod database;
pub mod http;
pub mod model;

pub use database::Database;
pub use http::{create_router, BookState, RequestContext};
pub use model::{Book, NewBook};
