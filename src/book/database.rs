//! Simulated "mysql" book repository.
//!
//! Every query opens a client span, takes the connection lock and sleeps
//! for a simulated round trip before touching the in-memory tables. With
//! the lock enabled all queries are serialized, which is the bottleneck the
//! lock wait spans make visible.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;

use super::model::{Book, NewBook};
use crate::config::DatabaseConfig;
use crate::delay::{self, LatencyProfile};
use crate::error::BookError;
use crate::session::Session;
use crate::sync::TracedMutex;

/// Name of the simulated downstream, used for the lock and `peer.service`.
pub const PEER_SERVICE: &str = "mysql";

const PEER_SERVICE_KEY: &str = "peer.service";
const STATEMENT_KEY: &str = "db.statement";

#[derive(Debug, Clone, Copy)]
enum Verb {
    Select,
    Insert,
    Update,
    Delete,
}

impl Verb {
    fn span_name(self) -> &'static str {
        match self {
            Self::Select => "SQL SELECT",
            Self::Insert => "SQL INSERT",
            Self::Update => "SQL UPDATE",
            Self::Delete => "SQL DELETE",
        }
    }
}

#[derive(Debug)]
struct Tables {
    books: BTreeMap<u32, Book>,
    next_id: u32,
}

impl Tables {
    fn seeded() -> Self {
        let mut books = BTreeMap::new();
        books.insert(
            1,
            Book {
                id: 1,
                title: "Book Title 1".into(),
                author: "Author 1".into(),
            },
        );
        Self { books, next_id: 2 }
    }
}

/// Book storage behind a single traced connection.
#[derive(Debug)]
pub struct Database {
    tracer: Tracer,
    lock: TracedMutex,
    latency: LatencyProfile,
    tables: Mutex<Tables>,
}

impl Database {
    /// Create a repository seeded with one book.
    pub fn new(tracer: Tracer, config: DatabaseConfig) -> Self {
        let lock = TracedMutex::new(PEER_SERVICE, tracer.clone())
            .with_enabled(!config.mutex_disabled);
        Self {
            tracer,
            lock,
            latency: LatencyProfile::new(config.query_delay, config.query_delay_stddev),
            tables: Mutex::new(Tables::seeded()),
        }
    }

    pub async fn get(&self, cx: &Context, session: &Session, id: u32) -> Result<Book, BookError> {
        tracing::info!(book_id = id, session = %session, "Loading book");
        let statement = format!("SELECT * FROM book WHERE book_id={id}");
        self.query(cx, session, Verb::Select, statement, |tables| {
            tables.books.get(&id).cloned().ok_or(BookError::NotFound(id))
        })
        .await
    }

    pub async fn list(&self, cx: &Context, session: &Session) -> Result<Vec<Book>, BookError> {
        tracing::info!(session = %session, "Listing books");
        self.query(cx, session, Verb::Select, "SELECT * FROM book".into(), |tables| {
            Ok(tables.books.values().cloned().collect())
        })
        .await
    }

    pub async fn create(
        &self,
        cx: &Context,
        session: &Session,
        book: NewBook,
    ) -> Result<Book, BookError> {
        book.validate()?;
        tracing::info!(title = %book.title, session = %session, "Creating book");
        let statement = "INSERT INTO book (title, author) VALUES (?, ?)".to_string();
        self.query(cx, session, Verb::Insert, statement, |tables| {
            let id = tables.next_id;
            tables.next_id += 1;
            let book = book.into_book(id);
            tables.books.insert(id, book.clone());
            Ok(book)
        })
        .await
    }

    pub async fn update(
        &self,
        cx: &Context,
        session: &Session,
        id: u32,
        book: NewBook,
    ) -> Result<Book, BookError> {
        book.validate()?;
        tracing::info!(book_id = id, session = %session, "Updating book");
        let statement = format!("UPDATE book SET title=?, author=? WHERE book_id={id}");
        self.query(cx, session, Verb::Update, statement, |tables| {
            let slot = tables.books.get_mut(&id).ok_or(BookError::NotFound(id))?;
            *slot = book.into_book(id);
            Ok(slot.clone())
        })
        .await
    }

    pub async fn delete(&self, cx: &Context, session: &Session, id: u32) -> Result<(), BookError> {
        tracing::info!(book_id = id, session = %session, "Deleting book");
        let statement = format!("DELETE FROM book WHERE book_id={id}");
        self.query(cx, session, Verb::Delete, statement, |tables| {
            tables
                .books
                .remove(&id)
                .map(|_| ())
                .ok_or(BookError::NotFound(id))
        })
        .await
    }

    async fn query<T, F>(
        &self,
        cx: &Context,
        session: &Session,
        verb: Verb,
        statement: String,
        apply: F,
    ) -> Result<T, BookError>
    where
        F: FnOnce(&mut Tables) -> Result<T, BookError>,
    {
        let span = self
            .tracer
            .span_builder(verb.span_name())
            .with_kind(SpanKind::Client)
            .with_attributes([
                KeyValue::new(PEER_SERVICE_KEY, PEER_SERVICE),
                KeyValue::new(STATEMENT_KEY, statement),
            ])
            .start_with_context(&self.tracer, cx);
        let cx = cx.with_span(span);

        let result = {
            let _connection = self.lock.lock(&cx, session).await;
            delay::sleep(self.latency.mean, self.latency.stddev).await;
            apply(&mut self.tables())
        };

        let span = cx.span();
        if let Err(err) = &result {
            span.set_status(Status::error(err.to_string()));
        }
        span.end();
        result
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
