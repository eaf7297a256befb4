//! HTTP routes of the book service.
//!
//! A middleware resolves the caller's trace context and session once per
//! request, opens the server span and hands both to the handlers as a
//! [`RequestContext`] extension.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::Tracer;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::database::Database;
use super::model::{Book, NewBook};
use crate::error::{AppError, AppResult};
use crate::observability::propagation::extract_context;
use crate::session::{Session, SESSION_BAGGAGE_KEY};
use crate::sync::mutex::attributes;

/// Shared state of the book routes.
#[derive(Clone)]
pub struct BookState {
    db: Arc<Database>,
    tracer: Tracer,
}

impl BookState {
    /// `tracer` records the server spans; `db` carries its own.
    pub fn new(db: Arc<Database>, tracer: Tracer) -> Self {
        Self { db, tracer }
    }
}

/// Trace context and session of the request being served.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Context holding the server span and the request baggage.
    pub cx: Context,
    pub session: Session,
}

/// Create the book router.
pub fn create_router(state: BookState) -> Router {
    Router::new()
        .route("/book", get(legacy_get_book))
        .route("/books", get(list_books).post(create_book))
        .route(
            "/books/:id",
            get(get_book).put(update_book).delete(delete_book),
        )
        .layer(middleware::from_fn_with_state(state.clone(), trace_request))
        .with_state(state)
}

/// Open the server span and resolve the session for one request.
async fn trace_request(State(state): State<BookState>, mut request: Request, next: Next) -> Response {
    let remote = extract_context(request.headers());
    let (session, parent) = match Session::lookup(&remote, SESSION_BAGGAGE_KEY) {
        Some(session) => (session, remote),
        None => {
            let session = Session::generate();
            let cx = session.attach(&remote);
            (session, cx)
        }
    };

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = state
        .tracer
        .span_builder(format!("HTTP {method} {path}"))
        .with_kind(SpanKind::Server)
        .with_attributes([
            KeyValue::new("http.method", method.to_string()),
            KeyValue::new("http.target", path.clone()),
            KeyValue::new(attributes::SESSION, session.to_string()),
        ])
        .start_with_context(&state.tracer, &parent);
    let cx = parent.with_span(span);

    request.extensions_mut().insert(RequestContext {
        cx: cx.clone(),
        session: session.clone(),
    });

    let log_span = tracing::info_span!("http_request", method = %method, path = %path, session = %session);
    log_span.set_parent(cx.clone());
    tracing::debug!(parent: &log_span, "HTTP request received");

    let response = next.run(request).instrument(log_span).await;

    let status = response.status();
    let span = cx.span();
    span.set_attribute(KeyValue::new("http.status_code", i64::from(status.as_u16())));
    if status.is_server_error() {
        span.set_status(Status::error(status.to_string()));
    }
    span.end();
    response
}

/// GET /book?book=<id>
async fn legacy_get_book(
    State(state): State<BookState>,
    Extension(rc): Extension<RequestContext>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<Book>> {
    let raw = params
        .get("book")
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing required 'book' parameter".into()))?;
    let id: u32 = raw
        .parse()
        .map_err(|_| AppError::BadRequest("Parameter 'book' is not an integer".into()))?;
    let book = state.db.get(&rc.cx, &rc.session, id).await?;
    Ok(Json(book))
}

async fn list_books(
    State(state): State<BookState>,
    Extension(rc): Extension<RequestContext>,
) -> AppResult<Json<Vec<Book>>> {
    Ok(Json(state.db.list(&rc.cx, &rc.session).await?))
}

async fn get_book(
    State(state): State<BookState>,
    Extension(rc): Extension<RequestContext>,
    id: Result<Path<u32>, PathRejection>,
) -> AppResult<Json<Book>> {
    let id = book_id(id)?;
    Ok(Json(state.db.get(&rc.cx, &rc.session, id).await?))
}

async fn create_book(
    State(state): State<BookState>,
    Extension(rc): Extension<RequestContext>,
    body: Result<Json<NewBook>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let book = book_body(body)?;
    let created = state.db.create(&rc.cx, &rc.session, book).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_book(
    State(state): State<BookState>,
    Extension(rc): Extension<RequestContext>,
    id: Result<Path<u32>, PathRejection>,
    body: Result<Json<NewBook>, JsonRejection>,
) -> AppResult<Json<Book>> {
    let id = book_id(id)?;
    let book = book_body(body)?;
    Ok(Json(state.db.update(&rc.cx, &rc.session, id, book).await?))
}

async fn delete_book(
    State(state): State<BookState>,
    Extension(rc): Extension<RequestContext>,
    id: Result<Path<u32>, PathRejection>,
) -> AppResult<StatusCode> {
    let id = book_id(id)?;
    state.db.delete(&rc.cx, &rc.session, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn book_id(id: Result<Path<u32>, PathRejection>) -> AppResult<u32> {
    id.map(|Path(id)| id)
        .map_err(|_| AppError::BadRequest("Invalid book ID".into()))
}

fn book_body(body: Result<Json<NewBook>, JsonRejection>) -> AppResult<NewBook> {
    body.map(|Json(book)| book)
        .map_err(|_| AppError::BadRequest("Invalid request body".into()))
}
