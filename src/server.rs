//! HTTP server setup and lifecycle.
//!
//! Serves on one listener:
//! - The book routes
//! - `/metrics`, `/health` and `/ready`
//! - Graceful shutdown support

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::book::{self, BookState, Database};
use crate::config::Config;
use crate::observability::prometheus::{self, PrometheusState};
use crate::observability::provider::ServiceTracing;
use crate::observability::rpcmetrics::RpcMetrics;

/// Everything the book service needs to serve requests.
#[derive(Debug, Clone)]
pub struct BookService {
    /// Provider of the server spans.
    pub book: ServiceTracing,
    /// Provider of the simulated database spans.
    pub mysql: ServiceTracing,
    pub metrics: Arc<RpcMetrics>,
}

impl BookService {
    /// Build the full router: book routes plus metrics and health routes.
    pub fn router(&self, config: &Config) -> Router {
        let db = Arc::new(Database::new(self.mysql.tracer(), config.database()));
        let state = BookState::new(db, self.book.tracer());
        book::create_router(state)
            .merge(prometheus::create_router(PrometheusState::new(Arc::clone(&self.metrics))))
    }

    /// Flush and stop both tracer providers.
    ///
    /// Blocks; run it outside the async workers.
    pub fn shutdown(&self) {
        self.book.shutdown();
        self.mysql.shutdown();
    }
}

/// Bind the book service listener.
pub async fn bind(config: &Config) -> Result<TcpListener, Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.book_port).parse()?;
    Ok(TcpListener::bind(addr).await?)
}

/// Serve `app` until the shutdown signal fires.
///
/// # Returns
///
/// Returns when the server has shut down.
pub async fn run_server(
    listener: TcpListener,
    app: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %format!("http://{addr}"), "Starting book service");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, stopping server");
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
