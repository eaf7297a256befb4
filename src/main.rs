//! booktrace: book service with traced lock contention.
//!
//! # Usage
//!
//! ```bash
//! booktrace all --otel-exporter stdout
//! booktrace book -M -D 50ms
//! ```
//!
//! Environment variables can also be used:
//! - `BOOKTRACE_OTEL_EXPORTER`: Span exporter (otlp, stdout)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint
//! - `OTEL_EXPORTER_OTLP_INSECURE`: Force plaintext (`true`) or TLS (`false`)
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use std::sync::Arc;

use anyhow::Context as _;
use booktrace::config::{Cli, Command, Config};
use booktrace::observability::exporter::TransportSettings;
use booktrace::observability::provider::init_tracer_provider;
use booktrace::observability::rpcmetrics::RpcMetrics;
use booktrace::observability::tracing::{init_tracing, log_subscriber};
use booktrace::server::{bind, run_server, BookService};
use clap::Parser;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config, command: Command) {
    let version = env!("CARGO_PKG_VERSION");
    let db = config.database();
    eprintln!(
        r#"
  booktrace v{} - {}

  Configuration:
    Address:        {}:{}
    Exporter:       {}
    Query delay:    {:?} (stddev {:?})
    Conn mutex:     {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        match command {
            Command::Book => "book service",
            Command::All => "all services",
        },
        config.host,
        config.book_port,
        config.otel_exporter,
        db.query_delay,
        db.query_delay_stddev,
        if db.mutex_disabled { "disabled" } else { "enabled" },
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli { config, command } = Cli::parse();

    let kind = config.exporter_kind()?;
    let transport = TransportSettings::from_env();
    let metrics = Arc::new(RpcMetrics::new()?);

    // the global subscriber needs the book tracer, so provider setup logs
    // through a scoped console-only subscriber
    let bootstrap = log_subscriber(&config.log_filter(), config.log_format, None);
    let (book, mysql) = tracing::subscriber::with_default(bootstrap, || {
        let book = init_tracer_provider("book", kind, &transport, metrics.clone())
            .context("failed to initialize tracing for the book service")?;
        let mysql = init_tracer_provider("mysql", kind, &transport, metrics.clone())
            .context("failed to initialize tracing for mysql")?;
        anyhow::Ok((book, mysql))
    })?;

    init_tracing(&config.log_filter(), config.log_format, Some(book.tracer()));
    config.log_overrides();
    print_banner(&config, command);

    let service = BookService {
        book,
        mysql,
        metrics,
    };
    let app = service.router(&config);
    let listener = bind(&config)
        .await
        .map_err(|e| anyhow::anyhow!("cannot bind book service: {e}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating shutdown...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    tracing::info!("Received Ctrl+C, initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        let _ = shutdown_tx.send(true);
    });

    let served = run_server(listener, app, shutdown_rx).await;

    // flushing blocks on the batch workers, which live on this runtime
    let flush = service.clone();
    tokio::task::spawn_blocking(move || flush.shutdown()).await?;

    served?;
    tracing::info!("booktrace shutdown complete");
    Ok(())
}
