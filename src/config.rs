//! Configuration parsing for booktrace.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - "fix" flags that remove the simulated bottlenecks

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::error::ConfigError;
use crate::observability::exporter::ExporterKind;

/// Default average latency of a simulated MySQL query.
pub const DEFAULT_DB_QUERY_DELAY: Duration = Duration::from_millis(300);

/// Default port of the book service.
pub const DEFAULT_BOOK_PORT: u16 = 8090;

/// booktrace: a tracing demo application.
#[derive(Parser, Debug, Clone)]
#[command(name = "booktrace")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

/// Services that can be started.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Starts the Book service
    Book,
    /// Starts all services
    All,
}

/// Log output format.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Process-wide settings shared by every service.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// OpenTelemetry exporter (otlp|stdout)
    #[arg(
        short = 'x',
        long,
        env = "BOOKTRACE_OTEL_EXPORTER",
        default_value = "otlp",
        global = true
    )]
    pub otel_exporter: String,

    /// Average latency of MySQL DB query
    #[arg(
        short = 'D',
        long = "fix-db-query-delay",
        default_value = "300ms",
        value_parser = parse_duration,
        global = true
    )]
    pub db_query_delay: Duration,

    /// Standard deviation of MySQL DB query latency (default: a tenth of the delay)
    #[arg(long = "fix-db-query-delay-stddev", value_parser = parse_duration, global = true)]
    pub db_query_delay_stddev: Option<Duration>,

    /// Disables the mutex guarding db connection
    #[arg(short = 'M', long = "fix-disable-db-conn-mutex", global = true)]
    pub disable_db_conn_mutex: bool,

    /// Host address to bind to
    #[arg(long, env = "BOOKTRACE_HOST", default_value = "0.0.0.0", global = true)]
    pub host: String,

    /// Port for book service
    #[arg(short = 'c', long = "book-service-port", default_value_t = DEFAULT_BOOK_PORT, global = true)]
    pub book_port: u16,

    /// Enables debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,
}

/// Settings of the simulated datastore.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatabaseConfig {
    pub query_delay: Duration,
    pub query_delay_stddev: Duration,
    pub mutex_disabled: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            query_delay: DEFAULT_DB_QUERY_DELAY,
            query_delay_stddev: DEFAULT_DB_QUERY_DELAY / 10,
            mutex_disabled: false,
        }
    }
}

impl Config {
    /// Resolve the configured exporter token.
    pub fn exporter_kind(&self) -> Result<ExporterKind, ConfigError> {
        self.otel_exporter.parse()
    }

    /// Datastore settings derived from the "fix" flags.
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            query_delay: self.db_query_delay,
            query_delay_stddev: self
                .db_query_delay_stddev
                .unwrap_or(self.db_query_delay / 10),
            mutex_disabled: self.disable_db_conn_mutex,
        }
    }

    /// Effective log filter, raised to debug by `--verbose`.
    pub fn log_filter(&self) -> String {
        if self.verbose {
            "debug,booktrace=debug".to_string()
        } else {
            self.log_level.clone()
        }
    }

    /// Log every setting that departs from the defaults.
    pub fn log_overrides(&self) {
        if self.db_query_delay != DEFAULT_DB_QUERY_DELAY {
            tracing::info!(
                old = ?DEFAULT_DB_QUERY_DELAY,
                new = ?self.db_query_delay,
                "fix: overriding MySQL query delay"
            );
        }
        if let Some(stddev) = self.db_query_delay_stddev {
            tracing::info!(
                old = ?self.db_query_delay / 10,
                new = ?stddev,
                "fix: overriding MySQL query delay stddev"
            );
        }
        if self.disable_db_conn_mutex {
            tracing::info!("fix: disabling db connection mutex");
        }
        if self.book_port != DEFAULT_BOOK_PORT {
            tracing::info!(
                old = DEFAULT_BOOK_PORT,
                new = self.book_port,
                "changing book service port"
            );
        }
    }

    /// Create a default configuration for testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            otel_exporter: "stdout".into(),
            db_query_delay: Duration::from_millis(1),
            db_query_delay_stddev: None,
            disable_db_conn_mutex: false,
            host: "127.0.0.1".into(),
            book_port: 0,
            verbose: false,
            log_level: "debug".into(),
            log_format: LogFormat::Text,
        }
    }
}

/// Parse a duration such as `300ms`, `1.5s` or `2m`.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(invalid)?;
    let (value, unit) = trimmed.split_at(split);
    let value: f64 = value.trim().parse().map_err(|_| invalid())?;
    let nanos_per_unit = match unit {
        "ns" => 1.0,
        "us" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return Err(invalid()),
    };
    let nanos = (value * nanos_per_unit).round();
    if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(nanos as u64))
}
