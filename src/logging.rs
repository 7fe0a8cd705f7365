//! Structured logging setup.
//!
//! Output goes through `tracing-subscriber` with an [`EnvFilter`] and either
//! a JSON or a pretty formatter. Every event emitted while a request is being
//! served sits inside the dispatcher's `request` span and therefore carries
//! its `request_id`.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `GENAI_LOG_LEVEL` | `info` | base level; `RUST_LOG` wins when set |
//! | `GENAI_LOG_FORMAT` | `json` | `json` or `pretty` |
//! | `GENAI_LOG_ASYNC` | `true` | write through a non-blocking buffer |
//! | `GENAI_LOG_TARGET_FILTER` | - | extra comma-separated directives |
//! | `GENAI_LOG_INCLUDE_LOCATION` | `false` | add file and line |

use anyhow::{Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{parse_var, string_var};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    pub async_logging: bool,
    /// Extra directives, comma-separated (`genai_api::app=debug,tiny_http=warn`)
    pub target_filter: Option<String>,
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            async_logging: true,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&crate::config::process_env)
    }

    /// Unparseable booleans fall back to their defaults.
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: string_var(lookup, "GENAI_LOG_LEVEL", &defaults.log_level),
            format: LogFormat::parse(&string_var(lookup, "GENAI_LOG_FORMAT", "json")),
            async_logging: parse_var(lookup, "GENAI_LOG_ASYNC", defaults.async_logging)
                .unwrap_or(defaults.async_logging),
            target_filter: lookup("GENAI_LOG_TARGET_FILTER"),
            include_location: parse_var(lookup, "GENAI_LOG_INCLUDE_LOCATION", false)
                .unwrap_or(false),
        }
    }

    /// Filter built from `RUST_LOG` when present, otherwise from `log_level`,
    /// plus the extra target directives.
    pub fn env_filter(&self) -> EnvFilter {
        let level = match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };

        let mut env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

        if let Some(target_filter) = &self.target_filter {
            for filter in target_filter.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                match filter.parse() {
                    Ok(directive) => env_filter = env_filter.add_directive(directive),
                    Err(_) => eprintln!("Warning: Invalid log filter directive: {filter}"),
                }
            }
        }
        env_filter
    }
}

/// Install the global subscriber.
///
/// With async logging the returned guard owns the background writer; keep it
/// alive until shutdown so buffered lines are flushed.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = if config.async_logging {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
        (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(non_blocking),
            Some(guard),
        )
    } else {
        (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout),
            None,
        )
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_list(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}
