//! Structured logging setup.
//!
//! Reads `RUST_LOG` (default `info`) and writes to stderr through a
//! non-blocking appender. The returned guard must be held for the lifetime of
//! the process so buffered events are flushed on exit.

use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid log format '{}'. Valid values: pretty, json", s)),
        }
    }
}

pub fn init(format: LogFormat) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(writer).compact())
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(writer).json().flatten_event(true))
            .init(),
    }
    guard
}
