//! Stderr logging shared by the CLI and the processes it forks.
//!
//! The subscriber is installed once, before the dispatcher is forked; the
//! dispatcher and its workers inherit it and tag their lines with a
//! `dispatcher{pid}` or `worker{worker_id pid}` span.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    /// One object per line; the innermost process span is flattened in.
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    /// Adds per-frame traffic (`send`, `relay`, tracked state changes).
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn text_subscriber<W>(level: LogLevel, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false)
        .finish()
}

fn json_subscriber<W>(level: LogLevel, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_max_level(level.as_filter())
        .with_target(false)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .finish()
}

/// Install the stderr subscriber. A second call keeps the first subscriber.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let _ = match format {
        LogFormat::Text => {
            tracing::subscriber::set_global_default(text_subscriber(level, std::io::stderr))
        }
        LogFormat::Json => {
            tracing::subscriber::set_global_default(json_subscriber(level, std::io::stderr))
        }
    };
}
