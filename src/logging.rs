//! Logging and tracing infrastructure for memr.
//!
//! Binaries install a global subscriber once with [`init_tracing`] or
//! [`init_tracing_json`]. Library callers that must not touch global state
//! hand a [`LogContext`] to the session instead; the session and its worker
//! threads then log through the context's own dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Once;
use tracing::{info, Dispatch};
use tracing_subscriber::{
    fmt::{self as tfmt, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

/// Verbosity of acquisition logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` repetition count: up to one is warn, two info, three
    /// debug, anything above trace.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 | 1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::new(self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-owned logging configuration for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogContext {
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl LogContext {
    pub fn new(level: LogLevel) -> Self {
        Self { level, json: false }
    }

    pub fn from_verbosity(count: u8) -> Self {
        Self::new(LogLevel::from_verbosity(count))
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Dispatcher writing to stderr.
    pub fn dispatch(&self) -> Dispatch {
        self.dispatch_with_writer(std::io::stderr)
    }

    /// Dispatcher writing through `writer`.
    pub fn dispatch_with_writer<W>(&self, writer: W) -> Dispatch
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let filter = self.level.env_filter();
        if self.json {
            let layer = tfmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_thread_names(true);
            Dispatch::new(tracing_subscriber::registry().with(filter).with(layer))
        } else {
            let layer = tfmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true);
            Dispatch::new(tracing_subscriber::registry().with(filter).with(layer))
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set. Subsequent calls are ignored.
pub fn init_tracing(level: LogLevel) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.env_filter());

        let fmt_layer = tfmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();

        info!(level = %level, "memr tracing initialized");
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json(level: LogLevel) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.env_filter());

        let fmt_layer = tfmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();

        info!(level = %level, "memr tracing initialized (JSON mode)");
    });
}
