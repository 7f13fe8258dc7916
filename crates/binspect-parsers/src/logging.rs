//! Logging and tracing utilities for binspect parsers
//!
//! The engine logs through `tracing` with structured fields; this module
//! installs a subscriber for front-ends and offers a few helpers for
//! timing a parse.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Whether tracing has been initialized
static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the default tracing subscriber
///
/// Reads `RUST_LOG` when set. Multiple calls are safe and will be ignored.
pub fn init_default() {
    init_with_config(TracingConfig::default());
}

/// Initialize tracing with a custom configuration
pub fn init_with_config(config: TracingConfig) {
    if TRACING_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
        .is_err()
    {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_file(config.show_file)
        .with_line_number(config.show_line_number);

    // Another subscriber may already be installed (tests, embedding apps)
    let _ = tracing_subscriber::registry().with(fmt_layer).with(filter).try_init();
}

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default log level filter (e.g., "info", "debug", "warn")
    pub default_level: String,
    /// Show the target (module path) in log output
    pub show_target: bool,
    /// Show thread IDs in log output
    pub show_thread_ids: bool,
    /// Show source file in log output
    pub show_file: bool,
    /// Show line number in log output
    pub show_line_number: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: "warn,binspect=info".to_string(),
            show_target: false,
            show_thread_ids: false,
            show_file: false,
            show_line_number: false,
        }
    }
}

/// Log the start of a parse: parser id and stream source
#[macro_export]
macro_rules! log_parse_start {
    ($parser:expr, $source:expr) => {
        tracing::info!(parser = %$parser, source = %$source, "Starting parse");
    };
}

/// Log the end of a walk over a parse tree
#[macro_export]
macro_rules! log_parse_complete {
    ($parser:expr, $duration:expr, $fields:expr) => {
        tracing::info!(
            parser = %$parser,
            duration_ms = %$duration.as_millis(),
            fields = %$fields,
            "Parse complete"
        );
    };
}

/// Log a parse failure
#[macro_export]
macro_rules! log_parse_error {
    ($parser:expr, $error:expr) => {
        tracing::error!(parser = %$parser, error = %$error, "Parse failed");
    };
}

/// Run `f` inside a `parse` span and log its duration
pub fn instrument_parse<T, F>(name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    let span = tracing::info_span!("parse", parser = %name);
    let _guard = span.enter();

    let start = std::time::Instant::now();
    let result = f();
    let duration = start.elapsed();

    tracing::debug!(duration_ms = %duration.as_millis(), "Parse operation complete");

    result
}

/// Span tracking progress through a walk over `total` bits
pub fn progress_span(operation: &str, total: u64) -> tracing::Span {
    tracing::info_span!("progress", operation = %operation, total = %total)
}

/// Percentage of `total` reached by `current`, 0 when `total` is 0
pub fn percent(current: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    ((current as f64 / total as f64) * 100.0).min(100.0) as u32
}
