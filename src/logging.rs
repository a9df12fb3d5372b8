//! Logging infrastructure - structured tracing for binding and invocation
//!
//! Design: `tracing` events with an `event` field naming what happened, so
//! the JSON output can be filtered by kind. Subscriber installation is
//! idempotent; library code only emits events and never installs anything.

use crate::interop::{NativePtr, Retention};
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::{debug, error, info, trace, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with timestamps
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily rotated file
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Emit span open/close events
    pub span_events: bool,
    /// Extra filter directives (e.g. "gimarshal::builder=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // GIMARSHAL_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("GIMARSHAL_LOG_LEVEL") {
            config.level = parse_level(&level).unwrap_or(Level::INFO);
        }

        // GIMARSHAL_LOG_FILE: path prefix of a daily rotated log file
        if let Ok(path) = std::env::var("GIMARSHAL_LOG_FILE") {
            config.output = file_output(Path::new(&path));
        }

        if std::env::var("GIMARSHAL_LOG_JSON").is_ok() {
            config.format = LogFormat::Json;
        }
        config.span_events = std::env::var("GIMARSHAL_LOG_SPANS").is_ok();

        config
    }
}

pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn file_output(path: &Path) -> LogOutput {
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    let prefix = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gimarshal.log".to_string());
    LogOutput::File { directory, prefix }
}

/// Install the global subscriber
///
/// Returns the appender's `WorkerGuard`, which must stay alive for logs to be
/// flushed. Later calls are no-ops and return `None`.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        guard = install(config);
    });
    guard
}

/// Install logging configured from the environment
pub fn init() -> Option<WorkerGuard> {
    init_logging(LogConfig::from_env())
}

pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

fn install(config: LogConfig) -> Option<WorkerGuard> {
    let filter = build_filter(&config);
    let spans = span_events_config(config.span_events);

    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File { directory, prefix } => {
            tracing_appender::non_blocking(rolling::daily(directory, prefix))
        }
    };

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .pretty()
            .with_span_events(spans)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(writer)
            .compact()
            .with_span_events(spans)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .with_span_events(spans)
            .with_filter(filter)
            .boxed(),
    };

    // Another subscriber may already be installed by the embedding program
    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Some(guard),
        Err(_) => None,
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(directives) => directives
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .fold(base, |filter, directive| match directive.parse() {
                Ok(parsed) => filter.add_directive(parsed),
                Err(_) => {
                    tracing::warn!("Invalid filter directive: {}", directive);
                    filter
                }
            }),
        None => base,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

// ============================================================================
// Binding and invocation events
// ============================================================================

/// Log a freshly generated callable
pub fn log_binding_built(symbol: &str, arity: usize, steps: usize) {
    info!(
        event = "binding_built",
        symbol = symbol,
        native_args = arity,
        steps = steps,
        "Binding generated"
    );
}

/// Log a rejected binding
pub fn log_binding_failed(symbol: &str, error: &str) {
    error!(
        event = "binding_failed",
        symbol = symbol,
        error = error,
        "Binding generation failed"
    );
}

/// Log a native call
#[inline]
pub fn log_native_call(symbol: &str, arg_count: usize) {
    debug!(
        event = "native_call",
        symbol = symbol,
        args = arg_count,
        "Native function called"
    );
}

/// Log an error reported through a fallible call's error slot
pub fn log_native_error(symbol: &str, domain: &str, code: i32, message: &str) {
    debug!(
        event = "native_error",
        symbol = symbol,
        domain = domain,
        code = code,
        message = message,
        "Native call reported an error"
    );
}

/// Log a cleanup pass
#[inline]
pub fn log_cleanup(symbol: &str, steps: usize, failed: bool) {
    trace!(
        event = "cleanup",
        symbol = symbol,
        steps = steps,
        failed = failed,
        "Cleanup steps executed"
    );
}

pub fn log_callback_registered(callback: &str, ptr: NativePtr, retention: Retention) {
    trace!(
        event = "callback_registered",
        callback = callback,
        trampoline = %ptr,
        retention = ?retention,
        "Trampoline registered"
    );
}

pub fn log_callback_released(callback: &str, ptr: NativePtr) {
    trace!(
        event = "callback_released",
        callback = callback,
        trampoline = %ptr,
        "Trampoline released"
    );
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &str) -> PerformanceGuard {
        PerformanceGuard {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: String,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            debug!(
                operation = %self.operation,
                duration_us = self.start.elapsed().as_micros() as u64,
                "operation completed"
            );
        }
    }
}
