//! Structured logging utilities for pbisect components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use pbisect_config::log_search_debug;
//!
//! log_search_debug!("Interval narrowed", start = 3, end = 9);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const SEARCH: &'static str = "SEARCH";
    pub const CAS: &'static str = "CAS";
    pub const HISTORY: &'static str = "HISTORY";
    pub const WORKSPACE: &'static str = "WORKSPACE";
    pub const RUNNER: &'static str = "RUNNER";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` count to a level: none = warn, one = info, two = debug, more = trace.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === SEARCH logging macros ===

#[macro_export]
macro_rules! log_search_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::SEARCH, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_search_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::SEARCH, $($key = $value,)* $msg)
    };
}

// === CAS logging macros ===

#[macro_export]
macro_rules! log_cas_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CAS, $($key = $value,)* $msg)
    };
}

// === HISTORY logging macros ===

#[macro_export]
macro_rules! log_history_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::HISTORY, $($key = $value,)* $msg)
    };
}

// === WORKSPACE logging macros ===

#[macro_export]
macro_rules! log_workspace_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::WORKSPACE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_workspace_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::WORKSPACE, $($key = $value,)* $msg)
    };
}

// === RUNNER logging macros ===

#[macro_export]
macro_rules! log_runner_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::RUNNER, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_runner_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::RUNNER, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_runner_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::RUNNER, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_runner_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::RUNNER, $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::CLI, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `PBISECT_LOG` wins over `RUST_LOG`, which wins over `level`.
/// Output goes to stderr so stdout stays reserved for results.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("PBISECT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
