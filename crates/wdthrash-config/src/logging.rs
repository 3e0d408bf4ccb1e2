//! Structured logging utilities for wdthrash components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use wdthrash_config::log_worker_warn;
//!
//! log_worker_warn!("inotify_add_watch failed", worker = %id, error = %err);
//! log_harness_info!("All workers joined");
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const HARNESS: &'static str = "HARNESS";
    pub const WORKER: &'static str = "WORKER";
    pub const CHURN: &'static str = "CHURN";
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
    /// Map a `-v` count onto a level, starting from `Warn`.
    pub fn from_verbosity(verbose: u8) -> Self {
        match verbose {
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

// === HARNESS logging macros ===

#[macro_export]
macro_rules! log_harness_error {
    ($msg:literal) => { tracing::error!(component = "HARNESS", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::error!(component = "HARNESS", $($field)+, $msg) };
}

#[macro_export]
macro_rules! log_harness_warn {
    ($msg:literal) => { tracing::warn!(component = "HARNESS", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::warn!(component = "HARNESS", $($field)+, $msg) };
}

#[macro_export]
macro_rules! log_harness_info {
    ($msg:literal) => { tracing::info!(component = "HARNESS", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::info!(component = "HARNESS", $($field)+, $msg) };
}

#[macro_export]
macro_rules! log_harness_debug {
    ($msg:literal) => { tracing::debug!(component = "HARNESS", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::debug!(component = "HARNESS", $($field)+, $msg) };
}

// === WORKER logging macros ===

#[macro_export]
macro_rules! log_worker_warn {
    ($msg:literal) => { tracing::warn!(component = "WORKER", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::warn!(component = "WORKER", $($field)+, $msg) };
}

#[macro_export]
macro_rules! log_worker_debug {
    ($msg:literal) => { tracing::debug!(component = "WORKER", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::debug!(component = "WORKER", $($field)+, $msg) };
}

// === CHURN logging macros ===

#[macro_export]
macro_rules! log_churn_warn {
    ($msg:literal) => { tracing::warn!(component = "CHURN", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::warn!(component = "CHURN", $($field)+, $msg) };
}

#[macro_export]
macro_rules! log_churn_debug {
    ($msg:literal) => { tracing::debug!(component = "CHURN", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::debug!(component = "CHURN", $($field)+, $msg) };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal) => { tracing::info!(component = "CLI", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::info!(component = "CLI", $($field)+, $msg) };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal) => { tracing::debug!(component = "CLI", $msg) };
    ($msg:literal, $($field:tt)+) => { tracing::debug!(component = "CLI", $($field)+, $msg) };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `WDTHRASH_LOG` wins over `RUST_LOG`, which wins over `level`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("WDTHRASH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::HARNESS, "HARNESS");
        assert_eq!(Component::WORKER, "WORKER");
        assert_eq!(Component::CHURN, "CHURN");
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(2), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(9), LogLevel::Trace);
    }

    #[test]
    fn test_macros_expand() {
        let worker = "adder-0.1";
        log_harness_debug!("plain message");
        log_worker_debug!("with fields", worker = %worker, count = 3);
    }
}
