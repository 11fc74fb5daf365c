//! Structured logging utilities for the capsule workspace.
//!
//! One macro per component, all backed by `tracing`, plus a single
//! `init_logging` entry point for anything that wants to wire up a
//! subscriber (binaries and integration tests — the library crates
//! themselves never call this).

/// Component identifiers used as a `tracing` field for filtering.
pub struct Component;

impl Component {
    pub const CAS: &'static str = "CAS";
    pub const MANIFEST: &'static str = "MANIFEST";
    pub const CAPSULE: &'static str = "CAPSULE";
    pub const ARCHIVE: &'static str = "ARCHIVE";
    pub const PLUGIN: &'static str = "PLUGIN";
    pub const EXECUTOR: &'static str = "EXECUTOR";
}

/// The seven closed error kinds every fallible operation in the workspace
/// maps onto, regardless of which crate's `thiserror` enum produced it.
/// `capsule-core` and `capsule-executor` compose several lower crates and
/// need to branch on *kind* (e.g. "did this step failure abort the plan,
/// or was it a semantic check failure?") without matching on every crate's
/// error type individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Invalid,
    InvalidHash,
    Parse,
    Unsupported,
    Io,
    Plugin,
}

/// Implemented by every crate-local error enum in the workspace so callers
/// can classify an error without matching on its concrete type.
pub trait ClassifyError {
    fn kind(&self) -> ErrorKind;
}

/// Runtime log level, used only by [`init_logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[macro_export]
macro_rules! log_cas_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CAS", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_manifest_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "MANIFEST", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_capsule_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CAPSULE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_capsule_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CAPSULE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_archive_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "ARCHIVE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_archive_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "ARCHIVE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_plugin_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "PLUGIN", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_plugin_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "PLUGIN", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_executor_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "EXECUTOR", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_executor_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "EXECUTOR", $($key = $value,)* $msg)
    };
}

/// Initialize a process-wide `tracing` subscriber. Call once at startup of
/// anything embedding this workspace (a binary, a test harness); library
/// crates never call this themselves.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_constants() {
        assert_eq!(Component::CAS, "CAS");
        assert_eq!(Component::EXECUTOR, "EXECUTOR");
    }
}
