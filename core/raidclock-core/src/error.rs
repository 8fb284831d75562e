//! Error types for raidclock-core operations.

use raidclock_protocol::{ErrorInfo, WindowName};
use std::path::PathBuf;

/// All errors that can occur in raidclock-core operations.
///
/// Nothing here is fatal to a process: callers on host-callback paths log the
/// error and keep going.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Host Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Host call failed: {operation}: {details}")]
    HostCall { operation: String, details: String },

    #[error("Feature subscription failed after {attempts} attempts: {last_error}")]
    NegotiationExhausted { attempts: u32, last_error: String },

    #[error("Window not found: {0}")]
    WindowNotFound(WindowName),

    #[error("Monitor not found: {0}")]
    MonitorNotFound(String),

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error: {context}: {details}")]
    Storage { context: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Remote error: {0}")]
    Remote(ErrorInfo),
}

impl CoreError {
    pub fn host_call(operation: &str, details: impl Into<String>) -> Self {
        CoreError::HostCall {
            operation: operation.to_string(),
            details: details.into(),
        }
    }

    pub fn storage(context: &str, details: impl std::fmt::Display) -> Self {
        CoreError::Storage {
            context: context.to_string(),
            details: details.to_string(),
        }
    }

    pub fn json(context: &str, source: serde_json::Error) -> Self {
        CoreError::Json {
            context: context.to_string(),
            source,
        }
    }
}

/// Convenience type alias for Results using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
