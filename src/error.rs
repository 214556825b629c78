//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for everything that can abort an
//! operation: configuration loading, starting a session, and talking to the session
//! controller. Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle these failures with the `?` operator.
//!
//! ## Error Hierarchy
//!
//! - **`AddressParse`**: The listen address is not a usable `host:port` pair.
//! - **`Bind`**: The operating system refused to bind the listening socket (address in use,
//!   permission denied, interface not present).
//! - **`Start`**: The session log file could not be created or its header written.
//! - **`Storage`**: A write to an open session log failed. Ingestion treats this as
//!   non-fatal; it is counted and logged, never propagated across the ingestion loop.
//! - **`Config`** / **`Configuration`**: Parse errors from `figment` and semantic validation
//!   errors respectively.
//! - **`Io`**: Wraps standard `std::io::Error`.
//! - **`SessionClosed`**: The session controller task is gone.
//!
//! `AddressParse`, `Bind` and `Start` are the only errors `start` can return; each one leaves
//! the session `Idle` with nothing left open.
//!
//! Per-message decode failures live in [`crate::parser::ParseError`] instead, so a malformed
//! message can never be bubbled up as a fatal error by accident.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the ingestion application.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The listen address could not be parsed or resolved.
    #[error("Invalid listen address '{address}': {reason}")]
    AddressParse {
        /// The address as supplied by the caller.
        address: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The listening socket could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// The resolved address that failed to bind.
        address: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The session log file could not be created.
    #[error("Failed to start session log at '{}': {source}", path.display())]
    Start {
        /// Path of the log file that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A write to the session log failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session controller has shut down and can no longer take commands.
    #[error("Session controller is no longer running")]
    SessionClosed,
}

impl DaqError {
    /// Returns `true` for the errors that abort a start attempt.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            DaqError::AddressParse { .. } | DaqError::Bind { .. } | DaqError::Start { .. }
        )
    }
}

impl From<csv::Error> for DaqError {
    fn from(value: csv::Error) -> Self {
        DaqError::Storage(value.to_string())
    }
}
