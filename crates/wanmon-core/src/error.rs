//! Error types for the WAN monitor
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the WAN monitor
///
/// The variants map directly onto the failure taxonomy the scheduler cares
/// about: everything except `UnsupportedOperation` and `Config` is a
/// per-cycle error that is logged, counted, and retried on the next poll
/// tick. `UnsupportedOperation` and `Config` are configuration-time
/// contract violations and abort startup.
#[derive(Error, Debug)]
pub enum Error {
    /// Classifier input did not parse as an IP address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Backend read (WAN status query) failed
    #[error("query error: {0}")]
    Query(String),

    /// CLI output did not match the expected pattern
    ///
    /// Treated like a query failure for retry purposes, but kept distinct
    /// so a pattern drift on a firmware update is diagnosable from logs.
    #[error("parse error: {0}")]
    Parse(String),

    /// Backend write (port enable/disable) failed
    #[error("control error: {0}")]
    Control(String),

    /// Session establishment or renewal failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A read-only backend was asked to control a port
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network-related errors
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an invalid-address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a control error
    pub fn control(msg: impl Into<String>) -> Self {
        Self::Control(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error is fatal at startup rather than a per-cycle error
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, Self::UnsupportedOperation(_) | Self::Config(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
