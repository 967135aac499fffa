//! Custom error types for the crate.
//!
//! This module defines `VnaError`, the single error type returned by the library.
//! Using the `thiserror` crate, it gives every failure along the
//! "open connection → send command → read reply → decode" path its own variant.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidAddress`** / **`UnsupportedProtocol`**: the resource string could not
//!   be parsed, or names a protocol this crate does not speak.
//! - **`Connect`**: the session handshake failed. Wraps the underlying cause.
//! - **`Io`**, **`Timeout`**, **`ConnectionClosed`**: transport-level failures.
//! - **`CommandFailed`**: the instrument flagged an error after a write.
//! - **`Parse`**, **`InvalidFormat`**, **`OutOfRange`**: malformed replies or
//!   arguments rejected before they reach the instrument.
//! - **`Config`** / **`Configuration`**: loading or validating settings.
//! - **`Csv`** / **`Json`**: writing retrieved traces out.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, VnaError>;

/// Errors produced while talking to a network analyzer.
#[derive(Error, Debug)]
pub enum VnaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid resource address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Unsupported protocol '{0}': only raw SOCKET resources are supported")]
    UnsupportedProtocol(String),

    #[error("Failed to connect to '{address}'")]
    Connect {
        address: String,
        #[source]
        source: Box<VnaError>,
    },

    #[error("Timeout after {}ms waiting for reply to: {command}", .timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    #[error("Connection closed by instrument")]
    ConnectionClosed,

    #[error("Command failed: {command} ({detail})")]
    CommandFailed { command: String, detail: String },

    #[error("Failed to parse instrument reply: {0}")]
    Parse(String),

    #[error("Invalid data format '{0}'. Must be one of: real-imag, db-phase, amp-phase")]
    InvalidFormat(String),

    #[error("{name} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON export error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VnaError {
    /// Shorthand for a [`VnaError::Parse`] with a formatted message.
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        VnaError::Parse(msg.into())
    }
}
