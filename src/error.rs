//! Error handling for the boxlink connector
//!
//! This module provides the error type shared by every layer of the crate,
//! along with conversions from external error types and convenience
//! constructors.

use thiserror::Error;

/// Connector error type
///
/// Frame-level problems (`FrameDecode`) are handled locally by the wire
/// codec and driver with a skip-and-continue policy; command-level errors
/// are always surfaced to the originating caller. Nothing in this crate
/// retries a failed command.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// Malformed wire frame (bad hex pair, unterminated annotation, oversize)
    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    /// No codec registered for an object type
    #[error("No codec registered for object type {0}")]
    UnknownType(u16),

    /// A command did not receive its response within the deadline
    #[error("Command timeout: {0}")]
    Timeout(String),

    /// The conduit closed or errored; pending and subsequent commands fail
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// The embedded side rejected the command with a non-zero status
    #[error("Protocol error: {}", crate::protocol::commands::describe_status(*.0))]
    Protocol(i8),

    /// A type codec could not convert between values and bytes
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid argument or object addressing
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input/output error on the conduit
    #[error("IO error: {0}")]
    Io(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for the boxlink connector
pub type Result<T> = std::result::Result<T, LinkError>;

impl LinkError {
    pub fn frame(msg: impl Into<String>) -> Self {
        LinkError::FrameDecode(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        LinkError::Timeout(msg.into())
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        LinkError::Disconnected(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        LinkError::Codec(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LinkError::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        LinkError::Config(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        LinkError::Io(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        LinkError::Internal(msg.into())
    }

    /// Whether this error indicates the link itself is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::Disconnected(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Codec(format!("JSON: {err}"))
    }
}
