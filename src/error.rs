//! Error types for querydesk.
//!
//! Defines the main error enum used throughout the crate.

use thiserror::Error;

/// Main error type for querydesk operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryDeskError {
    /// Connect/disconnect failures (host unreachable, auth failed, not connected, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Driver-reported SQL failures (syntax errors, server-side rejection, cancellation, etc.)
    #[error("Execution error: {0}")]
    Execution(String),

    /// Unknown task or connection id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal state transition (e.g. committing without an active transaction).
    #[error("State error: {0}")]
    State(String),

    /// Configuration errors (invalid config file, malformed descriptor, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryDeskError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Creates a not-found error with the given message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a state error with the given message.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Execution(_) => "Execution Error",
            Self::NotFound(_) => "Not Found",
            Self::State(_) => "State Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the bare message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m)
            | Self::Execution(m)
            | Self::NotFound(m)
            | Self::State(m)
            | Self::Config(m)
            | Self::Internal(m) => m,
        }
    }
}

/// Result type alias using QueryDeskError.
pub type Result<T> = std::result::Result<T, QueryDeskError>;
