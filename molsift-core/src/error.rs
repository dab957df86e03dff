//! Structured error types for the molsift workspace.

use thiserror::Error;

/// Unified error type for all molsift operations.
#[derive(Debug, Error)]
pub enum SiftError {
    /// I/O error (sink cannot be written, input cannot be read)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed structure or pattern source)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration rejected before processing started
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A record computation failed under a policy that stops execution
    #[error("computation failed: {0}")]
    Computation(String),

    /// An output sink refused a record
    #[error("sink error: {0}")]
    Sink(String),

    /// A native handle could not be released
    #[error("resource error: {0}")]
    Resource(String),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the molsift workspace.
pub type Result<T> = std::result::Result<T, SiftError>;
