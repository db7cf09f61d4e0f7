//! Error types for the duplicate-marking engine.

use thiserror::Error;

/// Result type alias for markdups operations
pub type Result<T> = std::result::Result<T, MarkdupsError>;

/// Error type for markdups operations.
///
/// Per-record problems (`Format`) are logged and recovered from by the engine;
/// they only appear as values in the internal classification path. The other
/// variants abort the run.
#[derive(Error, Debug)]
pub enum MarkdupsError {
    /// Invalid configuration, detected before any shard runs
    #[error("invalid configuration: {reason}")]
    Config {
        /// Explanation of the invalid option combination
        reason: String,
    },

    /// Input read or output write failure
    #[error("{context}: {source}")]
    Io {
        /// What was being read or written
        context: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Malformed record contents (missing mate, unparsable name fields)
    #[error("malformed record '{name}': {reason}")]
    Format {
        /// The offending read name
        name: String,
        /// Explanation of the problem
        reason: String,
    },

    /// Library-size solver failure
    #[error("library size estimation failed: {reason}")]
    Math {
        /// Explanation of the numeric failure
        reason: String,
    },

    /// The run was cancelled by the caller or a failing worker
    #[error("run cancelled")]
    Cancelled,
}

impl MarkdupsError {
    /// Build a `Config` error from anything printable.
    pub fn config(reason: impl Into<String>) -> Self {
        MarkdupsError::Config { reason: reason.into() }
    }

    /// Wrap an I/O error with context describing the operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MarkdupsError::Io { context: context.into(), source }
    }
}
