//! Core error types

use thiserror::Error;

/// Core error type shared by the verifier crates
#[derive(Debug, Error)]
pub enum CoreError {
    /// A hex-encoded identifier could not be parsed
    #[error("Invalid {kind}: {reason}")]
    InvalidHex {
        /// Which identifier was being parsed
        kind: &'static str,
        /// Why parsing failed
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
