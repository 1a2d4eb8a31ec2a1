//! Error types for strand
//!
//! These errors cover everything outside a transaction's own outcome:
//! configuration validation and invalid constructor arguments. Inside a
//! transaction an `Error` is surfaced as a [`Defect`](crate::Defect).

use thiserror::Error;

/// Errors raised outside of transaction execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A constructor or operation received an invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal invariant violation (bug)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for strand operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error was caused by the caller's input
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::InvalidArgument(_))
    }

    /// Check if this is a serious/unrecoverable error
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}
