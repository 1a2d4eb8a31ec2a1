//! Core types for strand
//!
//! This crate defines the foundational types shared by the STM engine and
//! the transactional data structures:
//! - Identifiers: FiberId, TxnId, TRefId
//! - Versioned: an immutable (value, version) snapshot
//! - Cause / Exit: the outcome of a committed transaction
//! - Error: configuration and argument errors
//! - StmConfig: tunables for the commit driver and data structures

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cause;
pub mod config;
pub mod error;
pub mod types;
pub mod versioned;

pub use cause::{Cause, Defect, Exit};
pub use config::{StmConfig, StmConfigBuilder};
pub use error::{Error, Result};
pub use types::{FiberId, TRefId, TxnId, Version};
pub use versioned::Versioned;
