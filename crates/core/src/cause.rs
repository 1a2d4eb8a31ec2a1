//! Transaction outcomes
//!
//! A committed transaction ends in an [`Exit`]: either its value or a
//! [`Cause`] describing why it did not produce one.
//!
//! - `Fail(E)`: a typed, recoverable failure raised by the transaction itself.
//!   Typed handlers (`catch_all`, `fold_stm`, `or_else`) observe it.
//! - `Die(Defect)`: an unexpected defect. Typed handlers never observe it.
//! - `Interrupt(FiberId)`: the transaction was interrupted, for example because
//!   it operated on a queue or hub that has been shut down.
//!
//! Retry is deliberately absent: it is a control signal handled entirely
//! inside the commit loop and never surfaces in an `Exit`.

use crate::types::FiberId;
use std::fmt;
use thiserror::Error;

/// The outcome of a committed transaction
pub type Exit<A, E> = std::result::Result<A, Cause<E>>;

/// An unexpected failure that typed error handlers do not catch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Create a defect from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Defect raised when a type-erased value does not have the expected type
    pub fn type_mismatch<T>() -> Self {
        Self::new(format!(
            "type mismatch: expected {}",
            std::any::type_name::<T>()
        ))
    }

    /// The defect message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<crate::error::Error> for Defect {
    fn from(e: crate::error::Error) -> Self {
        Defect::new(e.to_string())
    }
}

/// Why a transaction did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Cause<E> {
    /// Typed, recoverable failure
    #[error("transaction failed: {0:?}")]
    Fail(E),

    /// Unexpected defect
    #[error("transaction died: {0}")]
    Die(Defect),

    /// Interruption of the given fiber
    #[error("transaction interrupted ({0})")]
    Interrupt(FiberId),
}

impl<E> Cause<E> {
    /// Create a defect cause from a message
    pub fn die(message: impl Into<String>) -> Self {
        Cause::Die(Defect::new(message))
    }

    /// Check if this is a typed failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Cause::Fail(_))
    }

    /// Check if this is a defect
    pub fn is_die(&self) -> bool {
        matches!(self, Cause::Die(_))
    }

    /// Check if this is an interruption
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Cause::Interrupt(_))
    }

    /// The typed failure, if any
    pub fn failure(&self) -> Option<&E> {
        match self {
            Cause::Fail(e) => Some(e),
            _ => None,
        }
    }

    /// Consume into the typed failure, if any
    pub fn into_failure(self) -> Option<E> {
        match self {
            Cause::Fail(e) => Some(e),
            _ => None,
        }
    }

    /// The defect, if any
    pub fn defect(&self) -> Option<&Defect> {
        match self {
            Cause::Die(d) => Some(d),
            _ => None,
        }
    }

    /// Transform the typed failure
    pub fn map<E2, F: FnOnce(E) -> E2>(self, f: F) -> Cause<E2> {
        match self {
            Cause::Fail(e) => Cause::Fail(f(e)),
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt(id) => Cause::Interrupt(id),
        }
    }

    /// Transform the typed failure with a fallible conversion
    ///
    /// Used when type-erased failures are recovered into their typed form:
    /// a failed conversion becomes a defect.
    pub fn try_map<E2, F>(self, f: F) -> Cause<E2>
    where
        F: FnOnce(E) -> std::result::Result<E2, Defect>,
    {
        match self {
            Cause::Fail(e) => match f(e) {
                Ok(e2) => Cause::Fail(e2),
                Err(d) => Cause::Die(d),
            },
            Cause::Die(d) => Cause::Die(d),
            Cause::Interrupt(id) => Cause::Interrupt(id),
        }
    }
}
