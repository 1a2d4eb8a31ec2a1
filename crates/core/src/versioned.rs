//! Versioned snapshots
//!
//! A `Versioned<T>` pairs a value with the version at which it became live.
//! Snapshots are immutable: a commit replaces the whole snapshot rather than
//! editing it in place, so a reader holding a snapshot always sees a
//! consistent (value, version) pair.

use crate::types::Version;
use serde::{Deserialize, Serialize};

/// An immutable (value, version) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// The value
    pub value: T,
    /// The version at which the value became live
    pub version: Version,
}

impl<T> Versioned<T> {
    /// Create a snapshot at an explicit version
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    /// Create the first snapshot of a fresh reference (version 0)
    pub fn initial(value: T) -> Self {
        Self::new(value, 0)
    }

    /// The snapshot that follows this one after a commit writes `value`
    pub fn succeed_with(&self, value: T) -> Self {
        Self::new(value, self.version + 1)
    }

    /// Transform the value, keeping the version
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }

    /// Borrow the value, keeping the version
    pub fn by_ref(&self) -> Versioned<&T> {
        Versioned {
            value: &self.value,
            version: self.version,
        }
    }

    /// Discard the version
    pub fn into_value(self) -> T {
        self.value
    }
}
