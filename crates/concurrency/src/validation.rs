//! Journal validation for OCC
//!
//! A journal is valid when every TRef it touched still holds the version
//! observed on first access. Validation runs at commit time and whenever the
//! retry driver needs to know whether an attempt saw a stale snapshot.
//!
//! Rules:
//! - Every entry is validated, whether it was only read or also written
//! - A blind write records the version it replaced and conflicts like a read
//! - Validation never blocks; the caller decides whether a lock is needed

use crate::journal::Journal;
use strand_core::{TRefId, Version};

/// Types of conflicts that can occur during journal validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// A TRef the attempt only read was committed to since it was read
    ReadConflict {
        /// The TRef that has a conflict
        tref: TRefId,
        /// Version observed on first access
        expected_version: Version,
        /// Committed version at validation time
        current_version: Version,
    },

    /// A TRef the attempt wrote was committed to by someone else
    WriteConflict {
        /// The TRef that has a conflict
        tref: TRefId,
        /// Version the write was based on
        expected_version: Version,
        /// Committed version at validation time
        current_version: Version,
    },
}

impl ConflictType {
    /// The conflicting TRef
    pub fn tref(&self) -> TRefId {
        match self {
            ConflictType::ReadConflict { tref, .. } | ConflictType::WriteConflict { tref, .. } => {
                *tref
            }
        }
    }
}

/// Result of journal validation
///
/// Accumulates all conflicts found during validation.
/// An attempt commits only if is_valid() returns true.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// Create a successful validation result (no conflicts)
    pub fn ok() -> Self {
        ValidationResult {
            conflicts: Vec::new(),
        }
    }

    /// Create a validation result with a single conflict
    pub fn conflict(conflict: ConflictType) -> Self {
        ValidationResult {
            conflicts: vec![conflict],
        }
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Get the number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// Validate every journal entry against the committed versions
pub fn validate_journal(journal: &Journal) -> ValidationResult {
    let mut result = ValidationResult::ok();

    for entry in journal.entries() {
        let current_version = entry.cell().version();
        let expected_version = entry.expected_version();
        if current_version == expected_version {
            continue;
        }

        let tref = entry.cell().id();
        result.conflicts.push(if entry.is_changed() {
            ConflictType::WriteConflict {
                tref,
                expected_version,
                current_version,
            }
        } else {
            ConflictType::ReadConflict {
                tref,
                expected_version,
                current_version,
            }
        });
    }

    result
}
