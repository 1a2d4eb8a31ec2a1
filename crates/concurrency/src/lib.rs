//! Concurrency layer for strand
//!
//! This crate implements software transactional memory with optimistic
//! concurrency control:
//! - TRef: versioned transactional cells with a wake-up registry
//! - Journal: per-attempt read/write tracking (one Entry per TRef)
//! - Stm: an immutable description of a transaction, interpreted by a
//!   single match-based loop with an explicit continuation stack
//! - Commit protocol: version validation, all-or-nothing apply, wake-ups
//! - Retry coordination: park the fiber until a touched TRef changes
//!
//! # Example
//!
//! ```ignore
//! use strand_concurrency::{commit, TRef};
//!
//! let from = TRef::new(100);
//! let to = TRef::new(0);
//!
//! let transfer = Stm::transact({
//!     let (from, to) = (from.clone(), to.clone());
//!     move |tx| {
//!         let balance = tx.get(&from)?;
//!         tx.check(balance >= 50)?;
//!         tx.set(&from, balance - 50);
//!         tx.update(&to, |n| n + 50)?;
//!         Ok(())
//!     }
//! });
//! commit(transfer).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod driver;
pub mod fiber;
mod interpreter;
pub mod journal;
pub mod stm;
pub mod tref;
pub mod tx;
pub mod validation;
pub mod wait;

pub use commit::{CommitManager, TryCommit};
pub use driver::{attempt, commit, commit_now, commit_now_as, Committer};
pub use journal::Journal;
pub use stm::Stm;
pub use tref::TRef;
pub use tx::{Signal, StmResult, Tx};
pub use validation::{validate_journal, ConflictType, ValidationResult};

// Re-export the core types every transaction touches
pub use strand_core::{Cause, Defect, Exit, FiberId, StmConfig, TRefId, TxnId, Version, Versioned};
