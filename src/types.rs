//! Public types for the strand API.
//!
//! This module re-exports types from the internal crates with a single,
//! flat path for each.

// ============================================================================
// Transaction model
// ============================================================================

// Descriptions and the effect handle used inside them
pub use strand_concurrency::{Signal, Stm, StmResult, Tx};

// Outcomes
pub use strand_core::{Cause, Defect, Exit};

// Transactional references and their committed snapshots
pub use strand_concurrency::TRef;
pub use strand_core::{Version, Versioned};

// ============================================================================
// Identity
// ============================================================================

pub use strand_core::{FiberId, TRefId, TxnId};

// ============================================================================
// Drivers and configuration
// ============================================================================

pub use strand_concurrency::{Committer, TryCommit};
pub use strand_core::{Error, Result, StmConfig, StmConfigBuilder};

// Conflict reports
pub use strand_concurrency::{ConflictType, ValidationResult};

// ============================================================================
// Data structures
// ============================================================================

pub use strand_primitives::{
    LockGuard, ScopedSubscription, Strategy, Subscription, TArray, THub, TMap, TPriorityQueue,
    TQueue, TReentrantLock, TSemaphore,
};
