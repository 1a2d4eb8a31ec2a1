//! Identifier types for strand
//!
//! All identifiers are allocated from process-wide monotonic counters, so
//! ordering an identifier also orders its allocation time. The commit
//! protocol relies on this for TxnId: waiters are woken in ascending TxnId
//! order, which is the order their transactions first started.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Version number of a transactional reference
///
/// Starts at 0 when the reference is created and increases by exactly one on
/// every commit that writes the reference.
pub type Version = u64;

/// Unique identifier of a fiber (a cooperatively scheduled unit of work)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FiberId(u64);

/// Set on fiber ids derived from runtime task ids, never on allocated ones
const TASK_FIBER_BIT: u64 = 1 << 63;

impl FiberId {
    /// Allocate a fresh fiber id
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The fiber id of the runtime task numbered `task`
    ///
    /// Task fibers occupy their own range, so they never collide with ids
    /// from [`FiberId::next`].
    pub fn for_task(task: u64) -> Self {
        Self(task | TASK_FIBER_BIT)
    }

    /// Check whether this id was derived from a runtime task
    pub fn is_task(&self) -> bool {
        self.0 & TASK_FIBER_BIT != 0
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

/// Unique identifier of a transaction
///
/// One TxnId is allocated per commit call and kept across all of its
/// attempts, so a blocked transaction keeps its place among the waiters of a
/// reference when it re-registers after a spurious wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Allocate a fresh transaction id
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

/// Identity of a transactional reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TRefId(u64);

impl TRefId {
    /// Allocate a fresh reference id
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tref#{}", self.0)
    }
}
