//! Commit protocol
//!
//! Turns the outcome of one interpreted attempt into either a final exit or
//! a suspension:
//!
//! 1. Writes: take the global commit lock, validate, install every changed
//!    entry at `expected + 1`, release, then run the wake-ups registered on
//!    the changed TRefs
//! 2. Read-only success and failures: validate without the lock, inside a
//!    stable window of the commit sequence
//! 3. Interruption: final immediately
//! 4. Retry, or any failed validation: suspend with the journal
//!
//! The commit sequence is odd while an install is in progress. A lock-free
//! validation that starts and ends on the same even value observed no
//! partially installed commit.

use crate::interpreter::Outcome;
use crate::journal::Journal;
use crate::stm::AnyValue;
use crate::tref::{TRefCell, Todo};
use crate::validation::{validate_journal, ValidationResult};
use parking_lot::{const_mutex, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;
use strand_core::{Cause, Exit, TxnId};
use tracing::{debug, trace};

/// Spins on an odd sequence before yielding the thread
const SPINS_BEFORE_YIELD: u32 = 64;

/// Result of one commit attempt
#[derive(Debug)]
pub enum TryCommit<A, E> {
    /// The transaction finished
    Done(Exit<A, E>),
    /// The transaction must wait for a change to a TRef in the journal, or
    /// re-run at once if the journal is already stale
    Suspend(Journal),
}

impl<A, E> TryCommit<A, E> {
    /// Check whether the attempt finished
    pub fn is_done(&self) -> bool {
        matches!(self, TryCommit::Done(_))
    }

    /// Transform the exit of a finished attempt
    pub fn map_exit<A2, E2, F>(self, f: F) -> TryCommit<A2, E2>
    where
        F: FnOnce(Exit<A, E>) -> Exit<A2, E2>,
    {
        match self {
            TryCommit::Done(exit) => TryCommit::Done(f(exit)),
            TryCommit::Suspend(journal) => TryCommit::Suspend(journal),
        }
    }
}

/// Global commit coordination
///
/// One lock serializes write commits; the sequence counter lets read-only
/// commits validate without taking it.
#[derive(Debug)]
pub struct CommitManager {
    sequence: AtomicU64,
    commit_lock: Mutex<()>,
}

static GLOBAL: CommitManager = CommitManager::new();

impl CommitManager {
    const fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            commit_lock: const_mutex(()),
        }
    }

    /// The process-wide commit manager
    pub fn global() -> &'static CommitManager {
        &GLOBAL
    }

    /// Number of write commits installed so far
    pub fn write_commits(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) / 2
    }

    /// Validate and install the changed entries of `journal`
    ///
    /// Returns the changed cells so the caller can run their wake-ups once
    /// the lock is released.
    pub(crate) fn commit_writes(
        &self,
        journal: &Journal,
    ) -> Result<Vec<Arc<TRefCell>>, ValidationResult> {
        let _guard = self.commit_lock.lock();

        let validation = validate_journal(journal);
        if !validation.is_valid() {
            return Err(validation);
        }

        self.sequence.fetch_add(1, Ordering::AcqRel);
        let mut changed = Vec::new();
        for entry in journal.entries().filter(|e| e.is_changed()) {
            entry
                .cell()
                .install(Arc::clone(entry.current()), entry.expected_version() + 1);
            changed.push(Arc::clone(entry.cell()));
        }
        self.sequence.fetch_add(1, Ordering::AcqRel);

        Ok(changed)
    }

    /// Validate `journal` against a consistent view of the committed state
    pub(crate) fn validate_stable(&self, journal: &Journal) -> ValidationResult {
        let mut spins = 0u32;
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before % 2 == 0 {
                let result = validate_journal(journal);
                // keep the version reads above ahead of the re-check
                fence(Ordering::Acquire);
                if self.sequence.load(Ordering::Relaxed) == before {
                    return result;
                }
            }
            spins += 1;
            if spins % SPINS_BEFORE_YIELD == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Run every todo registered on `changed`, once per transaction, oldest
/// transaction first
pub(crate) fn wake(changed: &[Arc<TRefCell>]) -> usize {
    let mut todos: BTreeMap<TxnId, Todo> = BTreeMap::new();
    for cell in changed {
        for (txn, todo) in cell.take_todos() {
            todos.entry(txn).or_insert(todo);
        }
    }

    let woken = todos.len();
    for (_, todo) in todos {
        todo();
    }
    woken
}

/// Finish one attempt
pub(crate) fn try_commit(outcome: Outcome, journal: Journal) -> TryCommit<AnyValue, AnyValue> {
    let manager = CommitManager::global();

    match outcome {
        Outcome::Retry => TryCommit::Suspend(journal),
        Outcome::Fail(Cause::Interrupt(fiber)) => TryCommit::Done(Err(Cause::Interrupt(fiber))),
        Outcome::Succeed(value) if journal.has_changes() => match manager.commit_writes(&journal) {
            Ok(changed) => {
                let woken = wake(&changed);
                trace!(
                    target: "strand::stm",
                    refs = changed.len(),
                    woken,
                    "Committed writes"
                );
                TryCommit::Done(Ok(value))
            }
            Err(validation) => {
                debug!(
                    target: "strand::stm",
                    conflicts = validation.conflict_count(),
                    "Write commit failed validation"
                );
                TryCommit::Suspend(journal)
            }
        },
        Outcome::Succeed(value) => {
            if manager.validate_stable(&journal).is_valid() {
                TryCommit::Done(Ok(value))
            } else {
                TryCommit::Suspend(journal)
            }
        }
        Outcome::Fail(cause) => {
            if manager.validate_stable(&journal).is_valid() {
                TryCommit::Done(Err(cause))
            } else {
                TryCommit::Suspend(journal)
            }
        }
    }
}
