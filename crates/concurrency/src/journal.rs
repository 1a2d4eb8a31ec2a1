//! Transaction journal
//!
//! A journal records, for every TRef an attempt touches, the version that
//! was observed on first access, the value at that point, and the value the
//! attempt currently sees. The commit protocol validates the observed
//! versions and installs the current values of changed entries.
//!
//! Entries are created on first access, read or write. A blind write
//! therefore still records the version it was based on, and conflicts with
//! any concurrent commit to the same TRef.

use crate::tref::{Shared, TRef, TRefCell};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use strand_core::{TRefId, Version};

/// Journal record for one TRef
#[derive(Clone)]
pub(crate) struct Entry {
    cell: Arc<TRefCell>,
    expected: Version,
    original: Shared,
    current: Shared,
    changed: bool,
}

impl Entry {
    fn observe(cell: &Arc<TRefCell>) -> Self {
        let snapshot = cell.snapshot();
        Self {
            cell: Arc::clone(cell),
            expected: snapshot.version,
            original: Arc::clone(&snapshot.value),
            current: snapshot.value,
            changed: false,
        }
    }

    pub(crate) fn cell(&self) -> &Arc<TRefCell> {
        &self.cell
    }

    pub(crate) fn expected_version(&self) -> Version {
        self.expected
    }

    pub(crate) fn current(&self) -> &Shared {
        &self.current
    }

    pub(crate) fn is_changed(&self) -> bool {
        self.changed
    }

    /// The TRef still holds the version this entry observed
    pub(crate) fn is_valid(&self) -> bool {
        self.cell.version() == self.expected
    }

    fn forget_write(&mut self) {
        self.current = Arc::clone(&self.original);
        self.changed = false;
    }
}

/// Frozen copy of a journal, used to undo the effects of an alternative
/// that retried or failed
#[derive(Clone)]
pub(crate) struct Checkpoint {
    entries: Arc<FxHashMap<TRefId, Entry>>,
}

/// Per-attempt record of TRef accesses
#[derive(Clone, Default)]
pub struct Journal {
    entries: FxHashMap<TRefId, Entry>,
}

impl Journal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of TRefs touched
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No TRef was touched
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// At least one entry holds an uncommitted write
    pub fn has_changes(&self) -> bool {
        self.entries.values().any(Entry::is_changed)
    }

    /// Every observed version is still the committed version
    pub fn is_valid(&self) -> bool {
        self.entries.values().all(Entry::is_valid)
    }

    /// Some TRef was committed to since it was observed
    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    /// Ids of every TRef touched
    pub fn refs(&self) -> impl Iterator<Item = TRefId> + '_ {
        self.entries.keys().copied()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.entries.values()
    }

    fn entry(&mut self, cell: &Arc<TRefCell>) -> &mut Entry {
        self.entries
            .entry(cell.id())
            .or_insert_with(|| Entry::observe(cell))
    }

    /// Value of `tref` as seen by this attempt. `None` only if the cell
    /// holds a value of another type.
    pub(crate) fn read<A>(&mut self, tref: &TRef<A>) -> Option<A>
    where
        A: Clone + Send + Sync + 'static,
    {
        self.entry(tref.cell()).current.downcast_ref::<A>().cloned()
    }

    pub(crate) fn write<A>(&mut self, tref: &TRef<A>, value: A)
    where
        A: Clone + Send + Sync + 'static,
    {
        let entry = self.entry(tref.cell());
        entry.current = Arc::new(value);
        entry.changed = true;
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            entries: Arc::new(self.entries.clone()),
        }
    }

    /// Undo everything written since `checkpoint`
    ///
    /// Entries that existed at the checkpoint are restored. Entries created
    /// afterwards keep their observed version, so the TRefs they describe
    /// stay part of validation and of retry wake-up, but lose their writes.
    pub(crate) fn reset(&mut self, checkpoint: &Checkpoint) {
        for (id, entry) in self.entries.iter_mut() {
            match checkpoint.entries.get(id) {
                Some(saved) => *entry = saved.clone(),
                None => entry.forget_write(),
            }
        }
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("refs", &self.entries.len())
            .field("changed", &self.entries.values().filter(|e| e.changed).count())
            .finish()
    }
}
