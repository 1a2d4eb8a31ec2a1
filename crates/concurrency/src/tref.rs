//! Transactional references
//!
//! A [`TRef`] is a typed handle to a shared [`TRefCell`]. The cell holds the
//! committed value together with its version, and a registry of wake-up
//! callbacks ("todos") keyed by the id of the transaction that is waiting.
//!
//! Values are stored type-erased so that a journal can track cells of any
//! type in a single map. The typed handle is the only way to write a cell,
//! so a cell always holds the type its handle names.

use crate::stm::Stm;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use strand_core::{TRefId, TxnId, Version, Versioned};

/// A committed, type-erased cell value
pub(crate) type Shared = Arc<dyn Any + Send + Sync>;

/// Wake-up callback registered by a waiting transaction
pub(crate) type Todo = Box<dyn FnOnce() + Send>;

/// Shared storage behind every handle to one transactional reference
pub(crate) struct TRefCell {
    id: TRefId,
    live: RwLock<Versioned<Shared>>,
    todos: Mutex<BTreeMap<TxnId, Todo>>,
}

impl TRefCell {
    fn new(value: Shared) -> Self {
        Self {
            id: TRefId::next(),
            live: RwLock::new(Versioned::initial(value)),
            todos: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn id(&self) -> TRefId {
        self.id
    }

    /// Current committed value and version, read atomically
    pub(crate) fn snapshot(&self) -> Versioned<Shared> {
        self.live.read().clone()
    }

    pub(crate) fn version(&self) -> Version {
        self.live.read().version
    }

    /// Replace the committed value. Only called under the commit lock.
    pub(crate) fn install(&self, value: Shared, version: Version) {
        *self.live.write() = Versioned::new(value, version);
    }

    /// Register `todo` for `txn`. A second registration by the same
    /// transaction replaces the first.
    pub(crate) fn add_todo(&self, txn: TxnId, todo: Todo) {
        self.todos.lock().insert(txn, todo);
    }

    pub(crate) fn remove_todo(&self, txn: TxnId) -> bool {
        self.todos.lock().remove(&txn).is_some()
    }

    /// Remove and return every registered todo
    pub(crate) fn take_todos(&self) -> BTreeMap<TxnId, Todo> {
        std::mem::take(&mut *self.todos.lock())
    }

    pub(crate) fn todo_count(&self) -> usize {
        self.todos.lock().len()
    }
}

impl fmt::Debug for TRefCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TRefCell")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("waiting", &self.todo_count())
            .finish()
    }
}

/// A transactional reference to a value of type `A`
///
/// Cloning a `TRef` yields another handle to the same cell. Reads and writes
/// happen inside transactions, either through the [`Stm`] values returned by
/// the methods below or through [`Tx::get`](crate::Tx::get) and
/// [`Tx::set`](crate::Tx::set).
pub struct TRef<A> {
    cell: Arc<TRefCell>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for TRef<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            _marker: PhantomData,
        }
    }
}

impl<A> PartialEq for TRef<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<A> Eq for TRef<A> {}

impl<A> fmt::Debug for TRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TRef").field(&self.cell.id).finish()
    }
}

impl<A> TRef<A> {
    /// Unique id of the referenced cell
    pub fn id(&self) -> TRefId {
        self.cell.id
    }

    /// Committed version of the cell (0 until the first write commits)
    pub fn version(&self) -> Version {
        self.cell.version()
    }

    /// Number of transactions currently waiting on this cell
    pub fn waiting(&self) -> usize {
        self.cell.todo_count()
    }

    pub(crate) fn cell(&self) -> &Arc<TRefCell> {
        &self.cell
    }

    #[cfg(test)]
    pub(crate) fn from_cell(cell: Arc<TRefCell>) -> Self {
        Self {
            cell,
            _marker: PhantomData,
        }
    }
}

impl<A: 'static> TRef<A> {
    /// Mutable access to the committed value through the only handle to it
    ///
    /// Returns `None` while another handle exists or a transaction still
    /// holds the value. Used to take apart structures linked through TRefs
    /// without going through a commit.
    pub fn get_mut(&mut self) -> Option<&mut A> {
        let cell = Arc::get_mut(&mut self.cell)?;
        Arc::get_mut(&mut cell.live.get_mut().value)?.downcast_mut::<A>()
    }
}

impl<A> TRef<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create a reference outside of any transaction
    pub fn new(value: A) -> Self {
        Self {
            cell: Arc::new(TRefCell::new(Arc::new(value))),
            _marker: PhantomData,
        }
    }

    /// Describe the creation of a reference. Each run of the description
    /// creates a fresh cell.
    pub fn make(value: A) -> Stm<TRef<A>> {
        Stm::sync(move || TRef::new(value.clone()))
    }

    /// Committed value, read outside of any transaction
    ///
    /// For diagnostics only: the value may be stale by the time it is used,
    /// and reading it this way takes no part in validation.
    pub fn peek(&self) -> Option<A> {
        self.cell.snapshot().value.downcast_ref::<A>().cloned()
    }

    /// Read the value
    pub fn get(&self) -> Stm<A> {
        let this = self.clone();
        Stm::transact(move |tx| tx.get(&this))
    }

    /// Overwrite the value
    pub fn set(&self, value: A) -> Stm<()> {
        let this = self.clone();
        Stm::transact(move |tx| {
            tx.set(&this, value.clone());
            Ok(())
        })
    }

    /// Apply `f` to the value
    pub fn update<F>(&self, f: F) -> Stm<()>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| tx.update(&this, &f))
    }

    /// Apply `f` to the value, yielding the old value
    pub fn get_and_update<F>(&self, f: F) -> Stm<A>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |a| (a.clone(), f(a)))
    }

    /// Apply `f` to the value, yielding the new value
    pub fn update_and_get<F>(&self, f: F) -> Stm<A>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        self.modify(move |a| {
            let next = f(a);
            (next.clone(), next)
        })
    }

    /// Overwrite the value, yielding the old value
    pub fn get_and_set(&self, value: A) -> Stm<A> {
        self.modify(move |a| (a, value.clone()))
    }

    /// Apply `f` only when it returns `Some`
    pub fn update_some<F>(&self, f: F) -> Stm<()>
    where
        F: Fn(&A) -> Option<A> + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            let current = tx.get(&this)?;
            if let Some(next) = f(&current) {
                tx.set(&this, next);
            }
            Ok(())
        })
    }

    /// Compute a result and a replacement value from the current value
    pub fn modify<B, F>(&self, f: F) -> Stm<B>
    where
        B: Send + 'static,
        F: Fn(A) -> (B, A) + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| tx.modify(&this, &f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::commit_now;

    fn run<T: Send + 'static>(stm: Stm<T>) -> T {
        match commit_now(&stm) {
            Some(Ok(value)) => value,
            other => panic!("transaction did not succeed: {:?}", other.map(|e| e.is_ok())),
        }
    }

    #[test]
    fn test_new_starts_at_version_zero() {
        let r = TRef::new(7);
        assert_eq!(r.version(), 0);
        assert_eq!(run(r.get()), 7);
    }

    #[test]
    fn test_set_bumps_version() {
        let r = TRef::new(1);
        run(r.set(2));
        assert_eq!(r.version(), 1);
        run(r.set(3));
        assert_eq!(r.version(), 2);
        assert_eq!(run(r.get()), 3);
        assert_eq!(r.peek(), Some(3));
    }

    #[test]
    fn test_clones_share_cell() {
        let a = TRef::new(String::from("x"));
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        run(a.set("y".to_string()));
        assert_eq!(run(b.get()), "y");
    }

    #[test]
    fn test_distinct_refs_are_not_equal() {
        let a = TRef::new(0);
        let b = TRef::new(0);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_modify_family() {
        let r = TRef::new(10);
        assert_eq!(run(r.get_and_update(|n| n + 1)), 10);
        assert_eq!(run(r.update_and_get(|n| n * 2)), 22);
        assert_eq!(run(r.get_and_set(5)), 22);
        assert_eq!(run(r.modify(|n| (n * 100, n - 1))), 500);
        assert_eq!(run(r.get()), 4);
    }

    #[test]
    fn test_update_some_skips_none() {
        let r = TRef::new(3);
        run(r.update_some(|n| if *n > 5 { Some(0) } else { None }));
        assert_eq!(run(r.get()), 3);
        // a skipped update leaves the version alone
        assert_eq!(r.version(), 0);
        run(r.update_some(|n| Some(n + 1)));
        assert_eq!(run(r.get()), 4);
    }

    #[test]
    fn test_make_creates_fresh_cells() {
        let make = TRef::make(1u8);
        let a = run(make.clone());
        let b = run(make);
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_mut_needs_unique_handle() {
        let mut r = TRef::new(vec![1, 2]);
        let other = r.clone();
        assert!(r.get_mut().is_none());
        drop(other);
        r.get_mut().unwrap().push(3);
        assert_eq!(r.peek(), Some(vec![1, 2, 3]));
        // unique access writes in place and leaves the version alone
        assert_eq!(r.version(), 0);
    }

    #[test]
    fn test_todo_registry() {
        let r = TRef::new(());
        let txn = TxnId::next();
        r.cell().add_todo(txn, Box::new(|| {}));
        r.cell().add_todo(txn, Box::new(|| {}));
        assert_eq!(r.waiting(), 1);
        assert!(r.cell().remove_todo(txn));
        assert!(!r.cell().remove_todo(txn));
        assert_eq!(r.waiting(), 0);
    }
}
