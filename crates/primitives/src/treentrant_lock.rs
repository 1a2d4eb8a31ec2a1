//! Transactional reentrant read/write lock
//!
//! Locks are owned by fibers. A fiber may take the read lock any number of
//! times, and may take the write lock while it is the only reader. Every
//! acquisition must be matched by a release from the same fiber.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use strand_concurrency::{commit_now_as, fiber, Committer, Exit, FiberId, Stm, TRef};
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum LockState {
    /// Read holds per fiber; empty when unlocked
    Read(BTreeMap<FiberId, usize>),
    /// Held for writing by `fiber`, which may also hold reads
    Write {
        fiber: FiberId,
        writes: usize,
        reads: usize,
    },
}

impl LockState {
    fn unlocked() -> Self {
        LockState::Read(BTreeMap::new())
    }

    fn read_locks(&self) -> usize {
        match self {
            LockState::Read(readers) => readers.values().sum(),
            LockState::Write { reads, .. } => *reads,
        }
    }

    fn write_locks(&self) -> usize {
        match self {
            LockState::Read(_) => 0,
            LockState::Write { writes, .. } => *writes,
        }
    }

    fn fiber_read_locks(&self, id: FiberId) -> usize {
        match self {
            LockState::Read(readers) => readers.get(&id).copied().unwrap_or(0),
            LockState::Write { fiber, reads, .. } if *fiber == id => *reads,
            LockState::Write { .. } => 0,
        }
    }

    fn fiber_write_locks(&self, id: FiberId) -> usize {
        match self {
            LockState::Write { fiber, writes, .. } if *fiber == id => *writes,
            _ => 0,
        }
    }
}

/// Transactional reentrant read/write lock
#[derive(Debug, Clone)]
pub struct TReentrantLock {
    state: TRef<LockState>,
}

impl Default for TReentrantLock {
    fn default() -> Self {
        Self::new()
    }
}

impl TReentrantLock {
    /// Create an unlocked lock outside of any transaction
    pub fn new() -> Self {
        Self {
            state: TRef::new(LockState::unlocked()),
        }
    }

    /// Describe the creation of an unlocked lock
    pub fn make() -> Stm<Self> {
        Stm::sync(Self::new)
    }

    /// Take a read lock for the committing fiber
    ///
    /// Retries while another fiber holds the write lock. Yields the number
    /// of read locks the fiber now holds.
    pub fn acquire_read(&self) -> Stm<usize> {
        let state = self.state.clone();
        Stm::transact(move |tx| {
            let me = tx.fiber_id();
            let next = match tx.get(&state)? {
                LockState::Read(mut readers) => {
                    *readers.entry(me).or_insert(0) += 1;
                    LockState::Read(readers)
                }
                LockState::Write { fiber, writes, reads } if fiber == me => LockState::Write {
                    fiber,
                    writes,
                    reads: reads + 1,
                },
                LockState::Write { .. } => return tx.retry(),
            };
            let held = next.fiber_read_locks(me);
            tx.set(&state, next);
            Ok(held)
        })
    }

    /// Take the write lock for the committing fiber
    ///
    /// Retries while any other fiber holds a lock of either kind. A fiber
    /// holding read locks upgrades only when no other fiber reads. Yields
    /// the number of write locks the fiber now holds.
    pub fn acquire_write(&self) -> Stm<usize> {
        let state = self.state.clone();
        Stm::transact(move |tx| {
            let me = tx.fiber_id();
            let next = match tx.get(&state)? {
                LockState::Read(readers) if readers.keys().all(|id| *id == me) => {
                    LockState::Write {
                        fiber: me,
                        writes: 1,
                        reads: readers.get(&me).copied().unwrap_or(0),
                    }
                }
                LockState::Write { fiber, writes, reads } if fiber == me => LockState::Write {
                    fiber,
                    writes: writes + 1,
                    reads,
                },
                _ => return tx.retry(),
            };
            let held = next.write_locks();
            tx.set(&state, next);
            Ok(held)
        })
    }

    /// Release one read lock held by the committing fiber
    ///
    /// Dies if the fiber holds no read lock. Yields the number of read
    /// locks the fiber still holds.
    pub fn release_read(&self) -> Stm<usize> {
        let state = self.state.clone();
        Stm::transact(move |tx| {
            let me = tx.fiber_id();
            let next = match tx.get(&state)? {
                LockState::Read(mut readers) => match readers.get(&me).copied() {
                    Some(1) => {
                        readers.remove(&me);
                        LockState::Read(readers)
                    }
                    Some(n) => {
                        readers.insert(me, n - 1);
                        LockState::Read(readers)
                    }
                    None => return tx.die(format!("{} does not hold a read lock", me)),
                },
                LockState::Write { fiber, writes, reads } if fiber == me && reads > 0 => {
                    LockState::Write {
                        fiber,
                        writes,
                        reads: reads - 1,
                    }
                }
                LockState::Write { .. } => {
                    return tx.die(format!("{} does not hold a read lock", me))
                }
            };
            let held = next.fiber_read_locks(me);
            tx.set(&state, next);
            Ok(held)
        })
    }

    /// Release one write lock held by the committing fiber
    ///
    /// Dies if the fiber does not hold the write lock. Releasing the last
    /// write lock keeps the fiber's read locks. Yields the number of write
    /// locks the fiber still holds.
    pub fn release_write(&self) -> Stm<usize> {
        let state = self.state.clone();
        Stm::transact(move |tx| {
            let me = tx.fiber_id();
            let next = match tx.get(&state)? {
                LockState::Write { fiber, writes: 1, reads } if fiber == me => {
                    let mut readers = BTreeMap::new();
                    if reads > 0 {
                        readers.insert(me, reads);
                    }
                    LockState::Read(readers)
                }
                LockState::Write { fiber, writes, reads } if fiber == me => LockState::Write {
                    fiber,
                    writes: writes - 1,
                    reads,
                },
                _ => return tx.die(format!("{} does not hold the write lock", me)),
            };
            let held = next.fiber_write_locks(me);
            tx.set(&state, next);
            Ok(held)
        })
    }

    /// Read locks held by all fibers
    pub fn read_locks(&self) -> Stm<usize> {
        self.state.get().map(|state| state.read_locks())
    }

    /// Write locks held (by the single writer, if any)
    pub fn write_locks(&self) -> Stm<usize> {
        self.state.get().map(|state| state.write_locks())
    }

    /// Read locks held by the committing fiber
    pub fn fiber_read_locks(&self) -> Stm<usize> {
        let state = self.state.clone();
        Stm::transact(move |tx| Ok(tx.get(&state)?.fiber_read_locks(tx.fiber_id())))
    }

    /// Write locks held by the committing fiber
    pub fn fiber_write_locks(&self) -> Stm<usize> {
        let state = self.state.clone();
        Stm::transact(move |tx| Ok(tx.get(&state)?.fiber_write_locks(tx.fiber_id())))
    }

    /// Check whether any lock is held
    pub fn is_locked(&self) -> Stm<bool> {
        self.state
            .get()
            .map(|state| state.read_locks() > 0 || state.write_locks() > 0)
    }

    /// Check whether any read lock is held
    pub fn is_read_locked(&self) -> Stm<bool> {
        self.read_locks().map(|n| n > 0)
    }

    /// Check whether the write lock is held
    pub fn is_write_locked(&self) -> Stm<bool> {
        self.write_locks().map(|n| n > 0)
    }

    async fn lock(&self, kind: LockKind) -> Exit<LockGuard, Infallible> {
        let fiber = fiber::current();
        let acquire = match kind {
            LockKind::Read => self.acquire_read(),
            LockKind::Write => self.acquire_write(),
        };
        Committer::default().commit_as(acquire, fiber).await?;
        trace!(target: "strand::stm", %fiber, ?kind, "Lock acquired");
        Ok(LockGuard {
            lock: self.clone(),
            fiber,
            kind,
        })
    }

    /// Wait for a read lock; the guard releases it when dropped
    pub async fn read_lock(&self) -> Exit<LockGuard, Infallible> {
        self.lock(LockKind::Read).await
    }

    /// Wait for the write lock; the guard releases it when dropped
    pub async fn write_lock(&self) -> Exit<LockGuard, Infallible> {
        self.lock(LockKind::Write).await
    }

    /// Run `body` while holding a read lock
    pub async fn with_read_lock<F, T>(&self, body: F) -> Exit<T, Infallible>
    where
        F: Future<Output = T>,
    {
        let _guard = self.read_lock().await?;
        Ok(body.await)
    }

    /// Run `body` while holding the write lock
    pub async fn with_write_lock<F, T>(&self, body: F) -> Exit<T, Infallible>
    where
        F: Future<Output = T>,
    {
        let _guard = self.write_lock().await?;
        Ok(body.await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockKind {
    Read,
    Write,
}

/// A held lock, released on drop by the fiber that acquired it
#[derive(Debug)]
pub struct LockGuard {
    lock: TReentrantLock,
    fiber: FiberId,
    kind: LockKind,
}

impl LockGuard {
    /// The fiber holding the lock
    pub fn fiber(&self) -> FiberId {
        self.fiber
    }

    /// Check whether this guard holds the write lock
    pub fn is_write(&self) -> bool {
        self.kind == LockKind::Write
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let release = match self.kind {
            LockKind::Read => self.lock.release_read(),
            LockKind::Write => self.lock.release_write(),
        };
        match commit_now_as(&release, self.fiber) {
            Some(Ok(_)) => {
                trace!(target: "strand::stm", fiber = %self.fiber, kind = ?self.kind, "Lock released")
            }
            Some(Err(cause)) => {
                warn!(target: "strand::stm", fiber = %self.fiber, %cause, "Failed to release lock")
            }
            None => warn!(target: "strand::stm", fiber = %self.fiber, "Lock release unexpectedly retried"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strand_concurrency::{commit, commit_now};

    fn run<T: Send + 'static>(stm: Stm<T>) -> T {
        match commit_now(&stm) {
            Some(Ok(value)) => value,
            _ => panic!("transaction did not succeed"),
        }
    }

    fn run_as<T: Send + 'static>(stm: Stm<T>, fiber: FiberId) -> Option<T> {
        match commit_now_as(&stm, fiber) {
            Some(Ok(value)) => Some(value),
            Some(Err(cause)) => panic!("transaction failed: {}", cause),
            None => None,
        }
    }

    #[test]
    fn test_reentrant_reads() {
        let lock = TReentrantLock::new();
        assert_eq!(run(lock.acquire_read()), 1);
        assert_eq!(run(lock.acquire_read()), 2);
        assert_eq!(run(lock.fiber_read_locks()), 2);
        assert!(run(lock.is_read_locked()));
        assert!(!run(lock.is_write_locked()));
        assert_eq!(run(lock.release_read()), 1);
        assert_eq!(run(lock.release_read()), 0);
        assert!(!run(lock.is_locked()));
    }

    #[test]
    fn test_readers_share_writers_exclude() {
        let lock = TReentrantLock::new();
        let (a, b) = (FiberId::next(), FiberId::next());

        assert_eq!(run_as(lock.acquire_read(), a), Some(1));
        assert_eq!(run_as(lock.acquire_read(), b), Some(1));
        assert_eq!(run(lock.read_locks()), 2);
        // a cannot upgrade while b reads
        assert_eq!(run_as(lock.acquire_write(), a), None);

        assert_eq!(run_as(lock.release_read(), b), Some(0));
        assert_eq!(run_as(lock.acquire_write(), a), Some(1));
        assert_eq!(run_as(lock.acquire_read(), b), None);
        assert_eq!(run_as(lock.acquire_write(), b), None);
        assert_eq!(run_as(lock.fiber_read_locks(), a), Some(1));
        assert_eq!(run_as(lock.fiber_write_locks(), b), Some(0));
    }

    #[test]
    fn test_write_reentry_and_downgrade() {
        let lock = TReentrantLock::new();
        let a = FiberId::next();
        assert_eq!(run_as(lock.acquire_write(), a), Some(1));
        assert_eq!(run_as(lock.acquire_write(), a), Some(2));
        assert_eq!(run_as(lock.acquire_read(), a), Some(1));
        assert_eq!(run(lock.write_locks()), 2);

        assert_eq!(run_as(lock.release_write(), a), Some(1));
        assert_eq!(run_as(lock.release_write(), a), Some(0));
        // the read taken under the write lock survives
        assert!(run(lock.is_read_locked()));
        assert!(!run(lock.is_write_locked()));
        assert_eq!(run_as(lock.release_read(), a), Some(0));
        assert!(!run(lock.is_locked()));
    }

    #[test]
    fn test_releasing_unheld_lock_dies() {
        let lock = TReentrantLock::new();
        let exit = commit_now(&lock.release_read()).unwrap();
        assert!(exit.unwrap_err().is_die());
        let exit = commit_now(&lock.release_write()).unwrap();
        assert!(exit.unwrap_err().is_die());

        let (a, b) = (FiberId::next(), FiberId::next());
        run_as(lock.acquire_write(), a);
        let exit = commit_now_as(&lock.release_write(), b).unwrap();
        assert!(exit.unwrap_err().is_die());
        assert_eq!(run(lock.write_locks()), 1);
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let lock = TReentrantLock::new();
        {
            let guard = lock.write_lock().await.unwrap();
            assert!(guard.is_write());
            assert_eq!(commit(lock.write_locks()).await, Ok(1));
        }
        assert_eq!(commit(lock.is_locked()).await, Ok(false));

        let value = lock
            .with_read_lock(async { commit(lock.read_locks()).await })
            .await
            .unwrap();
        assert_eq!(value, Ok(1));
        assert_eq!(commit(lock.is_locked()).await, Ok(false));
    }

    #[tokio::test]
    async fn test_plain_tasks_exclude_each_other() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        // both tasks share the single runtime thread
        let lock = TReentrantLock::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let lock = lock.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    lock.with_write_lock(async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(commit(lock.is_locked()).await, Ok(false));
    }

    #[tokio::test]
    async fn test_plain_task_reenters_its_own_lock() {
        let lock = TReentrantLock::new();
        let task = tokio::spawn({
            let lock = lock.clone();
            async move {
                let outer = lock.write_lock().await.unwrap();
                tokio::task::yield_now().await;
                let inner = lock.write_lock().await.unwrap();
                assert_eq!(outer.fiber(), inner.fiber());
                commit(lock.write_locks()).await
            }
        });
        let held = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held, Ok(2));
        assert_eq!(commit(lock.is_locked()).await, Ok(false));
    }

    #[tokio::test]
    async fn test_writer_waits_for_reader() {
        let lock = TReentrantLock::new();
        let reader = lock.read_lock().await.unwrap();

        let writer = fiber::spawn({
            let lock = lock.clone();
            async move { lock.with_write_lock(async { 7 }).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        drop(reader);
        let exit = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, Ok(7));
        assert_eq!(commit(lock.is_locked()).await, Ok(false));
    }
}
