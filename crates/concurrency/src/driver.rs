//! Commit drivers
//!
//! [`Committer::commit`] is the asynchronous driver: it runs attempts until
//! one finishes, re-running at once after a conflict and parking the fiber
//! after a retry until a TRef the attempt touched is changed by another
//! commit.
//!
//! [`commit_now`] is the synchronous driver used where awaiting is not
//! possible (for example when a guard is dropped). It re-runs conflicts but
//! gives up on a retry.
//!
//! Every call to a driver allocates one transaction id that stays the same
//! across its attempts. Wake-ups run in ascending id order, so among the
//! transactions woken by one commit the longest-waiting runs first.

use crate::commit::{self, TryCommit};
use crate::fiber;
use crate::interpreter;
use crate::journal::Journal;
use crate::stm::{recover_exit, Context, Stm};
use crate::wait::WaitRegistration;
use std::sync::Arc;
use strand_core::{Exit, FiberId, StmConfig, TxnId};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Run one attempt of `stm` as `fiber` and try to commit it
pub fn attempt<A, E>(stm: &Stm<A, E>, fiber: FiberId) -> TryCommit<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    let mut journal = Journal::new();
    let context = Context::new(fiber);
    let outcome = interpreter::run(stm.node(), &mut journal, &context);
    commit::try_commit(outcome, journal).map_exit(recover_exit::<A, E>)
}

/// Commit `stm` with the default configuration
pub async fn commit<A, E>(stm: Stm<A, E>) -> Exit<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    Committer::default().commit(stm).await
}

/// Commit `stm` without waiting
///
/// Returns `None` if the transaction retried with an up-to-date journal,
/// that is, if committing it would have to wait for another fiber.
pub fn commit_now<A, E>(stm: &Stm<A, E>) -> Option<Exit<A, E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    commit_now_as(stm, fiber::current())
}

/// Commit `stm` without waiting, on behalf of `fiber`
pub fn commit_now_as<A, E>(stm: &Stm<A, E>, fiber: FiberId) -> Option<Exit<A, E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    loop {
        match attempt(stm, fiber) {
            TryCommit::Done(exit) => return Some(exit),
            TryCommit::Suspend(journal) if journal.is_invalid() => continue,
            TryCommit::Suspend(_) => return None,
        }
    }
}

/// Asynchronous commit driver
#[derive(Debug, Clone, Default)]
pub struct Committer {
    config: StmConfig,
}

impl Committer {
    /// Create a driver with `config`
    pub fn new(config: StmConfig) -> Self {
        Self { config }
    }

    /// The driver configuration
    pub fn config(&self) -> &StmConfig {
        &self.config
    }

    /// Run `stm` until it finishes
    ///
    /// Dropping the returned future while it is parked deregisters the
    /// transaction from every TRef it was waiting on.
    pub async fn commit<A, E>(&self, stm: Stm<A, E>) -> Exit<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        self.commit_as(stm, fiber::current()).await
    }

    /// Run `stm` until it finishes, on behalf of `fiber`
    pub async fn commit_as<A, E>(&self, stm: Stm<A, E>, fiber: FiberId) -> Exit<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        let txn = TxnId::next();
        let notify = Arc::new(Notify::new());
        let mut attempts: u64 = 0;
        let mut conflicts: u32 = 0;

        loop {
            attempts += 1;
            if attempts == self.config.warn_after_attempts {
                warn!(
                    target: "strand::stm",
                    %txn,
                    %fiber,
                    attempts,
                    "Transaction has not committed after many attempts"
                );
            }

            let journal = match attempt(&stm, fiber) {
                TryCommit::Done(exit) => {
                    trace!(target: "strand::stm", %txn, attempts, ok = exit.is_ok(), "Transaction finished");
                    return exit;
                }
                TryCommit::Suspend(journal) => journal,
            };

            let registration = WaitRegistration::register(txn, &journal, {
                let notify = Arc::clone(&notify);
                move || notify.notify_one()
            });

            // A commit may have landed between the attempt and the
            // registration. Its wake-up would be lost, so re-run instead.
            if journal.is_invalid() {
                drop(registration);
                conflicts += 1;
                if conflicts >= self.config.yield_after_conflicts {
                    conflicts = 0;
                    debug!(target: "strand::stm", %txn, attempts, "Yielding after repeated conflicts");
                    tokio::task::yield_now().await;
                }
                continue;
            }
            conflicts = 0;
            drop(journal);

            if registration.is_empty() {
                warn!(
                    target: "strand::stm",
                    %txn,
                    %fiber,
                    "Transaction retried without reading any TRef and will never be woken"
                );
            }
            debug!(target: "strand::stm", %txn, refs = registration.len(), "Transaction suspended");

            notify.notified().await;
            drop(registration);
        }
    }
}
