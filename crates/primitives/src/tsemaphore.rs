//! Transactional semaphore
//!
//! Permits are a single counter. Acquiring more permits than are available
//! retries, so the acquiring fiber parks until a release changes the count.

use std::convert::Infallible;
use std::future::Future;
use strand_concurrency::{commit, commit_now, Exit, Stm, TRef};
use tracing::{trace, warn};

/// Transactional counting semaphore
#[derive(Debug, Clone)]
pub struct TSemaphore {
    permits: TRef<usize>,
}

impl TSemaphore {
    /// Create a semaphore outside of any transaction
    pub fn new(permits: usize) -> Self {
        Self {
            permits: TRef::new(permits),
        }
    }

    /// Describe the creation of a semaphore
    pub fn make(permits: usize) -> Stm<Self> {
        Stm::sync(move || Self::new(permits))
    }

    /// Take one permit; retries while none is available
    pub fn acquire(&self) -> Stm<()> {
        self.acquire_n(1)
    }

    /// Take `n` permits at once; retries while fewer than `n` are available
    pub fn acquire_n(&self, n: usize) -> Stm<()> {
        let permits = self.permits.clone();
        Stm::transact(move |tx| {
            let available = tx.get(&permits)?;
            tx.check(available >= n)?;
            tx.set(&permits, available - n);
            Ok(())
        })
    }

    /// Take one permit if available
    pub fn try_acquire(&self) -> Stm<bool> {
        self.try_acquire_n(1)
    }

    /// Take `n` permits if that many are available
    pub fn try_acquire_n(&self, n: usize) -> Stm<bool> {
        self.acquire_n(n).as_value(true).or_try(Stm::succeed(false))
    }

    /// Return one permit
    pub fn release(&self) -> Stm<()> {
        self.release_n(1)
    }

    /// Return `n` permits
    ///
    /// Dies if the permit count would overflow.
    pub fn release_n(&self, n: usize) -> Stm<()> {
        let permits = self.permits.clone();
        Stm::transact(move |tx| {
            let available = tx.get(&permits)?;
            match available.checked_add(n) {
                Some(total) => {
                    tx.set(&permits, total);
                    Ok(())
                }
                None => tx.die(format!(
                    "releasing {} permits overflows a semaphore holding {}",
                    n, available
                )),
            }
        })
    }

    /// Permits currently available
    pub fn available(&self) -> Stm<usize> {
        self.permits.get()
    }

    /// Run `body` while holding one permit
    pub async fn with_permit<F, T>(&self, body: F) -> Exit<T, Infallible>
    where
        F: Future<Output = T>,
    {
        self.with_permits(1, body).await
    }

    /// Run `body` while holding `n` permits
    ///
    /// The permits are returned once `body` completes, or when the returned
    /// future is dropped. Dropping it while still waiting takes no permits.
    pub async fn with_permits<F, T>(&self, n: usize, body: F) -> Exit<T, Infallible>
    where
        F: Future<Output = T>,
    {
        commit(self.acquire_n(n)).await?;
        trace!(target: "strand::stm", permits = n, "Semaphore permits acquired");
        let _guard = PermitGuard {
            semaphore: self.clone(),
            permits: n,
        };
        Ok(body.await)
    }
}

/// Returns held permits on drop
struct PermitGuard {
    semaphore: TSemaphore,
    permits: usize,
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        match commit_now(&self.semaphore.release_n(self.permits)) {
            Some(Ok(())) => {
                trace!(target: "strand::stm", permits = self.permits, "Semaphore permits released")
            }
            Some(Err(cause)) => {
                warn!(target: "strand::stm", %cause, "Failed to release semaphore permits")
            }
            None => warn!(target: "strand::stm", "Semaphore release unexpectedly retried"),
        }
    }
}
