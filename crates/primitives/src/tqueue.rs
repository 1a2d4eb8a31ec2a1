//! Transactional queue
//!
//! A FIFO queue with a capacity and an overflow [`Strategy`]. Shutting the
//! queue down discards its contents; every later operation except
//! `is_shutdown` and `await_shutdown` interrupts the calling fiber.

use crate::strategy::Strategy;
use std::collections::VecDeque;
use std::fmt;
use strand_concurrency::{Defect, Stm, StmResult, TRef, Tx};
use strand_core::Error;

/// Transactional FIFO queue
pub struct TQueue<A> {
    items: TRef<Option<VecDeque<A>>>,
    capacity: usize,
    strategy: Strategy,
}

impl<A> Clone for TQueue<A> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            capacity: self.capacity,
            strategy: self.strategy,
        }
    }
}

impl<A> fmt::Debug for TQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TQueue")
            .field("items", &self.items)
            .field("capacity", &self.capacity)
            .field("strategy", &self.strategy)
            .finish()
    }
}

fn check_capacity(capacity: usize) -> strand_core::Result<()> {
    if capacity == 0 {
        return Err(Error::InvalidArgument(
            "queue capacity must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

impl<A> TQueue<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create a queue outside of any transaction
    ///
    /// Fails when `capacity` is zero.
    pub fn new(capacity: usize, strategy: Strategy) -> strand_core::Result<Self> {
        check_capacity(capacity)?;
        Ok(Self::open_with(capacity, strategy))
    }

    fn open_with(capacity: usize, strategy: Strategy) -> Self {
        Self {
            items: TRef::new(Some(VecDeque::new())),
            capacity,
            strategy,
        }
    }

    fn make(capacity: usize, strategy: Strategy) -> Stm<Self> {
        match check_capacity(capacity) {
            Ok(()) => Stm::sync(move || Self::open_with(capacity, strategy)),
            Err(e) => Stm::die(Defect::from(e).message()),
        }
    }

    /// A queue that makes offers wait while it is full
    pub fn bounded(capacity: usize) -> Stm<Self> {
        Self::make(capacity, Strategy::BackPressure)
    }

    /// A queue that discards new values while it is full
    pub fn dropping(capacity: usize) -> Stm<Self> {
        Self::make(capacity, Strategy::Dropping)
    }

    /// A queue that discards its oldest values to make room
    pub fn sliding(capacity: usize) -> Stm<Self> {
        Self::make(capacity, Strategy::Sliding)
    }

    /// A queue without a capacity limit
    pub fn unbounded() -> Stm<Self> {
        Self::make(usize::MAX, Strategy::BackPressure)
    }

    /// Maximum number of values held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow strategy
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn open<E: Send + 'static>(&self, tx: &mut Tx<'_, E>) -> StmResult<VecDeque<A>, E> {
        match tx.get(&self.items)? {
            Some(items) => Ok(items),
            None => tx.interrupt(),
        }
    }

    /// Add a value; see [`Strategy`] for the behavior when full
    pub fn offer(&self, value: A) -> Stm<bool> {
        self.offer_all(vec![value])
    }

    /// Add every value in `values`
    ///
    /// With back pressure the transaction waits until all of them fit. A
    /// dropping queue adds as many as fit and yields `false` if any was
    /// discarded. A sliding queue discards its oldest values as needed.
    pub fn offer_all(&self, values: Vec<A>) -> Stm<bool> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut items = this.open(tx)?;
            let free = this.capacity - items.len();
            if values.len() <= free {
                items.extend(values.iter().cloned());
                tx.set(&this.items, Some(items));
                return Ok(true);
            }
            match this.strategy {
                Strategy::BackPressure => tx.retry(),
                Strategy::Dropping => {
                    items.extend(values.iter().take(free).cloned());
                    tx.set(&this.items, Some(items));
                    Ok(false)
                }
                Strategy::Sliding => {
                    let keep = values.len().min(this.capacity);
                    let incoming = &values[values.len() - keep..];
                    let overflow = (items.len() + keep).saturating_sub(this.capacity);
                    items.drain(..overflow);
                    items.extend(incoming.iter().cloned());
                    tx.set(&this.items, Some(items));
                    Ok(true)
                }
            }
        })
    }

    /// Remove the oldest value; retries when empty
    pub fn take(&self) -> Stm<A> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut items = this.open(tx)?;
            match items.pop_front() {
                Some(value) => {
                    tx.set(&this.items, Some(items));
                    Ok(value)
                }
                None => tx.retry(),
            }
        })
    }

    /// Remove every value
    pub fn take_all(&self) -> Stm<Vec<A>> {
        self.take_up_to(usize::MAX)
    }

    /// Remove up to `max` values, oldest first
    pub fn take_up_to(&self, max: usize) -> Stm<Vec<A>> {
        self.take_between(0, max)
    }

    /// Remove between `min` and `max` values; retries while fewer than
    /// `min` are available
    pub fn take_between(&self, min: usize, max: usize) -> Stm<Vec<A>> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut items = this.open(tx)?;
            if items.len() < min {
                return tx.retry();
            }
            let n = items.len().min(max);
            if n == 0 {
                return Ok(Vec::new());
            }
            let taken: Vec<A> = items.drain(..n).collect();
            tx.set(&this.items, Some(items));
            Ok(taken)
        })
    }

    /// Remove the oldest value, if any
    pub fn poll(&self) -> Stm<Option<A>> {
        self.take_up_to(1).map(|mut taken| taken.pop())
    }

    /// Oldest value without removing it; retries when empty
    pub fn peek(&self) -> Stm<A> {
        let this = self.clone();
        Stm::transact(move |tx| match this.open(tx)?.front() {
            Some(value) => Ok(value.clone()),
            None => tx.retry(),
        })
    }

    /// Oldest value without removing it
    pub fn peek_option(&self) -> Stm<Option<A>> {
        let this = self.clone();
        Stm::transact(move |tx| Ok(this.open(tx)?.front().cloned()))
    }

    /// Drop values until one matches `predicate`, then remove and yield it
    ///
    /// Retries when no value matches; nothing is dropped in that case.
    pub fn seek<P>(&self, predicate: P) -> Stm<A>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut items = this.open(tx)?;
            match items.iter().position(|v| predicate(v)) {
                Some(index) => {
                    items.drain(..index);
                    let found = items.pop_front();
                    tx.set(&this.items, Some(items));
                    match found {
                        Some(value) => Ok(value),
                        None => tx.die("queue changed during seek"),
                    }
                }
                None => tx.retry(),
            }
        })
    }

    /// Number of values
    pub fn size(&self) -> Stm<usize> {
        let this = self.clone();
        Stm::transact(move |tx| Ok(this.open(tx)?.len()))
    }

    /// Check whether the queue holds no values
    pub fn is_empty(&self) -> Stm<bool> {
        self.size().map(|n| n == 0)
    }

    /// Check whether the queue is at capacity
    pub fn is_full(&self) -> Stm<bool> {
        let capacity = self.capacity;
        self.size().map(move |n| n >= capacity)
    }

    /// Discard the contents and refuse further operations
    pub fn shutdown(&self) -> Stm<()> {
        self.items.set(None)
    }

    /// Check whether the queue was shut down
    pub fn is_shutdown(&self) -> Stm<bool> {
        self.items.get().map(|items| items.is_none())
    }

    /// Wait until the queue is shut down
    pub fn await_shutdown(&self) -> Stm<()> {
        self.is_shutdown().retry_until(|down| *down).unit()
    }
}
