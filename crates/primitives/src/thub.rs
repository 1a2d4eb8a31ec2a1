//! Transactional broadcast hub
//!
//! Published values form a singly linked chain of TRefs. Each node records
//! how many subscribers still have to take it; the last one to take a node
//! clears its value and moves the publisher head past it. A subscriber is a
//! cursor into the chain, so a subscription only sees values published after
//! it subscribed.
//!
//! The hub holds at most `capacity` values that some subscriber has not yet
//! taken. What happens when it is full depends on the [`Strategy`].

use crate::strategy::Strategy;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::ops::Deref;
use strand_concurrency::{commit, commit_now, Defect, Exit, Stm, StmResult, TRef, TRefId, Tx};
use strand_core::Error;
use tracing::warn;

type Link<A> = TRef<Option<HubNode<A>>>;
type Cursor<A> = TRef<Option<Link<A>>>;

/// One published value
///
/// `head` is `None` once every subscriber counted in `subscribers` has taken
/// the value, or when a sliding hub evicted it.
struct HubNode<A: 'static> {
    head: Option<A>,
    subscribers: usize,
    tail: Link<A>,
}

impl<A: Clone + 'static> Clone for HubNode<A> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            subscribers: self.subscribers,
            tail: self.tail.clone(),
        }
    }
}

// A backlog is a chain of nodes each owning the next. Unlink it one node at
// a time so dropping a long chain does not recurse.
impl<A: 'static> Drop for HubNode<A> {
    fn drop(&mut self) {
        let mut next = self.tail.get_mut().and_then(Option::take);
        while let Some(mut node) = next {
            next = node.tail.get_mut().and_then(Option::take);
        }
    }
}

/// Transactional hub delivering every published value to every subscriber
pub struct THub<A: 'static> {
    hub_size: TRef<usize>,
    publisher_head: TRef<Link<A>>,
    /// `None` once the hub is shut down
    publisher_tail: TRef<Option<Link<A>>>,
    subscriber_count: TRef<usize>,
    subscribers: TRef<BTreeMap<TRefId, Cursor<A>>>,
    capacity: usize,
    strategy: Strategy,
}

impl<A: 'static> Clone for THub<A> {
    fn clone(&self) -> Self {
        Self {
            hub_size: self.hub_size.clone(),
            publisher_head: self.publisher_head.clone(),
            publisher_tail: self.publisher_tail.clone(),
            subscriber_count: self.subscriber_count.clone(),
            subscribers: self.subscribers.clone(),
            capacity: self.capacity,
            strategy: self.strategy,
        }
    }
}

impl<A: 'static> fmt::Debug for THub<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("THub")
            .field("hub_size", &self.hub_size)
            .field("capacity", &self.capacity)
            .field("strategy", &self.strategy)
            .finish()
    }
}

fn check_capacity(capacity: usize) -> strand_core::Result<()> {
    if capacity == 0 {
        return Err(Error::InvalidArgument(
            "hub capacity must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Take the node at `link` on behalf of one subscriber
///
/// Returns the node's successor.
fn consume<A, E>(
    hub: &THub<A>,
    tx: &mut Tx<'_, E>,
    link: &Link<A>,
    node: HubNode<A>,
) -> StmResult<Link<A>, E>
where
    A: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    let tail = node.tail.clone();
    if node.head.is_none() {
        return Ok(tail);
    }
    let updated = if node.subscribers <= 1 {
        let size = tx.get(&hub.hub_size)?;
        tx.set(&hub.hub_size, size.saturating_sub(1));
        tx.set(&hub.publisher_head, tail.clone());
        HubNode {
            head: None,
            subscribers: 0,
            tail: tail.clone(),
        }
    } else {
        HubNode {
            head: node.head.clone(),
            subscribers: node.subscribers - 1,
            tail: tail.clone(),
        }
    };
    tx.set(link, Some(updated));
    Ok(tail)
}

impl<A> THub<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create a hub outside of any transaction
    ///
    /// Fails when `capacity` is zero.
    pub fn new(capacity: usize, strategy: Strategy) -> strand_core::Result<Self> {
        check_capacity(capacity)?;
        Ok(Self::open_with(capacity, strategy))
    }

    fn open_with(capacity: usize, strategy: Strategy) -> Self {
        let empty: Link<A> = TRef::new(None);
        Self {
            hub_size: TRef::new(0),
            publisher_head: TRef::new(empty.clone()),
            publisher_tail: TRef::new(Some(empty)),
            subscriber_count: TRef::new(0),
            subscribers: TRef::new(BTreeMap::new()),
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

    /// A hub that makes publishers wait while it is full
    pub fn bounded(capacity: usize) -> Stm<Self> {
        Self::make(capacity, Strategy::BackPressure)
    }

    /// A hub that discards new values while it is full
    pub fn dropping(capacity: usize) -> Stm<Self> {
        Self::make(capacity, Strategy::Dropping)
    }

    /// A hub that evicts its oldest value to make room
    pub fn sliding(capacity: usize) -> Stm<Self> {
        Self::make(capacity, Strategy::Sliding)
    }

    /// A hub without a capacity limit
    pub fn unbounded() -> Stm<Self> {
        Self::make(usize::MAX, Strategy::BackPressure)
    }

    /// Maximum number of values held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn tail<E: Send + 'static>(&self, tx: &mut Tx<'_, E>) -> StmResult<Link<A>, E> {
        match tx.get(&self.publisher_tail)? {
            Some(tail) => Ok(tail),
            None => tx.interrupt(),
        }
    }

    fn evict_oldest<E: Send + 'static>(&self, tx: &mut Tx<'_, E>) -> StmResult<(), E> {
        let mut link = tx.get(&self.publisher_head)?;
        loop {
            let node = match tx.get(&link)? {
                Some(node) => node,
                None => return tx.retry(),
            };
            if node.head.is_some() {
                let tail = node.tail.clone();
                tx.set(
                    &link,
                    Some(HubNode {
                        head: None,
                        subscribers: node.subscribers,
                        tail: tail.clone(),
                    }),
                );
                tx.set(&self.publisher_head, tail);
                return Ok(());
            }
            link = node.tail.clone();
        }
    }

    fn publish_tx<E: Send + 'static>(&self, tx: &mut Tx<'_, E>, value: A) -> StmResult<bool, E> {
        let tail = self.tail(tx)?;
        let subscribers = tx.get(&self.subscriber_count)?;
        if subscribers == 0 {
            return Ok(true);
        }
        let size = tx.get(&self.hub_size)?;
        if size >= self.capacity {
            match self.strategy {
                Strategy::BackPressure => return tx.retry(),
                Strategy::Dropping => return Ok(false),
                Strategy::Sliding => self.evict_oldest(tx)?,
            }
        } else {
            tx.set(&self.hub_size, size + 1);
        }
        let next: Link<A> = TRef::new(None);
        tx.set(
            &tail,
            Some(HubNode {
                head: Some(value),
                subscribers,
                tail: next.clone(),
            }),
        );
        tx.set(&self.publisher_tail, Some(next));
        Ok(true)
    }

    /// Publish a value to every current subscriber
    ///
    /// Yields `false` if a dropping hub discarded it. Publishing with no
    /// subscribers succeeds without storing anything.
    pub fn publish(&self, value: A) -> Stm<bool> {
        let this = self.clone();
        Stm::transact(move |tx| this.publish_tx(tx, value.clone()))
    }

    /// Publish every value in `values`; `false` if any was discarded
    pub fn publish_all(&self, values: Vec<A>) -> Stm<bool> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut all = true;
            for value in values.iter().cloned() {
                all &= this.publish_tx(tx, value)?;
            }
            Ok(all)
        })
    }

    /// Number of values not yet taken by every subscriber
    pub fn size(&self) -> Stm<usize> {
        let this = self.clone();
        Stm::transact(move |tx| {
            this.tail(tx)?;
            tx.get(&this.hub_size)
        })
    }

    /// Check whether the hub holds no values
    pub fn is_empty(&self) -> Stm<bool> {
        self.size().map(|n| n == 0)
    }

    /// Check whether the hub is at capacity
    pub fn is_full(&self) -> Stm<bool> {
        let capacity = self.capacity;
        self.size().map(move |n| n >= capacity)
    }

    /// Number of subscriptions
    pub fn subscriber_count(&self) -> Stm<usize> {
        self.subscriber_count.get()
    }

    /// Subscribe to values published from now on
    pub fn subscribe(&self) -> Stm<Subscription<A>> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let tail = this.tail(tx)?;
            let cursor: Cursor<A> = TRef::new(Some(tail));
            tx.update(&this.subscriber_count, |n| n + 1)?;
            let mut subscribers = tx.get(&this.subscribers)?;
            subscribers.insert(cursor.id(), cursor.clone());
            tx.set(&this.subscribers, subscribers);
            Ok(Subscription {
                hub: this.clone(),
                cursor,
            })
        })
    }

    /// Subscribe for the lifetime of the returned guard
    ///
    /// Dropping the guard unsubscribes.
    pub async fn subscribe_scoped(&self) -> Exit<ScopedSubscription<A>, Infallible> {
        let subscription = commit(self.subscribe()).await?;
        Ok(ScopedSubscription { subscription })
    }

    /// Discard all values and end every subscription
    pub fn shutdown(&self) -> Stm<()> {
        let this = self.clone();
        Stm::transact(move |tx| {
            if tx.get(&this.publisher_tail)?.is_none() {
                return Ok(());
            }
            tx.set(&this.publisher_tail, None);
            for cursor in tx.get(&this.subscribers)?.values() {
                tx.set(cursor, None);
            }
            tx.set(&this.subscribers, BTreeMap::new());
            Ok(())
        })
    }

    /// Check whether the hub was shut down
    pub fn is_shutdown(&self) -> Stm<bool> {
        self.publisher_tail.get().map(|tail| tail.is_none())
    }

    /// Wait until the hub is shut down
    pub fn await_shutdown(&self) -> Stm<()> {
        self.is_shutdown().retry_until(|down| *down).unit()
    }
}

/// A subscriber's view of a [`THub`]
pub struct Subscription<A: 'static> {
    hub: THub<A>,
    cursor: Cursor<A>,
}

impl<A: 'static> Clone for Subscription<A> {
    fn clone(&self) -> Self {
        Self {
            hub: self.hub.clone(),
            cursor: self.cursor.clone(),
        }
    }
}

impl<A: 'static> fmt::Debug for Subscription<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl<A> Subscription<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn cursor<E: Send + 'static>(&self, tx: &mut Tx<'_, E>) -> StmResult<Link<A>, E> {
        match tx.get(&self.cursor)? {
            Some(link) => Ok(link),
            None => tx.interrupt(),
        }
    }

    /// Take up to `max` values, advancing the cursor past them
    fn take_tx<E: Send + 'static>(&self, tx: &mut Tx<'_, E>, max: usize) -> StmResult<Vec<A>, E> {
        let start = self.cursor(tx)?;
        let mut link = start.clone();
        let mut taken = Vec::new();
        while taken.len() < max {
            let node = match tx.get(&link)? {
                Some(node) => node,
                None => break,
            };
            if let Some(value) = node.head.clone() {
                taken.push(value);
            }
            link = consume(&self.hub, tx, &link, node)?;
        }
        if link != start {
            tx.set(&self.cursor, Some(link));
        }
        Ok(taken)
    }

    /// Take the next value; retries until one is published
    pub fn take(&self) -> Stm<A> {
        let this = self.clone();
        Stm::transact(move |tx| match this.take_tx(tx, 1)?.pop() {
            Some(value) => Ok(value),
            None => tx.retry(),
        })
    }

    /// Take every pending value
    pub fn take_all(&self) -> Stm<Vec<A>> {
        self.take_up_to(usize::MAX)
    }

    /// Take up to `max` pending values
    pub fn take_up_to(&self, max: usize) -> Stm<Vec<A>> {
        let this = self.clone();
        Stm::transact(move |tx| this.take_tx(tx, max))
    }

    /// Take the next value, if any
    pub fn poll(&self) -> Stm<Option<A>> {
        self.take_up_to(1).map(|mut taken| taken.pop())
    }

    /// Next value without taking it
    pub fn peek_option(&self) -> Stm<Option<A>> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut link = this.cursor(tx)?;
            while let Some(node) = tx.get(&link)? {
                if node.head.is_some() {
                    return Ok(node.head.clone());
                }
                link = node.tail.clone();
            }
            Ok(None)
        })
    }

    /// Number of values waiting for this subscriber
    pub fn size(&self) -> Stm<usize> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut link = this.cursor(tx)?;
            let mut n = 0;
            while let Some(node) = tx.get(&link)? {
                if node.head.is_some() {
                    n += 1;
                }
                link = node.tail.clone();
            }
            Ok(n)
        })
    }

    /// Check whether no value is waiting for this subscriber
    pub fn is_empty(&self) -> Stm<bool> {
        self.size().map(|n| n == 0)
    }

    /// Stop receiving values
    ///
    /// Values this subscriber had not taken are released as if taken.
    /// Unsubscribing twice is a no-op.
    pub fn unsubscribe(&self) -> Stm<()> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut link = match tx.get(&this.cursor)? {
                Some(link) => link,
                None => return Ok(()),
            };
            let hub = &this.hub;
            tx.set(&this.cursor, None);
            tx.update(&hub.subscriber_count, |n| n.saturating_sub(1))?;
            let mut subscribers = tx.get(&hub.subscribers)?;
            subscribers.remove(&this.cursor.id());
            tx.set(&hub.subscribers, subscribers);
            while let Some(node) = tx.get(&link)? {
                let current = link.clone();
                link = consume(hub, tx, &current, node)?;
            }
            Ok(())
        })
    }

    /// Check whether the subscription ended, by unsubscribing or by the
    /// hub shutting down
    pub fn is_shutdown(&self) -> Stm<bool> {
        self.cursor.get().map(|cursor| cursor.is_none())
    }
}

/// A subscription that unsubscribes when dropped
pub struct ScopedSubscription<A>
where
    A: Clone + Send + Sync + 'static,
{
    subscription: Subscription<A>,
}

impl<A> Deref for ScopedSubscription<A>
where
    A: Clone + Send + Sync + 'static,
{
    type Target = Subscription<A>;

    fn deref(&self) -> &Subscription<A> {
        &self.subscription
    }
}

impl<A> fmt::Debug for ScopedSubscription<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScopedSubscription")
            .field(&self.subscription)
            .finish()
    }
}

impl<A> Drop for ScopedSubscription<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        match commit_now(&self.subscription.unsubscribe()) {
            Some(Ok(())) => {}
            Some(Err(cause)) => warn!(target: "strand::stm", %cause, "Failed to unsubscribe"),
            None => warn!(target: "strand::stm", "Unsubscribe unexpectedly retried"),
        }
    }
}
