//! Transactional priority queue
//!
//! Values are kept in a sorted map keyed by rank. Values that compare equal
//! share one key and are served in insertion order.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use strand_concurrency::{Stm, TRef};

type Comparator<A> = Arc<dyn Fn(&A, &A) -> Ordering + Send + Sync>;

/// A value ordered by a comparator carried alongside it
struct Ranked<A> {
    value: A,
    order: Comparator<A>,
}

impl<A: Clone> Clone for Ranked<A> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            order: Arc::clone(&self.order),
        }
    }
}

impl<A> PartialEq for Ranked<A> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<A> Eq for Ranked<A> {}

impl<A> PartialOrd for Ranked<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Ranked<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.order)(&self.value, &other.value)
    }
}

type Entries<A> = BTreeMap<Ranked<A>, Vec<A>>;

/// Transactional priority queue; smallest value first
pub struct TPriorityQueue<A> {
    entries: TRef<Entries<A>>,
    order: Comparator<A>,
}

impl<A> Clone for TPriorityQueue<A> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            order: Arc::clone(&self.order),
        }
    }
}

impl<A> fmt::Debug for TPriorityQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TPriorityQueue").field(&self.entries).finish()
    }
}

fn insert<A>(entries: &mut Entries<A>, order: &Comparator<A>, value: A)
where
    A: Clone,
{
    let key = Ranked {
        value: value.clone(),
        order: Arc::clone(order),
    };
    entries.entry(key).or_default().push(value);
}

fn drain_first<A>(entries: &mut Entries<A>) -> Option<A> {
    let mut first = entries.first_entry()?;
    let values = first.get_mut();
    let value = values.remove(0);
    if values.is_empty() {
        first.remove();
    }
    Some(value)
}

impl<A> TPriorityQueue<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create an empty queue ordered by `order`
    pub fn new_by<F>(order: F) -> Self
    where
        F: Fn(&A, &A) -> Ordering + Send + Sync + 'static,
    {
        Self {
            entries: TRef::new(BTreeMap::new()),
            order: Arc::new(order),
        }
    }

    /// Create an empty queue in natural order
    pub fn new() -> Self
    where
        A: Ord,
    {
        Self::new_by(A::cmp)
    }

    /// Describe the creation of an empty queue in natural order
    pub fn empty() -> Stm<Self>
    where
        A: Ord,
    {
        Stm::sync(Self::new)
    }

    /// Describe the creation of an empty queue ordered by `order`
    pub fn empty_by<F>(order: F) -> Stm<Self>
    where
        F: Fn(&A, &A) -> Ordering + Send + Sync + 'static,
    {
        let order: Comparator<A> = Arc::new(order);
        Stm::sync(move || Self {
            entries: TRef::new(BTreeMap::new()),
            order: Arc::clone(&order),
        })
    }

    /// Describe the creation of a queue holding `values` in natural order
    pub fn from_iter<I>(values: I) -> Stm<Self>
    where
        A: Ord,
        I: IntoIterator<Item = A>,
    {
        Self::from_iter_by(A::cmp, values)
    }

    /// Describe the creation of a queue holding `values` ordered by `order`
    pub fn from_iter_by<F, I>(order: F, values: I) -> Stm<Self>
    where
        F: Fn(&A, &A) -> Ordering + Send + Sync + 'static,
        I: IntoIterator<Item = A>,
    {
        let order: Comparator<A> = Arc::new(order);
        let values: Vec<A> = values.into_iter().collect();
        Stm::sync(move || {
            let mut entries = BTreeMap::new();
            for value in values.iter().cloned() {
                insert(&mut entries, &order, value);
            }
            Self {
                entries: TRef::new(entries),
                order: Arc::clone(&order),
            }
        })
    }

    /// Add a value
    pub fn offer(&self, value: A) -> Stm<()> {
        self.offer_all(vec![value])
    }

    /// Add every value in `values`
    pub fn offer_all(&self, values: Vec<A>) -> Stm<()> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut entries = tx.get(&this.entries)?;
            for value in values.iter().cloned() {
                insert(&mut entries, &this.order, value);
            }
            tx.set(&this.entries, entries);
            Ok(())
        })
    }

    /// Smallest value without removing it; retries when empty
    pub fn peek(&self) -> Stm<A> {
        self.peek_option().flat_map(|first| match first {
            Some(value) => Stm::succeed(value),
            None => Stm::retry(),
        })
    }

    /// Smallest value without removing it
    pub fn peek_option(&self) -> Stm<Option<A>> {
        self.entries.get().map(|entries| {
            entries
                .values()
                .next()
                .and_then(|values| values.first().cloned())
        })
    }

    /// Remove the smallest value; retries when empty
    pub fn take(&self) -> Stm<A> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut entries = tx.get(&this.entries)?;
            match drain_first(&mut entries) {
                Some(value) => {
                    tx.set(&this.entries, entries);
                    Ok(value)
                }
                None => tx.retry(),
            }
        })
    }

    /// Remove the smallest value, if any
    pub fn take_option(&self) -> Stm<Option<A>> {
        self.take_up_to(1).map(|mut taken| taken.pop())
    }

    /// Remove every value, smallest first
    pub fn take_all(&self) -> Stm<Vec<A>> {
        self.take_up_to(usize::MAX)
    }

    /// Remove up to `max` values, smallest first
    pub fn take_up_to(&self, max: usize) -> Stm<Vec<A>> {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut entries = tx.get(&this.entries)?;
            let mut taken = Vec::new();
            while taken.len() < max {
                match drain_first(&mut entries) {
                    Some(value) => taken.push(value),
                    None => break,
                }
            }
            if !taken.is_empty() {
                tx.set(&this.entries, entries);
            }
            Ok(taken)
        })
    }

    /// Number of values
    pub fn size(&self) -> Stm<usize> {
        self.entries.get().map(|entries| entries.values().map(Vec::len).sum())
    }

    /// Check whether the queue has no values
    pub fn is_empty(&self) -> Stm<bool> {
        self.entries.get().map(|entries| entries.is_empty())
    }

    /// Keep only the values matching `predicate`
    pub fn retain_if<P>(&self, predicate: P) -> Stm<()>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.entries.update(move |mut entries| {
            entries.retain(|_, values| {
                values.retain(|v| predicate(v));
                !values.is_empty()
            });
            entries
        })
    }

    /// Remove the values matching `predicate`
    pub fn remove_if<P>(&self, predicate: P) -> Stm<()>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.retain_if(move |v| !predicate(v))
    }

    /// All values in non-decreasing order
    pub fn to_vec(&self) -> Stm<Vec<A>> {
        self.entries
            .get()
            .map(|entries| entries.into_values().flatten().collect())
    }
}

impl<A> Default for TPriorityQueue<A>
where
    A: Ord + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strand_concurrency::commit_now;

    fn run<T: Send + 'static>(stm: Stm<T>) -> T {
        match commit_now(&stm) {
            Some(Ok(value)) => value,
            _ => panic!("transaction did not succeed"),
        }
    }

    #[test]
    fn test_take_in_order() {
        let queue = TPriorityQueue::new();
        run(queue.offer_all(vec![5, 1, 4, 1, 3]));
        assert_eq!(run(queue.size()), 5);
        assert_eq!(run(queue.peek()), 1);
        assert_eq!(run(queue.take()), 1);
        assert_eq!(run(queue.take()), 1);
        assert_eq!(run(queue.take_up_to(2)), vec![3, 4]);
        assert_eq!(run(queue.take_option()), Some(5));
        assert_eq!(run(queue.take_option()), None);
        assert!(run(queue.is_empty()));
    }

    #[test]
    fn test_empty_take_retries() {
        let queue: TPriorityQueue<u8> = TPriorityQueue::new();
        assert!(commit_now(&queue.take()).is_none());
        assert!(commit_now(&queue.peek()).is_none());
        assert_eq!(run(queue.peek_option()), None);
    }

    #[test]
    fn test_custom_order_and_ties() {
        // order by priority only; equal priorities keep insertion order
        let queue = run(TPriorityQueue::from_iter_by(
            |a: &(u8, &'static str), b: &(u8, &'static str)| b.0.cmp(&a.0),
            vec![(1, "low"), (9, "first"), (9, "second"), (5, "mid")],
        ));
        assert_eq!(
            run(queue.take_all()),
            vec![(9, "first"), (9, "second"), (5, "mid"), (1, "low")]
        );
    }

    #[test]
    fn test_retain_and_remove_if() {
        let queue = run(TPriorityQueue::from_iter(1..=10));
        run(queue.remove_if(|n| n % 3 == 0));
        run(queue.retain_if(|n| *n > 2));
        assert_eq!(run(queue.to_vec()), vec![4, 5, 7, 8, 10]);
    }

    #[test]
    fn test_empty_by_constructs_fresh_queues() {
        let make = TPriorityQueue::empty_by(|a: &i32, b: &i32| b.cmp(a));
        let a = run(make.clone());
        let b = run(make);
        run(a.offer_all(vec![1, 3, 2]));
        assert_eq!(run(a.to_vec()), vec![3, 2, 1]);
        assert!(run(b.is_empty()));
    }

    proptest! {
        #[test]
        fn prop_take_all_is_sorted(values in prop::collection::vec(any::<i16>(), 0..64)) {
            let queue = run(TPriorityQueue::<i16>::empty());
            run(queue.offer_all(values.clone()));
            let taken = run(queue.take_all());
            let mut expected = values;
            expected.sort();
            prop_assert_eq!(taken, expected);
        }
    }
}
