//! Transactional array
//!
//! A fixed-length array with one TRef per element, so transactions touching
//! different indices never conflict with each other.

use std::fmt;
use std::sync::Arc;
use strand_concurrency::{Stm, StmResult, TRef, Tx};

/// Fixed-length array of transactional cells
pub struct TArray<A> {
    refs: Arc<[TRef<A>]>,
}

impl<A> Clone for TArray<A> {
    fn clone(&self) -> Self {
        Self {
            refs: Arc::clone(&self.refs),
        }
    }
}

impl<A> fmt::Debug for TArray<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TArray").field("len", &self.refs.len()).finish()
    }
}

fn out_of_bounds<T, E>(tx: &Tx<'_, E>, index: usize, len: usize) -> StmResult<T, E>
where
    E: Send + 'static,
{
    tx.die(format!("index {} out of bounds for TArray of length {}", index, len))
}

impl<A> TArray<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create an array outside of any transaction
    pub fn new<I: IntoIterator<Item = A>>(values: I) -> Self {
        Self {
            refs: values.into_iter().map(TRef::new).collect(),
        }
    }

    /// Describe the creation of an array; each run creates fresh cells
    pub fn make(values: Vec<A>) -> Stm<Self> {
        Stm::sync(move || TArray::new(values.clone()))
    }

    /// An array with no elements
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Check whether the array has no elements
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// The cells backing the array
    pub fn refs(&self) -> &[TRef<A>] {
        &self.refs
    }

    fn read_all<E: Send + 'static>(&self, tx: &mut Tx<'_, E>) -> StmResult<Vec<A>, E> {
        self.refs.iter().map(|r| tx.get(r)).collect()
    }

    /// Element at `index`. Dies when `index` is out of bounds.
    pub fn get(&self, index: usize) -> Stm<A> {
        let this = self.clone();
        Stm::transact(move |tx| match this.refs.get(index) {
            Some(r) => tx.get(r),
            None => out_of_bounds(tx, index, this.len()),
        })
    }

    /// Overwrite the element at `index`. Dies when out of bounds.
    pub fn set(&self, index: usize, value: A) -> Stm<()> {
        let this = self.clone();
        Stm::transact(move |tx| match this.refs.get(index) {
            Some(r) => {
                tx.set(r, value.clone());
                Ok(())
            }
            None => out_of_bounds(tx, index, this.len()),
        })
    }

    /// Apply `f` to the element at `index`. Dies when out of bounds.
    pub fn update<F>(&self, index: usize, f: F) -> Stm<()>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| match this.refs.get(index) {
            Some(r) => tx.update(r, &f),
            None => out_of_bounds(tx, index, this.len()),
        })
    }

    /// Apply `f` to every element
    pub fn transform<F>(&self, f: F) -> Stm<()>
    where
        F: Fn(A) -> A + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            for r in this.refs.iter() {
                tx.update(r, &f)?;
            }
            Ok(())
        })
    }

    /// Fold the elements from the first to the last
    pub fn fold<B, F>(&self, zero: B, f: F) -> Stm<B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(B, &A) -> B + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            let mut acc = zero.clone();
            for r in this.refs.iter() {
                acc = f(acc, &tx.get(r)?);
            }
            Ok(acc)
        })
    }

    /// Combine the elements with `f`; `None` when empty
    pub fn reduce_option<F>(&self, f: F) -> Stm<Option<A>>
    where
        F: Fn(A, A) -> A + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| Ok(this.read_all(tx)?.into_iter().reduce(&f)))
    }

    /// First element matching `predicate`
    pub fn find<P>(&self, predicate: P) -> Stm<Option<A>>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            for r in this.refs.iter() {
                let value = tx.get(r)?;
                if predicate(&value) {
                    return Ok(Some(value));
                }
            }
            Ok(None)
        })
    }

    /// Index of the first element matching `predicate`
    pub fn find_index<P>(&self, predicate: P) -> Stm<Option<usize>>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            for (index, r) in this.refs.iter().enumerate() {
                if predicate(&tx.get(r)?) {
                    return Ok(Some(index));
                }
            }
            Ok(None)
        })
    }

    /// Some element equals `value`
    pub fn contains(&self, value: A) -> Stm<bool>
    where
        A: PartialEq,
    {
        self.exists(move |a| *a == value)
    }

    /// Number of elements matching `predicate`
    pub fn count<P>(&self, predicate: P) -> Stm<usize>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.fold(0, move |n, a| if predicate(a) { n + 1 } else { n })
    }

    /// Some element matches `predicate`
    pub fn exists<P>(&self, predicate: P) -> Stm<bool>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.find_index(predicate).map(|found| found.is_some())
    }

    /// Every element matches `predicate`
    pub fn for_all<P>(&self, predicate: P) -> Stm<bool>
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.exists(move |a| !predicate(a)).map(|found| !found)
    }

    /// First element, if any
    pub fn head_option(&self) -> Stm<Option<A>> {
        match self.refs.first() {
            Some(r) => r.get().map(Some),
            None => Stm::succeed(None),
        }
    }

    /// Last element, if any
    pub fn last_option(&self) -> Stm<Option<A>> {
        match self.refs.last() {
            Some(r) => r.get().map(Some),
            None => Stm::succeed(None),
        }
    }

    /// Largest element, if any
    pub fn max_option(&self) -> Stm<Option<A>>
    where
        A: Ord,
    {
        let this = self.clone();
        Stm::transact(move |tx| Ok(this.read_all(tx)?.into_iter().max()))
    }

    /// Smallest element, if any
    pub fn min_option(&self) -> Stm<Option<A>>
    where
        A: Ord,
    {
        let this = self.clone();
        Stm::transact(move |tx| Ok(this.read_all(tx)?.into_iter().min()))
    }

    /// All elements, in order
    pub fn to_vec(&self) -> Stm<Vec<A>> {
        let this = self.clone();
        Stm::transact(move |tx| this.read_all(tx))
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
    fn test_get_set_update() {
        let array = TArray::new(vec![1, 2, 3]);
        assert_eq!(array.len(), 3);
        run(array.set(0, 10));
        run(array.update(2, |n| n * 3));
        assert_eq!(run(array.to_vec()), vec![10, 2, 9]);
        assert_eq!(run(array.get(1)), 2);
    }

    #[test]
    fn test_out_of_bounds_dies() {
        let array = TArray::new(vec!['a']);
        let exit = commit_now(&array.get(5)).unwrap();
        let cause = exit.unwrap_err();
        assert!(cause.is_die());
        assert!(cause.defect().unwrap().message().contains("out of bounds"));

        assert!(commit_now(&array.set(1, 'b')).unwrap().is_err());
    }

    #[test]
    fn test_queries() {
        let array = TArray::new(vec![4, 8, 15, 16, 23, 42]);
        assert_eq!(run(array.find(|n| n % 2 == 1)), Some(15));
        assert_eq!(run(array.find_index(|n| *n > 20)), Some(4));
        assert_eq!(run(array.find_index(|n| *n > 100)), None);
        assert!(run(array.contains(16)));
        assert!(!run(array.contains(17)));
        assert_eq!(run(array.count(|n| n % 2 == 0)), 4);
        assert!(run(array.exists(|n| *n == 42)));
        assert!(run(array.for_all(|n| *n > 0)));
        assert!(!run(array.for_all(|n| *n > 4)));
        assert_eq!(run(array.head_option()), Some(4));
        assert_eq!(run(array.last_option()), Some(42));
        assert_eq!(run(array.max_option()), Some(42));
        assert_eq!(run(array.min_option()), Some(4));
        assert_eq!(run(array.reduce_option(|a, b| a + b)), Some(108));
    }

    #[test]
    fn test_empty_array() {
        let array: TArray<i32> = TArray::empty();
        assert!(array.is_empty());
        assert_eq!(run(array.head_option()), None);
        assert_eq!(run(array.last_option()), None);
        assert_eq!(run(array.max_option()), None);
        assert_eq!(run(array.reduce_option(|a, b| a + b)), None);
        assert!(run(array.for_all(|_| false)));
    }

    #[test]
    fn test_transform() {
        let array = TArray::new(vec![1, 2, 3]);
        run(array.transform(|n| n * n));
        assert_eq!(run(array.to_vec()), vec![1, 4, 9]);
    }

    #[test]
    fn test_make_creates_fresh_cells() {
        let make = TArray::make(vec![0u8; 2]);
        let a = run(make.clone());
        let b = run(make);
        run(a.set(0, 1));
        assert_eq!(run(b.get(0)), 0);
    }

    proptest! {
        #[test]
        fn prop_fold_matches_iterator(values in prop::collection::vec(-1000i64..1000, 0..40)) {
            let array = TArray::new(values.clone());
            let sum = run(array.fold(0i64, |acc, n| acc + n));
            prop_assert_eq!(sum, values.iter().sum::<i64>());
            prop_assert_eq!(run(array.to_vec()), values);
        }
    }
}
