//! Transactional hash map
//!
//! Separate chaining over a [`TArray`] of buckets. Each bucket is its own
//! TRef, so transactions on keys in different buckets only conflict when one
//! of them changes the size or triggers a resize.
//!
//! The bucket array itself lives in a TRef. Growing the map allocates a
//! fresh array with twice the buckets and swaps it in within the same
//! transaction, so a resize is atomic with the insert that caused it.

use crate::tarray::TArray;
use rustc_hash::FxHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use strand_concurrency::{Stm, StmConfig, StmResult, TRef, Tx};

type Bucket<K, V> = Vec<(K, V)>;

/// Grow once `size / capacity` exceeds 3/4
fn over_load_factor(size: usize, capacity: usize) -> bool {
    size * 4 > capacity * 3
}

fn bucket_index<K: Hash>(key: &K, capacity: usize) -> usize {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    let hash = hasher.finish();
    // mix the high bits in before masking
    ((hash ^ (hash >> 32)) as usize) & (capacity - 1)
}

/// Transactional hash map
pub struct TMap<K, V> {
    buckets: TRef<TArray<Bucket<K, V>>>,
    size: TRef<usize>,
}

impl<K, V> Clone for TMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            buckets: self.buckets.clone(),
            size: self.size.clone(),
        }
    }
}

impl<K, V> fmt::Debug for TMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TMap")
            .field("buckets", &self.buckets)
            .field("size", &self.size)
            .finish()
    }
}

impl<K, V> TMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty map with the default initial capacity
    pub fn new() -> Self {
        Self::with_capacity(StmConfig::default().map_initial_capacity)
    }

    /// Create an empty map with at least `capacity` buckets
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            buckets: TRef::new(TArray::new((0..capacity).map(|_| Vec::new()))),
            size: TRef::new(0),
        }
    }

    /// Create an empty map sized according to `config`
    pub fn with_config(config: &StmConfig) -> Self {
        Self::with_capacity(config.map_initial_capacity)
    }

    /// Describe the creation of an empty map
    pub fn empty() -> Stm<Self> {
        Stm::sync(Self::new)
    }

    /// Describe the creation of a map holding `entries`
    ///
    /// Later entries win over earlier entries with the same key.
    pub fn make(entries: Vec<(K, V)>) -> Stm<Self> {
        Stm::sync(move || {
            let mut capacity = StmConfig::default().map_initial_capacity;
            while over_load_factor(entries.len(), capacity) {
                capacity *= 2;
            }
            let mut buckets: Vec<Bucket<K, V>> = (0..capacity).map(|_| Vec::new()).collect();
            let mut size = 0;
            for (key, value) in entries.iter().cloned() {
                let bucket = &mut buckets[bucket_index(&key, capacity)];
                match bucket.iter_mut().find(|(k, _)| *k == key) {
                    Some(slot) => slot.1 = value,
                    None => {
                        bucket.push((key, value));
                        size += 1;
                    }
                }
            }
            Self {
                buckets: TRef::new(TArray::new(buckets)),
                size: TRef::new(size),
            }
        })
    }

    /// Describe the creation of a map from an iterator of entries
    pub fn from_iter<I>(entries: I) -> Stm<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        Self::make(entries.into_iter().collect())
    }

    // ---- transaction-level helpers ----

    fn locate<E: Send + 'static>(
        &self,
        tx: &mut Tx<'_, E>,
        key: &K,
    ) -> StmResult<(TRef<Bucket<K, V>>, Bucket<K, V>), E> {
        let buckets = tx.get(&self.buckets)?;
        let bucket = buckets.refs()[bucket_index(key, buckets.len())].clone();
        let items = tx.get(&bucket)?;
        Ok((bucket, items))
    }

    fn entries_tx<E: Send + 'static>(&self, tx: &mut Tx<'_, E>) -> StmResult<Vec<(K, V)>, E> {
        let buckets = tx.get(&self.buckets)?;
        let mut entries = Vec::new();
        for bucket in buckets.refs() {
            entries.extend(tx.get(bucket)?);
        }
        Ok(entries)
    }

    fn get_tx<E: Send + 'static>(&self, tx: &mut Tx<'_, E>, key: &K) -> StmResult<Option<V>, E> {
        let (_, items) = self.locate(tx, key)?;
        Ok(items.into_iter().find(|(k, _)| k == key).map(|(_, v)| v))
    }

    fn insert_tx<E: Send + 'static>(
        &self,
        tx: &mut Tx<'_, E>,
        key: K,
        value: V,
    ) -> StmResult<Option<V>, E> {
        let (bucket, mut items) = self.locate(tx, &key)?;
        if let Some(slot) = items.iter_mut().find(|(k, _)| *k == key) {
            let previous = std::mem::replace(&mut slot.1, value);
            tx.set(&bucket, items);
            return Ok(Some(previous));
        }

        items.push((key, value));
        tx.set(&bucket, items);
        let size = tx.get(&self.size)? + 1;
        tx.set(&self.size, size);

        let capacity = tx.get(&self.buckets)?.len();
        if over_load_factor(size, capacity) {
            self.resize_tx(tx, capacity * 2)?;
        }
        Ok(None)
    }

    fn remove_tx<E: Send + 'static>(&self, tx: &mut Tx<'_, E>, key: &K) -> StmResult<Option<V>, E> {
        let (bucket, mut items) = self.locate(tx, key)?;
        match items.iter().position(|(k, _)| k == key) {
            Some(index) => {
                let (_, value) = items.swap_remove(index);
                tx.set(&bucket, items);
                tx.update(&self.size, |n| n - 1)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn resize_tx<E: Send + 'static>(&self, tx: &mut Tx<'_, E>, capacity: usize) -> StmResult<(), E> {
        let mut buckets: Vec<Bucket<K, V>> = (0..capacity).map(|_| Vec::new()).collect();
        for (key, value) in self.entries_tx(tx)? {
            buckets[bucket_index(&key, capacity)].push((key, value));
        }
        tx.set(&self.buckets, TArray::new(buckets));
        Ok(())
    }

    /// Keep the entries for which `keep` holds; returns the removed entries
    fn partition_tx<E, P>(&self, tx: &mut Tx<'_, E>, keep: P) -> StmResult<Vec<(K, V)>, E>
    where
        E: Send + 'static,
        P: Fn(&K, &V) -> bool,
    {
        let buckets = tx.get(&self.buckets)?;
        let mut removed = Vec::new();
        for bucket in buckets.refs() {
            let items = tx.get(bucket)?;
            if items.iter().all(|(k, v)| keep(k, v)) {
                continue;
            }
            let (kept, dropped): (Vec<_>, Vec<_>) = items.into_iter().partition(|(k, v)| keep(k, v));
            tx.set(bucket, kept);
            removed.extend(dropped);
        }
        if !removed.is_empty() {
            let count = removed.len();
            tx.update(&self.size, |n| n - count)?;
        }
        Ok(removed)
    }

    // ---- operations ----

    /// Value for `key`
    pub fn get(&self, key: K) -> Stm<Option<V>> {
        let this = self.clone();
        Stm::transact(move |tx| this.get_tx(tx, &key))
    }

    /// Value for `key`, or `default`
    pub fn get_or_else(&self, key: K, default: V) -> Stm<V> {
        self.get(key).map(move |v| v.unwrap_or_else(|| default.clone()))
    }

    /// Check whether `key` is present
    pub fn contains_key(&self, key: K) -> Stm<bool> {
        self.get(key).map(|v| v.is_some())
    }

    /// Insert or replace; yields the previous value
    pub fn set(&self, key: K, value: V) -> Stm<Option<V>> {
        let this = self.clone();
        Stm::transact(move |tx| this.insert_tx(tx, key.clone(), value.clone()))
    }

    /// Insert only when `key` is absent; yields whether it was inserted
    pub fn set_if_absent(&self, key: K, value: V) -> Stm<bool> {
        let this = self.clone();
        Stm::transact(move |tx| {
            if this.get_tx(tx, &key)?.is_some() {
                return Ok(false);
            }
            this.insert_tx(tx, key.clone(), value.clone())?;
            Ok(true)
        })
    }

    /// Remove `key`; yields the removed value
    pub fn remove(&self, key: K) -> Stm<Option<V>> {
        let this = self.clone();
        Stm::transact(move |tx| this.remove_tx(tx, &key))
    }

    /// Remove every key in `keys`
    pub fn remove_all(&self, keys: Vec<K>) -> Stm<()> {
        let this = self.clone();
        Stm::transact(move |tx| {
            for key in &keys {
                this.remove_tx(tx, key)?;
            }
            Ok(())
        })
    }

    /// Replace the entry for `key` with `f` of its current value
    ///
    /// `None` from `f` removes the entry. Yields the new value.
    pub fn update<F>(&self, key: K, f: F) -> Stm<Option<V>>
    where
        F: Fn(Option<V>) -> Option<V> + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            let next = f(this.get_tx(tx, &key)?);
            match &next {
                Some(value) => {
                    this.insert_tx(tx, key.clone(), value.clone())?;
                }
                None => {
                    this.remove_tx(tx, &key)?;
                }
            }
            Ok(next)
        })
    }

    /// Number of entries
    pub fn size(&self) -> Stm<usize> {
        self.size.get()
    }

    /// Check whether the map has no entries
    pub fn is_empty(&self) -> Stm<bool> {
        self.size.get().map(|n| n == 0)
    }

    /// All keys, in bucket order
    pub fn keys(&self) -> Stm<Vec<K>> {
        self.to_vec()
            .map(|entries| entries.into_iter().map(|(k, _)| k).collect())
    }

    /// All values, in bucket order
    pub fn values(&self) -> Stm<Vec<V>> {
        self.to_vec()
            .map(|entries| entries.into_iter().map(|(_, v)| v).collect())
    }

    /// All entries, in bucket order
    pub fn to_vec(&self) -> Stm<Vec<(K, V)>> {
        let this = self.clone();
        Stm::transact(move |tx| this.entries_tx(tx))
    }

    /// All entries, as a standard map
    pub fn to_hash_map(&self) -> Stm<HashMap<K, V>> {
        self.to_vec().map(|entries| entries.into_iter().collect())
    }

    /// Fold over the entries in bucket order
    pub fn fold<B, F>(&self, zero: B, f: F) -> Stm<B>
    where
        B: Clone + Send + Sync + 'static,
        F: Fn(B, &K, &V) -> B + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            Ok(this
                .entries_tx(tx)?
                .iter()
                .fold(zero.clone(), |acc, (k, v)| f(acc, k, v)))
        })
    }

    /// Run the transaction built by `f` for every entry
    pub fn for_each<E, F>(&self, f: F) -> Stm<(), E>
    where
        E: Send + 'static,
        F: Fn(K, V) -> Stm<(), E> + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            for (k, v) in this.entries_tx(tx)? {
                tx.run(&f(k, v))?;
            }
            Ok(())
        })
    }

    /// Keep only the entries matching `predicate`; yields the removed ones
    pub fn retain_if<P>(&self, predicate: P) -> Stm<Vec<(K, V)>>
    where
        P: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| this.partition_tx(tx, &predicate))
    }

    /// Remove the entries matching `predicate`; yields the removed ones
    pub fn remove_if<P>(&self, predicate: P) -> Stm<Vec<(K, V)>>
    where
        P: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| this.partition_tx(tx, |k, v| !predicate(k, v)))
    }

    /// Apply `f` to every value
    pub fn transform_values<F>(&self, f: F) -> Stm<()>
    where
        F: Fn(V) -> V + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            let buckets = tx.get(&this.buckets)?;
            for bucket in buckets.refs() {
                let items = tx.get(bucket)?;
                if items.is_empty() {
                    continue;
                }
                tx.set(bucket, items.into_iter().map(|(k, v)| (k, f(v))).collect());
            }
            Ok(())
        })
    }

    /// Remove and yield the first entry `pf` accepts; retries when none does
    pub fn take_first<B, F>(&self, pf: F) -> Stm<B>
    where
        B: Send + 'static,
        F: Fn(&K, &V) -> Option<B> + Send + Sync + 'static,
    {
        let this = self.clone();
        Stm::transact(move |tx| {
            let found = this
                .entries_tx(tx)?
                .into_iter()
                .find_map(|(k, v)| pf(&k, &v).map(|b| (k, b)));
            match found {
                Some((key, b)) => {
                    this.remove_tx(tx, &key)?;
                    Ok(b)
                }
                None => tx.retry(),
            }
        })
    }
}

impl<K, V> Default for TMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
