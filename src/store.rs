use foldhash::fast::RandomState;
use log::trace;
use std::borrow::Borrow;
use std::collections::hash_map::{self, Entry, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};

/// Outcome of an `insert_or_apply` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOrApply {
    /// The key was absent and the fallback value was inserted.
    Inserted,
    /// The key was present and the function was applied to its value.
    Applied,
}

/// The unsynchronized key-value store behind a `ConcurrentMap`.
///
/// `Store` does no locking of its own. Inside a `ConcurrentMap` it is only
/// reachable through a `ReadGuard` (read-only methods) or a `WriteGuard` (all
/// methods), so several of its operations can be composed into one atomic
/// step while the caller holds the guard.
///
/// # Examples
/// ```
/// use rwmap::ConcurrentMap;
///
/// let map = ConcurrentMap::<u32, String>::new();
/// {
///     // check-then-insert as one atomic step
///     let mut store = map.write();
///     if !store.contains_key(&1) {
///         store.insert(1, "one".to_string());
///     }
/// }
/// assert_eq!(map.get(&1).as_deref(), Some("one"));
/// ```
#[derive(Clone)]
pub struct Store<K, V, S = RandomState> {
    map: HashMap<K, V, S>,
}

impl<K, V> Store<K, V, RandomState> {
    /// Creates an empty `Store`.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty `Store` with room for at least `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::default())
    }
}

impl<K, V, S: Default> Default for Store<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for Store<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.map.iter()).finish()
    }
}

impl<K, V, S> Store<K, V, S> {
    /// Creates an empty `Store` that hashes keys with `hash_builder`.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            map: HashMap::with_hasher(hash_builder),
        }
    }

    /// Creates an empty `Store` with room for at least `capacity` entries.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The initial capacity of the hashmap.
    /// * `hash_builder` - The hasher used for keys.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(capacity, hash_builder),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns how many entries fit without reallocating.
    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }

    /// Returns the hasher used for keys.
    pub fn hasher(&self) -> &S {
        self.map.hasher()
    }

    /// An iterator over all entries, in arbitrary order.
    pub fn iter(&self) -> hash_map::Iter<'_, K, V> {
        self.map.iter()
    }

    /// An iterator over all keys, in arbitrary order.
    pub fn keys(&self) -> hash_map::Keys<'_, K, V> {
        self.map.keys()
    }

    /// Removes every entry, keeping the allocated capacity.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Calls `func` on every entry with read-only access.
    pub fn do_for_each<F>(&self, mut func: F)
    where
        F: FnMut(&K, &V),
    {
        self.map.iter().for_each(|(k, v)| func(k, v));
    }

    /// Calls `func` on every entry, allowing the value to be changed in place.
    pub fn apply_for_each<F>(&mut self, mut func: F)
    where
        F: FnMut(&K, &mut V),
    {
        self.map.iter_mut().for_each(|(k, v)| func(k, v));
    }

    /// Calls `func` on every entry for which `pred` holds.
    pub fn do_for_each_if<P, F>(&self, mut pred: P, mut func: F)
    where
        P: FnMut(&K, &V) -> bool,
        F: FnMut(&K, &V),
    {
        for (k, v) in self.map.iter() {
            if pred(k, v) {
                func(k, v);
            }
        }
    }

    /// Calls `func` on every entry for which `pred` holds, allowing the value
    /// to be changed in place. `pred` only gets a shared view of the value.
    pub fn apply_for_each_if<P, F>(&mut self, mut pred: P, mut func: F)
    where
        P: FnMut(&K, &V) -> bool,
        F: FnMut(&K, &mut V),
    {
        for (k, v) in self.map.iter_mut() {
            if pred(k, &*v) {
                func(k, v);
            }
        }
    }

    /// Like `do_for_each`, but stops at the first `Err` and returns it.
    pub fn try_do_for_each<F, E>(&self, mut func: F) -> Result<(), E>
    where
        F: FnMut(&K, &V) -> Result<(), E>,
    {
        self.map.iter().try_for_each(|(k, v)| func(k, v))
    }

    /// Like `apply_for_each`, but stops at the first `Err` and returns it.
    ///
    /// Entries visited before the failing one keep their changes.
    pub fn try_apply_for_each<F, E>(&mut self, mut func: F) -> Result<(), E>
    where
        F: FnMut(&K, &mut V) -> Result<(), E>,
    {
        self.map.iter_mut().try_for_each(|(k, v)| func(k, v))
    }
}

impl<K, V, S> Store<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Inserts `value` under `key` if the key is absent.
    ///
    /// An existing value is never overwritten: the first insert wins and
    /// `value` is dropped.
    ///
    /// # Returns
    ///
    /// `true` if the entry was inserted.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.emplace(key, || value)
    }

    /// Inserts the value built by `make` if `key` is absent.
    ///
    /// `make` only runs when the entry is actually created.
    pub fn emplace<F>(&mut self, key: K, make: F) -> bool
    where
        F: FnOnce() -> V,
    {
        match self.map.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(make());
                true
            }
        }
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        V: Clone,
        Q: Eq + Hash + ?Sized,
    {
        self.map.get(key).cloned()
    }

    /// Removes `key` and returns its value, if it was present.
    pub fn erase<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.remove(key)
    }

    /// Removes every key in `keys` that is present.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn erase_keys<'q, Q, I>(&mut self, keys: I) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized + 'q,
        I: IntoIterator<Item = &'q Q>,
    {
        keys.into_iter()
            .filter(|key| self.map.remove(*key).is_some())
            .count()
    }

    /// Removes every entry for which `pred` holds.
    ///
    /// Each entry is tested exactly once, in a single pass.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn erase_if<P>(&mut self, mut pred: P) -> usize
    where
        P: FnMut(&K, &V) -> bool,
    {
        let before = self.map.len();
        self.map.retain(|k, v| !pred(k, &*v));
        let removed = before - self.map.len();
        trace!("erase_if removed {} of {} entries", removed, before);
        removed
    }

    /// Removes the entry for `key` only if it is present and `pred` holds.
    pub fn erase_key_if<Q, P>(&mut self, key: &Q, pred: P) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        P: FnOnce(&V) -> bool,
    {
        if self.map.get(key).is_some_and(pred) {
            self.map.remove(key)
        } else {
            None
        }
    }

    /// Calls `func` on the value stored under `key`.
    ///
    /// # Returns
    ///
    /// `Some` with the result of `func`, or `None` if the key is absent.
    pub fn do_for_key<Q, F, R>(&self, key: &Q, func: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        F: FnOnce(&V) -> R,
    {
        self.map.get(key).map(func)
    }

    /// Calls `func` on the value stored under `key`, allowing it to be
    /// changed in place.
    pub fn apply_for_key<Q, F, R>(&mut self, key: &Q, func: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        F: FnOnce(&mut V) -> R,
    {
        self.map.get_mut(key).map(func)
    }

    /// Applies `func` to the value under `key` if present, otherwise inserts
    /// `value`. Exactly one of the two happens, decided by a single lookup.
    pub fn insert_or_apply<F>(&mut self, key: K, value: V, func: F) -> InsertOrApply
    where
        F: FnOnce(&mut V),
    {
        match self.map.entry(key) {
            Entry::Occupied(mut entry) => {
                func(entry.get_mut());
                InsertOrApply::Applied
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
                InsertOrApply::Inserted
            }
        }
    }

    /// Moves every entry out into a new `Store`, leaving this one empty.
    pub fn take(&mut self) -> Self
    where
        S: Clone,
    {
        let empty = HashMap::with_hasher(self.map.hasher().clone());
        Self {
            map: std::mem::replace(&mut self.map, empty),
        }
    }

    /// Consumes the store and returns the underlying `HashMap`.
    pub fn into_map(self) -> HashMap<K, V, S> {
        self.map
    }
}

impl<'a, K, V, S> IntoIterator for &'a Store<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = hash_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

impl<K, V, S> IntoIterator for Store<K, V, S> {
    type Item = (K, V);
    type IntoIter = hash_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_insert_erase() {
        let mut store = Store::<u32, u32>::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);

        assert!(store.insert(1, 10));
        assert!(!store.insert(1, 11));
        assert_eq!(store.get(&1), Some(10));
        assert!(!store.is_empty());
        assert_eq!(store.len(), 1);

        let mut built = false;
        assert!(!store.emplace(1, || {
            built = true;
            12
        }));
        assert!(!built);
        assert!(store.emplace(2, || 20));
        assert_eq!(store.get(&2), Some(20));

        assert_eq!(store.erase(&1), Some(10));
        assert_eq!(store.erase(&1), None);
        assert!(!store.contains_key(&1));
        assert!(store.contains_key(&2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_borrowed_keys() {
        let mut store = Store::<String, String>::with_capacity(16);
        store.insert("hello".to_string(), "world".to_string());
        assert!(store.contains_key("hello"));
        assert_eq!(store.do_for_key("hello", |v| v.len()), Some(5));
        store.apply_for_key("hello", |v| v.push('!'));
        assert_eq!(store.get("hello").as_deref(), Some("world!"));
        assert_eq!(store.erase_key_if("hello", |v| v.is_empty()), None);
        assert_eq!(
            store.erase_key_if("hello", |v| v.ends_with('!')).as_deref(),
            Some("world!")
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_erase_keys() {
        let mut store: Store<u32, u32> = Store::new();
        for i in 0..10 {
            store.insert(i, i);
        }
        assert_eq!(store.erase_keys(&[1u32, 3, 5, 42]), 3);
        assert_eq!(store.erase_keys(&[1u32, 3]), 0);
        assert_eq!(store.len(), 7);
        assert!(!store.contains_key(&5));
        assert!(store.contains_key(&4));
    }

    #[test]
    fn test_store_erase_if() {
        let mut store = Store::<u32, String>::new();
        for i in 0..100 {
            store.insert(i, i.to_string());
        }
        let mut visited = 0;
        let removed = store.erase_if(|k, _| {
            visited += 1;
            k % 3 == 0
        });
        assert_eq!(visited, 100);
        assert_eq!(removed, 34);
        assert_eq!(store.len(), 66);
        store.do_for_each(|k, v| {
            assert_ne!(k % 3, 0);
            assert_eq!(*v, k.to_string());
        });
    }

    #[test]
    fn test_store_for_each() {
        let mut store = Store::<u32, u32>::new();
        for i in 0..10 {
            store.insert(i, 0);
        }
        store.apply_for_each(|k, v| *v = k * 2);
        store.apply_for_each_if(|k, _| k % 2 == 0, |_, v| *v += 1);

        let mut sum = 0u32;
        store.do_for_each(|_, v| sum += v);
        assert_eq!(sum, 90 + 5);

        let mut odd = vec![];
        store.do_for_each_if(|_, v| v % 2 == 1, |k, _| odd.push(*k));
        odd.sort();
        assert_eq!(odd, vec![0, 2, 4, 6, 8]);

        assert_eq!(store.do_for_key(&42, |v| *v), None);
        assert_eq!(store.apply_for_key(&42, |v| *v += 1), None);
    }

    #[test]
    fn test_store_try_for_each() {
        let mut store = Store::<u32, u32>::new();
        for i in 0..10 {
            store.insert(i, i);
        }
        assert_eq!(store.try_do_for_each(|_, _| Ok::<_, ()>(())), Ok(()));
        let result = store.try_do_for_each(|k, _| if *k == 7 { Err(*k) } else { Ok(()) });
        assert_eq!(result, Err(7));

        let mut touched = 0;
        let result = store.try_apply_for_each(|k, v| {
            if *k == 3 {
                return Err("three");
            }
            *v += 100;
            touched += 1;
            Ok(())
        });
        assert_eq!(result, Err("three"));
        let mut changed = 0;
        store.do_for_each(|k, v| {
            if *v == k + 100 {
                changed += 1;
            }
        });
        assert_eq!(changed, touched);
    }

    #[test]
    fn test_store_insert_or_apply() {
        let mut store = Store::<&str, Vec<u32>>::new();
        assert_eq!(
            store.insert_or_apply("a", vec![1], |v| v.push(2)),
            InsertOrApply::Inserted
        );
        assert_eq!(
            store.insert_or_apply("a", vec![9], |v| v.push(2)),
            InsertOrApply::Applied
        );
        assert_eq!(store.get("a"), Some(vec![1, 2]));
    }

    #[test]
    fn test_store_take() {
        let mut store = Store::<u32, u32>::new();
        store.insert(1, 1);
        store.insert(2, 2);
        let taken = store.take();
        assert!(store.is_empty());
        assert_eq!(taken.len(), 2);
        store.insert(3, 3);
        assert_eq!(store.len(), 1);

        let mut entries = taken.into_iter().collect::<Vec<_>>();
        entries.sort();
        assert_eq!(entries, vec![(1, 1), (2, 2)]);
    }
}
