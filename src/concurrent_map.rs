use crate::futex::RwLock;
use crate::{InsertOrApply, Store};
use foldhash::fast::RandomState;
use log::{debug, trace};
use std::borrow::Borrow;
use std::cell::UnsafeCell;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::{Deref, DerefMut};

/// A thread-safe hashmap guarded by a single reader/writer lock.
///
/// Every method on `ConcurrentMap` manages the lock itself: queries take it
/// shared, anything that may change the map takes it exclusive, and the lock
/// is released on every exit path including a panicking callback.
///
/// To run several steps as one atomic operation, hold a guard from
/// [`read`](Self::read) or [`write`](Self::write) and call the same methods on
/// the [`Store`] behind it. Those calls never touch the lock.
pub struct ConcurrentMap<K, V, S = RandomState> {
    lock: RwLock,
    store: UnsafeCell<Store<K, V, S>>,
}

// Safety: the store is only reached through the lock, with the same rules as
// `std::sync::RwLock<Store<K, V, S>>`.
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Sync for ConcurrentMap<K, V, S> {}

impl<K, V, S: Default> Default for ConcurrentMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V> ConcurrentMap<K, V, RandomState> {
    /// Creates an empty `ConcurrentMap`.
    ///
    /// # Examples
    /// ```
    /// use rwmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::<String, u32>::new();
    /// assert!(map.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::from_store(Store::new())
    }

    /// Creates an empty `ConcurrentMap` with room for at least `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_store(Store::with_capacity(capacity))
    }

    /// Creates a `ConcurrentMap` holding `pairs`.
    ///
    /// Duplicate keys follow the insert rule: the first pair wins.
    ///
    /// # Arguments
    ///
    /// * `pairs` - The initial entries.
    /// * `capacity` - The initial capacity of the hashmap, `0` to size it from `pairs`.
    ///
    /// # Examples
    /// ```
    /// use rwmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::from_pairs([(1, "a"), (2, "b"), (1, "c")], 16);
    /// assert_eq!(map.len(), 2);
    /// assert_eq!(map.get(&1), Some("a"));
    /// ```
    pub fn from_pairs<I>(pairs: I, capacity: usize) -> Self
    where
        K: Eq + Hash,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut store = Store::with_capacity(capacity);
        fill(&mut store, pairs);
        Self::from_store(store)
    }
}

impl<K, V, S> ConcurrentMap<K, V, S> {
    /// Creates an empty `ConcurrentMap` that hashes keys with `hash_builder`.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::from_store(Store::with_hasher(hash_builder))
    }

    /// Creates an empty `ConcurrentMap` with the given capacity and hasher.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The initial capacity of the hashmap.
    /// * `hash_builder` - The hasher used for keys.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self::from_store(Store::with_capacity_and_hasher(capacity, hash_builder))
    }

    /// Wraps an existing `Store` in a new, unlocked `ConcurrentMap`.
    pub fn from_store(store: Store<K, V, S>) -> Self {
        Self {
            lock: RwLock::new(),
            store: UnsafeCell::new(store),
        }
    }

    /// Acquires the lock shared and returns a guard over the store.
    ///
    /// The guard gives the read-only `Store` methods, none of which lock
    /// again. Other readers may hold the lock at the same time.
    ///
    /// **Locking behaviour:** Deadlock if the current thread holds a `WriteGuard` on the same map.
    /// Taking a second guard, or calling any method of the same map, while
    /// holding a `ReadGuard` may deadlock: a writer queued in between blocks
    /// new readers until the first guard is dropped.
    pub fn read(&self) -> ReadGuard<'_, K, V, S> {
        self.lock.read();
        ReadGuard {
            lock: &self.lock,
            // Safety: the shared lock is held until the guard drops.
            store: unsafe { &*self.store.get() },
        }
    }

    /// Acquires the lock exclusive and returns a guard over the store.
    ///
    /// The guard gives every `Store` method, none of which lock again, so a
    /// sequence of them runs as one atomic step.
    ///
    /// **Locking behaviour:** Deadlock if the current thread holds any guard on the same map.
    ///
    /// # Examples
    /// ```
    /// use rwmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::<u32, u32>::new();
    /// {
    ///     let mut store = map.write();
    ///     store.insert(11, 11);
    ///     store.apply_for_each(|_, v| *v *= 10);
    ///     // map.len(); // DEADLOCK!
    /// }
    /// assert_eq!(map.get(&11), Some(110));
    /// ```
    pub fn write(&self) -> WriteGuard<'_, K, V, S> {
        self.lock.write();
        WriteGuard {
            lock: &self.lock,
            // Safety: the exclusive lock is held until the guard drops.
            store: unsafe { &mut *self.store.get() },
        }
    }

    /// Like [`read`](Self::read), but returns `None` instead of blocking.
    pub fn try_read(&self) -> Option<ReadGuard<'_, K, V, S>> {
        self.lock.try_read().then(|| ReadGuard {
            lock: &self.lock,
            // Safety: `try_read` succeeded, so the shared lock is held until the guard drops.
            store: unsafe { &*self.store.get() },
        })
    }

    /// Like [`write`](Self::write), but returns `None` instead of blocking.
    pub fn try_write(&self) -> Option<WriteGuard<'_, K, V, S>> {
        self.lock.try_write().then(|| WriteGuard {
            lock: &self.lock,
            // Safety: `try_write` succeeded, so the exclusive lock is held until the guard drops.
            store: unsafe { &mut *self.store.get() },
        })
    }

    /// Returns the store without locking. The unique borrow proves that no
    /// guard is alive.
    pub fn get_mut(&mut self) -> &mut Store<K, V, S> {
        self.store.get_mut()
    }

    /// Consumes the map and returns its store.
    pub fn into_inner(self) -> Store<K, V, S> {
        self.store.into_inner()
    }

    /// Returns the number of entries, under the shared lock.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if the map holds no entries, under the shared lock.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes every entry under the exclusive lock.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Calls `func` on every entry under the shared lock.
    ///
    /// **Locking behaviour:** Calling any method of the same map from `func` may deadlock, reads included.
    pub fn do_for_each<F>(&self, func: F)
    where
        F: FnMut(&K, &V),
    {
        self.read().do_for_each(func)
    }

    /// Calls `func` on every entry under the exclusive lock, allowing values
    /// to be changed in place.
    ///
    /// **Locking behaviour:** Calling any method of the same map from `func` deadlocks.
    ///
    /// # Examples
    /// ```
    /// use rwmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::from_pairs((0..4).map(|i| (i, i.to_string())), 0);
    /// map.apply_for_each(|_, v| v.push('0'));
    /// assert_eq!(map.get(&3).as_deref(), Some("30"));
    /// ```
    pub fn apply_for_each<F>(&self, func: F)
    where
        F: FnMut(&K, &mut V),
    {
        self.write().apply_for_each(func)
    }

    /// Calls `func` on every entry for which `pred` holds, under the shared lock.
    ///
    /// **Locking behaviour:** Calling any method of the same map from `pred` or `func` may deadlock, reads included.
    pub fn do_for_each_if<P, F>(&self, pred: P, func: F)
    where
        P: FnMut(&K, &V) -> bool,
        F: FnMut(&K, &V),
    {
        self.read().do_for_each_if(pred, func)
    }

    /// Calls `func` on every entry for which `pred` holds, under the
    /// exclusive lock.
    pub fn apply_for_each_if<P, F>(&self, pred: P, func: F)
    where
        P: FnMut(&K, &V) -> bool,
        F: FnMut(&K, &mut V),
    {
        self.write().apply_for_each_if(pred, func)
    }

    /// Calls the fallible `func` on every entry under the shared lock.
    ///
    /// The first `Err` stops the traversal and is returned unchanged after
    /// the lock is released.
    ///
    /// **Locking behaviour:** Calling any method of the same map from `func` may deadlock, reads included.
    pub fn try_do_for_each<F, E>(&self, func: F) -> Result<(), E>
    where
        F: FnMut(&K, &V) -> Result<(), E>,
    {
        self.read().try_do_for_each(func)
    }

    /// Calls the fallible `func` on every entry under the exclusive lock.
    ///
    /// The first `Err` stops the traversal and is returned unchanged after
    /// the lock is released. Values already visited keep their changes.
    pub fn try_apply_for_each<F, E>(&self, func: F) -> Result<(), E>
    where
        F: FnMut(&K, &mut V) -> Result<(), E>,
    {
        self.write().try_apply_for_each(func)
    }
}

impl<K, V, S> ConcurrentMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Inserts `value` under `key` if the key is absent. An existing value
    /// is left untouched.
    ///
    /// # Returns
    ///
    /// `true` if the entry was inserted.
    ///
    /// # Examples
    /// ```
    /// use rwmap::ConcurrentMap;
    ///
    /// let map = ConcurrentMap::<String, u32>::new();
    /// assert!(map.insert("key".to_string(), 42));
    /// assert!(!map.insert("key".to_string(), 21));
    /// assert_eq!(map.get("key"), Some(42));
    /// ```
    pub fn insert(&self, key: K, value: V) -> bool {
        self.write().insert(key, value)
    }

    /// Inserts the value built by `make` if `key` is absent. `make` runs
    /// under the exclusive lock, and only when the entry is created.
    pub fn emplace<F>(&self, key: K, make: F) -> bool
    where
        F: FnOnce() -> V,
    {
        self.write().emplace(key, make)
    }

    /// Returns `true` if `key` is present, under the shared lock.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.read().contains_key(key)
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        V: Clone,
        Q: Eq + Hash + ?Sized,
    {
        self.read().get(key)
    }

    /// Removes `key` and returns its value, if it was present.
    pub fn erase<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.write().erase(key)
    }

    /// Removes every key in `keys` that is present and returns how many were
    /// removed.
    pub fn erase_keys<'q, Q, I>(&self, keys: I) -> usize
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized + 'q,
        I: IntoIterator<Item = &'q Q>,
    {
        self.write().erase_keys(keys)
    }

    /// Removes every entry for which `pred` holds and returns how many were
    /// removed.
    pub fn erase_if<P>(&self, pred: P) -> usize
    where
        P: FnMut(&K, &V) -> bool,
    {
        self.write().erase_if(pred)
    }

    /// Removes the entry for `key` if it is present and `pred` holds. The
    /// check and the removal happen under one exclusive lock.
    pub fn erase_key_if<Q, P>(&self, key: &Q, pred: P) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        P: FnOnce(&V) -> bool,
    {
        self.write().erase_key_if(key, pred)
    }

    /// Calls `func` on the value under `key` with the shared lock held.
    ///
    /// # Returns
    ///
    /// `Some` with the result of `func`, or `None` if the key is absent.
    ///
    /// **Locking behaviour:** Calling any method of the same map from `func` may deadlock, reads included.
    pub fn do_for_key<Q, F, R>(&self, key: &Q, func: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        F: FnOnce(&V) -> R,
    {
        self.read().do_for_key(key, func)
    }

    /// Calls `func` on the value under `key` with the exclusive lock held.
    pub fn apply_for_key<Q, F, R>(&self, key: &Q, func: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        F: FnOnce(&mut V) -> R,
    {
        self.write().apply_for_key(key, func)
    }

    /// Applies `func` to the value under `key` if present, otherwise inserts
    /// `value`.
    ///
    /// Membership is first checked under the shared lock, then checked again
    /// under the exclusive lock, and only that second answer decides between
    /// applying and inserting. `func` never runs under the shared lock, so it
    /// is free to mutate the value.
    ///
    /// **Locking behaviour:** Calling any method of the same map from `func` deadlocks.
    ///
    /// # Examples
    /// ```
    /// use rwmap::{ConcurrentMap, InsertOrApply};
    ///
    /// let map = ConcurrentMap::<&str, u32>::new();
    /// assert_eq!(map.insert_or_apply("hits", 1, |v| *v += 1), InsertOrApply::Inserted);
    /// assert_eq!(map.insert_or_apply("hits", 1, |v| *v += 1), InsertOrApply::Applied);
    /// assert_eq!(map.get("hits"), Some(2));
    /// ```
    pub fn insert_or_apply<F>(&self, key: K, value: V, func: F) -> InsertOrApply
    where
        F: FnOnce(&mut V),
    {
        let seen = self.read().contains_key(&key);
        let outcome = self.write().insert_or_apply(key, value, func);
        if seen != (outcome == InsertOrApply::Applied) {
            trace!(
                "insert_or_apply: membership changed before the exclusive re-check, {:?}",
                outcome
            );
        }
        outcome
    }

    /// Drains every entry into a new `ConcurrentMap` under the exclusive
    /// lock, leaving this map empty with the same hasher.
    pub fn take(&self) -> Self
    where
        S: Clone,
    {
        let store = self.write().take();
        debug!("drained {} entries into a new map", store.len());
        Self::from_store(store)
    }
}

fn fill<K, V, S, I>(store: &mut Store<K, V, S>, pairs: I)
where
    K: Eq + Hash,
    S: BuildHasher,
    I: IntoIterator<Item = (K, V)>,
{
    let mut duplicates = 0usize;
    for (key, value) in pairs {
        if !store.insert(key, value) {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        debug!("dropped {} pairs with duplicate keys", duplicates);
    }
}

/// Deep-copies the store under the shared lock.
impl<K: Clone, V: Clone, S: Clone> Clone for ConcurrentMap<K, V, S> {
    fn clone(&self) -> Self {
        Self::from_store(Store::clone(&self.read()))
    }
}

impl<K, V, S> fmt::Debug for ConcurrentMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ConcurrentMap");
        match self.try_read() {
            Some(store) => d.field("store", &*store),
            None => d.field("store", &format_args!("<locked>")),
        };
        d.finish()
    }
}

impl<K, V, S> FromIterator<(K, V)> for ConcurrentMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    /// Collects pairs into a map; the first pair for a key wins.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut store = Store::default();
        fill(&mut store, iter);
        Self::from_store(store)
    }
}

impl<K, V, S> Extend<(K, V)> for ConcurrentMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        fill(self.get_mut(), iter);
    }
}

/// An RAII guard holding the `ConcurrentMap` lock in shared mode.
///
/// Dereferences to the [`Store`], giving its read-only methods without
/// further locking. The lock is released when the guard is dropped.
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReadGuard<'a, K, V, S = RandomState> {
    lock: &'a RwLock,
    store: &'a Store<K, V, S>,
}

impl<K, V, S> Deref for ReadGuard<'_, K, V, S> {
    type Target = Store<K, V, S>;

    fn deref(&self) -> &Self::Target {
        self.store
    }
}

impl<K, V, S> Drop for ReadGuard<'_, K, V, S> {
    fn drop(&mut self) {
        // Safety: a `ReadGuard` only exists while its shared lock is held.
        unsafe { self.lock.read_unlock() };
    }
}

/// An RAII guard holding the `ConcurrentMap` lock in exclusive mode.
///
/// Dereferences to the [`Store`], giving all of its methods without further
/// locking. The lock is released when the guard is dropped, also while
/// unwinding from a panic.
///
/// # Examples
/// ```
/// use rwmap::ConcurrentMap;
///
/// let map = ConcurrentMap::<u32, u32>::new();
/// {
///     let mut store = map.write();
///     if !store.contains_key(&1) {
///         store.insert(1, 1);
///     }
///     // lock is released here
/// }
/// assert!(map.contains_key(&1));
/// ```
#[must_use = "if unused the lock will immediately unlock"]
pub struct WriteGuard<'a, K, V, S = RandomState> {
    lock: &'a RwLock,
    store: &'a mut Store<K, V, S>,
}

impl<K, V, S> Deref for WriteGuard<'_, K, V, S> {
    type Target = Store<K, V, S>;

    fn deref(&self) -> &Self::Target {
        &*self.store
    }
}

impl<K, V, S> DerefMut for WriteGuard<'_, K, V, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.store
    }
}

impl<K, V, S> Drop for WriteGuard<'_, K, V, S> {
    fn drop(&mut self) {
        // Safety: a `WriteGuard` only exists while its exclusive lock is held.
        unsafe { self.lock.write_unlock() };
    }
}
