//! WeakValueCache: the public map type.
//!
//! Every public operation except `contains_key` first drains the
//! reclamation queue (`sweep`), so entries whose values were dropped since
//! the previous call are gone before the operation looks at the table.

use crate::reclaim::{ReclaimQueue, Strong, WeakValue};
use crate::table::{Handle, SlotTable};
use crate::views::{EntrySet, KeySet, Values};
use core::borrow::Borrow;
use core::cell::RefCell;
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use std::borrow::Cow;
use std::collections::hash_map::{DefaultHasher, RandomState};
use std::collections::HashMap;
use tracing::{debug, trace};

pub(crate) const DEFAULT_NAME: &str = "unknown";

pub(crate) type Table<K, V, S> = SlotTable<K, WeakValue<V>, S>;

/// A map from `K` to values that are only held weakly.
///
/// Values go in as [`Strong`] and come out as `Strong`. The cache never
/// keeps a value alive: once the last `Strong` for it is dropped elsewhere,
/// lookups stop returning it and the next operation removes its key.
///
/// ```
/// use weak_value_cache::{Strong, WeakValueCache};
///
/// let mut cache = WeakValueCache::new();
/// let v = Strong::new(42);
/// cache.insert("answer", &v);
/// assert_eq!(cache.get("answer").as_deref(), Some(&42));
///
/// drop(v);
/// assert!(cache.get("answer").is_none());
/// assert!(cache.is_empty());
/// ```
pub struct WeakValueCache<K, V, S = RandomState> {
    table: RefCell<Table<K, V, S>>,
    queue: ReclaimQueue,
    name: Cow<'static, str>,
}

impl<K, V> WeakValueCache<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Empty cache with a diagnostic name, shown by `Display` and in logs.
    pub fn with_name(name: impl Into<Cow<'static, str>>) -> Self {
        Self::from_parts(name.into(), 0, RandomState::new())
    }
}

impl<K, V, S> Default for WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self::from_parts(Cow::Borrowed(DEFAULT_NAME), capacity, hasher)
    }

    pub(crate) fn from_parts(name: Cow<'static, str>, capacity: usize, hasher: S) -> Self {
        Self {
            table: RefCell::new(SlotTable::with_capacity_and_hasher(capacity, hasher)),
            queue: ReclaimQueue::new(),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove every entry whose value has been dropped since the last sweep.
    ///
    /// Runs automatically at the start of most operations; calling it by hand
    /// is only useful to release keys early. Returns the number of entries
    /// removed. A second call with no intervening drop removes nothing.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;
        while let Some(handle) = self.queue.pop() {
            // The borrow ends with the statement, so the key and weak handle
            // are dropped with the table released.
            let entry = reclaim(&mut self.table.borrow_mut(), handle);
            if entry.is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            trace!(cache = %self.name, removed, "swept reclaimed entries");
        }
        removed
    }

    pub(crate) fn parts(&mut self) -> Parts<'_, K, V, S> {
        Parts {
            table: self.table.get_mut(),
            queue: &self.queue,
            name: &self.name,
        }
    }

    /// Number of entries with a live value.
    pub fn len(&self) -> usize {
        self.sweep();
        self.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sweep();
        self.table.borrow().is_empty()
    }

    /// True if `key` maps to a value that is still alive.
    ///
    /// Does not sweep; the answer always agrees with what [`get`] would
    /// return right now.
    ///
    /// [`get`]: WeakValueCache::get
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let table = self.table.borrow();
        table
            .find(key)
            .and_then(|h| table.value(h))
            .is_some_and(|w| !w.is_cleared())
    }

    pub fn get<Q>(&self, key: &Q) -> Option<Strong<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.sweep();
        let table = self.table.borrow();
        let handle = table.find(key)?;
        table.value(handle)?.upgrade()
    }

    /// True if some live entry holds a value equal to `value`.
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.sweep();
        contains_live_value(&self.table.borrow(), value)
    }

    /// Map `key` to `value` without taking ownership of it.
    ///
    /// The entry always gets a fresh handle, so a late reclamation of the
    /// value previously stored under `key` cannot evict this one. Returns the
    /// previous value if it was still alive.
    pub fn insert(&mut self, key: K, value: &Strong<V>) -> Option<Strong<V>> {
        let mut parts = self.parts();
        parts.sweep();
        parts.insert(key, value)
    }

    /// Insert every pair from `source`, in its iteration order.
    pub fn insert_all<'a, I>(&mut self, source: I)
    where
        I: IntoIterator<Item = (K, &'a Strong<V>)>,
        V: 'a,
    {
        let mut parts = self.parts();
        parts.sweep();
        for (key, value) in source {
            parts.sweep();
            parts.insert(key, value);
        }
    }

    /// Return the live value for `key`, or insert the one produced by `f`.
    pub fn get_or_insert_with<F>(&mut self, key: K, f: F) -> Strong<V>
    where
        F: FnOnce() -> Strong<V>,
    {
        let mut parts = self.parts();
        parts.sweep();
        if let Some(value) = parts.live(&key) {
            return value;
        }
        let value = f();
        parts.insert(key, &value);
        value
    }

    /// Remove `key`, returning its value if it was still alive.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<Strong<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Remove `key`, returning the stored key and value if the value was
    /// still alive.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, Strong<V>)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let mut parts = self.parts();
        parts.sweep();
        let handle = parts.table.find(key)?;
        let (k, v) = parts.remove_handle(handle)?;
        v.map(|v| (k, v))
    }

    /// Keep only the live entries for which `f` returns true.
    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut parts = self.parts();
        parts.sweep();
        parts.retain(f);
    }

    pub fn clear(&mut self) {
        let mut parts = self.parts();
        parts.sweep();
        parts.clear();
    }

    /// View of the keys as stored in the table.
    ///
    /// Key membership is not filtered by liveness: a key whose value was
    /// dropped after this call stays visible through the view until the
    /// next sweep.
    pub fn keys(&mut self) -> KeySet<'_, K, V, S> {
        let mut parts = self.parts();
        parts.sweep();
        KeySet::new(parts)
    }

    /// View of the live values. Traversal drops entries it finds cleared.
    pub fn values(&mut self) -> Values<'_, K, V, S> {
        let mut parts = self.parts();
        parts.sweep();
        Values::new(parts)
    }

    /// View of the live entries as `(key, value)` snapshots.
    pub fn entries(&mut self) -> EntrySet<'_, K, V, S> {
        let mut parts = self.parts();
        parts.sweep();
        EntrySet::new(parts)
    }
}

/// Remove the entry behind `handle` if its value has been dropped.
///
/// A handle that no longer resolves, or that resolves to a live value,
/// is left alone: the key has since been removed or reassigned.
fn reclaim<K, V, S>(table: &mut Table<K, V, S>, handle: Handle) -> Option<(K, WeakValue<V>)>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    if table.value(handle).is_some_and(WeakValue::is_cleared) {
        table.remove(handle)
    } else {
        None
    }
}

pub(crate) fn contains_live_value<K, V, S>(table: &Table<K, V, S>, value: &V) -> bool
where
    K: Eq + Hash,
    V: PartialEq,
    S: BuildHasher,
{
    table
        .iter()
        .any(|(_, _, w)| w.upgrade().is_some_and(|v| *v == *value))
}

/// Exclusive access to the table and its queue, split from the cache so
/// views can hold both without going through the `RefCell`.
pub(crate) struct Parts<'a, K, V, S> {
    pub(crate) table: &'a mut Table<K, V, S>,
    pub(crate) queue: &'a ReclaimQueue,
    pub(crate) name: &'a str,
}

impl<K, V, S> Parts<'_, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn sweep(&mut self) -> usize {
        let mut removed = 0;
        while let Some(handle) = self.queue.pop() {
            if reclaim(self.table, handle).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            trace!(cache = %self.name, removed, "swept reclaimed entries");
        }
        removed
    }

    pub(crate) fn reborrow(&mut self) -> Parts<'_, K, V, S> {
        Parts {
            table: &mut *self.table,
            queue: self.queue,
            name: self.name,
        }
    }

    pub(crate) fn live_len(&mut self) -> usize {
        self.sweep();
        self.table.len()
    }

    pub(crate) fn live<Q>(&self, key: &Q) -> Option<Strong<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let handle = self.table.find(key)?;
        self.table.value(handle)?.upgrade()
    }

    pub(crate) fn insert(&mut self, key: K, value: &Strong<V>) -> Option<Strong<V>> {
        let (handle, old) = self.table.replace(key, Strong::downgrade(value));
        Strong::watch(value, self.queue, handle);
        old.and_then(|(old_handle, _, weak)| weak.detach(self.queue, old_handle))
    }

    /// Unlink `handle`, returning its key and the value if still live.
    pub(crate) fn remove_handle(&mut self, handle: Handle) -> Option<(K, Option<Strong<V>>)> {
        let (key, weak) = self.table.remove(handle)?;
        let value = weak.detach(self.queue, handle);
        Some((key, value))
    }

    /// Keep live entries accepted by `f`; cleared entries always go.
    pub(crate) fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let removed = self
            .table
            .extract_if(|_, k, w| w.upgrade().map_or(true, |v| !f(k, &*v)));
        for (handle, _, weak) in &removed {
            weak.detach(self.queue, *handle);
        }
    }

    /// Keep entries whose key is accepted by `f`, live or not.
    pub(crate) fn retain_keys<F>(&mut self, mut f: F)
    where
        F: FnMut(&K) -> bool,
    {
        let removed = self.table.extract_if(|_, k, _| !f(k));
        for (handle, _, weak) in &removed {
            weak.detach(self.queue, *handle);
        }
    }

    pub(crate) fn clear(&mut self) {
        for (handle, _, weak) in self.table.iter() {
            weak.detach(self.queue, handle);
        }
        let discarded = self.table.clear();
        debug!(cache = %self.name, entries = discarded.len(), "cleared");
    }
}

impl<K, V, S> fmt::Display for WeakValueCache<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakValueCache({})", self.name)
    }
}

impl<K, V, S> fmt::Debug for WeakValueCache<K, V, S>
where
    K: fmt::Debug + Eq + Hash,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table.try_borrow() {
            Ok(table) => f
                .debug_map()
                .entries(
                    table
                        .iter()
                        .filter_map(|(_, k, w)| w.upgrade().map(|v| (k, v))),
                )
                .finish(),
            Err(_) => write!(f, "{self} <borrowed>"),
        }
    }
}

impl<K, V, S> Extend<(K, Strong<V>)> for WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Values passed by ownership are only kept if another `Strong` for
    /// them is alive elsewhere.
    fn extend<I: IntoIterator<Item = (K, Strong<V>)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, &value);
        }
    }
}

impl<'a, K, V, S> Extend<(K, &'a Strong<V>)> for WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    V: 'a,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, &'a Strong<V>)>>(&mut self, iter: I) {
        self.insert_all(iter);
    }
}

/// Two caches are equal when they map the same keys to the same value
/// allocations. Values are compared by identity, not by `V: PartialEq`.
impl<K, V, S, S2> PartialEq<WeakValueCache<K, V, S2>> for WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
    S2: BuildHasher,
{
    fn eq(&self, other: &WeakValueCache<K, V, S2>) -> bool {
        self.sweep();
        other.sweep();
        let ours = self.table.borrow();
        let theirs = other.table.borrow();
        ours.len() == theirs.len()
            && ours.iter().all(|(_, k, w)| {
                theirs
                    .find(k)
                    .and_then(|h| theirs.value(h))
                    .is_some_and(|o| !o.is_cleared() && o.as_ptr() == w.as_ptr())
            })
    }
}

impl<K, V, S> Eq for WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
}

impl<K, V, S, S2> PartialEq<HashMap<K, Strong<V>, S2>> for WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
    S2: BuildHasher,
{
    fn eq(&self, other: &HashMap<K, Strong<V>, S2>) -> bool {
        self.sweep();
        let ours = self.table.borrow();
        ours.len() == other.len()
            && ours.iter().all(|(_, k, w)| {
                other
                    .get(k)
                    .is_some_and(|o| Strong::as_ptr(o) == w.as_ptr())
            })
    }
}

/// Order-independent; consistent with `Eq`.
impl<K, V, S> Hash for WeakValueCache<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sweep();
        let table = self.table.borrow();
        let mut sum = 0u64;
        for (_, k, w) in table.iter() {
            let mut h = DefaultHasher::new();
            k.hash(&mut h);
            (w.as_ptr() as usize).hash(&mut h);
            sum = sum.wrapping_add(h.finish());
        }
        state.write_usize(table.len());
        state.write_u64(sum);
    }
}
