//! Views over a cache: keys, values, and entries.
//!
//! Each view borrows the cache mutably, so the table can only change
//! through the view while it exists. The key view shows the table as
//! stored. The value and entry views walk a snapshot of the table's
//! handles, drop any entry they find cleared, and never yield it.

use crate::cache::{contains_live_value, Parts, Table};
use crate::error::{CacheError, Result};
use crate::reclaim::{Strong, WeakValue};
use crate::table::{self, Handle};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash, Hasher};
use std::collections::hash_map::RandomState;
use tracing::trace;

/// Key view returned by [`WeakValueCache::keys`].
///
/// Reads are not swept: a key whose value was dropped after the view was
/// created is still reported here.
///
/// [`WeakValueCache::keys`]: crate::WeakValueCache::keys
pub struct KeySet<'a, K, V, S = RandomState> {
    parts: Parts<'a, K, V, S>,
}

impl<'a, K, V, S> KeySet<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn new(parts: Parts<'a, K, V, S>) -> Self {
        Self { parts }
    }

    /// Number of stored keys, including keys awaiting a sweep.
    pub fn len(&self) -> usize {
        self.parts.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.table.is_empty()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.parts.table.contains_key(key)
    }

    /// Remove `key` and its entry. Returns true if the key was stored.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.parts.table.find(key) {
            Some(handle) => self.parts.remove_handle(handle).is_some(),
            None => false,
        }
    }

    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&K) -> bool,
    {
        self.parts.retain_keys(f);
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }

    pub fn iter(&self) -> Keys<'_, K, V> {
        Keys {
            it: self.parts.table.iter(),
        }
    }
}

impl<'a, K, V, S> IntoIterator for KeySet<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = &'a K;
    type IntoIter = Keys<'a, K, V>;

    fn into_iter(self) -> Keys<'a, K, V> {
        let table: &'a Table<K, V, S> = self.parts.table;
        Keys { it: table.iter() }
    }
}

impl<'b, K, V, S> IntoIterator for &'b KeySet<'_, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = &'b K;
    type IntoIter = Keys<'b, K, V>;

    fn into_iter(self) -> Keys<'b, K, V> {
        self.iter()
    }
}

/// Iterator over stored keys.
pub struct Keys<'a, K, V> {
    it: table::Iter<'a, K, WeakValue<V>>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<&'a K> {
        self.it.next().map(|(_, k, _)| k)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.it.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// Value view returned by [`WeakValueCache::values`].
///
/// [`WeakValueCache::values`]: crate::WeakValueCache::values
pub struct Values<'a, K, V, S = RandomState> {
    parts: Parts<'a, K, V, S>,
}

impl<'a, K, V, S> Values<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn new(parts: Parts<'a, K, V, S>) -> Self {
        Self { parts }
    }

    /// Number of live values. Sweeps first, so this takes `&mut self`.
    pub fn len(&mut self) -> usize {
        self.parts.live_len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        contains_live_value(&*self.parts.table, value)
    }

    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&V) -> bool,
    {
        self.parts.sweep();
        self.parts.retain(|_, v| f(v));
    }

    pub fn clear(&mut self) {
        self.parts.sweep();
        self.parts.clear();
    }

    /// Collect the live values.
    pub fn to_vec(&mut self) -> Vec<Strong<V>> {
        self.iter().collect()
    }

    pub fn iter(&mut self) -> ValuesIter<'_, K, V, S> {
        ValuesIter {
            cursor: Cursor::new(self.parts.reborrow()),
        }
    }
}

impl<'a, K, V, S> IntoIterator for Values<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = Strong<V>;
    type IntoIter = ValuesIter<'a, K, V, S>;

    fn into_iter(self) -> ValuesIter<'a, K, V, S> {
        ValuesIter {
            cursor: Cursor::new(self.parts),
        }
    }
}

/// Iterator over live values.
///
/// Entries found cleared along the way are removed from the cache. Entries
/// removed after the iterator was created are skipped.
pub struct ValuesIter<'a, K, V, S = RandomState>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    cursor: Cursor<'a, K, V, S>,
}

impl<K, V, S> ValuesIter<'_, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Next live value without consuming it. Cleared entries in front of it
    /// are removed.
    pub fn peek(&mut self) -> Option<&Strong<V>> {
        self.cursor.fill();
        self.cursor.peeked.as_ref().map(|(_, v)| v)
    }

    /// Remove the entry of the value most recently returned by `next`.
    ///
    /// Returns false if nothing was returned yet or it is already gone.
    pub fn remove(&mut self) -> bool {
        self.cursor.remove_last()
    }
}

impl<K, V, S> Iterator for ValuesIter<'_, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    type Item = Strong<V>;

    fn next(&mut self) -> Option<Strong<V>> {
        self.cursor.next_live().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cursor.size_hint()
    }
}

/// Entry view returned by [`WeakValueCache::entries`].
///
/// [`WeakValueCache::entries`]: crate::WeakValueCache::entries
pub struct EntrySet<'a, K, V, S = RandomState> {
    parts: Parts<'a, K, V, S>,
}

impl<'a, K, V, S> EntrySet<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn new(parts: Parts<'a, K, V, S>) -> Self {
        Self { parts }
    }

    /// Number of live entries. Sweeps first, so this takes `&mut self`.
    pub fn len(&mut self) -> usize {
        self.parts.live_len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// True if `entry.key()` currently maps to the very value in `entry`.
    pub fn contains(&self, entry: &Entry<K, V>) -> bool {
        let table = &*self.parts.table;
        table
            .find(entry.key())
            .and_then(|h| table.value(h))
            .is_some_and(|w| w.refers_to(entry.value()))
    }

    /// Remove the mapping described by `entry`, if the cache still holds it.
    pub fn remove(&mut self, entry: &Entry<K, V>) -> bool {
        if !self.contains(entry) {
            return false;
        }
        match self.parts.table.find(entry.key()) {
            Some(handle) => self.parts.remove_handle(handle).is_some(),
            None => false,
        }
    }

    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.parts.sweep();
        self.parts.retain(f);
    }

    pub fn clear(&mut self) {
        self.parts.sweep();
        self.parts.clear();
    }

    pub fn iter(&mut self) -> EntriesIter<'_, K, V, S> {
        EntriesIter {
            cursor: Cursor::new(self.parts.reborrow()),
        }
    }
}

impl<'a, K, V, S> IntoIterator for EntrySet<'a, K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    type Item = Entry<K, V>;
    type IntoIter = EntriesIter<'a, K, V, S>;

    fn into_iter(self) -> EntriesIter<'a, K, V, S> {
        EntriesIter {
            cursor: Cursor::new(self.parts),
        }
    }
}

/// Iterator over live entries, yielding owned snapshots.
pub struct EntriesIter<'a, K, V, S = RandomState>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    cursor: Cursor<'a, K, V, S>,
}

impl<K, V, S> EntriesIter<'_, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Next live entry without consuming it.
    pub fn peek(&mut self) -> Option<(&K, &Strong<V>)> {
        self.cursor.fill();
        let (handle, value) = self.cursor.peeked.as_ref()?;
        let key = self.cursor.parts.table.key(*handle)?;
        Some((key, value))
    }

    /// Remove the most recently returned entry from the cache.
    pub fn remove(&mut self) -> bool {
        self.cursor.remove_last()
    }
}

impl<K, V, S> Iterator for EntriesIter<'_, K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    type Item = Entry<K, V>;

    fn next(&mut self) -> Option<Entry<K, V>> {
        let (handle, value) = self.cursor.next_live()?;
        let key = self.cursor.parts.table.key(handle)?.clone();
        Some(Entry { key, value })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cursor.size_hint()
    }
}

/// A `(key, value)` snapshot taken while iterating an [`EntrySet`].
///
/// The entry holds its own `Strong`, so the value stays alive while the
/// entry does. Writing through an entry is not supported.
pub struct Entry<K, V> {
    key: K,
    value: Strong<V>,
}

impl<K, V> Entry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &Strong<V> {
        &self.value
    }

    pub fn into_parts(self) -> (K, Strong<V>) {
        (self.key, self.value)
    }

    /// Always fails: entries are read-only snapshots.
    pub fn set_value(&mut self, _value: Strong<V>) -> Result<Strong<V>> {
        Err(CacheError::UnsupportedOperation {
            operation: "Entry::set_value",
        })
    }
}

impl<K: Clone, V> Clone for Entry<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for Entry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl<K: Eq, V: Eq> Eq for Entry<K, V> {}

impl<K: Hash, V: Hash> Hash for Entry<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.value.hash(state);
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Entry")
            .field(&self.key)
            .field(&self.value)
            .finish()
    }
}

/// Shared traversal for the value and entry iterators.
struct Cursor<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    parts: Parts<'a, K, V, S>,
    pending: std::vec::IntoIter<Handle>,
    peeked: Option<(Handle, Strong<V>)>,
    last: Option<Handle>,
    evicted: usize,
}

impl<'a, K, V, S> Cursor<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn new(parts: Parts<'a, K, V, S>) -> Self {
        let pending = parts.table.handles().into_iter();
        Self {
            parts,
            pending,
            peeked: None,
            last: None,
            evicted: 0,
        }
    }

    /// Find the next live entry, removing cleared ones on the way.
    fn advance(&mut self) -> Option<(Handle, Strong<V>)> {
        if let Some(found) = self.peeked.take() {
            return Some(found);
        }
        for handle in self.pending.by_ref() {
            let state = self.parts.table.value(handle).map(WeakValue::upgrade);
            match state {
                // Removed since the snapshot.
                None => continue,
                Some(Some(value)) => return Some((handle, value)),
                Some(None) => {
                    if self.parts.table.remove(handle).is_some() {
                        self.evicted += 1;
                    }
                }
            }
        }
        None
    }

    fn fill(&mut self) {
        if self.peeked.is_none() {
            self.peeked = self.advance();
        }
    }

    fn next_live(&mut self) -> Option<(Handle, Strong<V>)> {
        let found = self.advance()?;
        self.last = Some(found.0);
        Some(found)
    }

    fn remove_last(&mut self) -> bool {
        match self.last.take() {
            Some(handle) => self.parts.remove_handle(handle).is_some(),
            None => false,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let upper = self.pending.len() + usize::from(self.peeked.is_some());
        (usize::from(self.peeked.is_some()), Some(upper))
    }
}

impl<K, V, S> Drop for Cursor<'_, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn drop(&mut self) {
        if self.evicted > 0 {
            trace!(cache = %self.parts.name, evicted = self.evicted, "traversal dropped cleared entries");
        }
    }
}
