//! SlotTable: the backing table of the cache.
//!
//! Entries live in a `SlotMap` and are indexed by a `hashbrown::HashTable`
//! of slot ids. A slot id (`Handle`) is generational: once its entry is
//! removed it never resolves again, even if the physical slot is reused.
//! The cache relies on this to ignore late notifications for entries that
//! were replaced or removed in the meantime.

use crate::reentrancy::DebugReentrancy;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::hash_table::Entry as IndexEntry;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};
use std::collections::hash_map::RandomState;

/// Generational id of one table entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    #[inline]
    fn raw(self) -> DefaultKey {
        self.0
    }
}

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    hash: u64,
}

pub(crate) struct SlotTable<K, V, S = RandomState> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Slot<K, V>>,
    reentrancy: DebugReentrancy,
}

impl<K, V> SlotTable<K, V>
where
    K: Eq + Hash,
{
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::with_capacity_and_hasher(0, RandomState::new())
    }
}

impl<K, V, S> SlotTable<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::with_capacity(capacity),
            slots: SlotMap::with_capacity_and_key(capacity),
            reentrancy: DebugReentrancy::new("SlotTable"),
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter();
        let hash = self.make_hash(q);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|s| s.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle(k))
    }

    pub(crate) fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.find(q).is_some()
    }

    /// Insert `key`, always under a fresh handle.
    ///
    /// If the key was present, its old entry is unlinked and returned along
    /// with its (now stale) handle. The index bucket is reused, so the key is
    /// hashed and probed only once.
    pub(crate) fn replace(&mut self, key: K, value: V) -> (Handle, Option<(Handle, K, V)>) {
        let _g = self.reentrancy.enter();
        let hash = self.make_hash(&key);
        let slots = &mut self.slots;
        match self.index.entry(
            hash,
            |&k| slots.get(k).map(|s| s.key == key).unwrap_or(false),
            |&k| slots.get(k).map(|s| s.hash).unwrap_or(0),
        ) {
            IndexEntry::Occupied(mut occ) => {
                let old_id = *occ.get();
                let new_id = slots.insert(Slot { key, value, hash });
                *occ.get_mut() = new_id;
                let old = slots
                    .remove(old_id)
                    .map(|s| (Handle(old_id), s.key, s.value));
                (Handle(new_id), old)
            }
            IndexEntry::Vacant(vac) => {
                let id = slots.insert(Slot { key, value, hash });
                let _ = vac.insert(id);
                (Handle(id), None)
            }
        }
    }

    /// Remove the entry behind `handle`. Stale handles yield `None`.
    ///
    /// The entry is unlinked before it is returned, so dropping the key or
    /// value afterwards observes a consistent table.
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<(K, V)> {
        let _g = self.reentrancy.enter();
        let id = handle.raw();
        let slot = self.slots.remove(id)?;
        if let Ok(occ) = self.index.find_entry(slot.hash, |&k| k == id) {
            let _ = occ.remove();
        }
        Some((slot.key, slot.value))
    }

    pub(crate) fn key(&self, handle: Handle) -> Option<&K> {
        self.slots.get(handle.raw()).map(|s| &s.key)
    }

    pub(crate) fn value(&self, handle: Handle) -> Option<&V> {
        self.slots.get(handle.raw()).map(|s| &s.value)
    }

    /// Snapshot of every live handle, in storage order.
    pub(crate) fn handles(&self) -> Vec<Handle> {
        self.slots.keys().map(Handle).collect()
    }

    /// Unlink every entry matching `pred` and hand the removed entries back
    /// to the caller.
    pub(crate) fn extract_if<F>(&mut self, mut pred: F) -> Vec<(Handle, K, V)>
    where
        F: FnMut(Handle, &K, &V) -> bool,
    {
        let doomed: Vec<Handle> = self
            .slots
            .iter()
            .filter(|(id, s)| pred(Handle(*id), &s.key, &s.value))
            .map(|(id, _)| Handle(id))
            .collect();
        doomed
            .into_iter()
            .filter_map(|h| self.remove(h).map(|(k, v)| (h, k, v)))
            .collect()
    }

    /// Drop every entry. All outstanding handles become stale.
    pub(crate) fn clear(&mut self) -> Vec<(K, V)> {
        let _g = self.reentrancy.enter();
        self.index.clear();
        self.slots.drain().map(|(_, s)| (s.key, s.value)).collect()
    }

    pub(crate) fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            it: self.slots.iter(),
        }
    }
}

/// Iterator over `(handle, key, value)` in storage order.
pub(crate) struct Iter<'a, K, V> {
    it: slotmap::basic::Iter<'a, DefaultKey, Slot<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Handle, &'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|(k, s)| (Handle(k), &s.key, &s.value))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.it.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::hash::Hasher;

    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> Self::Hasher {
            ConstHasher
        }
    }
    impl Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        }
    }

    /// Replacing a key installs a new handle and returns the old entry.
    #[test]
    fn replace_installs_fresh_handle() {
        let mut t: SlotTable<String, i32> = SlotTable::new();
        let (h1, old) = t.replace("k".to_string(), 1);
        assert!(old.is_none());
        let (h2, old) = t.replace("k".to_string(), 2);
        let (old_h, old_k, old_v) = old.expect("previous entry returned");
        assert_eq!(old_h, h1);
        assert_eq!(old_k, "k");
        assert_eq!(old_v, 1);
        assert_ne!(h1, h2);
        assert_eq!(t.len(), 1);
        assert_eq!(t.find("k"), Some(h2));
        assert_eq!(t.value(h2), Some(&2));
        assert!(t.value(h1).is_none(), "superseded handle must not resolve");
    }

    /// A stale handle never removes the entry that replaced it.
    #[test]
    fn stale_remove_is_noop() {
        let mut t: SlotTable<String, i32> = SlotTable::new();
        let (h1, _) = t.replace("k".to_string(), 1);
        let (h2, _) = t.replace("k".to_string(), 2);
        assert!(t.remove(h1).is_none());
        assert_eq!(t.len(), 1);
        assert_eq!(t.remove(h2), Some(("k".to_string(), 2)));
        assert!(t.is_empty());
        assert!(!t.contains_key("k"));
    }

    /// Removal frees the slot; a later insert does not alias the old handle.
    #[test]
    fn removed_handle_does_not_alias_new_entry() {
        let mut t: SlotTable<String, i32> = SlotTable::new();
        let (h1, _) = t.replace("old".to_string(), 1);
        t.remove(h1).expect("present");
        let (h2, _) = t.replace("new".to_string(), 2);
        assert_ne!(h1, h2);
        assert!(t.key(h1).is_none());
        assert_eq!(t.key(h2), Some(&"new".to_string()));
    }

    #[test]
    fn borrowed_lookup_with_str() {
        let mut t: SlotTable<String, i32> = SlotTable::new();
        t.replace("hello".to_string(), 1);
        assert!(t.contains_key("hello"));
        assert!(!t.contains_key("world"));
    }

    /// Lookups and replacement resolve by `Eq` when every key collides.
    #[test]
    fn collisions_resolve_by_eq() {
        let mut t: SlotTable<String, i32, ConstBuildHasher> =
            SlotTable::with_capacity_and_hasher(0, ConstBuildHasher);
        let (ha, _) = t.replace("a".to_string(), 1);
        let (hb, _) = t.replace("b".to_string(), 2);
        assert_ne!(ha, hb);
        assert_eq!(t.find("a"), Some(ha));
        assert_eq!(t.find("b"), Some(hb));

        let (ha2, old) = t.replace("a".to_string(), 3);
        assert_eq!(old.map(|(_, _, v)| v), Some(1));
        assert_eq!(t.find("a"), Some(ha2));
        assert_eq!(t.find("b"), Some(hb));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn clear_invalidates_every_handle() {
        let mut t: SlotTable<String, i32> = SlotTable::new();
        let handles: Vec<Handle> = ["a", "b", "c"]
            .iter()
            .map(|k| t.replace(k.to_string(), 0).0)
            .collect();
        let drained = t.clear();
        assert_eq!(drained.len(), 3);
        assert!(t.is_empty());
        for h in handles {
            assert!(t.value(h).is_none());
            assert!(t.remove(h).is_none());
        }
        let (h, _) = t.replace("a".to_string(), 1);
        assert_eq!(t.find("a"), Some(h));
    }

    #[test]
    fn extract_if_unlinks_matching_entries() {
        let mut t: SlotTable<String, i32> = SlotTable::new();
        for i in 0..6 {
            t.replace(format!("k{i}"), i);
        }
        let removed = t.extract_if(|_, _, v| v % 2 == 0);
        let removed_vals: BTreeSet<i32> = removed.iter().map(|(_, _, v)| *v).collect();
        assert_eq!(removed_vals, BTreeSet::from([0, 2, 4]));
        for (h, k, _) in &removed {
            assert!(t.value(*h).is_none());
            assert!(!t.contains_key(k.as_str()));
        }
        let kept: BTreeSet<i32> = t.iter().map(|(_, _, v)| *v).collect();
        assert_eq!(kept, BTreeSet::from([1, 3, 5]));
    }

    #[test]
    fn handles_snapshot_matches_iteration() {
        let mut t: SlotTable<String, i32> = SlotTable::new();
        for i in 0..4 {
            t.replace(format!("k{i}"), i);
        }
        let snap = t.handles();
        let iterated: Vec<Handle> = t.iter().map(|(h, _, _)| h).collect();
        assert_eq!(snap, iterated);
        assert_eq!(t.iter().len(), 4);
    }

    /// Re-entering the table from `K: Eq` during a probe panics in debug builds.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_eq_during_find() {
        struct ReentryKey {
            id: &'static str,
            table: *const SlotTable<ReentryKey, i32, ConstBuildHasher>,
            trigger: bool,
        }
        impl PartialEq for ReentryKey {
            fn eq(&self, other: &Self) -> bool {
                if self.id == other.id {
                    return true;
                }
                if other.trigger {
                    unsafe {
                        let t = &*other.table;
                        let _ = t.contains_key(self.id);
                    }
                }
                false
            }
        }
        impl Eq for ReentryKey {}
        impl Hash for ReentryKey {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }
        impl Borrow<str> for ReentryKey {
            fn borrow(&self) -> &str {
                self.id
            }
        }

        let mut t: SlotTable<ReentryKey, i32, ConstBuildHasher> =
            SlotTable::with_capacity_and_hasher(0, ConstBuildHasher);
        t.replace(
            ReentryKey {
                id: "a",
                table: core::ptr::null(),
                trigger: false,
            },
            1,
        );
        let query = ReentryKey {
            id: "b",
            table: &t as *const _,
            trigger: true,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = t.find(&query);
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }
}
