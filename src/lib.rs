//! weak-value-cache: a single-threaded map whose values are held weakly
//! and whose dead entries are reclaimed lazily.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a map that never keeps its values alive, yet behaves like an
//!   ordinary map in which dead entries look as if they were never inserted.
//! - Layers:
//!   - SlotTable<K, V, S>: structural map with stable, generational
//!     handles; includes a debug-only reentrancy guard while probing.
//!   - Strong<V> / WeakValue<V> / ReclaimQueue: the reachability layer. A
//!     value lives in an `Rc` allocation that also records which
//!     `(queue, handle)` pairs store it. The last `Strong` to drop pushes
//!     those handles onto their queues.
//!   - WeakValueCache<K, V, S>: public API. Drains its queue at the start of
//!     each operation and removes the entries the queue names.
//!   - KeySet / Values / EntrySet: views that borrow the cache mutably.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` (no atomics, no locks).
//! - Draining is O(pending) and never blocks; an empty queue is a no-op.
//! - Reclamation is driven only by reachability; there is no size or
//!   time bound.
//!
//! Stale notifications
//! - Overwriting a key installs a fresh handle. The sweep removes an entry
//!   only if the queued handle still resolves and its value is cleared, so
//!   a late notification for a replaced value never evicts the new one.
//! - Explicit removal unregisters the handle from a still-live value.
//!
//! Liveness reads
//! - `contains_key` does not sweep but checks liveness directly, so it
//!   agrees with `get`. `len`/`is_empty`/`get` sweep first.
//! - The key view reports the table as stored. The value and entry views
//!   remove cleared entries as they walk over them and never yield them.
//!
//! Notes and non-goals
//! - No persistence, no ordering of keys, no LRU/TTL eviction.
//! - Keys are immutable post-insert. Entries yielded by the entry view are
//!   snapshots; `Entry::set_value` always fails.

mod builder;
mod cache;
mod error;
mod reclaim;
mod reentrancy;
mod table;
#[cfg(test)]
mod table_proptest;
mod views;

// Public surface
pub use builder::WeakValueCacheBuilder;
pub use cache::WeakValueCache;
pub use error::{CacheError, Result};
pub use reclaim::Strong;
pub use views::{Entry, EntriesIter, EntrySet, KeySet, Keys, Values, ValuesIter};
