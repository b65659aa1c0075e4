//! Strong owners, weak handles, and the reclamation channel.
//!
//! `Strong<V>` is the only way to put a value into a cache. Its allocation
//! carries a list of watchers, one per `(cache, handle)` that stores the
//! value. When the last `Strong<V>` is dropped the value is destroyed, every
//! `WeakValue<V>` pointing at it starts reading as cleared, and each watcher
//! pushes its handle onto the channel of the cache that registered it.
//! Caches that no longer exist are skipped.

use crate::table::Handle;
use core::cell::RefCell;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::ops::Deref;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

type Channel = RefCell<VecDeque<Handle>>;

/// Per-cache queue of handles whose values were reclaimed.
///
/// Each push and pop holds the inner borrow only for the duration of the
/// call, so a value destructor may push while the cache is draining.
pub(crate) struct ReclaimQueue {
    chan: Rc<Channel>,
}

impl ReclaimQueue {
    pub(crate) fn new() -> Self {
        Self {
            chan: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    #[inline]
    pub(crate) fn pop(&self) -> Option<Handle> {
        self.chan.borrow_mut().pop_front()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.chan.borrow().len()
    }

    fn downgrade(&self) -> Weak<Channel> {
        Rc::downgrade(&self.chan)
    }

    fn is(&self, other: &Weak<Channel>) -> bool {
        core::ptr::eq(Rc::as_ptr(&self.chan), other.as_ptr())
    }
}

struct Watcher {
    chan: Weak<Channel>,
    handle: Handle,
}

struct Tracked<V> {
    value: V,
    watchers: RefCell<Vec<Watcher>>,
}

impl<V> Drop for Tracked<V> {
    fn drop(&mut self) {
        // Strong count is already zero here: every WeakValue reads as cleared.
        for w in self.watchers.get_mut().drain(..) {
            if let Some(chan) = w.chan.upgrade() {
                chan.borrow_mut().push_back(w.handle);
            }
        }
    }
}

/// A strong, single-threaded owner of a cached value.
///
/// Cloning is cheap and shares the allocation. A cache only sees the value
/// for as long as at least one `Strong` for it is alive somewhere.
pub struct Strong<V> {
    inner: Rc<Tracked<V>>,
}

impl<V> Strong<V> {
    pub fn new(value: V) -> Self {
        Self {
            inner: Rc::new(Tracked {
                value,
                watchers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// True if both point at the same allocation.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.inner, &other.inner)
    }

    /// Number of `Strong`s sharing this value.
    #[inline]
    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.inner)
    }

    pub(crate) fn downgrade(this: &Self) -> WeakValue<V> {
        WeakValue {
            inner: Rc::downgrade(&this.inner),
        }
    }

    pub(crate) fn as_ptr(this: &Self) -> *const () {
        Rc::as_ptr(&this.inner) as *const ()
    }

    /// Register `handle` so it is pushed onto `queue` when this value dies.
    pub(crate) fn watch(this: &Self, queue: &ReclaimQueue, handle: Handle) {
        let mut watchers = this.inner.watchers.borrow_mut();
        watchers.retain(|w| w.chan.strong_count() > 0);
        watchers.push(Watcher {
            chan: queue.downgrade(),
            handle,
        });
    }

    /// Undo a `watch` for an entry that left the table while still live.
    pub(crate) fn unwatch(this: &Self, queue: &ReclaimQueue, handle: Handle) {
        this.inner
            .watchers
            .borrow_mut()
            .retain(|w| !(w.handle == handle && queue.is(&w.chan)));
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(this: &Self) -> usize {
        this.inner.watchers.borrow().len()
    }
}

impl<V> Clone for Strong<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V> Deref for Strong<V> {
    type Target = V;

    #[inline]
    fn deref(&self) -> &V {
        &self.inner.value
    }
}

impl<V> AsRef<V> for Strong<V> {
    fn as_ref(&self) -> &V {
        self
    }
}

impl<V> From<V> for Strong<V> {
    fn from(value: V) -> Self {
        Strong::new(value)
    }
}

impl<V: PartialEq> PartialEq for Strong<V> {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<V: Eq> Eq for Strong<V> {}

impl<V: Hash> Hash for Strong<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state)
    }
}

impl<V: fmt::Debug> fmt::Debug for Strong<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<V: fmt::Display> fmt::Display for Strong<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

/// Weak handle payload stored in the table.
pub(crate) struct WeakValue<V> {
    inner: Weak<Tracked<V>>,
}

impl<V> WeakValue<V> {
    #[inline]
    pub(crate) fn upgrade(&self) -> Option<Strong<V>> {
        self.inner.upgrade().map(|inner| Strong { inner })
    }

    #[inline]
    pub(crate) fn is_cleared(&self) -> bool {
        self.inner.strong_count() == 0
    }

    /// True if this handle still points at the live value behind `strong`.
    pub(crate) fn refers_to(&self, strong: &Strong<V>) -> bool {
        core::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&strong.inner))
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        self.inner.as_ptr() as *const ()
    }

    /// Called when this handle's entry leaves the table. Returns the value
    /// if it was still live, after dropping its registration for `handle`.
    pub(crate) fn detach(&self, queue: &ReclaimQueue, handle: Handle) -> Option<Strong<V>> {
        let strong = self.upgrade()?;
        Strong::unwatch(&strong, queue, handle);
        Some(strong)
    }
}
