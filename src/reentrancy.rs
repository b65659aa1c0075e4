//! Debug-only reentrancy guard.
//!
//! `SlotTable` calls into user code (`K: Eq`, `K: Hash`) while probing its
//! index. If that code reaches back into the same table the index may be
//! observed mid-update, so debug builds panic on nested entry. Release
//! builds compile the guard away.

use core::cell::Cell;
use core::marker::PhantomData;

/// Per-instance reentrancy tracker, labelled with the structure it guards.
#[derive(Debug)]
pub(crate) struct DebugReentrancy {
    #[cfg(debug_assertions)]
    depth: Cell<u32>,
    #[cfg(debug_assertions)]
    label: &'static str,
    _nosend: PhantomData<*mut ()>,
}

impl DebugReentrancy {
    pub(crate) const fn new(label: &'static str) -> Self {
        #[cfg(not(debug_assertions))]
        let _ = label;
        Self {
            #[cfg(debug_assertions)]
            depth: Cell::new(0),
            #[cfg(debug_assertions)]
            label,
            _nosend: PhantomData,
        }
    }

    /// Enter a guarded section; the section ends when the guard drops.
    #[inline]
    pub(crate) fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let d = self.depth.get();
            assert!(d == 0, "reentrancy detected: nested entry into {}", self.label);
            self.depth.set(d + 1);
            ReentrancyGuard { owner: self }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard { _z: PhantomData }
        }
    }
}

pub(crate) struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let d = self.owner.depth.get();
            debug_assert!(d > 0);
            self.owner.depth.set(d - 1);
        }
    }
}
