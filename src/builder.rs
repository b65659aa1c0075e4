use crate::cache::WeakValueCache;
use core::hash::{BuildHasher, Hash};
use std::borrow::Cow;
use std::collections::hash_map::RandomState;

/// Builder for configuring a [`WeakValueCache`].
///
/// ```
/// use weak_value_cache::{Strong, WeakValueCacheBuilder};
///
/// let mut sessions = WeakValueCacheBuilder::new()
///     .name("sessions")
///     .capacity(64)
///     .build::<u64, String>();
///
/// let s = Strong::new("alice".to_string());
/// sessions.insert(7, &s);
/// assert_eq!(sessions.get(&7).as_deref().map(String::as_str), Some("alice"));
/// assert_eq!(sessions.to_string(), "WeakValueCache(sessions)");
/// ```
pub struct WeakValueCacheBuilder<S = RandomState> {
    name: Cow<'static, str>,
    capacity: usize,
    hasher: S,
}

impl WeakValueCacheBuilder {
    /// Builder with the default name, no pre-allocation, and `RandomState`.
    pub fn new() -> Self {
        Self {
            name: Cow::Borrowed(crate::cache::DEFAULT_NAME),
            capacity: 0,
            hasher: RandomState::new(),
        }
    }
}

impl Default for WeakValueCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> WeakValueCacheBuilder<S> {
    /// Diagnostic name shown by `Display` and in log events.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of entries to pre-allocate room for.
    ///
    /// Default: 0
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Replace the hasher used for keys.
    pub fn hasher<S2>(self, hasher: S2) -> WeakValueCacheBuilder<S2> {
        WeakValueCacheBuilder {
            name: self.name,
            capacity: self.capacity,
            hasher,
        }
    }

    pub fn build<K, V>(self) -> WeakValueCache<K, V, S>
    where
        K: Eq + Hash,
        S: BuildHasher,
    {
        WeakValueCache::from_parts(self.name, self.capacity, self.hasher)
    }
}
