//! Thread-safe cache shard
//!
//! Wraps one [`BoundedLruCache`] behind a mutex. Each cache group owns
//! exactly one shard. The LRU itself is built lazily on the first write, so
//! a shard that is only ever read behaves as empty without allocating.
//! Critical sections are pure in-memory operations; no I/O runs under the
//! lock.

use parking_lot::Mutex;

use crate::byteview::ByteView;
use crate::lru::BoundedLruCache;

/// Mutex-guarded, lazily-initialized LRU shard for one group
pub struct CacheShard {
    /// Byte budget handed to the LRU on first write (0 = unbounded)
    capacity: usize,
    inner: Mutex<Option<BoundedLruCache<ByteView>>>,
}

impl CacheShard {
    /// Create a shard with the given byte budget
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(None),
        }
    }

    /// Look up a key; a hit promotes the entry and returns a cheap clone
    pub fn get(&self, key: &str) -> Option<ByteView> {
        let mut guard = self.inner.lock();
        guard.as_mut()?.get(key).cloned()
    }

    /// Insert a value, constructing the LRU on first use
    pub fn add(&self, key: &str, value: ByteView) {
        let mut guard = self.inner.lock();
        guard
            .get_or_insert_with(|| BoundedLruCache::new(self.capacity))
            .add(key, value);
    }

    /// True if the key is currently cached (no recency promotion)
    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        // get() promotes, which is fine for the assertions using this.
        self.get(key).is_some()
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, BoundedLruCache::len)
    }

    /// True if nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently accounted for
    pub fn used_bytes(&self) -> usize {
        self.inner
            .lock()
            .as_ref()
            .map_or(0, BoundedLruCache::used_bytes)
    }
}

// =============================================================================
// Tests
// =============================================================================
