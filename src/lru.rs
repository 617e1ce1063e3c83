//! Bounded LRU cache
//!
//! Capacity-bounded, recency-ordered key/value store with O(1) amortized
//! get/insert/evict. Capacity is counted in bytes: every entry accounts for
//! `key.len() + value.byte_len()`.
//!
//! # Design
//!
//! - Slot arena + free list instead of a pointer-linked list: each entry
//!   lives in a `Vec` slot, recency links are slot indices, vacated slots
//!   are recycled through the free list. O(1) move-to-front and evict with
//!   no aliasing.
//! - `max_bytes == 0` disables eviction entirely.
//! - Eviction removes the least-recently-used entry one at a time until the
//!   budget holds, so one oversized insert may evict many entries, including
//!   itself.
//!
//! This type is not thread-safe; [`crate::shard::CacheShard`] adds the lock.

use std::collections::HashMap;

/// Byte-size contract for cached values
pub trait Measured {
    /// Size of the value in bytes, used for capacity accounting
    fn byte_len(&self) -> usize;
}

impl Measured for crate::byteview::ByteView {
    fn byte_len(&self) -> usize {
        self.len()
    }
}

/// One arena slot holding a live entry plus its recency links
struct Slot<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Capacity-bounded LRU cache over byte-measured values
pub struct BoundedLruCache<V: Measured> {
    /// Byte budget; 0 means never evict
    max_bytes: usize,
    /// Sum of key.len() + value.byte_len() over live entries
    used_bytes: usize,
    /// Slot arena; `None` marks a vacated slot awaiting reuse
    slots: Vec<Option<Slot<V>>>,
    /// Indices of vacated slots
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    /// Key to slot index
    index: HashMap<String, usize>,
}

impl<V: Measured> BoundedLruCache<V> {
    /// Create a cache with the given byte budget (0 = unbounded)
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            used_bytes: 0,
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: HashMap::new(),
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if no entries are present
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes currently accounted for
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Configured byte budget
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Look up a key, promoting it to most-recently-used on a hit
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Insert or replace a value, then evict until the byte budget holds
    pub fn add(&mut self, key: &str, value: V) {
        if let Some(&idx) = self.index.get(key) {
            // Replace: adjust accounting by the size delta and promote.
            let slot = self.slots[idx]
                .as_mut()
                .unwrap_or_else(|| unreachable!("indexed slot is live"));
            self.used_bytes = self.used_bytes + value.byte_len() - slot.value.byte_len();
            slot.value = value;
            self.promote(idx);
        } else {
            self.used_bytes += key.len() + value.byte_len();
            let idx = self.alloc(Slot {
                key: key.to_string(),
                value,
                prev: None,
                next: None,
            });
            self.index.insert(key.to_string(), idx);
            self.push_front(idx);
        }

        while self.max_bytes != 0 && self.used_bytes > self.max_bytes {
            self.remove_oldest();
        }
    }

    /// Evict the least-recently-used entry; no-op when empty
    pub fn remove_oldest(&mut self) {
        let Some(idx) = self.tail else {
            return;
        };
        self.unlink(idx);
        let slot = self.slots[idx]
            .take()
            .unwrap_or_else(|| unreachable!("tail slot is live"));
        self.free.push(idx);
        self.index.remove(&slot.key);
        self.used_bytes -= slot.key.len() + slot.value.byte_len();
    }

    /// Store a slot in the arena, reusing a vacated index when possible
    fn alloc(&mut self, slot: Slot<V>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    /// Detach a slot from the recency list
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().unwrap_or_else(|| unreachable!());
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap_or_else(|| unreachable!()).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap_or_else(|| unreachable!()).prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slots[idx].as_mut().unwrap_or_else(|| unreachable!());
        slot.prev = None;
        slot.next = None;
    }

    /// Link a detached slot at the most-recently-used position
    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slots[idx].as_mut().unwrap_or_else(|| unreachable!());
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            self.slots[h].as_mut().unwrap_or_else(|| unreachable!()).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Move a live slot to the most-recently-used position
    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }
}

// =============================================================================
// Tests
// =============================================================================
