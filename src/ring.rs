//! Consistent hash ring
//!
//! Maps arbitrary keys to one of a small set of registered nodes. Each real
//! node is projected onto the ring as `replicas` virtual points so that
//! ownership of contiguous hash-space arcs spreads evenly across few nodes.
//! Adding a node remaps only the arcs that land before its new virtual
//! points; the rest of the keyspace keeps its mapping.
//!
//! The ring is append-only: node removal is not part of the contract
//! (membership is externally configured and static once set).

use std::collections::HashMap;

/// Hash function over raw key bytes
pub type HashFn = Box<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Default number of virtual points per real node
pub const DEFAULT_REPLICAS: usize = 50;

/// Virtual-node consistent hash ring
pub struct HashRing {
    hash: HashFn,
    /// Virtual points per real node
    replicas: usize,
    /// Sorted virtual-point hashes
    ring: Vec<u32>,
    /// Virtual-point hash to real node
    nodes: HashMap<u32, String>,
}

impl HashRing {
    /// Create a ring hashing with crc32c
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, Box::new(crc32c::crc32c))
    }

    /// Create a ring with a custom hash function
    pub fn with_hasher(replicas: usize, hash: HashFn) -> Self {
        Self {
            hash,
            replicas,
            ring: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    /// Register real nodes, projecting each onto `replicas` virtual points
    ///
    /// Re-adding a node creates duplicate virtual points; the ring does not
    /// deduplicate.
    pub fn add<I, S>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for node in nodes {
            let node = node.as_ref();
            for i in 0..self.replicas {
                let point = (self.hash)(format!("{}{}", i, node).as_bytes());
                self.ring.push(point);
                self.nodes.insert(point, node.to_string());
            }
        }
        self.ring.sort_unstable();
    }

    /// Resolve the node owning a key; `None` when the ring is empty
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.ring.is_empty() {
            return None;
        }
        let key_hash = (self.hash)(key.as_bytes());
        // First virtual point at or past the key hash, wrapping to the
        // start of the ring past the maximum.
        let idx = self.ring.partition_point(|&point| point < key_hash) % self.ring.len();
        self.nodes.get(&self.ring[idx]).map(String::as_str)
    }

    /// True if no nodes are registered
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of virtual points on the ring
    pub fn virtual_len(&self) -> usize {
        self.ring.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
