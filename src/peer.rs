//! Peer capability contracts
//!
//! A peer is another node in the cluster that may own a given key under the
//! hash ring's placement. The cache core consumes these capabilities; the
//! transport (see [`crate::http`]) implements them. Timeouts and
//! cancellation, if desired, belong to the transport; the core blocks every
//! coalesced waiter until the peer call returns.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Request for a value owned by a remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRequest {
    /// Cache group name on the remote node
    pub group: String,
    /// Key to fetch
    pub key: String,
}

/// Response carrying the raw value bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerResponse {
    /// Value bytes; always an independent copy, never aliasing a cache entry
    pub value: Vec<u8>,
}

/// Fetches a value from one remote peer
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Perform the remote fetch for `(group, key)`
    async fn get(&self, request: &PeerRequest) -> Result<PeerResponse>;
}

/// Selects the remote owner for a key
///
/// Returns `None` when the key is owned locally or no peers are configured;
/// the caller then falls back to its local loader.
pub trait PeerPicker: Send + Sync {
    /// Pick the peer owning `key`, if it is not this node
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}
