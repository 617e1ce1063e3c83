//! Error types for meshcache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in meshcache
///
/// The enum is `Clone` on purpose: a single terminal error produced by one
/// deduplicated load is handed verbatim to every coalesced waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Empty lookup key
    #[error("key must not be empty")]
    EmptyKey,

    /// Group name already registered
    #[error("group already registered: {0}")]
    GroupExists(String),

    /// Group lookup failed
    #[error("no such group: {0}")]
    NoSuchGroup(String),

    /// Peer picker attached more than once
    #[error("peer picker already registered for group: {0}")]
    PeersAlreadyRegistered(String),

    /// Key absent at the source of truth
    #[error("key not found at source: {0}")]
    SourceMiss(String),

    /// Remote peer fetch failed
    #[error("peer fetch failed: {0}")]
    Transport(String),

    /// Peer replied with a non-success status
    #[error("peer returned status {status}")]
    PeerStatus { status: u16 },

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
