//! meshcache - Distributed Read-Through In-Process Cache
//!
//! Each node holds a bounded local cache shard; nodes cooperate over an HTTP
//! peer protocol so that any key is owned by exactly one node, chosen by
//! consistent hashing, with concurrent misses for the same key collapsed
//! into a single upstream load.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Group                                 │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  CacheShard          │  FlightGroup        │  PeerPicker          │
//! │  ┌────────────────┐  │  ┌───────────────┐  │  ┌────────────────┐  │
//! │  │ BoundedLruCache│  │  │ one in-flight │  │  │ HashRing +     │  │
//! │  │ (byte budget)  │  │  │ load per key  │  │  │ HttpGetter per │  │
//! │  └────────────────┘  │  └───────────────┘  │  │ peer (HttpPool)│  │
//! │                      │                     │  └────────────────┘  │
//! │                      └── miss ──► peer fetch ──► local Loader     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`byteview`] - Immutable byte values with copy-on-read
//! - [`lru`] - Bounded, recency-ordered eviction cache
//! - [`shard`] - Mutex-guarded per-group cache shard
//! - [`ring`] - Virtual-node consistent hash ring
//! - [`flight`] - Single-flight load deduplication
//! - [`group`] - Cache groups, loader capability, group registry
//! - [`peer`] - Peer picker/getter contracts
//! - [`http`] - HTTP peer transport (server and client)
//! - [`error`] - Error types

pub mod byteview;
pub mod error;
pub mod flight;
pub mod group;
pub mod http;
pub mod lru;
pub mod peer;
pub mod ring;
pub mod shard;

// Re-export commonly used types
pub use byteview::ByteView;
pub use error::{Error, Result};
pub use flight::FlightGroup;
pub use group::{Group, GroupRegistry, Loader, LoaderFn};
pub use http::{HttpGetter, HttpPool};
pub use lru::BoundedLruCache;
pub use peer::{PeerGetter, PeerPicker, PeerRequest, PeerResponse};
pub use ring::HashRing;
pub use shard::CacheShard;
