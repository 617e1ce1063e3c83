//! Cache groups and the group registry
//!
//! A group is a named, independently-capacitied cache namespace: one local
//! shard, one source-of-truth loader, an optional peer picker, and a flight
//! group collapsing concurrent misses. `Group::get` ties them together:
//!
//! ```text
//! get(key) ── shard hit ──────────────────────────────► value
//!     │
//!     └─ miss ─► single-flight ─► pick peer ─► remote fetch ──► value
//!                      │              │              │
//!                      │         no peer         fetch failed
//!                      │              └──────┬───────┘
//!                      │                     ▼
//!                      └──────────► local loader ─► populate shard ─► value
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::byteview::ByteView;
use crate::error::{Error, Result};
use crate::flight::FlightGroup;
use crate::peer::{PeerGetter, PeerPicker, PeerRequest};
use crate::shard::CacheShard;

/// Source-of-truth loader, invoked on a true cache miss
#[async_trait]
pub trait Loader: Send + Sync {
    /// Load the value for `key` from the source
    async fn load(&self, key: &str) -> Result<Vec<u8>>;
}

/// Adapter turning a plain async closure into a [`Loader`]
pub struct LoaderFn<F>(pub F);

#[async_trait]
impl<F, Fut> Loader for LoaderFn<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<u8>>> + Send,
{
    async fn load(&self, key: &str) -> Result<Vec<u8>> {
        (self.0)(key.to_string()).await
    }
}

/// A named cache namespace with its own loader and local shard
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,
    shard: CacheShard,
    /// Write-once peer picker slot
    peers: OnceCell<Arc<dyn PeerPicker>>,
    flights: FlightGroup<ByteView>,
}

impl Group {
    /// Create a group; prefer [`GroupRegistry::add_group`] so lookups work
    pub fn new(name: impl Into<String>, cache_bytes: usize, loader: Arc<dyn Loader>) -> Self {
        Self {
            name: name.into(),
            loader,
            shard: CacheShard::new(cache_bytes),
            peers: OnceCell::new(),
            flights: FlightGroup::new(),
        }
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach the peer picker; exactly once per group
    pub fn register_peers(&self, picker: Arc<dyn PeerPicker>) -> Result<()> {
        self.peers
            .set(picker)
            .map_err(|_| Error::PeersAlreadyRegistered(self.name.clone()))
    }

    /// Look up a value, loading it through peers or the local source on miss
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        if let Some(value) = self.shard.get(key) {
            debug!(group = %self.name, key, "cache hit");
            return Ok(value);
        }

        self.load(key).await
    }

    /// Deduplicated load: peer first, local source as the single fallback
    async fn load(&self, key: &str) -> Result<ByteView> {
        self.flights
            .work(key, || async {
                if let Some(picker) = self.peers.get() {
                    if let Some(peer) = picker.pick_peer(key) {
                        match self.get_from_peer(peer.as_ref(), key).await {
                            Ok(value) => return Ok(value),
                            // Recovered by the local fallback; the error only
                            // surfaces if the fallback fails too.
                            Err(err) => {
                                warn!(group = %self.name, key, error = %err,
                                      "peer fetch failed, falling back to local load");
                            }
                        }
                    }
                }
                self.get_locally(key).await
            })
            .await
    }

    /// Invoke the loader and populate the local shard on success
    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        let bytes = self.loader.load(key).await?;
        let value = ByteView::from(bytes);
        self.shard.add(key, value.clone());
        Ok(value)
    }

    /// Fetch from the remote owner; the peer stays authoritative, so the
    /// local shard is not populated
    async fn get_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> Result<ByteView> {
        let response = peer
            .get(&PeerRequest {
                group: self.name.clone(),
                key: key.to_string(),
            })
            .await?;
        Ok(ByteView::from(response.value))
    }

    /// Number of locally cached entries
    pub fn cached_entries(&self) -> usize {
        self.shard.len()
    }

    /// Bytes held by the local shard
    pub fn cached_bytes(&self) -> usize {
        self.shard.used_bytes()
    }

    #[cfg(test)]
    fn shard(&self) -> &CacheShard {
        &self.shard
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("cached_entries", &self.shard.len())
            .field("cached_bytes", &self.shard.used_bytes())
            .finish_non_exhaustive()
    }
}

/// Process-wide name-to-group table
///
/// Explicitly owned and injected wherever lookup is needed; there is no
/// ambient global registry. Reads vastly outnumber registrations, hence the
/// read/write lock.
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl GroupRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct and register a group under its name
    pub fn add_group(
        &self,
        name: impl Into<String>,
        cache_bytes: usize,
        loader: Arc<dyn Loader>,
    ) -> Result<Arc<Group>> {
        let name = name.into();
        let mut groups = self.groups.write();
        if groups.contains_key(&name) {
            return Err(Error::GroupExists(name));
        }
        let group = Arc::new(Group::new(name.clone(), cache_bytes, loader));
        groups.insert(name, Arc::clone(&group));
        Ok(group)
    }

    /// Look up a group by name
    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().get(name).cloned()
    }

    /// Number of registered groups
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// True if no groups are registered
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn source_table() -> HashMap<&'static str, &'static str> {
        HashMap::from([("Tom", "630"), ("Jack", "589"), ("Sam", "567")])
    }

    /// Loader over a static table that counts loads per key
    struct CountingLoader {
        table: HashMap<&'static str, &'static str>,
        loads: Mutex<HashMap<String, usize>>,
    }

    impl CountingLoader {
        fn new() -> Self {
            Self {
                table: source_table(),
                loads: Mutex::new(HashMap::new()),
            }
        }

        fn loads_for(&self, key: &str) -> usize {
            self.loads.lock().unwrap().get(key).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Loader for CountingLoader {
        async fn load(&self, key: &str) -> Result<Vec<u8>> {
            *self
                .loads
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_insert(0) += 1;
            match self.table.get(key) {
                Some(value) => Ok(value.as_bytes().to_vec()),
                None => Err(Error::SourceMiss(key.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_loader_fn_adapter() {
        let loader = LoaderFn(|key: String| async move { Ok::<_, Error>(key.into_bytes()) });
        assert_eq!(loader.load("key").await.unwrap(), b"key".to_vec());
    }

    #[tokio::test]
    async fn test_get_loads_once_then_hits_cache() {
        let loader = Arc::new(CountingLoader::new());
        let group = Group::new("scores", 2 << 10, Arc::clone(&loader) as Arc<dyn Loader>);

        for (key, want) in source_table() {
            let value = group.get(key).await.unwrap();
            assert_eq!(value.to_string(), want);

            // Second read must come from the shard.
            let value = group.get(key).await.unwrap();
            assert_eq!(value.to_string(), want);
            assert_eq!(loader.loads_for(key), 1, "cache missed for {}", key);
        }
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let group = Group::new(
            "scores",
            1024,
            Arc::new(CountingLoader::new()) as Arc<dyn Loader>,
        );
        assert_eq!(group.get("").await, Err(Error::EmptyKey));
    }

    #[tokio::test]
    async fn test_source_miss_surfaces_and_caches_nothing() {
        let group = Group::new(
            "scores",
            1024,
            Arc::new(CountingLoader::new()) as Arc<dyn Loader>,
        );

        assert_eq!(
            group.get("unknown").await,
            Err(Error::SourceMiss("unknown".to_string()))
        );
        assert!(group.shard().get("unknown").is_none());
        assert_eq!(group.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_misses_load_once() {
        let loader = Arc::new(CountingLoader::new());
        let group = Arc::new(Group::new(
            "scores",
            2 << 10,
            Arc::clone(&loader) as Arc<dyn Loader>,
        ));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let group = Arc::clone(&group);
            tasks.push(tokio::spawn(async move { group.get("Tom").await }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().to_string(), "630");
        }
        assert_eq!(loader.loads_for("Tom"), 1);
    }

    /// Peer that records fetches and either serves or fails
    struct ScriptedPeer {
        fetches: AtomicUsize,
        response: Result<Vec<u8>>,
    }

    #[async_trait]
    impl PeerGetter for ScriptedPeer {
        async fn get(&self, request: &PeerRequest) -> Result<PeerResponse> {
            assert_eq!(request.group, "scores");
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.response.clone().map(|value| PeerResponse { value })
        }
    }

    struct SinglePeerPicker(Arc<ScriptedPeer>);

    impl PeerPicker for SinglePeerPicker {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(Arc::clone(&self.0) as Arc<dyn PeerGetter>)
        }
    }

    #[tokio::test]
    async fn test_peer_hit_skips_local_shard() {
        let loader = Arc::new(CountingLoader::new());
        let group = Group::new("scores", 1024, Arc::clone(&loader) as Arc<dyn Loader>);

        let peer = Arc::new(ScriptedPeer {
            fetches: AtomicUsize::new(0),
            response: Ok(b"remote".to_vec()),
        });
        group
            .register_peers(Arc::new(SinglePeerPicker(Arc::clone(&peer))))
            .unwrap();

        let value = group.get("Tom").await.unwrap();
        assert_eq!(value.to_string(), "remote");
        assert_eq!(peer.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(loader.loads_for("Tom"), 0);
        // The remote node stays authoritative; nothing cached locally.
        assert_eq!(group.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_peer_failure_falls_back_to_local_load() {
        let loader = Arc::new(CountingLoader::new());
        let group = Group::new("scores", 1024, Arc::clone(&loader) as Arc<dyn Loader>);

        let peer = Arc::new(ScriptedPeer {
            fetches: AtomicUsize::new(0),
            response: Err(Error::Transport("connection refused".to_string())),
        });
        group
            .register_peers(Arc::new(SinglePeerPicker(Arc::clone(&peer))))
            .unwrap();

        let value = group.get("Tom").await.unwrap();
        assert_eq!(value.to_string(), "630");
        assert_eq!(peer.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(loader.loads_for("Tom"), 1);
        assert_eq!(group.cached_entries(), 1);
    }

    #[tokio::test]
    async fn test_peer_failure_then_source_miss_propagates_real_error() {
        let group = Group::new(
            "scores",
            1024,
            Arc::new(CountingLoader::new()) as Arc<dyn Loader>,
        );

        let peer = Arc::new(ScriptedPeer {
            fetches: AtomicUsize::new(0),
            response: Err(Error::Transport("connection refused".to_string())),
        });
        group
            .register_peers(Arc::new(SinglePeerPicker(peer)))
            .unwrap();

        // The terminal failure is the source miss, not a swallowed nothing.
        assert_eq!(
            group.get("unknown").await,
            Err(Error::SourceMiss("unknown".to_string()))
        );
    }

    #[tokio::test]
    async fn test_register_peers_twice_is_an_error() {
        let group = Group::new(
            "scores",
            1024,
            Arc::new(CountingLoader::new()) as Arc<dyn Loader>,
        );
        let peer = Arc::new(ScriptedPeer {
            fetches: AtomicUsize::new(0),
            response: Ok(Vec::new()),
        });

        group
            .register_peers(Arc::new(SinglePeerPicker(Arc::clone(&peer))))
            .unwrap();
        assert_eq!(
            group.register_peers(Arc::new(SinglePeerPicker(peer))),
            Err(Error::PeersAlreadyRegistered("scores".to_string()))
        );
    }

    #[tokio::test]
    async fn test_registry_lookup_and_duplicate_rejection() {
        let registry = GroupRegistry::new();
        assert!(registry.is_empty());

        let group = registry
            .add_group(
                "scores",
                1024,
                Arc::new(CountingLoader::new()) as Arc<dyn Loader>,
            )
            .unwrap();
        assert_eq!(group.name(), "scores");
        assert_eq!(registry.len(), 1);

        assert!(registry.get("scores").is_some());
        assert!(registry.get("other").is_none());

        let duplicate = registry.add_group(
            "scores",
            1024,
            Arc::new(CountingLoader::new()) as Arc<dyn Loader>,
        );
        assert_matches::assert_matches!(duplicate, Err(Error::GroupExists(_)));
    }

    #[tokio::test]
    async fn test_group_debug_reports_name_and_usage() {
        let group = Group::new(
            "scores",
            1024,
            Arc::new(CountingLoader::new()) as Arc<dyn Loader>,
        );
        group.get("Tom").await.unwrap();

        let rendered = format!("{:?}", group);
        assert!(rendered.contains("scores"));
        assert!(rendered.contains("cached_entries: 1"));
    }

    #[tokio::test]
    async fn test_retrieved_value_copies_do_not_alias_cache() {
        let group = Group::new(
            "scores",
            1024,
            Arc::new(CountingLoader::new()) as Arc<dyn Loader>,
        );

        let value = group.get("Tom").await.unwrap();
        let mut copy = value.to_vec();
        copy[0] = b'X';

        let again = group.get("Tom").await.unwrap();
        assert_eq!(again.to_vec(), b"630".to_vec());
    }
}
