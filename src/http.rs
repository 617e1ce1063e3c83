//! HTTP peer transport
//!
//! Carries node-to-node traffic for the cache: every node runs one
//! [`HttpPool`], which is both the server side (answering
//! `GET /_meshcache/{group}/{key}` with the raw value bytes) and the client
//! side (a consistent-hash ring plus one [`HttpGetter`] per peer,
//! implementing [`PeerPicker`]).
//!
//! The peer set is installed once via [`HttpPool::set_peers`] and treated as
//! static; re-installing replaces ring and getter table wholesale.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::group::GroupRegistry;
use crate::peer::{PeerGetter, PeerPicker, PeerRequest, PeerResponse};
use crate::ring::{HashRing, DEFAULT_REPLICAS};

/// Path prefix for peer traffic
pub const DEFAULT_BASE_PATH: &str = "/_meshcache/";

/// Client for one remote peer
pub struct HttpGetter {
    client: reqwest::Client,
    /// Peer address plus base path, e.g. `http://10.0.0.2:8008/_meshcache/`
    base_url: String,
}

impl HttpGetter {
    fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn url_for(&self, request: &PeerRequest) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(&request.group),
            urlencoding::encode(&request.key),
        )
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, request: &PeerRequest) -> Result<PeerResponse> {
        let url = self.url_for(request);
        debug!(%url, "peer fetch");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::PeerStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(PeerResponse {
            value: body.to_vec(),
        })
    }
}

/// Ring plus per-peer getters, swapped wholesale by `set_peers`
struct Routes {
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// HTTP peer pool: server handler and peer picker for one node
pub struct HttpPool {
    /// This node's own address, e.g. `http://127.0.0.1:8001`
    self_addr: String,
    base_path: String,
    registry: Arc<GroupRegistry>,
    routes: RwLock<Routes>,
    client: reqwest::Client,
}

impl HttpPool {
    /// Create a pool for the node at `self_addr`
    pub fn new(self_addr: impl Into<String>, registry: Arc<GroupRegistry>) -> Self {
        Self {
            self_addr: self_addr.into(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            registry,
            routes: RwLock::new(Routes {
                ring: HashRing::new(DEFAULT_REPLICAS),
                getters: HashMap::new(),
            }),
            client: reqwest::Client::new(),
        }
    }

    /// Install the peer set (own address included), replacing any prior set
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let peers: Vec<String> = peers.into_iter().map(Into::into).collect();

        let mut ring = HashRing::new(DEFAULT_REPLICAS);
        ring.add(&peers);

        let getters = peers
            .iter()
            .map(|peer| {
                let base_url = format!("{}{}", peer, self.base_path);
                (
                    peer.clone(),
                    Arc::new(HttpGetter::new(self.client.clone(), base_url)),
                )
            })
            .collect();

        *self.routes.write() = Routes { ring, getters };
        info!(self_addr = %self.self_addr, peers = peers.len(), "peer set installed");
    }

    /// Serve the peer protocol on `addr` until the process exits
    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<()> {
        let addr: SocketAddr = host_port(addr)
            .parse()
            .map_err(|e| Error::Internal(format!("invalid listen address {}: {}", addr, e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("failed to bind {}: {}", addr, e)))?;

        info!(%addr, "peer server listening");

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| Error::Internal(format!("accept failed: {}", e)))?;
            let io = TokioIo::new(stream);
            let pool = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let pool = Arc::clone(&pool);
                    async move { Ok::<_, Infallible>(pool.handle(req).await) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(error = %e, "peer connection error");
                }
            });
        }
    }

    /// Answer one peer request
    async fn handle(&self, req: Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
        let path = req.uri().path();
        debug!(%path, "peer request");

        let Some((group_name, key)) = parse_path(path, &self.base_path) else {
            return plain_response(StatusCode::BAD_REQUEST, "bad request");
        };

        match self.lookup(&group_name, &key).await {
            Ok(value) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/octet-stream")
                .body(Full::new(Bytes::from(value.to_vec())))
                .unwrap(),
            Err(Error::NoSuchGroup(_)) => plain_response(StatusCode::NOT_FOUND, "no such group"),
            Err(Error::SourceMiss(_)) => plain_response(StatusCode::NOT_FOUND, "key not found"),
            Err(Error::EmptyKey) => plain_response(StatusCode::BAD_REQUEST, "bad request"),
            Err(e) => {
                warn!(group = %group_name, key = %key, error = %e, "peer request failed");
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, "load failed")
            }
        }
    }

    /// Resolve a group in the registry and run the lookup
    async fn lookup(&self, group_name: &str, key: &str) -> Result<crate::byteview::ByteView> {
        let group = self
            .registry
            .get(group_name)
            .ok_or_else(|| Error::NoSuchGroup(group_name.to_string()))?;
        group.get(key).await
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let routes = self.routes.read();
        let peer = routes.ring.get(key)?;
        if peer == self.self_addr {
            return None;
        }
        debug!(%peer, key, "picked peer");
        routes
            .getters
            .get(peer)
            .cloned()
            .map(|getter| getter as Arc<dyn PeerGetter>)
    }
}

/// Split `/{base}/{group}/{key}` into decoded group and key
fn parse_path(path: &str, base_path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix(base_path)?;
    let (group, key) = rest.split_once('/')?;
    if group.is_empty() || key.is_empty() {
        return None;
    }
    Some((
        urlencoding::decode(group).ok()?.into_owned(),
        urlencoding::decode(key).ok()?.into_owned(),
    ))
}

/// Strip a scheme prefix, leaving host:port for socket binding
fn host_port(addr: &str) -> &str {
    addr.strip_prefix("http://").unwrap_or(addr)
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

// =============================================================================
// Tests
// =============================================================================
