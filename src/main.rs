//! meshcache node
//!
//! Runs one cache node: a peer server speaking the HTTP peer protocol, an
//! optional user-facing API server, and a demo "scores" group whose loader
//! reads from a static table standing in for a slow backing database.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meshcache::{Error, Group, GroupRegistry, HttpPool, LoaderFn, Result};

/// Stand-in for a slow source-of-truth database
static DB: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| HashMap::from([("Tom", "630"), ("Jack", "589"), ("Sam", "567")]));

// =============================================================================
// CLI Arguments
// =============================================================================

/// meshcache - distributed read-through cache node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address this node serves peer traffic on
    #[arg(long, env = "MESHCACHE_ADDR", default_value = "http://127.0.0.1:8001")]
    addr: String,

    /// Full peer set, own address included (comma-separated)
    #[arg(
        long,
        env = "MESHCACHE_PEERS",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:8001,http://127.0.0.1:8002,http://127.0.0.1:8003"
    )]
    peers: Vec<String>,

    /// User-facing API bind address; omit to run peer-only
    #[arg(long, env = "MESHCACHE_API_ADDR")]
    api_addr: Option<String>,

    /// Local shard byte budget for the demo group
    #[arg(long, env = "MESHCACHE_CACHE_BYTES", default_value = "2048")]
    cache_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn init_tracing(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// API Server
// =============================================================================

/// User-facing lookup endpoint: `GET /api?key=<key>`
async fn run_api_server(addr: &str, group: Arc<Group>) -> Result<()> {
    async fn api_handler(
        req: Request<hyper::body::Incoming>,
        group: Arc<Group>,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        if req.uri().path() != "/api" {
            return Ok(Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap());
        }

        let key = req.uri().query().and_then(query_key).unwrap_or_default();

        let response = match group.get(&key).await {
            Ok(value) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/octet-stream")
                .body(Full::new(Bytes::from(value.to_vec())))
                .unwrap(),
            Err(Error::EmptyKey) => Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Full::new(Bytes::from("key is required")))
                .unwrap(),
            Err(Error::SourceMiss(_)) => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("key not found")))
                .unwrap(),
            Err(e) => {
                warn!(error = %e, "api lookup failed");
                let body = serde_json::json!({ "error": e.to_string() }).to_string();
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header("Content-Type", "application/json")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap()
            }
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .strip_prefix("http://")
        .unwrap_or(addr)
        .parse()
        .map_err(|e| Error::Internal(format!("invalid api address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind api server: {}", e)))?;

    info!(%addr, "api server listening");

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("api accept error: {}", e)))?;
        let io = TokioIo::new(stream);
        let group = Arc::clone(&group);

        tokio::spawn(async move {
            let service = service_fn(move |req| api_handler(req, Arc::clone(&group)));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!(error = %e, "api connection error");
            }
        });
    }
}

/// Extract and percent-decode the `key` query parameter
fn query_key(query: &str) -> Option<String> {
    let raw = query.split('&').find_map(|pair| pair.strip_prefix("key="))?;
    Some(
        urlencoding::decode(raw)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| raw.to_string()),
    )
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    info!(addr = %args.addr, peers = ?args.peers, "starting meshcache node");

    let registry = Arc::new(GroupRegistry::new());
    let group = registry.add_group(
        "scores",
        args.cache_bytes,
        Arc::new(LoaderFn(|key: String| async move {
            info!(key = %key, "loading from slow db");
            match DB.get(key.as_str()) {
                Some(value) => Ok(value.as_bytes().to_vec()),
                None => Err(Error::SourceMiss(key)),
            }
        })),
    )?;

    let pool = Arc::new(HttpPool::new(args.addr.clone(), Arc::clone(&registry)));
    pool.set_peers(args.peers.clone());
    group.register_peers(Arc::clone(&pool) as Arc<dyn meshcache::PeerPicker>)?;

    if let Some(api_addr) = args.api_addr.clone() {
        let group = Arc::clone(&group);
        tokio::spawn(async move {
            if let Err(e) = run_api_server(&api_addr, group).await {
                tracing::error!(error = %e, "api server exited");
            }
        });
    }

    pool.serve(&args.addr).await
}

// =============================================================================
// Tests
// =============================================================================
