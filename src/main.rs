//! Monew Listing Server
//!
//! Serves the comment, article and interest listings over HTTP through the
//! stampede-safe read-through cache.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Monew Listing Server                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   API        │───▶│ ReadThrough  │───▶│   Keyset     │       │
//! │  │   (:8000)    │    │    Cache     │    │  Paginator   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │  ┌──────────────┐    ┌──────────────┐                           │
//! │  │   Health     │    │   Metrics    │                           │
//! │  │   (:8081)    │    │   (:8080)    │                           │
//! │  └──────────────┘    └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use monew::adapters::{
    InMemoryCacheStore, InMemoryDataSource, InMemoryLockManager, InMemoryNotificationChannel,
};
use monew::api::{self, ApiState};
use monew::domain::{CacheStore, LockManager, NotificationChannel};
use monew::readthrough::MetricsSnapshot;
use monew::{
    Article, Comment, Error, Interest, ListingService, PaginationConfig, ReadPreference,
    ReadThroughCache, ReadThroughConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Monew listing server - cached keyset pagination for news listings
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listing API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8000")]
    api_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// JSON file with `articles`, `comments` and `interests` arrays
    #[arg(long, env = "SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Redis URL for the shared cache, lock and notification channel
    #[cfg(feature = "redis")]
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Bound on every Redis call and pool checkout, in milliseconds
    #[cfg(feature = "redis")]
    #[arg(long, env = "REDIS_TIMEOUT_MS", default_value = "2000")]
    redis_timeout_ms: u64,

    /// Cached page time-to-live in seconds
    #[arg(long, env = "CACHE_TTL_SECONDS", default_value = "60")]
    cache_ttl_seconds: u64,

    /// How long a reader tries to take the recompute lock, in milliseconds
    #[arg(long, env = "LOCK_WAIT_MS", default_value = "5000")]
    lock_wait_ms: u64,

    /// Recompute lock lease in milliseconds
    #[arg(long, env = "LOCK_LEASE_MS", default_value = "10000")]
    lock_lease_ms: u64,

    /// How long a waiter blocks for the holder's notification, in milliseconds
    #[arg(long, env = "NOTIFY_WAIT_MS", default_value = "5000")]
    notify_wait_ms: u64,

    /// Bound on one page recompute in milliseconds; must be below the lease
    #[arg(long, env = "COMPUTE_TIMEOUT_MS", default_value = "8000")]
    compute_timeout_ms: u64,

    /// Bound on one data source query in milliseconds
    #[arg(long, env = "QUERY_TIMEOUT_MS", default_value = "8000")]
    query_timeout_ms: u64,

    /// Page size when a request gives none
    #[arg(long, env = "DEFAULT_LIMIT", default_value = "20")]
    default_limit: usize,

    /// Largest page size served
    #[arg(long, env = "MAX_LIMIT", default_value = "100")]
    max_limit: usize,

    /// Fail requests instead of reading uncached when the shared store is down
    #[arg(long, env = "STRICT_STORE")]
    strict_store: bool,

    /// Route listing reads to the primary instead of the replica
    #[arg(long, env = "READ_PRIMARY")]
    read_primary: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn read_through_config(&self) -> ReadThroughConfig {
        ReadThroughConfig {
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            lease: Duration::from_millis(self.lock_lease_ms),
            notify_wait: Duration::from_millis(self.notify_wait_ms),
            entry_ttl: Duration::from_secs(self.cache_ttl_seconds),
            compute_timeout: Duration::from_millis(self.compute_timeout_ms),
            degrade_on_store_failure: !self.strict_store,
            ..Default::default()
        }
    }

    fn pagination_config(&self) -> PaginationConfig {
        PaginationConfig {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            read_preference: if self.read_primary {
                ReadPreference::Primary
            } else {
                ReadPreference::Replica
            },
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Monew listing server");
    info!("  Cache TTL: {}s", args.cache_ttl_seconds);
    info!(
        "  Lock wait / lease: {}ms / {}ms",
        args.lock_wait_ms, args.lock_lease_ms
    );
    info!("  Default / max limit: {} / {}", args.default_limit, args.max_limit);
    info!("  Strict store: {}", args.strict_store);

    let read_through = args.read_through_config();
    read_through
        .validate()
        .context("invalid read-through configuration")?;
    if args.default_limit == 0 || args.default_limit > args.max_limit {
        anyhow::bail!(
            "default limit {} must be between 1 and max limit {}",
            args.default_limit,
            args.max_limit
        );
    }

    let seed = match &args.seed_file {
        Some(path) => load_seed(path)?,
        None => SeedData::default(),
    };
    info!(
        articles = seed.articles.len(),
        comments = seed.comments.len(),
        interests = seed.interests.len(),
        "Loaded listing data"
    );

    let shutdown = CancellationToken::new();
    let ports = build_ports(&args, shutdown.clone()).await?;
    let cache = Arc::new(ReadThroughCache::new(
        ports.store,
        ports.locks,
        ports.channel,
        read_through,
    ));

    let pagination = args.pagination_config();
    let comments = Arc::new(InMemoryDataSource::new(seed.comments));
    let articles = Arc::new(InMemoryDataSource::new(seed.articles));
    let interests = Arc::new(InMemoryDataSource::new(seed.interests));
    for mark in &seed.likes {
        comments.mark(mark.user_id, mark.id);
    }
    for mark in &seed.views {
        articles.mark(mark.user_id, mark.id);
    }
    for mark in &seed.subscriptions {
        interests.mark(mark.user_id, mark.id);
    }

    let state = ApiState::new(
        ListingService::new(comments, pagination.clone(), cache.clone()),
        ListingService::new(articles, pagination.clone(), cache.clone()),
        ListingService::new(interests, pagination, cache.clone()),
    );

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_shutdown).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_cache = cache.clone();
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_cache, metrics_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        ctrl_c_shutdown.cancel();
    });

    run_api_server(&args.api_addr, state, shutdown).await?;

    info!("Server shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let default_directives = format!("{},hyper=warn,redis=warn", level.to_string().to_lowercase());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

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
// Wiring
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct SeedData {
    #[serde(default)]
    articles: Vec<Article>,
    #[serde(default)]
    comments: Vec<Comment>,
    #[serde(default)]
    interests: Vec<Interest>,
    /// Comments liked, per user.
    #[serde(default)]
    likes: Vec<SeedMark>,
    /// Articles viewed, per user.
    #[serde(default)]
    views: Vec<SeedMark>,
    /// Interests subscribed to, per user.
    #[serde(default)]
    subscriptions: Vec<SeedMark>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedMark {
    user_id: uuid::Uuid,
    id: uuid::Uuid,
}

fn load_seed(path: &Path) -> anyhow::Result<SeedData> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse seed file {}", path.display()))
}

struct Ports {
    store: Arc<dyn CacheStore>,
    locks: Arc<dyn LockManager>,
    channel: Arc<dyn NotificationChannel>,
}

async fn build_ports(args: &Args, shutdown: CancellationToken) -> anyhow::Result<Ports> {
    #[cfg(feature = "redis")]
    if let Some(url) = &args.redis_url {
        use monew::adapters::redis_store::{
            connect, RedisCacheStore, RedisLockManager, RedisNotificationChannel,
        };

        let op_timeout = Duration::from_millis(args.redis_timeout_ms.max(1));
        let pool = connect(url, op_timeout)
            .await
            .context("failed to connect to Redis")?;
        info!(timeout_ms = args.redis_timeout_ms, "Using Redis for cache, locks and notifications");
        return Ok(Ports {
            store: Arc::new(RedisCacheStore::new(pool.clone(), op_timeout)),
            locks: Arc::new(RedisLockManager::new(pool.clone(), op_timeout)),
            channel: Arc::new(RedisNotificationChannel::new(pool, url, op_timeout)?),
        });
    }

    let store = Arc::new(InMemoryCacheStore::new());
    spawn_purger(store.clone(), Duration::from_secs(args.cache_ttl_seconds.max(1)), shutdown);
    info!("Using in-process cache, locks and notifications");
    Ok(Ports {
        store,
        locks: Arc::new(InMemoryLockManager::new()),
        channel: Arc::new(InMemoryNotificationChannel::new()),
    })
}

/// Periodically drop expired entries that were never read again.
fn spawn_purger(store: Arc<InMemoryCacheStore>, every: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    store.purge_expired();
                }
            }
        }
    });
}

// =============================================================================
// Listing API
// =============================================================================

type HttpResponse = Response<Full<Bytes>>;

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

async fn run_api_server(
    addr: &str,
    state: ApiState,
    shutdown: CancellationToken,
) -> monew::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid API server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("Listing API listening on {}", addr);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, shutdown: CancellationToken) -> monew::Result<()> {
    async fn health_handler(req: Request<Incoming>) -> Result<HttpResponse, Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "text/plain", "ok"),
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Prometheus view of the read-through counters, refreshed on every scrape.
struct ReadThroughCollector {
    registry: prometheus::Registry,
    events: prometheus::IntGaugeVec,
    hit_ratio: prometheus::Gauge,
    compute_latency: prometheus::Gauge,
}

impl ReadThroughCollector {
    fn new() -> monew::Result<Self> {
        let registry = prometheus::Registry::new();
        let events = prometheus::IntGaugeVec::new(
            prometheus::Opts::new(
                "monew_readthrough_events_total",
                "Read-through state machine transitions since start",
            ),
            &["event"],
        )
        .map_err(metrics_error)?;
        let hit_ratio = prometheus::Gauge::new("monew_readthrough_hit_ratio", "Cache hit ratio")
            .map_err(metrics_error)?;
        let compute_latency = prometheus::Gauge::new(
            "monew_readthrough_compute_seconds",
            "Smoothed page recompute latency",
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(events.clone())).map_err(metrics_error)?;
        registry.register(Box::new(hit_ratio.clone())).map_err(metrics_error)?;
        registry
            .register(Box::new(compute_latency.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            events,
            hit_ratio,
            compute_latency,
        })
    }

    fn render(&self, snapshot: &MetricsSnapshot) -> monew::Result<Vec<u8>> {
        use prometheus::{Encoder, TextEncoder};

        let counters = [
            ("hit", snapshot.hits),
            ("miss", snapshot.misses),
            ("corrupt_entry", snapshot.corrupt_entries),
            ("lock_acquired", snapshot.locks_acquired),
            ("lock_contended", snapshot.locks_contended),
            ("double_check_hit", snapshot.double_check_hits),
            ("compute", snapshot.computes),
            ("compute_failure", snapshot.compute_failures),
            ("wait", snapshot.waits),
            ("notification", snapshot.notifications),
            ("wait_timeout", snapshot.wait_timeouts),
            ("recheck_miss", snapshot.recheck_misses),
            ("store_error", snapshot.store_errors),
            ("degraded_compute", snapshot.degraded_computes),
        ];
        for (event, value) in counters {
            self.events
                .with_label_values(&[event])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }
        self.hit_ratio.set(snapshot.hit_ratio);
        self.compute_latency
            .set(snapshot.compute_latency.as_secs_f64());

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok(buffer)
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

async fn run_metrics_server(
    addr: &str,
    cache: Arc<ReadThroughCache>,
    shutdown: CancellationToken,
) -> monew::Result<()> {
    let collector = Arc::new(ReadThroughCollector::new()?);

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };

        let io = TokioIo::new(stream);
        let cache = cache.clone();
        let collector = collector.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let cache = cache.clone();
                let collector = collector.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let snapshot = cache.metrics().snapshot();
                            match collector.render(&snapshot) {
                                Ok(body) => respond(
                                    StatusCode::OK,
                                    "text/plain; version=0.0.4",
                                    body,
                                ),
                                Err(e) => {
                                    error!("Failed to render metrics: {}", e);
                                    respond(
                                        StatusCode::INTERNAL_SERVER_ERROR,
                                        "text/plain",
                                        e.to_string(),
                                    )
                                }
                            }
                        }
                        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
