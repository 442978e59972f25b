//! Redis Adapters
//!
//! Shared-store implementations of the cache, lock and notification ports,
//! for running several `monew` instances against one Redis.
//!
//! - `RedisCacheStore`: `GET` / `SET EX`
//! - `RedisLockManager`: `SET NX PX` with a random owner token, released by
//!   a compare-and-delete script so a stale holder cannot free a new lease
//! - `RedisNotificationChannel`: `PUBLISH`, with a dedicated pub/sub
//!   connection per subscription
//!
//! Every pool checkout and round trip is bounded by an operation timeout, so
//! an exhausted pool or a stalled server surfaces as `StoreUnavailable`
//! instead of parking the caller.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime, Timeouts};
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::ports::{
    CacheStore, Delivery, LockHandle, LockManager, NotificationChannel, Subscription,
};
use crate::error::{Error, Result};

/// Deletes the lock only if it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// How often a contended `try_acquire` retries `SET NX`.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Default bound on one pool checkout or Redis round trip.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

fn unavailable(context: &str, e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(format!("{}: {}", context, e))
}

/// Run `call`, failing with `StoreUnavailable` once `limit` has passed.
async fn bounded<T>(
    context: &str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(unavailable(context, format!("timed out after {:?}", limit))),
    }
}

/// Pool configuration for `url` with wait, create and recycle timeouts.
pub fn pool_config(url: &str, op_timeout: Duration) -> Config {
    let mut timeouts = Timeouts::default();
    timeouts.wait = Some(op_timeout);
    timeouts.create = Some(op_timeout);
    timeouts.recycle = Some(op_timeout);

    let mut pool = PoolConfig::default();
    pool.timeouts = timeouts;

    let mut config = Config::from_url(url);
    config.pool = Some(pool);
    config
}

/// Build a connection pool for `url` and check it answers.
pub async fn connect(url: &str, op_timeout: Duration) -> Result<Pool> {
    let pool = pool_config(url, op_timeout)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| Error::Config(format!("invalid Redis configuration: {}", e)))?;

    let pong: String = bounded("redis ping", op_timeout, async {
        let mut conn = connection(&pool).await?;
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("redis ping", e))
    })
    .await?;

    info!(reply = %pong, "Connected to Redis");
    Ok(pool)
}

async fn connection(pool: &Pool) -> Result<Connection> {
    pool.get().await.map_err(|e| unavailable("redis pool", e))
}

// =============================================================================
// Cache Store
// =============================================================================

pub struct RedisCacheStore {
    pool: Pool,
    op_timeout: Duration,
}

impl RedisCacheStore {
    pub fn new(pool: Pool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        bounded("redis GET", self.op_timeout, async {
            let mut conn = connection(&self.pool).await?;
            let value: Option<Vec<u8>> = conn
                .get(key)
                .await
                .map_err(|e| unavailable("redis GET", e))?;
            Ok(value.map(Bytes::from))
        })
        .await
    }

    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let ttl_secs = ttl.as_secs().max(1);
        bounded("redis SET EX", self.op_timeout, async {
            let mut conn = connection(&self.pool).await?;
            conn.set_ex::<_, _, ()>(key, &*value, ttl_secs)
                .await
                .map_err(|e| unavailable("redis SET EX", e))
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        bounded("redis DEL", self.op_timeout, async {
            let mut conn = connection(&self.pool).await?;
            conn.del::<_, ()>(key)
                .await
                .map_err(|e| unavailable("redis DEL", e))
        })
        .await
    }
}

// =============================================================================
// Lock Manager
// =============================================================================

pub struct RedisLockManager {
    pool: Pool,
    op_timeout: Duration,
    release_script: redis::Script,
}

impl RedisLockManager {
    pub fn new(pool: Pool, op_timeout: Duration) -> Self {
        Self {
            pool,
            op_timeout,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    async fn acquire_until(
        &self,
        key: &str,
        deadline: Instant,
        lease: Duration,
    ) -> Result<Option<LockHandle>> {
        let token = Uuid::new_v4().to_string();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = connection(&self.pool).await?;

        loop {
            let set: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(lease_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("redis SET NX", e))?;

            if set.is_some() {
                return Ok(Some(LockHandle::new(key, token, lease)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL.min(deadline - now)).await;
        }
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    /// Retries `SET NX` until `wait` runs out. The whole attempt, connection
    /// checkout included, is bounded by `wait` plus one operation timeout.
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockHandle>> {
        let deadline = Instant::now() + wait;
        bounded(
            "redis SET NX",
            wait + self.op_timeout,
            self.acquire_until(key, deadline, lease),
        )
        .await
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let deleted: i64 = bounded("redis release script", self.op_timeout, async {
            let mut conn = connection(&self.pool).await?;
            self.release_script
                .key(&handle.lock_key)
                .arg(&handle.owner_token)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| unavailable("redis release script", e))
        })
        .await?;

        if deleted == 0 {
            debug!(key = %handle.lock_key, "Ignoring release of stale lease");
        }
        Ok(())
    }
}

// =============================================================================
// Notification Channel
// =============================================================================

pub struct RedisNotificationChannel {
    pool: Pool,
    client: redis::Client,
    op_timeout: Duration,
}

impl RedisNotificationChannel {
    pub fn new(pool: Pool, url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid Redis URL: {}", e)))?;
        Ok(Self {
            pool,
            client,
            op_timeout,
        })
    }
}

#[async_trait]
impl NotificationChannel for RedisNotificationChannel {
    async fn publish(&self, topic: &str, message: &str) -> Result<()> {
        let receivers: i64 = bounded("redis PUBLISH", self.op_timeout, async {
            let mut conn = connection(&self.pool).await?;
            conn.publish(topic, message)
                .await
                .map_err(|e| unavailable("redis PUBLISH", e))
        })
        .await?;
        debug!(topic, receivers, "Published notification");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let pubsub = bounded("redis SUBSCRIBE", self.op_timeout, async {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| unavailable("redis pub/sub connect", e))?;
            pubsub
                .subscribe(topic)
                .await
                .map_err(|e| unavailable("redis SUBSCRIBE", e))?;
            Ok(pubsub)
        })
        .await?;

        Ok(Box::new(RedisSubscription {
            topic: topic.to_string(),
            pubsub,
            op_timeout: self.op_timeout,
        }))
    }
}

/// Owns its pub/sub connection; dropping it disconnects, which also ends the
/// server-side subscription.
struct RedisSubscription {
    topic: String,
    pubsub: redis::aio::PubSub,
    op_timeout: Duration,
}

#[async_trait]
impl Subscription for RedisSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn next_message(&mut self, timeout: Duration) -> Result<Delivery> {
        let mut stream = self.pubsub.on_message();
        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(msg)) => {
                let payload: String = msg.get_payload().unwrap_or_default();
                Ok(Delivery::Message(payload))
            }
            Ok(None) => Err(Error::StoreUnavailable(format!(
                "pub/sub connection for {} closed",
                self.topic
            ))),
            Err(_) => Ok(Delivery::TimedOut),
        }
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let limit = self.op_timeout;
        let topic = self.topic.clone();
        bounded("redis UNSUBSCRIBE", limit, async {
            self.pubsub
                .unsubscribe(&topic)
                .await
                .map_err(|e| unavailable("redis UNSUBSCRIBE", e))
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
