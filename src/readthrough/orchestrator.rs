//! Read-Through Orchestrator
//!
//! Serves a page from the cache store and, on a miss, lets exactly one caller
//! per key recompute it while every other caller waits for a notification.
//!
//! # State Machine
//!
//! ```text
//!  CHECK_CACHE ──hit──────────────────────────────────────────► return
//!      │ miss
//!      ▼
//!  TRY_LOCK ──acquired──► DOUBLE_CHECK ──hit──► release ──────► return
//!      │                       │ miss
//!      │                       ▼
//!      │                  COMPUTE ─► PUT ─► PUBLISH ─► release ► return
//!      │ not acquired
//!      ▼
//!  SUBSCRIBE ─► RECHECK ─hit─────────────────────► close ─────► return
//!                  │ miss
//!                  ▼
//!                WAIT ──notified──► RECHECK ─────► close ─────► return (value or none)
//!                  └───timed out──────────────────► close ─────► CacheWaitTimeout
//! ```
//!
//! Any transport failure of the store, lock or channel drops the request
//! onto a direct, uncached compute unless `degrade_on_store_failure` is off.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::key::CacheKey;
use super::metrics::ReadThroughMetrics;
use crate::domain::ports::{
    CacheStore, Delivery, LockHandle, LockManager, NotificationChannel, Subscription,
};
use crate::error::{Error, Result};

/// Payload published once an entry is written. Subscribers ignore it.
const READY_SIGNAL: &str = "ready";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the read-through cache
#[derive(Debug, Clone)]
pub struct ReadThroughConfig {
    /// How long a caller tries to become the lock holder
    pub lock_wait: Duration,

    /// How long a holder may keep the lock before it is reclaimable
    pub lease: Duration,

    /// How long a waiter blocks on its subscription
    pub notify_wait: Duration,

    /// Time-to-live of cached pages
    pub entry_ttl: Duration,

    /// Bound on one compute; must be shorter than the lease so the write and
    /// publish happen while the lock is still held
    pub compute_timeout: Duration,

    /// Fall back to a direct compute when the shared store is unreachable
    pub degrade_on_store_failure: bool,

    /// Passes through the state machine before a listing gives up
    pub max_read_attempts: u32,
}

impl Default for ReadThroughConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(5),
            lease: Duration::from_secs(10),
            notify_wait: Duration::from_secs(5),
            entry_ttl: Duration::from_secs(60),
            compute_timeout: Duration::from_secs(8),
            degrade_on_store_failure: true,
            max_read_attempts: 2,
        }
    }
}

impl ReadThroughConfig {
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("lock_wait", self.lock_wait),
            ("lease", self.lease),
            ("notify_wait", self.notify_wait),
            ("entry_ttl", self.entry_ttl),
            ("compute_timeout", self.compute_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.compute_timeout >= self.lease {
            return Err(Error::Config(format!(
                "compute_timeout ({:?}) must be shorter than lease ({:?})",
                self.compute_timeout, self.lease
            )));
        }
        if self.max_read_attempts == 0 {
            return Err(Error::Config("max_read_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Lease Guard
// =============================================================================

/// Releases a held lease exactly once.
///
/// `release` is the normal path. If the guard is dropped while still holding
/// (the holder's future was cancelled mid-compute) the release is spawned.
struct LeaseGuard {
    locks: Arc<dyn LockManager>,
    handle: Option<LockHandle>,
}

impl LeaseGuard {
    fn new(locks: Arc<dyn LockManager>, handle: LockHandle) -> Self {
        Self {
            locks,
            handle: Some(handle),
        }
    }

    async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.locks.release(&handle).await {
                warn!(lock_key = %handle.lock_key, error = %e, "Failed to release lease");
            }
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let locks = self.locks.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = locks.release(&handle).await {
                            warn!(lock_key = %handle.lock_key, error = %e, "Deferred lease release failed");
                        }
                    });
                }
                Err(_) => {
                    warn!(lock_key = %handle.lock_key, "No runtime to release lease; it will expire");
                }
            }
        }
    }
}

// =============================================================================
// Read-Through Cache
// =============================================================================

/// Stampede-safe read-through cache over the three shared-store ports.
pub struct ReadThroughCache {
    store: Arc<dyn CacheStore>,
    locks: Arc<dyn LockManager>,
    channel: Arc<dyn NotificationChannel>,
    config: ReadThroughConfig,
    metrics: Arc<ReadThroughMetrics>,
}

impl ReadThroughCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        locks: Arc<dyn LockManager>,
        channel: Arc<dyn NotificationChannel>,
        config: ReadThroughConfig,
    ) -> Self {
        Self {
            store,
            locks,
            channel,
            config,
            metrics: Arc::new(ReadThroughMetrics::new()),
        }
    }

    pub fn config(&self) -> &ReadThroughConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<ReadThroughMetrics> {
        self.metrics.clone()
    }

    /// Return the cached value for `key`, computing it at most once across
    /// concurrent callers.
    ///
    /// `Ok(None)` means this caller was woken by the holder but found no entry
    /// on re-read (evicted, or the holder's compute failed). It is a miss to
    /// retry, not an error.
    #[instrument(skip(self, key, compute), fields(key = %key))]
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, compute: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        // CHECK_CACHE
        match self.read(key).await {
            Ok(Some(value)) => {
                self.metrics.record_hit();
                debug!("Cache hit");
                return Ok(Some(value));
            }
            Ok(None) => self.metrics.record_miss(),
            Err(e) => return self.degrade(key, e, compute).await.map(Some),
        }

        // TRY_LOCK
        let lock_key = key.lock_key();
        let acquired = self
            .locks
            .try_acquire(&lock_key, self.config.lock_wait, self.config.lease)
            .await;

        match acquired {
            Ok(Some(handle)) => {
                self.metrics.record_lock_acquired();
                let guard = LeaseGuard::new(self.locks.clone(), handle);
                let outcome = self.compute_as_holder(key, compute).await;
                guard.release().await;
                outcome.map(Some)
            }
            Ok(None) => {
                self.metrics.record_lock_contended();
                let subscription = match self.channel.subscribe(&key.topic()).await {
                    Ok(subscription) => subscription,
                    Err(e) => return self.degrade(key, e, compute).await.map(Some),
                };
                match self.wait_for_holder(key, subscription).await {
                    Err(e @ Error::StoreUnavailable(_)) => {
                        self.degrade(key, e, compute).await.map(Some)
                    }
                    other => other,
                }
            }
            Err(e) => self.degrade(key, e, compute).await.map(Some),
        }
    }

    /// Drop the entry for `key` so the next reader recomputes it.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.store.remove(key.as_str()).await
    }

    /// Lock held: double-check, compute, put, publish.
    async fn compute_as_holder<T, F, Fut>(&self, key: &CacheKey, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        match self.read(key).await {
            Ok(Some(value)) => {
                self.metrics.record_double_check_hit();
                debug!("Entry written by previous holder");
                return Ok(value);
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.record_store_error();
                warn!(error = %e, "Double-check read failed, computing anyway");
            }
        }

        let result = self.bounded_compute(compute).await;

        if let Ok(value) = &result {
            self.write(key, value).await;
        }

        // Waiters are woken on failure too; they re-read and find nothing.
        if let Err(e) = self.channel.publish(&key.topic(), READY_SIGNAL).await {
            self.metrics.record_store_error();
            warn!(error = %e, "Failed to notify waiters");
        }

        result
    }

    /// Lock contended: wait for the holder's notification, then re-read.
    async fn wait_for_holder<T>(
        &self,
        key: &CacheKey,
        mut subscription: Box<dyn Subscription>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let outcome = self.await_entry(key, subscription.as_mut()).await;
        if let Err(e) = subscription.close().await {
            warn!(error = %e, "Failed to close subscription");
        }
        outcome
    }

    async fn await_entry<T>(
        &self,
        key: &CacheKey,
        subscription: &mut dyn Subscription,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        // The holder may have published before we subscribed.
        if let Some(value) = self.recheck(key).await? {
            return Ok(Some(value));
        }

        self.metrics.record_wait();
        let started = Instant::now();
        match subscription.next_message(self.config.notify_wait).await? {
            Delivery::Message(_) => {
                self.metrics.record_notification();
                let value = self.recheck(key).await?;
                if value.is_none() {
                    self.metrics.record_recheck_miss();
                    debug!("Notified but entry is absent");
                }
                Ok(value)
            }
            Delivery::TimedOut => {
                self.metrics.record_wait_timeout();
                let waited = started.elapsed();
                warn!(?waited, "No notification from lock holder");
                Err(Error::CacheWaitTimeout {
                    key: key.to_string(),
                    waited,
                })
            }
        }
    }

    async fn recheck<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let value = self.read(key).await?;
        if value.is_some() {
            self.metrics.record_hit();
        }
        Ok(value)
    }

    /// Shared store unreachable: compute directly without caching, or fail.
    async fn degrade<T, F, Fut>(&self, key: &CacheKey, cause: Error, compute: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.metrics.record_store_error();
        if !self.config.degrade_on_store_failure {
            error!(key = %key, error = %cause, "Shared store unavailable");
            return Err(match cause {
                Error::StoreUnavailable(_) => cause,
                other => Error::StoreUnavailable(other.to_string()),
            });
        }

        warn!(key = %key, error = %cause, "Shared store unavailable, reading without cache");
        self.metrics.record_degraded_compute();
        self.bounded_compute(compute).await
    }

    async fn bounded_compute<T, F, Fut>(&self, compute: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.config.compute_timeout, compute()).await {
            Ok(Ok(value)) => {
                self.metrics.record_compute(started.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                self.metrics.record_compute_failure();
                Err(e)
            }
            Err(_) => {
                self.metrics.record_compute_failure();
                Err(Error::SearchFailed(format!(
                    "compute timed out after {:?}",
                    self.config.compute_timeout
                )))
            }
        }
    }

    /// Read and decode an entry. A corrupt entry reads as a miss.
    async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let Some(bytes) = self.store.get(key.as_str()).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.metrics.record_corrupt_entry();
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Write an entry. Failures are logged; the computed value is still served.
    async fn write<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(error = %e, "Failed to serialize computed value");
                return;
            }
        };
        match self.store.put(key.as_str(), bytes, self.config.entry_ttl).await {
            Ok(()) => info!(ttl = ?self.config.entry_ttl, "Cached computed page"),
            Err(e) => {
                self.metrics.record_store_error();
                warn!(error = %e, "Failed to cache computed value");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
