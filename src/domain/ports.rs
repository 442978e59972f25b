//! Domain Ports (Port/Adapter Pattern)
//!
//! The read path depends on four external capabilities. Each one is a trait
//! here; `crate::adapters` supplies in-process and Redis implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path (core)                        │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  DataSource │ CacheStore │ LockManager │ Notification│    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  InMemory* (single process) │ Redis* (shared store) │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use super::records::Filter;
use crate::error::Result;
use crate::pagination::{KeysetPredicate, SortSpec};

// =============================================================================
// Data Source Port
// =============================================================================

/// Which copy of the relational store a query should run against.
///
/// Passed explicitly on every call instead of living in ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    /// Read-write primary; sees its own writes.
    Primary,
    /// Read-only standby; may lag the primary.
    #[default]
    Replica,
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPreference::Primary => write!(f, "primary"),
            ReadPreference::Replica => write!(f, "replica"),
        }
    }
}

/// Port for the relational query capability.
///
/// Implementations must apply `after` as a compound keyset condition and
/// return rows already ordered by `(sort.field, id)` in `sort.direction`, at
/// most `limit` of them. Sorting after the fetch is not a substitute: the
/// paginator relies on the store honouring `limit`.
///
/// Rows come back personalized for `requester` (`likedByMe`, `viewedByMe`,
/// `subscribedByMe`); with no requester every such flag is false.
#[async_trait]
pub trait DataSource<R>: Send + Sync {
    /// Fetch up to `limit` rows matching `filter` that sort strictly after `after`.
    async fn query(
        &self,
        filter: &Filter,
        sort: &SortSpec,
        after: Option<&KeysetPredicate>,
        limit: usize,
        requester: Option<Uuid>,
        read: ReadPreference,
    ) -> Result<Vec<R>>;

    /// Count all rows matching `filter`, ignoring any cursor.
    async fn count(&self, filter: &Filter, read: ReadPreference) -> Result<i64>;
}

// =============================================================================
// Cache Store Port
// =============================================================================

/// Port for the key/value store holding materialized pages.
///
/// Entries expire passively after their TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a live entry.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store an entry with a time-to-live.
    async fn put(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Drop an entry (invalidation after writes).
    async fn remove(&self, key: &str) -> Result<()>;
}

// =============================================================================
// Lock Manager Port
// =============================================================================

/// Proof of holding a lease on `lock_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub lock_key: String,
    /// Unique per acquisition; release only succeeds with the matching token.
    pub owner_token: String,
    pub lease: Duration,
    pub acquired_at: Instant,
}

impl LockHandle {
    pub fn new(lock_key: impl Into<String>, owner_token: impl Into<String>, lease: Duration) -> Self {
        Self {
            lock_key: lock_key.into(),
            owner_token: owner_token.into(),
            lease,
            acquired_at: Instant::now(),
        }
    }

    /// Whether the lease has run out according to the local clock.
    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.lease
    }
}

/// Port for a distributed mutex with lease expiry.
///
/// At most one live handle exists per key; an expired lease is reclaimable
/// without the holder's cooperation.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to become the holder of `key`, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` when the wait elapsed without acquiring.
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockHandle>>;

    /// Release a lease. A stale handle (lease expired or reclaimed) is a no-op.
    async fn release(&self, handle: &LockHandle) -> Result<()>;
}

// =============================================================================
// Notification Channel Port
// =============================================================================

/// Outcome of waiting on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Something was published on the topic; the payload carries no contract.
    Message(String),
    /// Nothing arrived within the bound.
    TimedOut,
}

/// A live subscription to one topic.
///
/// Must be closed by the caller. Dropping it without closing still releases
/// broker-side state, so a cancelled waiter does not leak.
#[async_trait]
pub trait Subscription: Send {
    fn topic(&self) -> &str;

    /// Wait for the next message, at most `timeout`.
    async fn next_message(&mut self, timeout: Duration) -> Result<Delivery>;

    /// Unsubscribe and release broker-side state.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Port for per-topic publish/subscribe fan-out.
///
/// Every subscriber registered before a publish sees at least one message.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, topic: &str, message: &str) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;
}

// =============================================================================
// Tests
// =============================================================================
