//! In-Memory Lock Manager Adapter
//!
//! Implements the `LockManager` port with leases kept in a mutex-guarded map.
//! A lease whose time has run out is free for the taking; the old holder's
//! handle becomes stale and its release does nothing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{LockHandle, LockManager};
use crate::error::Result;

struct Lease {
    owner_token: String,
    expires_at: Instant,
}

impl Lease {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Single-process lock manager with lease expiry.
#[derive(Default)]
pub struct InMemoryLockManager {
    leases: Mutex<HashMap<String, Lease>>,
    released: Notify,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` currently has a live lease.
    pub fn is_held(&self, key: &str) -> bool {
        self.leases
            .lock()
            .get(key)
            .map_or(false, |lease| !lease.is_expired())
    }

    /// Take the lease if free or expired; otherwise report when it expires.
    fn try_take(&self, key: &str, token: &str, lease: Duration) -> std::result::Result<(), Instant> {
        let mut leases = self.leases.lock();
        if let Some(current) = leases.get(key) {
            if !current.is_expired() {
                return Err(current.expires_at);
            }
            debug!(key, "Reclaiming expired lease");
        }
        leases.insert(
            key.to_string(),
            Lease {
                owner_token: token.to_string(),
                expires_at: Instant::now() + lease,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockHandle>> {
        let deadline = Instant::now() + wait;
        let token = Uuid::new_v4().to_string();

        loop {
            // Register for wake-ups before looking, so a release in between is not lost.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let holder_expiry = match self.try_take(key, &token, lease) {
                Ok(()) => return Ok(Some(LockHandle::new(key, token, lease))),
                Err(expires_at) => expires_at,
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(holder_expiry.min(deadline)) => {}
            }
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let released = {
            let mut leases = self.leases.lock();
            match leases.get(&handle.lock_key) {
                Some(lease) if lease.owner_token == handle.owner_token && !lease.is_expired() => {
                    leases.remove(&handle.lock_key);
                    true
                }
                _ => false,
            }
        };

        if released {
            self.released.notify_waiters();
        } else {
            debug!(key = %handle.lock_key, "Ignoring release of stale lease");
        }
        Ok(())
    }
}
