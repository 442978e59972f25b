//! Read-Through Metrics
//!
//! Counters for monitoring how often pages are served from cache, how often
//! the lock is contended and how often waiters give up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Read-through metrics collector
#[derive(Debug, Default)]
pub struct ReadThroughMetrics {
    // Lookups
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt_entries: AtomicU64,

    // Lock outcomes
    locks_acquired: AtomicU64,
    locks_contended: AtomicU64,
    double_check_hits: AtomicU64,

    // Compute
    computes: AtomicU64,
    compute_failures: AtomicU64,
    compute_latency_us: AtomicU64,

    // Waiters
    waits: AtomicU64,
    notifications: AtomicU64,
    wait_timeouts: AtomicU64,
    recheck_misses: AtomicU64,

    // Store trouble
    store_errors: AtomicU64,
    degraded_computes: AtomicU64,
}

impl ReadThroughMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_entry(&self) {
        self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_acquired(&self) {
        self.locks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_contended(&self) {
        self.locks_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_double_check_hit(&self) {
        self.double_check_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compute(&self, duration: Duration) {
        self.computes.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(duration);
    }

    pub fn record_compute_failure(&self) {
        self.compute_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recheck_miss(&self) {
        self.recheck_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_compute(&self) {
        self.degraded_computes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn computes(&self) -> u64 {
        self.computes.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    fn update_latency_ema(&self, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = self.compute_latency_us.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if self
                .compute_latency_us
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn compute_latency(&self) -> Duration {
        Duration::from_micros(self.compute_latency_us.load(Ordering::Relaxed))
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            locks_acquired: self.locks_acquired.load(Ordering::Relaxed),
            locks_contended: self.locks_contended.load(Ordering::Relaxed),
            double_check_hits: self.double_check_hits.load(Ordering::Relaxed),
            computes: self.computes(),
            compute_failures: self.compute_failures.load(Ordering::Relaxed),
            compute_latency: self.compute_latency(),
            waits: self.waits.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            recheck_misses: self.recheck_misses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            degraded_computes: self.degraded_computes.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

/// Snapshot of all read-through metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub corrupt_entries: u64,
    pub locks_acquired: u64,
    pub locks_contended: u64,
    pub double_check_hits: u64,
    pub computes: u64,
    pub compute_failures: u64,
    pub compute_latency: Duration,
    pub waits: u64,
    pub notifications: u64,
    pub wait_timeouts: u64,
    pub recheck_misses: u64,
    pub store_errors: u64,
    pub degraded_computes: u64,
    pub hit_ratio: f64,
}
