//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │ DataSource │ CacheStore │ LockManager │ NotificationChannel│ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ InMemoryDataSource │ InMemoryCacheStore                    │ │
//! │  │ InMemoryLockManager │ InMemoryNotificationChannel          │ │
//! │  │ Redis{CacheStore,LockManager,NotificationChannel} (redis)  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use monew::adapters::{InMemoryCacheStore, InMemoryLockManager, InMemoryNotificationChannel};
//! use monew::readthrough::{ReadThroughCache, ReadThroughConfig};
//!
//! let cache = ReadThroughCache::new(
//!     Arc::new(InMemoryCacheStore::new()),
//!     Arc::new(InMemoryLockManager::new()),
//!     Arc::new(InMemoryNotificationChannel::new()),
//!     ReadThroughConfig::default(),
//! );
//! ```

mod memory_cache;
mod memory_channel;
mod memory_lock;
mod memory_source;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use memory_cache::InMemoryCacheStore;
pub use memory_channel::InMemoryNotificationChannel;
pub use memory_lock::InMemoryLockManager;
pub use memory_source::InMemoryDataSource;
