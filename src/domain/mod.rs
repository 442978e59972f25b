//! Domain Layer
//!
//! - **Ports** (`ports.rs`) - Trait abstractions for the data source, cache
//!   store, lock manager and notification channel
//! - **Records** (`records.rs`) - Flat row projections and the listing filter
//!
//! # Usage
//!
//! ```ignore
//! use monew::domain::{CacheStore, LockManager, NotificationChannel};
//!
//! async fn warm<C: CacheStore>(cache: &C, key: &str, page: bytes::Bytes) -> Result<()> {
//!     cache.put(key, page, Duration::from_secs(60)).await
//! }
//! ```

pub mod ports;
pub mod records;

pub use ports::{
    CacheStore, DataSource, Delivery, LockHandle, LockManager, NotificationChannel,
    ReadPreference, Subscription,
};
pub use records::{Article, Comment, Filter, Interest, PageRow};
