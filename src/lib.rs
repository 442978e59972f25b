//! Monew - Read Side of a News Aggregation Service
//!
//! Stampede-safe read-through caching and keyset pagination for the three
//! hot listings of the service: comments on an article, articles, and
//! interests.
//!
//! # Architecture
//!
//! The read path is a two-layer pipeline:
//!
//! ```text
//! ListingService → ReadThroughCache (check / lock / wait) → KeysetPaginator → DataSource
//! ```
//!
//! The cache, lock and notification channel are ports so the same protocol
//! runs in one process (in-memory adapters) or across instances sharing a
//! Redis (`redis` feature).
//!
//! # Guarantees
//!
//! - At most one concurrent recomputation per cache key
//! - Waiters block for a bounded time and never receive stale data
//! - Cursor pages neither skip nor repeat rows, including on sort-value ties
//!
//! # Modules
//!
//! - [`adapters`] - In-memory and Redis implementations of the domain ports
//! - [`api`] - axum routes for the three listings
//! - [`domain`] - Ports and flat row records (DDD)
//! - [`error`] - Error types
//! - [`listing`] - Caller-facing listing services
//! - [`pagination`] - Cursor codec, sort order and keyset paginator
//! - [`readthrough`] - Read-through orchestrator, cache keys and metrics

pub mod adapters;
pub mod api;
pub mod domain;
pub mod error;
pub mod listing;
pub mod pagination;
pub mod readthrough;

// Re-export commonly used types
pub use domain::{Article, Comment, Filter, Interest, PageRow, ReadPreference};
pub use error::{Error, Result};
pub use listing::{ArticleListing, CommentListing, InterestListing, ListingService, PageRequest};
pub use pagination::{Cursor, Direction, Page, PaginationConfig, SortField, SortSpec};
pub use readthrough::{CacheKey, ReadThroughCache, ReadThroughConfig};
