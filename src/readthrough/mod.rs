//! Read-Through Cache
//!
//! Stampede protection for hot listing pages. One caller per cache key
//! recomputes a missing entry under a leased lock; everyone else subscribes
//! to the key's topic and re-reads once the holder publishes.
//!
//! # Components
//!
//! - **Key** (`key.rs`): deterministic cache key plus its `lock:` and
//!   `channel:` derivatives
//! - **Orchestrator** (`orchestrator.rs`): the check / lock / compute /
//!   publish / wait state machine
//! - **Metrics** (`metrics.rs`): lock-free counters for each transition

pub mod key;
pub mod metrics;
pub mod orchestrator;

pub use key::CacheKey;
pub use metrics::{MetricsSnapshot, ReadThroughMetrics};
pub use orchestrator::{ReadThroughCache, ReadThroughConfig};
