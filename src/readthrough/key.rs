//! Cache Key Derivation
//!
//! A cache key names one logical page query. Two requests that would read
//! the same rows in the same order for the same requester map to the same
//! key; anything else maps to a different one.
//!
//! Layout: `<resource>?<name>=<value>&...` with every value percent-encoded
//! and the names emitted in a fixed order, so no value can forge a separator.

use std::fmt;

use uuid::Uuid;

use crate::domain::records::Filter;
use crate::pagination::SortSpec;

const LOCK_PREFIX: &str = "lock:";
const CHANNEL_PREFIX: &str = "channel:";

/// Deterministic key for one page of one listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a page request. `limit` must already be normalized.
    pub fn for_page(
        resource: &str,
        filter: &Filter,
        sort: &SortSpec,
        cursor: Option<&str>,
        limit: usize,
        requester: Option<Uuid>,
    ) -> Self {
        let mut pairs: Vec<(&str, String)> = filter.fingerprint();
        pairs.push(("sort", sort.field.as_str().to_string()));
        pairs.push(("dir", sort.direction.as_str().to_string()));
        pairs.push(("after", cursor.unwrap_or("").to_string()));
        pairs.push(("limit", limit.to_string()));
        if let Some(user) = requester {
            pairs.push(("user", user.to_string()));
        }

        let query = pairs
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        Self(format!("{}?{}", urlencoding::encode(resource), query))
    }

    /// Wrap an already derived key.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the mutex guarding recomputation of this entry.
    pub fn lock_key(&self) -> String {
        format!("{}{}", LOCK_PREFIX, self.0)
    }

    /// Topic the winner publishes on once the entry is written.
    pub fn topic(&self) -> String {
        format!("{}{}", CHANNEL_PREFIX, self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
