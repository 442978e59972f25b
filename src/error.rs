//! Error types for the Monew read path

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving paginated listings
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Client Errors
    // =========================================================================
    /// Cursor string failed to decode
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Sort field name is not recognised
    #[error("Invalid sort field: {0}")]
    InvalidSortField(String),

    /// Sort direction is neither ASC nor DESC
    #[error("Invalid sort direction: {0}")]
    InvalidDirection(String),

    /// Sort field exists but the listing cannot be ordered by it
    #[error("Listing '{resource}' cannot be sorted by {field}")]
    UnsupportedSortField { resource: String, field: String },

    /// Request parameter is malformed (limit, id, date)
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    // =========================================================================
    // Read Path Errors
    // =========================================================================
    /// A waiter saw neither a notification nor a populated cache in time
    #[error("Timed out after {waited:?} waiting for cache key {key}")]
    CacheWaitTimeout { key: String, waited: Duration },

    /// The underlying data source query failed
    #[error("Search failed: {0}")]
    SearchFailed(String),

    /// Cache, lock or notification transport is unreachable
    #[error("Shared store unavailable: {0}")]
    StoreUnavailable(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Page (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors caused by the request itself (HTTP 4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidCursor(_)
                | Error::InvalidSortField(_)
                | Error::InvalidDirection(_)
                | Error::UnsupportedSortField { .. }
                | Error::InvalidParameter { .. }
        )
    }

    /// Errors after which the caller may retry the whole request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CacheWaitTimeout { .. } | Error::StoreUnavailable(_)
        )
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidCursor(_) => "INVALID_CURSOR",
            Error::InvalidSortField(_) => "INVALID_SORT_FIELD",
            Error::InvalidDirection(_) => "INVALID_DIRECTION",
            Error::UnsupportedSortField { .. } => "UNSUPPORTED_SORT_FIELD",
            Error::InvalidParameter { .. } => "INVALID_PARAMETER",
            Error::CacheWaitTimeout { .. } => "CACHE_WAIT_TIMEOUT",
            Error::SearchFailed(_) => "SEARCH_FAILED",
            Error::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
