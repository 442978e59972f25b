//! Keyset Paginator
//!
//! Turns `(filter, sort, cursor, limit)` into one page by asking the data
//! source for `limit + 1` rows after the cursor. The extra row only signals
//! that another page exists; it is trimmed before the page is built.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::cursor::{self, Cursor};
use super::page::Page;
use super::sort::{KeysetPredicate, SortSpec};
use crate::domain::ports::{DataSource, ReadPreference};
use crate::domain::records::{Filter, PageRow};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the keyset paginator
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Page size used when the request gives none or a non-positive one
    pub default_limit: usize,

    /// Largest page size served
    pub max_limit: usize,

    /// Attach the unpaginated row count to each page
    pub include_total: bool,

    /// Store copy listing reads go to
    pub read_preference: ReadPreference,

    /// Bound on each data source call
    pub query_timeout: Duration,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
            include_total: true,
            read_preference: ReadPreference::Replica,
            query_timeout: Duration::from_secs(8),
        }
    }
}

// =============================================================================
// Paginator
// =============================================================================

/// Keyset paginator over one listing.
pub struct KeysetPaginator<R> {
    source: Arc<dyn DataSource<R>>,
    config: PaginationConfig,
    _row: PhantomData<fn() -> R>,
}

impl<R: PageRow> KeysetPaginator<R> {
    pub fn new(source: Arc<dyn DataSource<R>>, config: PaginationConfig) -> Self {
        Self {
            source,
            config,
            _row: PhantomData,
        }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Map a requested limit onto `1..=max_limit`; non-positive means default.
    pub fn normalize_limit(&self, requested: i64) -> usize {
        if requested <= 0 {
            return self.config.default_limit.max(1);
        }
        usize::try_from(requested)
            .unwrap_or(usize::MAX)
            .min(self.config.max_limit.max(1))
    }

    /// Reject sort fields this listing cannot be ordered by.
    pub fn check_sort(&self, sort: &SortSpec) -> Result<()> {
        if R::supports(sort.field) {
            Ok(())
        } else {
            Err(Error::UnsupportedSortField {
                resource: R::RESOURCE.to_string(),
                field: sort.field.to_string(),
            })
        }
    }

    /// Decode a raw cursor and check it fits the sort field.
    pub fn parse_cursor(&self, sort: &SortSpec, raw: &str) -> Result<Cursor> {
        let cursor = cursor::decode(raw)?;
        if !cursor.primary.fits(sort.field) {
            return Err(Error::InvalidCursor(format!(
                "cursor value does not fit sort field {}",
                sort.field
            )));
        }
        Ok(cursor)
    }

    /// Fetch one page for an anonymous reader. `cursor` is the opaque
    /// `nextCursor` of the previous page.
    pub async fn fetch_page(
        &self,
        filter: &Filter,
        sort: SortSpec,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Page<R>> {
        self.check_sort(&sort)?;
        let limit = self.normalize_limit(limit);
        let cursor = cursor
            .map(|raw| self.parse_cursor(&sort, raw))
            .transpose()?;
        self.fetch(filter, sort, cursor, limit, None).await
    }

    /// Fetch one page from an already validated cursor and normalized limit.
    #[instrument(skip(self, filter, sort, cursor), fields(resource = R::RESOURCE, sort = %sort))]
    pub async fn fetch(
        &self,
        filter: &Filter,
        sort: SortSpec,
        cursor: Option<Cursor>,
        limit: usize,
        requester: Option<Uuid>,
    ) -> Result<Page<R>> {
        let after = cursor.map(|c| KeysetPredicate::new(sort, c.primary, c.tie_break));
        if let Some(predicate) = &after {
            debug!(predicate = %predicate, "Applying keyset condition");
        }

        let read = self.config.read_preference;
        let mut rows = self
            .bounded(self.source.query(
                filter,
                &sort,
                after.as_ref(),
                limit + 1,
                requester,
                read,
            ))
            .await?;

        if rows.len() > limit + 1 {
            warn!(
                returned = rows.len(),
                requested = limit + 1,
                "Data source ignored the row limit"
            );
        }

        let has_next = rows.len() > limit;
        rows.truncate(limit);

        let next_cursor = if has_next {
            rows.last()
                .map(|last| cursor::encode(&last.sort_value(sort.field), last.id()))
        } else {
            None
        };

        let total_count = if self.config.include_total {
            Some(self.bounded(self.source.count(filter, read)).await?)
        } else {
            None
        };

        debug!(rows = rows.len(), has_next, "Page fetched");
        Ok(Page::new(rows, next_cursor, has_next, total_count))
    }

    /// Apply the query timeout and fold every failure into `SearchFailed`.
    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.query_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::SearchFailed(reason))) => Err(Error::SearchFailed(reason)),
            Ok(Err(e)) => Err(Error::SearchFailed(format!("{} query: {}", R::RESOURCE, e))),
            Err(_) => Err(Error::SearchFailed(format!(
                "{} query timed out after {:?}",
                R::RESOURCE,
                self.config.query_timeout
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
