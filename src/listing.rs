//! Listing Service
//!
//! Caller-facing entry point: one `get_page` per listing (comments of an
//! article, articles, interests). A request is validated, normalized and
//! turned into a cache key before anything touches the shared store, so
//! equivalent requests share one entry and malformed ones never take a lock.
//!
//! ```text
//! PageRequest ─► sort + limit + cursor ─► CacheKey ─► ReadThroughCache
//!                                                        │ miss, lock held
//!                                                        ▼
//!                                                 KeysetPaginator::fetch
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::ports::DataSource;
use crate::domain::records::{Article, Comment, Filter, Interest, PageRow};
use crate::error::{Error, Result};
use crate::pagination::{Direction, KeysetPaginator, Page, PaginationConfig, SortField, SortSpec};
use crate::readthrough::{CacheKey, ReadThroughCache};

// =============================================================================
// Request
// =============================================================================

/// Raw page request as it arrives from a caller.
///
/// Sort field and direction stay strings until the listing resolves them,
/// so unknown values surface as client errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub filter: Filter,
    pub order_by: Option<String>,
    pub direction: Option<String>,
    pub cursor: Option<String>,
    /// Requested page size; zero or negative selects the default.
    pub limit: i64,
    /// User the page is rendered for (`likedByMe` and similar flags).
    pub requester: Option<Uuid>,
}

impl PageRequest {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self.direction = Some(direction.into());
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn for_user(mut self, requester: Uuid) -> Self {
        self.requester = Some(requester);
        self
    }

    /// Resolve the sort against a listing's default order.
    pub fn sort_spec<R: PageRow>(&self) -> Result<SortSpec> {
        let field = match non_blank(self.order_by.as_deref()) {
            Some(raw) => raw.parse::<SortField>()?,
            None => R::DEFAULT_SORT.field,
        };
        let direction = match non_blank(self.direction.as_deref()) {
            Some(raw) => raw.parse::<Direction>()?,
            None => R::DEFAULT_SORT.direction,
        };
        Ok(SortSpec::new(field, direction))
    }

    /// Cursor with blank values treated as absent.
    pub fn cursor(&self) -> Option<&str> {
        non_blank(self.cursor.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Service
// =============================================================================

/// Cached, keyset-paginated listing of `R`.
pub struct ListingService<R> {
    paginator: Arc<KeysetPaginator<R>>,
    cache: Arc<ReadThroughCache>,
}

pub type CommentListing = ListingService<Comment>;
pub type ArticleListing = ListingService<Article>;
pub type InterestListing = ListingService<Interest>;

impl<R: PageRow> ListingService<R> {
    pub fn new(
        source: Arc<dyn DataSource<R>>,
        pagination: PaginationConfig,
        cache: Arc<ReadThroughCache>,
    ) -> Self {
        Self {
            paginator: Arc::new(KeysetPaginator::new(source, pagination)),
            cache,
        }
    }

    /// Serve one page, from cache when possible.
    #[instrument(skip(self, request), fields(resource = R::RESOURCE))]
    pub async fn get_page(&self, request: &PageRequest) -> Result<Page<R>> {
        let started = Instant::now();
        let key = self.cache_key(request)?;
        let sort = request.sort_spec::<R>()?;
        let limit = self.paginator.normalize_limit(request.limit);
        let cursor = request
            .cursor()
            .map(|raw| self.paginator.parse_cursor(&sort, raw))
            .transpose()?;

        let attempts = self.cache.config().max_read_attempts.max(1);
        for attempt in 1..=attempts {
            let paginator = self.paginator.clone();
            let filter = request.filter.clone();
            let cursor = cursor.clone();
            let requester = request.requester;

            let served = self
                .cache
                .get_or_compute(&key, move || async move {
                    paginator.fetch(&filter, sort, cursor, limit, requester).await
                })
                .await?;

            if let Some(page) = served {
                return Ok(page);
            }
            debug!(attempt, "Page missing after notification, retrying");
        }

        Err(Error::CacheWaitTimeout {
            key: key.to_string(),
            waited: started.elapsed(),
        })
    }

    /// Drop the cached copy of the page `request` names.
    pub async fn evict(&self, request: &PageRequest) -> Result<()> {
        let key = self.cache_key(request)?;
        self.cache.invalidate(&key).await
    }

    /// Validate the request and derive its cache key.
    pub fn cache_key(&self, request: &PageRequest) -> Result<CacheKey> {
        let sort = request.sort_spec::<R>()?;
        self.paginator.check_sort(&sort)?;
        let limit = self.paginator.normalize_limit(request.limit);
        if let Some(raw) = request.cursor() {
            self.paginator.parse_cursor(&sort, raw)?;
        }
        Ok(CacheKey::for_page(
            R::RESOURCE,
            &request.filter,
            &sort,
            request.cursor(),
            limit,
            request.requester,
        ))
    }

    pub fn cache(&self) -> &Arc<ReadThroughCache> {
        &self.cache
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        InMemoryCacheStore, InMemoryDataSource, InMemoryLockManager, InMemoryNotificationChannel,
    };
    use crate::readthrough::ReadThroughConfig;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};

    fn interests() -> Vec<Interest> {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        ["art", "books", "cars", "design", "economy", "film"]
            .iter()
            .enumerate()
            .map(|(i, name)| Interest {
                id: Uuid::from_u128(i as u128 + 1),
                name: name.to_string(),
                keywords: vec![],
                subscriber_count: (i as i64) * 10,
                subscribed_by_me: false,
                created_at: base + Duration::days(i as i64),
            })
            .collect()
    }

    fn service(source: Arc<InMemoryDataSource<Interest>>) -> InterestListing {
        let cache = Arc::new(ReadThroughCache::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryLockManager::new()),
            Arc::new(InMemoryNotificationChannel::new()),
            ReadThroughConfig::default(),
        ));
        ListingService::new(source, PaginationConfig::default(), cache)
    }

    #[test]
    fn test_sort_defaults_and_parsing() {
        let request = PageRequest::default();
        assert_eq!(request.sort_spec::<Interest>().unwrap(), Interest::DEFAULT_SORT);

        let request = PageRequest::default().order_by("subscriberCount", "desc");
        assert_eq!(
            request.sort_spec::<Interest>().unwrap(),
            SortSpec::new(SortField::SubscriberCount, Direction::Desc)
        );

        let bad = PageRequest::default().order_by("popularity", "DESC");
        assert_matches!(bad.sort_spec::<Interest>(), Err(Error::InvalidSortField(_)));

        let bad = PageRequest::default().order_by("name", "sideways");
        assert_matches!(bad.sort_spec::<Interest>(), Err(Error::InvalidDirection(_)));
    }

    #[tokio::test]
    async fn test_default_order_is_name_ascending() {
        let source = Arc::new(InMemoryDataSource::new(interests()));
        let listing = service(source);

        let page = listing
            .get_page(&PageRequest::default().limit(4))
            .await
            .unwrap();

        let names: Vec<_> = page.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["art", "books", "cars", "design"]);
        assert!(page.has_next);
        assert_eq!(page.total_count, Some(6));
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let source = Arc::new(InMemoryDataSource::new(interests()));
        let listing = service(source.clone());
        let request = PageRequest::default().order_by("subscriberCount", "DESC").limit(2);

        let first = listing.get_page(&request).await.unwrap();
        let second = listing.get_page(&request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_cursor_is_first_page() {
        let source = Arc::new(InMemoryDataSource::new(interests()));
        let listing = service(source);

        let blank = listing
            .get_page(&PageRequest::default().after("  ").limit(2))
            .await
            .unwrap();
        let none = listing
            .get_page(&PageRequest::default().limit(2))
            .await
            .unwrap();

        assert_eq!(blank, none);
    }

    #[tokio::test]
    async fn test_invalid_cursor_never_reaches_source() {
        let source = Arc::new(InMemoryDataSource::new(interests()));
        let listing = service(source.clone());

        let result = listing
            .get_page(&PageRequest::default().after("%%%").limit(2))
            .await;

        assert_matches!(result, Err(Error::InvalidCursor(_)));
        assert_eq!(source.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_field_is_rejected() {
        let listing = service(Arc::new(InMemoryDataSource::new(interests())));

        let result = listing
            .get_page(&PageRequest::default().order_by("publishDate", "DESC"))
            .await;

        assert_matches!(result, Err(Error::UnsupportedSortField { .. }));
    }

    #[tokio::test]
    async fn test_requester_gets_own_entry() {
        let source = Arc::new(InMemoryDataSource::new(interests()));
        let listing = service(source.clone());
        let request = PageRequest::default().limit(3);

        listing.get_page(&request.clone().for_user(Uuid::from_u128(1))).await.unwrap();
        listing.get_page(&request.clone().for_user(Uuid::from_u128(2))).await.unwrap();

        assert_eq!(source.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_requester_flags_differ_per_user() {
        let source = Arc::new(InMemoryDataSource::new(interests()));
        let listing = service(source.clone());
        let (alice, bob) = (Uuid::from_u128(100), Uuid::from_u128(200));
        source.mark(alice, Uuid::from_u128(1));

        let request = PageRequest::default().limit(2);
        let for_alice = listing.get_page(&request.clone().for_user(alice)).await.unwrap();
        let for_bob = listing.get_page(&request.clone().for_user(bob)).await.unwrap();

        assert_eq!(for_alice.items[0].name, "art");
        assert!(for_alice.items[0].subscribed_by_me);
        assert!(!for_bob.items[0].subscribed_by_me);
        assert_ne!(for_alice, for_bob);

        // Each requester's page is cached separately.
        listing.get_page(&request.clone().for_user(alice)).await.unwrap();
        assert_eq!(source.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_elapsed_wait() {
        use crate::domain::{CacheStore, Delivery, NotificationChannel, Subscription};
        use async_trait::async_trait;
        use bytes::Bytes;
        use std::time::Duration;

        /// Lock held elsewhere, holder keeps announcing but never writes.
        struct AlwaysBusy;

        #[async_trait]
        impl crate::domain::LockManager for AlwaysBusy {
            async fn try_acquire(
                &self,
                _key: &str,
                _wait: Duration,
                _lease: Duration,
            ) -> Result<Option<crate::domain::LockHandle>> {
                Ok(None)
            }

            async fn release(&self, _handle: &crate::domain::LockHandle) -> Result<()> {
                Ok(())
            }
        }

        struct EmptyStore;

        #[async_trait]
        impl CacheStore for EmptyStore {
            async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
                Ok(None)
            }

            async fn put(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<()> {
                Ok(())
            }

            async fn remove(&self, _key: &str) -> Result<()> {
                Ok(())
            }
        }

        struct SlowAnnouncer;

        struct SlowSubscription;

        #[async_trait]
        impl Subscription for SlowSubscription {
            fn topic(&self) -> &str {
                "busy"
            }

            async fn next_message(&mut self, _timeout: Duration) -> Result<Delivery> {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(Delivery::Message("ready".to_string()))
            }

            async fn close(self: Box<Self>) -> Result<()> {
                Ok(())
            }
        }

        #[async_trait]
        impl NotificationChannel for SlowAnnouncer {
            async fn publish(&self, _topic: &str, _message: &str) -> Result<()> {
                Ok(())
            }

            async fn subscribe(&self, _topic: &str) -> Result<Box<dyn Subscription>> {
                Ok(Box::new(SlowSubscription))
            }
        }

        let cache = Arc::new(ReadThroughCache::new(
            Arc::new(EmptyStore),
            Arc::new(AlwaysBusy),
            Arc::new(SlowAnnouncer),
            ReadThroughConfig {
                notify_wait: Duration::from_secs(5),
                max_read_attempts: 3,
                ..Default::default()
            },
        ));
        let source = Arc::new(InMemoryDataSource::new(interests()));
        let listing: InterestListing =
            ListingService::new(source.clone(), PaginationConfig::default(), cache);

        let result = listing.get_page(&PageRequest::default()).await;

        let waited = assert_matches!(result, Err(Error::CacheWaitTimeout { waited, .. }) => waited);
        assert!(waited >= Duration::from_millis(90));
        assert!(waited < Duration::from_secs(5));
        assert_eq!(source.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_evicted_page_is_recomputed() {
        let source = Arc::new(InMemoryDataSource::new(interests()));
        let listing = service(source.clone());
        let request = PageRequest::default().limit(3);

        listing.get_page(&request).await.unwrap();
        listing.evict(&request).await.unwrap();
        listing.get_page(&request).await.unwrap();

        assert_eq!(source.query_calls(), 2);
    }
}
