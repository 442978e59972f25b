//! Monew Read Path Integration Tests
//!
//! End-to-end through `ListingService` with in-memory adapters:
//! - Stampede protection (one compute per key, bounded waiters)
//! - Keyset pagination over comments, articles and interests
//! - Shared store failure policy

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use monew::adapters::{
    InMemoryCacheStore, InMemoryDataSource, InMemoryLockManager, InMemoryNotificationChannel,
};
use monew::{
    Article, Comment, Error, Filter, Interest, ListingService, PageRequest, PaginationConfig,
    ReadPreference, ReadThroughCache, ReadThroughConfig,
};

// =============================================================================
// Fixtures
// =============================================================================

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn article_id() -> Uuid {
    Uuid::from_u128(0xA1)
}

/// `n` comments on one article, `createdAt` one hour apart, oldest first.
fn hourly_comments(n: usize) -> Vec<Comment> {
    (0..n)
        .map(|i| Comment {
            id: Uuid::from_u128(i as u128 + 1),
            article_id: article_id(),
            user_id: Uuid::from_u128(0xB0 + i as u128),
            user_nickname: format!("user{}", i),
            content: format!("comment number {}", i),
            like_count: 0,
            liked_by_me: false,
            active: true,
            created_at: base_time() + chrono::Duration::hours(i as i64),
        })
        .collect()
}

fn article(n: u128, title: &str, publish_date: Option<DateTime<Utc>>, views: i64) -> Article {
    Article {
        id: Uuid::from_u128(n),
        source: if n % 2 == 0 { "NAVER" } else { "HANKYUNG" }.to_string(),
        source_url: format!("https://news.example/{}", n),
        title: title.to_string(),
        publish_date,
        summary: format!("{} summary", title),
        comment_count: 0,
        view_count: views,
        viewed_by_me: false,
        deleted: false,
        created_at: base_time(),
    }
}

fn cache_with(config: ReadThroughConfig) -> Arc<ReadThroughCache> {
    Arc::new(ReadThroughCache::new(
        Arc::new(InMemoryCacheStore::new()),
        Arc::new(InMemoryLockManager::new()),
        Arc::new(InMemoryNotificationChannel::new()),
        config,
    ))
}

fn comment_listing(
    source: Arc<InMemoryDataSource<Comment>>,
    cache: Arc<ReadThroughCache>,
) -> ListingService<Comment> {
    ListingService::new(source, PaginationConfig::default(), cache)
}

fn comments_request() -> PageRequest {
    PageRequest::new(Filter::for_resource(article_id()))
}

// =============================================================================
// Stampede Protection
// =============================================================================

mod stampede_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_compute_once() {
        let source = Arc::new(
            InMemoryDataSource::new(hourly_comments(10)).with_latency(Duration::from_millis(200)),
        );
        let listing = Arc::new(comment_listing(source.clone(), cache_with(ReadThroughConfig::default())));
        let request = comments_request().limit(5);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let listing = listing.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move { listing.get_page(&request).await }));
        }

        let mut pages = Vec::new();
        for handle in handles {
            pages.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(source.query_calls(), 1);
        assert!(pages.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(pages[0].size(), 5);
    }

    #[tokio::test]
    async fn test_cache_hits_are_byte_identical() {
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(10)));
        let listing = comment_listing(source.clone(), cache_with(ReadThroughConfig::default()));
        let request = comments_request().limit(5);

        let first = listing.get_page(&request).await.unwrap();
        let mut encoded = Vec::new();
        for _ in 0..5 {
            let page = listing.get_page(&request).await.unwrap();
            encoded.push(serde_json::to_vec(&page).unwrap());
        }

        let expected = serde_json::to_vec(&first).unwrap();
        assert!(encoded.iter().all(|bytes| *bytes == expected));
        assert_eq!(source.query_calls(), 1);
        assert_eq!(listing.cache().metrics().snapshot().hits, 5);
    }

    #[tokio::test]
    async fn test_expired_entry_is_recomputed() {
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(3)));
        let config = ReadThroughConfig {
            entry_ttl: Duration::from_millis(50),
            ..Default::default()
        };
        let listing = comment_listing(source.clone(), cache_with(config));

        listing.get_page(&comments_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        listing.get_page(&comments_request()).await.unwrap();

        assert_eq!(source.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_listing_is_cached_once() {
        let source = Arc::new(InMemoryDataSource::new(Vec::<Comment>::new()));
        let listing = comment_listing(source.clone(), cache_with(ReadThroughConfig::default()));

        for _ in 0..3 {
            let page = listing.get_page(&comments_request()).await.unwrap();
            assert!(page.is_empty());
            assert!(!page.has_next);
            assert_eq!(page.total_count, Some(0));
        }

        assert_eq!(source.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_waiter_gives_up_within_bound() {
        use monew::domain::LockManager;
        use monew::readthrough::CacheKey;

        let store = Arc::new(InMemoryCacheStore::new());
        let locks = Arc::new(InMemoryLockManager::new());
        let channel = Arc::new(InMemoryNotificationChannel::new());
        let config = ReadThroughConfig {
            lock_wait: Duration::from_millis(100),
            notify_wait: Duration::from_millis(200),
            ..Default::default()
        };
        let cache = Arc::new(ReadThroughCache::new(
            store,
            locks.clone(),
            channel.clone(),
            config,
        ));
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(3)));
        let listing = comment_listing(source.clone(), cache);
        let request = comments_request();

        // Another instance holds the lock and never finishes.
        let key: CacheKey = listing.cache_key(&request).unwrap();
        let _stuck = locks
            .try_acquire(&key.lock_key(), Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let started = Instant::now();
        let result = listing.get_page(&request).await;

        assert_matches!(result, Err(Error::CacheWaitTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(source.query_calls(), 0);
        assert_eq!(channel.subscriber_count(&key.topic()), 0);
    }

    #[tokio::test]
    async fn test_crashed_holder_lease_expires() {
        use monew::domain::LockManager;

        let locks = Arc::new(InMemoryLockManager::new());
        let cache = Arc::new(ReadThroughCache::new(
            Arc::new(InMemoryCacheStore::new()),
            locks.clone(),
            Arc::new(InMemoryNotificationChannel::new()),
            ReadThroughConfig::default(),
        ));
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(3)));
        let listing = comment_listing(source.clone(), cache);
        let request = comments_request();
        let key = listing.cache_key(&request).unwrap();

        // Holder takes a short lease and vanishes without releasing.
        let crashed = locks
            .try_acquire(&key.lock_key(), Duration::ZERO, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        let page = listing.get_page(&request).await.unwrap();
        assert_eq!(page.size(), 3);
        assert_eq!(source.query_calls(), 1);

        // The late release of the crashed holder must not disturb anything.
        locks.release(&crashed).await.unwrap();
        assert!(!locks.is_held(&key.lock_key()));
    }
}

// =============================================================================
// Keyset Pagination
// =============================================================================

mod pagination_tests {
    use super::*;
    use monew::pagination::SortValue;
    use monew::Cursor;

    #[tokio::test]
    async fn test_ten_hourly_comments_in_two_pages() {
        let comments = hourly_comments(10);
        let source = Arc::new(InMemoryDataSource::new(comments.clone()));
        let listing = comment_listing(source, cache_with(ReadThroughConfig::default()));

        let request = comments_request().order_by("createdAt", "DESC").limit(5);
        let first = listing.get_page(&request).await.unwrap();

        let expected_first: Vec<Uuid> = comments.iter().rev().take(5).map(|c| c.id).collect();
        assert_eq!(first.items.iter().map(|c| c.id).collect::<Vec<_>>(), expected_first);
        assert!(first.has_next);
        assert_eq!(first.total_count, Some(10));

        let fifth = &first.items[4];
        let cursor = Cursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(cursor.tie_break, fifth.id);
        assert_eq!(cursor.primary, SortValue::from(fifth.created_at));

        let second = listing
            .get_page(&request.clone().after(first.next_cursor.clone().unwrap()))
            .await
            .unwrap();

        let expected_second: Vec<Uuid> = comments.iter().rev().skip(5).map(|c| c.id).collect();
        assert_eq!(second.items.iter().map(|c| c.id).collect::<Vec<_>>(), expected_second);
        assert!(!second.has_next);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_zero_limit_means_default() {
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(25)));
        let listing = comment_listing(source, cache_with(ReadThroughConfig::default()));

        let page = listing.get_page(&comments_request().limit(0)).await.unwrap();

        assert_eq!(page.size(), 20);
        assert!(page.has_next);
    }

    #[tokio::test]
    async fn test_oversized_limit_is_clamped() {
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(120)));
        let listing = comment_listing(source, cache_with(ReadThroughConfig::default()));

        let page = listing.get_page(&comments_request().limit(500)).await.unwrap();

        assert_eq!(page.size(), 100);
    }

    #[tokio::test]
    async fn test_truncated_cursor_is_rejected() {
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(10)));
        let listing = comment_listing(source, cache_with(ReadThroughConfig::default()));

        let first = listing.get_page(&comments_request().limit(5)).await.unwrap();
        let cursor = first.next_cursor.unwrap();
        let truncated = &cursor[..cursor.len() / 2];

        let result = listing
            .get_page(&comments_request().limit(5).after(truncated))
            .await;

        assert_matches!(result, Err(Error::InvalidCursor(_)));
    }

    #[tokio::test]
    async fn test_new_rows_do_not_shift_later_pages() {
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(10)));
        let listing = comment_listing(source.clone(), cache_with(ReadThroughConfig::default()));
        let request = comments_request().limit(5);

        let first = listing.get_page(&request).await.unwrap();

        let mut newest = hourly_comments(1).remove(0);
        newest.id = Uuid::from_u128(999);
        newest.created_at = base_time() + chrono::Duration::days(2);
        source.insert(newest);

        let second = listing
            .get_page(&request.clone().after(first.next_cursor.unwrap()))
            .await
            .unwrap();

        let ids: Vec<u128> = second.items.iter().map(|c| c.id.as_u128()).collect();
        assert_eq!(ids, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_articles_without_publish_date_come_last() {
        let day = |d: i64| Some(base_time() + chrono::Duration::days(d));
        let articles = vec![
            article(1, "undated one", None, 5),
            article(2, "monday", day(0), 1),
            article(3, "tuesday", day(1), 9),
            article(4, "undated two", None, 2),
            article(5, "wednesday", day(2), 3),
        ];
        let source = Arc::new(InMemoryDataSource::new(articles));
        let listing: ListingService<Article> = ListingService::new(
            source,
            PaginationConfig::default(),
            cache_with(ReadThroughConfig::default()),
        );

        let mut titles = Vec::new();
        let mut request = PageRequest::default().limit(2);
        loop {
            let page = listing.get_page(&request).await.unwrap();
            titles.extend(page.items.iter().map(|a| a.title.clone()));
            match page.next_cursor {
                Some(cursor) => request = request.after(cursor),
                None => break,
            }
        }

        assert_eq!(
            titles,
            vec!["wednesday", "tuesday", "monday", "undated two", "undated one"]
        );
    }

    #[tokio::test]
    async fn test_article_filters() {
        let articles = vec![
            article(1, "Rust 2024 edition", Some(base_time()), 10),
            article(2, "rust belt economy", Some(base_time()), 20),
            article(3, "Gardening tips", Some(base_time()), 30),
        ];
        let source = Arc::new(InMemoryDataSource::new(articles));
        let listing: ListingService<Article> = ListingService::new(
            source,
            PaginationConfig::default(),
            cache_with(ReadThroughConfig::default()),
        );

        let request = PageRequest::new(Filter::default().with_keyword("RUST").with_sources(["NAVER"]))
            .order_by("viewCount", "DESC");
        let page = listing.get_page(&request).await.unwrap();

        assert_eq!(page.size(), 1);
        assert_eq!(page.items[0].title, "rust belt economy");
        assert_eq!(page.total_count, Some(1));
    }

    #[tokio::test]
    async fn test_interests_by_subscriber_count_with_ties() {
        let interests: Vec<Interest> = (0..9)
            .map(|i| Interest {
                id: Uuid::from_u128(i + 1),
                name: format!("interest {}", i),
                keywords: vec![],
                subscriber_count: (i % 3) as i64,
                subscribed_by_me: false,
                created_at: base_time(),
            })
            .collect();
        let source = Arc::new(InMemoryDataSource::new(interests));
        let listing: ListingService<Interest> = ListingService::new(
            source.clone(),
            PaginationConfig::default(),
            cache_with(ReadThroughConfig::default()),
        );

        let mut ids = Vec::new();
        let mut request = PageRequest::default()
            .order_by("subscriberCount", "asc")
            .limit(2);
        loop {
            let page = listing.get_page(&request).await.unwrap();
            ids.extend(page.items.iter().map(|i| i.id.as_u128()));
            match page.next_cursor {
                Some(cursor) => request = request.after(cursor),
                None => break,
            }
        }

        assert_eq!(ids, vec![1, 4, 7, 2, 5, 8, 3, 6, 9]);
        assert_eq!(source.last_read_preference(), Some(ReadPreference::Replica));
    }
}

// =============================================================================
// Shared Store Failure
// =============================================================================

mod store_failure_tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use monew::domain::{LockHandle, LockManager};

    struct PartitionedLocks;

    #[async_trait]
    impl LockManager for PartitionedLocks {
        async fn try_acquire(
            &self,
            _key: &str,
            _wait: Duration,
            _lease: Duration,
        ) -> monew::Result<Option<LockHandle>> {
            Err(Error::StoreUnavailable("lock service unreachable".to_string()))
        }

        async fn release(&self, _handle: &LockHandle) -> monew::Result<()> {
            Ok(())
        }
    }

    fn partitioned(degrade: bool) -> (Arc<InMemoryDataSource<Comment>>, ListingService<Comment>) {
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(4)));
        let cache = Arc::new(ReadThroughCache::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(PartitionedLocks),
            Arc::new(InMemoryNotificationChannel::new()),
            ReadThroughConfig {
                degrade_on_store_failure: degrade,
                ..Default::default()
            },
        ));
        (source.clone(), comment_listing(source, cache))
    }

    #[tokio::test]
    async fn test_lock_outage_degrades_to_direct_read() {
        let (source, listing) = partitioned(true);

        let first = listing.get_page(&comments_request()).await.unwrap();
        let second = listing.get_page(&comments_request()).await.unwrap();

        assert_eq!(first, second);
        // Nothing is cached while degraded.
        assert_eq!(source.query_calls(), 2);
        assert_eq!(listing.cache().metrics().snapshot().degraded_computes, 2);
    }

    #[tokio::test]
    async fn test_lock_outage_fails_when_strict() {
        let (source, listing) = partitioned(false);

        let result = listing.get_page(&comments_request()).await;

        assert_matches!(result, Err(Error::StoreUnavailable(_)));
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(source.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_replaced() {
        use monew::domain::CacheStore;

        let store = Arc::new(InMemoryCacheStore::new());
        let cache = Arc::new(ReadThroughCache::new(
            store.clone(),
            Arc::new(InMemoryLockManager::new()),
            Arc::new(InMemoryNotificationChannel::new()),
            ReadThroughConfig::default(),
        ));
        let source = Arc::new(InMemoryDataSource::new(hourly_comments(2)));
        let listing = comment_listing(source.clone(), cache);
        let key = listing.cache_key(&comments_request()).unwrap();

        store
            .put(key.as_str(), Bytes::from_static(b"\x00garbage"), Duration::from_secs(60))
            .await
            .unwrap();

        let page = listing.get_page(&comments_request()).await.unwrap();
        assert_eq!(page.size(), 2);

        let repaired = store.get(key.as_str()).await.unwrap().unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&repaired).is_ok());
    }
}
