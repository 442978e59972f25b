//! Property-Based Tests for Keyset Pagination
//!
//! # Test Properties
//!
//! 1. **Cursor Fidelity**: a decoded cursor carries the exact value and id
//! 2. **Completeness**: walking every page yields each row exactly once
//! 3. **Order**: the concatenated pages equal one full sorted scan
//! 4. **Nulls Last**: rows without a sort value come after all others

#![cfg(test)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use super::cursor::{self, Cursor};
use super::paginator::{KeysetPaginator, PaginationConfig};
use super::sort::{Direction, SortField, SortSpec, SortValue};
use crate::adapters::InMemoryDataSource;
use crate::domain::records::{Article, Comment, Filter, PageRow};

// =============================================================================
// Property Strategies
// =============================================================================

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Timestamps with sub-second precision so cursors must keep nanoseconds.
fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..10_000_000, 0i64..1_000_000_000)
        .prop_map(|(secs, nanos)| base_time() + Duration::seconds(secs) + Duration::nanoseconds(nanos))
}

fn sort_value_strategy() -> impl Strategy<Value = SortValue> {
    prop_oneof![
        timestamp_strategy().prop_map(SortValue::Timestamp),
        any::<i64>().prop_map(SortValue::Count),
        "[a-zA-Z0-9 :_\\-]{0,40}".prop_map(SortValue::Text),
        Just(SortValue::Null),
    ]
}

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Asc), Just(Direction::Desc)]
}

/// Comments on one article. Like counts are drawn from a tiny range so ties
/// are common and the id tie-break is exercised.
fn comments_strategy() -> impl Strategy<Value = Vec<Comment>> {
    prop::collection::vec((0i64..4, 0i64..50), 0..40).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (likes, hour))| Comment {
                id: Uuid::from_u128(i as u128 + 1),
                article_id: Uuid::from_u128(7),
                user_id: Uuid::from_u128(99),
                user_nickname: "reader".to_string(),
                content: format!("comment {}", i),
                like_count: likes,
                liked_by_me: false,
                active: true,
                created_at: base_time() + Duration::hours(hour),
            })
            .collect()
    })
}

/// Articles where roughly a third have no publish date.
fn articles_strategy() -> impl Strategy<Value = Vec<Article>> {
    prop::collection::vec(prop::option::weighted(0.66, 0i64..20), 0..30).prop_map(|days| {
        days.into_iter()
            .enumerate()
            .map(|(i, day)| Article {
                id: Uuid::from_u128(i as u128 + 1),
                source: "NAVER".to_string(),
                source_url: format!("https://news.example/{}", i),
                title: format!("article {}", i),
                publish_date: day.map(|d| base_time() + Duration::days(d)),
                summary: String::new(),
                comment_count: 0,
                view_count: 0,
                viewed_by_me: false,
                deleted: false,
                created_at: base_time(),
            })
            .collect()
    })
}

// =============================================================================
// Helpers
// =============================================================================

/// Follow `nextCursor` until `hasNext` is false and return every id served.
fn walk<R: PageRow>(rows: Vec<R>, filter: &Filter, sort: SortSpec, limit: i64) -> Vec<Uuid> {
    let paginator: KeysetPaginator<R> = KeysetPaginator::new(
        Arc::new(InMemoryDataSource::new(rows)),
        PaginationConfig::default(),
    );

    tokio_test::block_on(async {
        let mut seen = Vec::new();
        let mut next: Option<String> = None;
        loop {
            let page = paginator
                .fetch_page(filter, sort, next.as_deref(), limit)
                .await
                .unwrap();
            assert!(page.size() <= limit as usize);
            assert_eq!(page.has_next, page.next_cursor.is_some());
            seen.extend(page.items.iter().map(PageRow::id));
            if !page.has_next {
                break;
            }
            next = page.next_cursor;
        }
        seen
    })
}

fn full_scan<R: PageRow>(mut rows: Vec<R>, sort: SortSpec) -> Vec<Uuid> {
    rows.sort_by(|a, b| {
        sort.compare(
            (&a.sort_value(sort.field), a.id()),
            (&b.sort_value(sort.field), b.id()),
        )
    });
    rows.iter().map(PageRow::id).collect()
}

// =============================================================================
// Cursor Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_cursor_preserves_value_and_id(value in sort_value_strategy(), id in any::<u128>()) {
        let id = Uuid::from_u128(id);
        let token = cursor::encode(&value, id);

        prop_assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

        let decoded = Cursor::decode(&token).unwrap();
        prop_assert_eq!(decoded.primary, value);
        prop_assert_eq!(decoded.tie_break, id);
    }

    #[test]
    fn prop_garbage_never_panics(raw in ".{0,64}") {
        let _ = Cursor::decode(&raw);
    }
}

// =============================================================================
// Traversal Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_walk_serves_every_comment_once(
        rows in comments_strategy(),
        limit in 1i64..8,
        direction in direction_strategy(),
        by_likes in any::<bool>(),
    ) {
        let field = if by_likes { SortField::LikeCount } else { SortField::CreatedAt };
        let sort = SortSpec::new(field, direction);
        let filter = Filter::for_resource(Uuid::from_u128(7));

        let walked = walk(rows.clone(), &filter, sort, limit);
        let expected = full_scan(rows, sort);

        prop_assert_eq!(walked, expected);
    }

    #[test]
    fn prop_undated_articles_come_last(
        rows in articles_strategy(),
        limit in 1i64..6,
        direction in direction_strategy(),
    ) {
        let sort = SortSpec::new(SortField::PublishDate, direction);
        let undated: Vec<Uuid> = rows
            .iter()
            .filter(|a| a.publish_date.is_none())
            .map(|a| a.id)
            .collect();

        let walked = walk(rows.clone(), &Filter::default(), sort, limit);
        prop_assert_eq!(walked.len(), rows.len());

        let tail = &walked[walked.len() - undated.len()..];
        prop_assert!(tail.iter().all(|id| undated.contains(id)));
        prop_assert_eq!(walked, full_scan(rows, sort));
    }
}
