//! Listing Records
//!
//! Flat, read-only row projections. Relations between comments, articles and
//! users are carried as ids and denormalized display fields, never as object
//! references.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pagination::{Direction, SortField, SortSpec, SortValue};

// =============================================================================
// Filter
// =============================================================================

/// Row predicate shared by all listings. Unused fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Parent resource (the article a comment belongs to).
    pub resource_id: Option<Uuid>,
    /// Case-insensitive free-text match.
    pub keyword: Option<String>,
    /// Accepted article sources; empty means any.
    pub sources: Vec<String>,
    /// Inclusive lower bound on publish date.
    pub published_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on publish date.
    pub published_to: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn for_resource(resource_id: Uuid) -> Self {
        Self {
            resource_id: Some(resource_id),
            ..Default::default()
        }
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn published_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.published_from = from;
        self.published_to = to;
        self
    }

    /// Keyword trimmed and lowercased; `None` when blank.
    pub fn normalized_keyword(&self) -> Option<String> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase)
    }

    /// Canonical `(name, value)` pairs; equal for filters that select the same rows.
    pub fn fingerprint(&self) -> Vec<(&'static str, String)> {
        let mut parts = Vec::new();
        if let Some(id) = self.resource_id {
            parts.push(("resource", id.to_string()));
        }
        if let Some(keyword) = self.normalized_keyword() {
            parts.push(("q", keyword));
        }
        // One pair per source so `["a", "b"]` and `["a,b"]` stay distinct.
        let mut sources: Vec<&str> = self.sources.iter().map(String::as_str).collect();
        sources.sort_unstable();
        sources.dedup();
        parts.extend(sources.into_iter().map(|source| ("src", source.to_string())));
        if let Some(from) = self.published_from {
            parts.push(("from", from.to_rfc3339()));
        }
        if let Some(to) = self.published_to {
            parts.push(("to", to.to_rfc3339()));
        }
        parts
    }

    fn keyword_hits(&self, haystacks: &[&str]) -> bool {
        match self.normalized_keyword() {
            Some(needle) => haystacks
                .iter()
                .any(|h| h.to_lowercase().contains(&needle)),
            None => true,
        }
    }
}

// =============================================================================
// Page Row
// =============================================================================

/// A record that can be listed with keyset pagination.
pub trait PageRow: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Listing name, used in cache keys and errors.
    const RESOURCE: &'static str;

    /// Fields this listing can be ordered by.
    const SORT_FIELDS: &'static [SortField];

    /// Order used when the request names none.
    const DEFAULT_SORT: SortSpec;

    /// Unique tie-break id.
    fn id(&self) -> Uuid;

    /// Value of `field` on this row; `Null` when absent.
    fn sort_value(&self, field: SortField) -> SortValue;

    /// Whether this row satisfies `filter`.
    fn matches(&self, filter: &Filter) -> bool;

    /// Set the requester-specific flag (`likedByMe` and friends).
    fn personalize(&mut self, flagged: bool);

    fn supports(field: SortField) -> bool {
        Self::SORT_FIELDS.contains(&field)
    }
}

// =============================================================================
// Comment
// =============================================================================

/// Comment on an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub article_id: Uuid,
    pub user_id: Uuid,
    pub user_nickname: String,
    pub content: String,
    pub like_count: i64,
    /// Whether the requester liked this comment; set by the data source.
    #[serde(default)]
    pub liked_by_me: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl PageRow for Comment {
    const RESOURCE: &'static str = "comments";
    const SORT_FIELDS: &'static [SortField] = &[SortField::CreatedAt, SortField::LikeCount];
    const DEFAULT_SORT: SortSpec = SortSpec {
        field: SortField::CreatedAt,
        direction: Direction::Desc,
    };

    fn id(&self) -> Uuid {
        self.id
    }

    fn sort_value(&self, field: SortField) -> SortValue {
        match field {
            SortField::CreatedAt => SortValue::Timestamp(self.created_at),
            SortField::LikeCount => SortValue::Count(self.like_count),
            _ => SortValue::Null,
        }
    }

    fn matches(&self, filter: &Filter) -> bool {
        self.active
            && filter.resource_id.map_or(true, |id| id == self.article_id)
            && filter.keyword_hits(&[self.content.as_str()])
    }

    fn personalize(&mut self, flagged: bool) {
        self.liked_by_me = flagged;
    }
}

// =============================================================================
// Article
// =============================================================================

/// News article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: Uuid,
    pub source: String,
    pub source_url: String,
    pub title: String,
    /// Missing for some crawled items; sorts last.
    pub publish_date: Option<DateTime<Utc>>,
    pub summary: String,
    pub comment_count: i64,
    pub view_count: i64,
    #[serde(default)]
    pub viewed_by_me: bool,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl PageRow for Article {
    const RESOURCE: &'static str = "articles";
    const SORT_FIELDS: &'static [SortField] = &[
        SortField::PublishDate,
        SortField::CreatedAt,
        SortField::ViewCount,
        SortField::CommentCount,
    ];
    const DEFAULT_SORT: SortSpec = SortSpec {
        field: SortField::PublishDate,
        direction: Direction::Desc,
    };

    fn id(&self) -> Uuid {
        self.id
    }

    fn sort_value(&self, field: SortField) -> SortValue {
        match field {
            SortField::PublishDate => self.publish_date.into(),
            SortField::CreatedAt => SortValue::Timestamp(self.created_at),
            SortField::ViewCount => SortValue::Count(self.view_count),
            SortField::CommentCount => SortValue::Count(self.comment_count),
            _ => SortValue::Null,
        }
    }

    fn matches(&self, filter: &Filter) -> bool {
        if self.deleted || !filter.keyword_hits(&[self.title.as_str(), self.summary.as_str()]) {
            return false;
        }
        if !filter.sources.is_empty() && !filter.sources.iter().any(|s| s == &self.source) {
            return false;
        }
        if filter.published_from.is_none() && filter.published_to.is_none() {
            return true;
        }
        // A date range excludes undated articles.
        match self.publish_date {
            Some(date) => {
                filter.published_from.map_or(true, |from| date >= from)
                    && filter.published_to.map_or(true, |to| date <= to)
            }
            None => false,
        }
    }

    fn personalize(&mut self, flagged: bool) {
        self.viewed_by_me = flagged;
    }
}

// =============================================================================
// Interest
// =============================================================================

/// Interest users can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interest {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub subscriber_count: i64,
    #[serde(default)]
    pub subscribed_by_me: bool,
    pub created_at: DateTime<Utc>,
}

impl PageRow for Interest {
    const RESOURCE: &'static str = "interests";
    const SORT_FIELDS: &'static [SortField] = &[
        SortField::Name,
        SortField::SubscriberCount,
        SortField::CreatedAt,
    ];
    const DEFAULT_SORT: SortSpec = SortSpec {
        field: SortField::Name,
        direction: Direction::Asc,
    };

    fn id(&self) -> Uuid {
        self.id
    }

    fn sort_value(&self, field: SortField) -> SortValue {
        match field {
            SortField::Name => SortValue::Text(self.name.clone()),
            SortField::SubscriberCount => SortValue::Count(self.subscriber_count),
            SortField::CreatedAt => SortValue::Timestamp(self.created_at),
            _ => SortValue::Null,
        }
    }

    fn matches(&self, filter: &Filter) -> bool {
        let mut haystacks = vec![self.name.as_str()];
        haystacks.extend(self.keywords.iter().map(String::as_str));
        filter.keyword_hits(&haystacks)
    }

    fn personalize(&mut self, flagged: bool) {
        self.subscribed_by_me = flagged;
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Tests
// =============================================================================
