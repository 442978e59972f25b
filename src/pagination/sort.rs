//! Sort Specification and Keyset Ordering
//!
//! Every listing is ordered by a compound key `(primary field, id)`. The id is
//! the tie-break: primary values such as `viewCount` are not unique, so without
//! it rows with equal primary values could be skipped or repeated across pages.
//!
//! # Null Policy
//!
//! A missing primary value (e.g. an article with no publish date) sorts **last**
//! regardless of direction. Among nulls, rows are ordered by id in the
//! requested direction.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// Sort Field
// =============================================================================

/// Field a listing can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    CreatedAt,
    PublishDate,
    ViewCount,
    CommentCount,
    LikeCount,
    Name,
    SubscriberCount,
}

/// Kind of value a sort field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Timestamp,
    Count,
    Text,
}

impl SortField {
    /// Canonical (wire) name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "createdAt",
            SortField::PublishDate => "publishDate",
            SortField::ViewCount => "viewCount",
            SortField::CommentCount => "commentCount",
            SortField::LikeCount => "likeCount",
            SortField::Name => "name",
            SortField::SubscriberCount => "subscriberCount",
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            SortField::CreatedAt | SortField::PublishDate => ValueKind::Timestamp,
            SortField::ViewCount
            | SortField::CommentCount
            | SortField::LikeCount
            | SortField::SubscriberCount => ValueKind::Count,
            SortField::Name => ValueKind::Text,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "createdat" | "created_at" => Ok(SortField::CreatedAt),
            "publishdate" | "publish_date" => Ok(SortField::PublishDate),
            "viewcount" | "view_count" => Ok(SortField::ViewCount),
            "commentcount" | "comment_count" => Ok(SortField::CommentCount),
            "likecount" | "like_count" => Ok(SortField::LikeCount),
            "name" => Ok(SortField::Name),
            "subscribercount" | "subscriber_count" => Ok(SortField::SubscriberCount),
            _ => Err(Error::InvalidSortField(s.to_string())),
        }
    }
}

// =============================================================================
// Direction
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    /// Orient an ascending comparison for this direction.
    #[inline]
    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(Direction::Asc),
            "DESC" => Ok(Direction::Desc),
            _ => Err(Error::InvalidDirection(s.to_string())),
        }
    }
}

// =============================================================================
// Sort Value
// =============================================================================

/// Value of a sort field on one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortValue {
    Timestamp(DateTime<Utc>),
    Count(i64),
    Text(String),
    Null,
}

impl SortValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SortValue::Null)
    }

    /// Kind of a non-null value.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            SortValue::Timestamp(_) => Some(ValueKind::Timestamp),
            SortValue::Count(_) => Some(ValueKind::Count),
            SortValue::Text(_) => Some(ValueKind::Text),
            SortValue::Null => None,
        }
    }

    /// Whether this value may stand as the primary key of `field`.
    pub fn fits(&self, field: SortField) -> bool {
        self.kind().map_or(true, |kind| kind == field.kind())
    }

    /// Ascending comparison of two non-null values of the same kind.
    ///
    /// Mismatched kinds never occur for a single field; they fall back to a
    /// fixed kind rank so the order stays total.
    fn cmp_ascending(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Timestamp(a), SortValue::Timestamp(b)) => a.cmp(b),
            (SortValue::Count(a), SortValue::Count(b)) => a.cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortValue::Timestamp(_) => 0,
            SortValue::Count(_) => 1,
            SortValue::Text(_) => 2,
            SortValue::Null => 3,
        }
    }
}

impl From<DateTime<Utc>> for SortValue {
    fn from(ts: DateTime<Utc>) -> Self {
        SortValue::Timestamp(ts)
    }
}

impl From<Option<DateTime<Utc>>> for SortValue {
    fn from(ts: Option<DateTime<Utc>>) -> Self {
        ts.map_or(SortValue::Null, SortValue::Timestamp)
    }
}

impl From<i64> for SortValue {
    fn from(n: i64) -> Self {
        SortValue::Count(n)
    }
}

impl From<&str> for SortValue {
    fn from(s: &str) -> Self {
        SortValue::Text(s.to_string())
    }
}

impl fmt::Display for SortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortValue::Timestamp(ts) => write!(f, "'{}'", ts.to_rfc3339()),
            SortValue::Count(n) => write!(f, "{}", n),
            SortValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            SortValue::Null => f.write_str("NULL"),
        }
    }
}

// =============================================================================
// Sort Spec
// =============================================================================

/// Field plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: Direction,
}

impl SortSpec {
    pub fn new(field: SortField, direction: Direction) -> Self {
        Self { field, direction }
    }

    /// Position order of two rows `(primary, id)` in a result sorted by this spec.
    ///
    /// `Less` means `a` comes first.
    pub fn compare(&self, a: (&SortValue, Uuid), b: (&SortValue, Uuid)) -> Ordering {
        let primary = match (a.0.is_null(), b.0.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => self.direction.apply(a.0.cmp_ascending(b.0)),
        };
        primary.then_with(|| self.direction.apply(a.1.cmp(&b.1)))
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.direction)
    }
}

// =============================================================================
// Keyset Predicate
// =============================================================================

/// "Strictly after this row" condition handed to the data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetPredicate {
    pub sort: SortSpec,
    pub primary: SortValue,
    pub tie_break: Uuid,
}

impl KeysetPredicate {
    pub fn new(sort: SortSpec, primary: SortValue, tie_break: Uuid) -> Self {
        Self {
            sort,
            primary,
            tie_break,
        }
    }

    /// Whether a row with `(value, id)` lies strictly after the cursor row.
    pub fn admits(&self, value: &SortValue, id: Uuid) -> bool {
        self.sort
            .compare((value, id), (&self.primary, self.tie_break))
            == Ordering::Greater
    }
}

/// Renders the compound condition in SQL form, for SQL-backed data sources and logs.
impl fmt::Display for KeysetPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let column = self.sort.field.as_str();
        let op = match self.sort.direction {
            Direction::Asc => ">",
            Direction::Desc => "<",
        };
        if self.primary.is_null() {
            write!(f, "({column} IS NULL AND id {op} '{}')", self.tie_break)
        } else {
            write!(
                f,
                "({column} {op} {v} OR ({column} = {v} AND id {op} '{id}') OR {column} IS NULL)",
                v = self.primary,
                id = self.tie_break,
            )
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
