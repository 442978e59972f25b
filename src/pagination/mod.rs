//! Keyset Pagination
//!
//! Cursor-based paging over a totally ordered listing. Pages are addressed by
//! the last `(sort value, id)` pair served, never by an offset, so inserts
//! ahead of the reader do not shift later pages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      KeysetPaginator<R>                          │
//! │                                                                  │
//! │  cursor ──► decode ──► KeysetPredicate ──► DataSource::query     │
//! │                             (primary, id)      (limit + 1 rows)  │
//! │                                                     │            │
//! │  Page { items, nextCursor, hasNext, totalCount } ◄── trim        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Sort** (`sort.rs`): sort fields, direction, nullable sort values and
//!   the compound keyset predicate
//! - **Cursor** (`cursor.rs`): opaque URL-safe continuation token
//! - **Page** (`page.rs`): the immutable result shape that gets cached
//! - **Paginator** (`paginator.rs`): limit normalization and the
//!   `limit + 1` fetch

pub mod cursor;
pub mod page;
pub mod paginator;
pub mod sort;

#[cfg(test)]
mod proptest;

pub use cursor::Cursor;
pub use page::Page;
pub use paginator::{KeysetPaginator, PaginationConfig};
pub use sort::{Direction, KeysetPredicate, SortField, SortSpec, SortValue, ValueKind};
