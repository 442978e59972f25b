//! In-Memory Data Source Adapter
//!
//! Implements the `DataSource` port over a vector of rows. It behaves like a
//! relational store would: filter, keyset condition, `ORDER BY field, id`,
//! then `LIMIT`. Requester flags (`likedByMe` and friends) come from a set of
//! `(user, row)` marks. Call counters make it usable as a test double.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::trace;
use uuid::Uuid;

use crate::domain::ports::{DataSource, ReadPreference};
use crate::domain::records::{Filter, PageRow};
use crate::error::Result;
use crate::pagination::{KeysetPredicate, SortSpec};

/// Row store held in process memory.
pub struct InMemoryDataSource<R> {
    rows: RwLock<Vec<R>>,
    /// `(user, row id)` pairs the user liked, viewed or subscribed to.
    marks: RwLock<HashSet<(Uuid, Uuid)>>,
    latency: Option<Duration>,
    query_calls: AtomicUsize,
    count_calls: AtomicUsize,
    last_read: Mutex<Option<ReadPreference>>,
}

impl<R: PageRow> InMemoryDataSource<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self {
            rows: RwLock::new(rows),
            marks: RwLock::new(HashSet::new()),
            latency: None,
            query_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            last_read: Mutex::new(None),
        }
    }

    /// Delay every query by `latency`, imitating a slow backend.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, row: R) {
        self.rows.write().push(row);
    }

    /// Record that `user` liked, viewed or subscribed to row `row_id`.
    pub fn mark(&self, user: Uuid, row_id: Uuid) {
        self.marks.write().insert((user, row_id));
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Number of `query` calls served so far.
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    /// Read preference of the most recent call.
    pub fn last_read_preference(&self) -> Option<ReadPreference> {
        *self.last_read.lock()
    }
}

#[async_trait]
impl<R: PageRow> DataSource<R> for InMemoryDataSource<R> {
    async fn query(
        &self,
        filter: &Filter,
        sort: &SortSpec,
        after: Option<&KeysetPredicate>,
        limit: usize,
        requester: Option<Uuid>,
        read: ReadPreference,
    ) -> Result<Vec<R>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_read.lock() = Some(read);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut selected: Vec<R> = self
            .rows
            .read()
            .iter()
            .filter(|row| row.matches(filter))
            .filter(|row| after.map_or(true, |p| p.admits(&row.sort_value(sort.field), row.id())))
            .cloned()
            .collect();

        selected.sort_by(|a, b| {
            sort.compare(
                (&a.sort_value(sort.field), a.id()),
                (&b.sort_value(sort.field), b.id()),
            )
        });
        selected.truncate(limit);

        let marks = self.marks.read();
        for row in &mut selected {
            let flagged = requester.map_or(false, |user| marks.contains(&(user, row.id())));
            row.personalize(flagged);
        }
        drop(marks);

        trace!(resource = R::RESOURCE, rows = selected.len(), %read, "In-memory query");
        Ok(selected)
    }

    async fn count(&self, filter: &Filter, read: ReadPreference) -> Result<i64> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_read.lock() = Some(read);
        let matching = self.rows.read().iter().filter(|row| row.matches(filter)).count();
        Ok(matching as i64)
    }
}
