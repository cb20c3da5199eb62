//! Persistence session contract and staged changes.
//!
//! # Responsibility
//! - Define the store-facing operations repositories and the unit of work
//!   depend on: reads over [`Query`] values, change staging, checkpoint
//!   flush and transaction control.
//! - Define [`PendingChange`], the unit interceptors rewrite.
//!
//! # Invariants
//! - Staged changes touch the store only through `flush`.
//! - `flush` is atomic: every change applies or none does.
//! - Rollback is never cancelled.

use crate::error::RepoResult;
use crate::model::entity::{Column, EntityDescriptor, Record};
use crate::spec::evaluator::Query;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

mod sqlite;
pub(crate) mod tracker;

pub use sqlite::SqliteSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Insert,
    Update,
    Delete,
}

/// Columns an update writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnScope {
    /// Every persisted column except the key and concurrency token.
    All,
    /// Only the listed columns.
    Only(Vec<&'static str>),
}

/// One staged mutation, as a column record.
#[derive(Debug, Clone)]
pub struct PendingChange {
    /// What the flush executes.
    pub state: ChangeState,
    /// What the caller staged; differs from `state` once an interceptor
    /// rewrites the change (a soft delete is staged as `Delete` and flushed
    /// as `Update`).
    pub origin: ChangeState,
    pub descriptor: &'static EntityDescriptor,
    pub record: Record,
    pub scope: ColumnScope,
    /// Columns an update must never write.
    pub protected: Vec<&'static str>,
}

impl PendingChange {
    fn new(state: ChangeState, descriptor: &'static EntityDescriptor, record: Record) -> Self {
        Self {
            state,
            origin: state,
            descriptor,
            record,
            scope: ColumnScope::All,
            protected: Vec::new(),
        }
    }

    pub fn insert(descriptor: &'static EntityDescriptor, record: Record) -> Self {
        Self::new(ChangeState::Insert, descriptor, record)
    }

    pub fn update(descriptor: &'static EntityDescriptor, record: Record) -> Self {
        Self::new(ChangeState::Update, descriptor, record)
    }

    /// Update limited to `columns`, as produced by tracked snapshots.
    pub fn partial_update(
        descriptor: &'static EntityDescriptor,
        record: Record,
        columns: Vec<&'static str>,
    ) -> Self {
        Self {
            scope: ColumnScope::Only(columns),
            ..Self::new(ChangeState::Update, descriptor, record)
        }
    }

    pub fn delete(descriptor: &'static EntityDescriptor, record: Record) -> Self {
        Self::new(ChangeState::Delete, descriptor, record)
    }

    pub fn key(&self) -> &JsonValue {
        self.record
            .get(self.descriptor.key.name)
            .unwrap_or(&JsonValue::Null)
    }

    /// Key rendered for errors and logs.
    pub fn key_text(&self) -> String {
        match self.key() {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    /// Writes `value` into the record and, for scoped updates, into the
    /// written column set.
    pub fn set_column(&mut self, column: Column, value: JsonValue) {
        self.record.insert(column.name.to_string(), value);
        if let ColumnScope::Only(columns) = &mut self.scope {
            if !columns.contains(&column.name) {
                columns.push(column.name);
            }
        }
        self.protected.retain(|name| *name != column.name);
    }

    pub fn protect(&mut self, column: Column) {
        if !self.protected.contains(&column.name) {
            self.protected.push(column.name);
        }
    }

    /// Restricts the update to the columns written so far through
    /// [`PendingChange::set_column`].
    pub fn narrow_to_set_columns(&mut self) {
        self.scope = ColumnScope::Only(Vec::new());
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.iter().any(|protected| *protected == name)
    }
}

/// Store-facing operations of one connection.
#[async_trait]
pub trait PersistenceSession: Send + Sync {
    /// Source query for `descriptor`; specifications are evaluated on it.
    fn source(&self, descriptor: &'static EntityDescriptor) -> Query {
        Query::from_descriptor(descriptor)
    }

    /// Rows of `query` with navigations attached under their names.
    async fn fetch(&self, query: &Query) -> RepoResult<Vec<Record>>;

    async fn count(&self, query: &Query) -> RepoResult<u64>;

    async fn exists(&self, query: &Query) -> RepoResult<bool>;

    /// One page of `query` plus the unpaged count, read in one snapshot.
    async fn fetch_page(&self, query: &Query) -> RepoResult<(Vec<Record>, u64)>;

    fn stage(&self, change: PendingChange);

    /// Removes and returns every staged change, in staging order.
    fn take_pending(&self) -> Vec<PendingChange>;

    /// Puts changes taken by `take_pending` back in front of anything staged
    /// since.
    fn restore_pending(&self, changes: Vec<PendingChange>);

    fn pending_count(&self) -> usize;

    /// Drops every staged change and returns how many there were.
    fn discard_pending(&self) -> usize;

    /// Persists `changes` atomically and returns the number of rows written.
    async fn flush(&self, changes: &[PendingChange]) -> RepoResult<usize>;

    async fn begin(&self) -> RepoResult<()>;

    async fn commit(&self) -> RepoResult<()>;

    async fn rollback(&self) -> RepoResult<()>;

    /// Rollback for contexts that cannot await, such as `Drop`.
    fn rollback_blocking(&self) -> RepoResult<()>;

    /// Columns of `record` that differ from its tracked snapshot, or `None`
    /// when the entity is not tracked.
    fn changed_columns(
        &self,
        descriptor: &'static EntityDescriptor,
        record: &Record,
    ) -> Option<Vec<&'static str>>;

    fn tracked_count(&self) -> usize;

    /// Checks that the store has the table and columns `descriptor` maps.
    async fn verify_schema(&self, descriptor: &'static EntityDescriptor) -> RepoResult<()>;

    fn cancellation(&self) -> &CancellationToken;
}
