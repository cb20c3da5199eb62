//! Staged changes and tracked snapshots of one session.
//!
//! Snapshots hold the persisted columns of rows read with tracking; an
//! update of a tracked entity writes only the columns that differ from its
//! snapshot.

use crate::db::value::json_to_sql;
use crate::model::entity::{EntityDescriptor, Record};
use crate::session::PendingChange;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};

type SnapshotKey = (&'static str, String);

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    pending: VecDeque<PendingChange>,
    snapshots: HashMap<SnapshotKey, Record>,
}

impl ChangeTracker {
    pub(crate) fn stage(&mut self, change: PendingChange) {
        self.pending.push_back(change);
    }

    pub(crate) fn take_pending(&mut self) -> Vec<PendingChange> {
        self.pending.drain(..).collect()
    }

    pub(crate) fn restore_pending(&mut self, changes: Vec<PendingChange>) {
        for change in changes.into_iter().rev() {
            self.pending.push_front(change);
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    /// Remembers the persisted columns of `record`.
    pub(crate) fn track(&mut self, descriptor: &'static EntityDescriptor, record: &Record) {
        let Some(key) = record.get(descriptor.key.name) else {
            return;
        };
        let snapshot = descriptor
            .persisted_columns()
            .into_iter()
            .filter_map(|column| {
                record
                    .get(column.name)
                    .map(|value| (column.name.to_string(), value.clone()))
            })
            .collect();
        self.snapshots
            .insert((descriptor.table, snapshot_key(key)), snapshot);
    }

    pub(crate) fn forget(&mut self, descriptor: &'static EntityDescriptor, key: &JsonValue) {
        self.snapshots.remove(&(descriptor.table, snapshot_key(key)));
    }

    pub(crate) fn tracked_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Data columns of `record` whose stored form differs from the snapshot.
    pub(crate) fn changed_columns(
        &self,
        descriptor: &'static EntityDescriptor,
        record: &Record,
    ) -> Option<Vec<&'static str>> {
        let key = record.get(descriptor.key.name)?;
        let snapshot = self.snapshots.get(&(descriptor.table, snapshot_key(key)))?;
        let version = descriptor.version_column().map(|column| column.name);

        let changed = descriptor
            .persisted_columns()
            .into_iter()
            .filter(|column| column.name != descriptor.key.name && Some(column.name) != version)
            .filter(|column| {
                let current = record.get(column.name).unwrap_or(&JsonValue::Null);
                let original = snapshot.get(column.name).unwrap_or(&JsonValue::Null);
                let current = json_to_sql(descriptor.table, *column, current);
                let original = json_to_sql(descriptor.table, *column, original);
                match (current, original) {
                    (Ok(current), Ok(original)) => current != original,
                    _ => true,
                }
            })
            .map(|column| column.name)
            .collect();
        Some(changed)
    }
}

fn snapshot_key(key: &JsonValue) -> String {
    match key {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}
