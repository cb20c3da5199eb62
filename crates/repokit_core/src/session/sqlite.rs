//! SQLite-backed persistence session.
//!
//! # Responsibility
//! - Execute queries and checkpoints on one connection, off the async
//!   runtime.
//! - Eager-load included navigations with batched `IN` queries.
//! - Race every store-crossing operation against the session's
//!   cancellation token.
//!
//! # Invariants
//! - A checkpoint runs inside `SAVEPOINT repokit_checkpoint`; any failing
//!   change rolls the whole checkpoint back.
//! - Updates never write protected columns and bump `row_version` when the
//!   entity is concurrency-checked.
//! - Soft-delete updates only match live rows; a row that is already
//!   deleted keeps its first tombstone.

use crate::db::value::{json_to_sql, sql_to_json};
use crate::error::{RepoError, RepoResult};
use crate::model::capability::{IS_DELETED, ROW_VERSION};
use crate::model::entity::{Column, EntityDescriptor, NavigationKind, Record};
use crate::session::tracker::ChangeTracker;
use crate::session::{ChangeState, ColumnScope, PendingChange, PersistenceSession};
use crate::spec::evaluator::Query;
use crate::spec::include::IncludeNode;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const CHECKPOINT_SAVEPOINT: &str = "repokit_checkpoint";
const READ_SAVEPOINT: &str = "repokit_read";
const INCLUDE_BATCH_SIZE: usize = 500;

/// What a cancelled operation reports when it was already running.
#[derive(Debug, Clone, Copy)]
enum OnCancel {
    /// Nothing was committed; report `Cancelled`.
    Abort,
    /// A commit may have landed; report `CommitOutcomeUnknown`.
    OutcomeUnknown,
}

impl OnCancel {
    fn error(self) -> RepoError {
        match self {
            Self::Abort => RepoError::Cancelled,
            Self::OutcomeUnknown => RepoError::CommitOutcomeUnknown,
        }
    }
}

/// Session over a single SQLite connection.
pub struct SqliteSession {
    conn: Arc<Mutex<Connection>>,
    tracker: Mutex<ChangeTracker>,
    in_transaction: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SqliteSession {
    /// Wraps an opened, migrated connection.
    pub fn new(conn: Connection, cancel: CancellationToken) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            tracker: Mutex::new(ChangeTracker::default()),
            in_transaction: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    /// Outside a transaction the checkpoint's release is the commit.
    fn flush_on_cancel(&self) -> OnCancel {
        if self.in_transaction() {
            OnCancel::Abort
        } else {
            OnCancel::OutcomeUnknown
        }
    }

    fn tracker(&self) -> MutexGuard<'_, ChangeTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_blocking<R, F>(
        &self,
        event: &'static str,
        detail: String,
        on_cancel: OnCancel,
        work: F,
    ) -> RepoResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> RepoResult<R> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            info!("event={event} module=session status=cancelled stage=before_start {detail}");
            return Err(RepoError::Cancelled);
        }

        let started_at = Instant::now();
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| RepoError::Runtime("session connection lock poisoned".to_string()))?;
            work(&mut guard)
        });

        let result = tokio::select! {
            biased;
            joined = task => joined.map_err(RepoError::from).and_then(|result| result),
            _ = self.cancel.cancelled() => Err(on_cancel.error()),
        };

        let duration_ms = started_at.elapsed().as_millis();
        match &result {
            Ok(_) => debug!(
                "event={event} module=session status=ok {detail} duration_ms={duration_ms}"
            ),
            Err(RepoError::Cancelled) | Err(RepoError::CommitOutcomeUnknown) => warn!(
                "event={event} module=session status=cancelled {detail} duration_ms={duration_ms}"
            ),
            Err(err) => error!(
                "event={event} module=session status=error {detail} duration_ms={duration_ms} error={err}"
            ),
        }
        result
    }

    fn track_all(&self, query: &Query, records: &[Record]) {
        if !query.is_tracking() {
            return;
        }
        let mut tracker = self.tracker();
        for record in records {
            tracker.track(query.descriptor(), record);
        }
    }
}

#[async_trait]
impl PersistenceSession for SqliteSession {
    async fn fetch(&self, query: &Query) -> RepoResult<Vec<Record>> {
        let owned = query.clone();
        let records = self
            .run_blocking(
                "session_fetch",
                format!("entity={}", query.descriptor().name),
                OnCancel::Abort,
                move |conn| load_records(conn, &owned),
            )
            .await?;
        self.track_all(query, &records);
        Ok(records)
    }

    async fn count(&self, query: &Query) -> RepoResult<u64> {
        let owned = query.clone();
        self.run_blocking(
            "session_count",
            format!("entity={}", query.descriptor().name),
            OnCancel::Abort,
            move |conn| count_rows(conn, &owned),
        )
        .await
    }

    async fn exists(&self, query: &Query) -> RepoResult<bool> {
        let owned = query.clone();
        self.run_blocking(
            "session_exists",
            format!("entity={}", query.descriptor().name),
            OnCancel::Abort,
            move |conn| {
                let (sql, params) = owned.exists_sql();
                let found: i64 =
                    conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
                Ok(found != 0)
            },
        )
        .await
    }

    async fn fetch_page(&self, query: &Query) -> RepoResult<(Vec<Record>, u64)> {
        let owned = query.clone();
        let (records, total) = self
            .run_blocking(
                "session_fetch_page",
                format!("entity={}", query.descriptor().name),
                OnCancel::Abort,
                move |conn| {
                    let snapshot = conn.savepoint_with_name(READ_SAVEPOINT)?;
                    let total = count_rows(&snapshot, &owned)?;
                    let records = load_records(&snapshot, &owned)?;
                    snapshot.commit()?;
                    Ok((records, total))
                },
            )
            .await?;
        self.track_all(query, &records);
        Ok((records, total))
    }

    fn stage(&self, change: PendingChange) {
        self.tracker().stage(change);
    }

    fn take_pending(&self) -> Vec<PendingChange> {
        self.tracker().take_pending()
    }

    fn restore_pending(&self, changes: Vec<PendingChange>) {
        self.tracker().restore_pending(changes);
    }

    fn pending_count(&self) -> usize {
        self.tracker().pending_count()
    }

    fn discard_pending(&self) -> usize {
        self.tracker().discard_pending()
    }

    async fn flush(&self, changes: &[PendingChange]) -> RepoResult<usize> {
        if changes.is_empty() {
            return Ok(0);
        }
        let on_cancel = self.flush_on_cancel();
        let owned = changes.to_vec();
        let written = self
            .run_blocking(
                "session_flush",
                format!("changes={}", changes.len()),
                on_cancel,
                move |conn| flush_changes(conn, &owned),
            )
            .await?;

        let mut tracker = self.tracker();
        for change in changes {
            tracker.forget(change.descriptor, change.key());
        }
        Ok(written)
    }

    async fn begin(&self) -> RepoResult<()> {
        let flag = Arc::clone(&self.in_transaction);
        self.run_blocking(
            "session_begin",
            "scope=transaction".to_string(),
            OnCancel::Abort,
            move |conn| {
                conn.execute_batch("BEGIN IMMEDIATE;")?;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
    }

    async fn commit(&self) -> RepoResult<()> {
        let flag = Arc::clone(&self.in_transaction);
        self.run_blocking(
            "session_commit",
            "scope=transaction".to_string(),
            OnCancel::OutcomeUnknown,
            move |conn| {
                conn.execute_batch("COMMIT;")?;
                flag.store(false, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
    }

    async fn rollback(&self) -> RepoResult<()> {
        let started_at = Instant::now();
        let conn = Arc::clone(&self.conn);
        let flag = Arc::clone(&self.in_transaction);
        let result = tokio::task::spawn_blocking(move || rollback_on(&conn, &flag))
            .await
            .map_err(RepoError::from)
            .and_then(|result| result);
        log_rollback(&result, started_at);
        result
    }

    fn rollback_blocking(&self) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = rollback_on(&self.conn, &self.in_transaction);
        log_rollback(&result, started_at);
        result
    }

    fn changed_columns(
        &self,
        descriptor: &'static EntityDescriptor,
        record: &Record,
    ) -> Option<Vec<&'static str>> {
        self.tracker().changed_columns(descriptor, record)
    }

    fn tracked_count(&self) -> usize {
        self.tracker().tracked_count()
    }

    async fn verify_schema(&self, descriptor: &'static EntityDescriptor) -> RepoResult<()> {
        self.run_blocking(
            "session_verify_schema",
            format!("entity={}", descriptor.name),
            OnCancel::Abort,
            move |conn| {
                let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\");", descriptor.table))?;
                let present = stmt
                    .query_map([], |row| row.get::<_, String>(1))?
                    .collect::<Result<HashSet<_>, _>>()?;
                if present.is_empty() {
                    return Err(RepoError::MissingRequiredTable(descriptor.table));
                }
                for column in descriptor.persisted_columns() {
                    if !present.contains(column.name) {
                        return Err(RepoError::MissingRequiredColumn {
                            table: descriptor.table,
                            column: column.name,
                        });
                    }
                }
                Ok(())
            },
        )
        .await
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

fn log_rollback(result: &RepoResult<()>, started_at: Instant) {
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(()) => info!("event=session_rollback module=session status=ok duration_ms={duration_ms}"),
        Err(err) => error!(
            "event=session_rollback module=session status=error duration_ms={duration_ms} error={err}"
        ),
    }
}

fn rollback_on(conn: &Mutex<Connection>, flag: &AtomicBool) -> RepoResult<()> {
    let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
    if !guard.is_autocommit() {
        guard.execute_batch("ROLLBACK;")?;
    }
    flag.store(false, Ordering::SeqCst);
    Ok(())
}

fn count_rows(conn: &Connection, query: &Query) -> RepoResult<u64> {
    let (sql, params) = query.count_sql();
    let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
    u64::try_from(count)
        .map_err(|_| RepoError::InvalidData(format!("negative row count `{count}`")))
}

fn load_records(conn: &Connection, query: &Query) -> RepoResult<Vec<Record>> {
    let descriptor = query.descriptor();
    let (sql, params) = query.select_sql();
    let mut records = select_records(conn, descriptor, &sql, &params)?;
    load_includes(
        conn,
        descriptor,
        query.includes().roots(),
        query.excludes_deleted(),
        &mut records,
    )?;
    Ok(records)
}

fn select_records(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    sql: &str,
    params: &[SqlValue],
) -> RepoResult<Vec<Record>> {
    let columns = descriptor.persisted_columns();
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (index, column) in columns.iter().enumerate() {
            let value = sql_to_json(descriptor.table, *column, row.get_ref(index)?)?;
            record.insert(column.name.to_string(), value);
        }
        records.push(record);
    }
    Ok(records)
}

fn load_includes(
    conn: &Connection,
    descriptor: &EntityDescriptor,
    nodes: &[IncludeNode],
    exclude_deleted: bool,
    records: &mut [Record],
) -> RepoResult<()> {
    if records.is_empty() {
        return Ok(());
    }

    for node in nodes {
        let navigation = node.navigation;
        let target = navigation.target_descriptor();
        match navigation.kind {
            NavigationKind::Collection { foreign_key } => {
                let owners = distinct_values(records, descriptor.key.name);
                let foreign_column = target.require_column(foreign_key)?;
                let mut children =
                    fetch_related(conn, target, foreign_column, &owners, exclude_deleted)?;
                load_includes(conn, target, &node.children, exclude_deleted, &mut children)?;

                let mut by_owner: HashMap<String, Vec<JsonValue>> = HashMap::new();
                for child in children {
                    let owner = value_key(child.get(foreign_key).unwrap_or(&JsonValue::Null));
                    by_owner
                        .entry(owner)
                        .or_default()
                        .push(JsonValue::Object(child));
                }
                for record in records.iter_mut() {
                    let key = value_key(record.get(descriptor.key.name).unwrap_or(&JsonValue::Null));
                    let items = by_owner.remove(&key).unwrap_or_default();
                    record.insert(navigation.name.to_string(), JsonValue::Array(items));
                }
            }
            NavigationKind::Reference { foreign_key } => {
                let referenced = distinct_values(records, foreign_key);
                let mut targets =
                    fetch_related(conn, target, target.key, &referenced, exclude_deleted)?;
                load_includes(conn, target, &node.children, exclude_deleted, &mut targets)?;

                let by_key: HashMap<String, Record> = targets
                    .into_iter()
                    .map(|row| {
                        let key = value_key(row.get(target.key.name).unwrap_or(&JsonValue::Null));
                        (key, row)
                    })
                    .collect();
                for record in records.iter_mut() {
                    let loaded = record
                        .get(foreign_key)
                        .filter(|value| !value.is_null())
                        .and_then(|value| by_key.get(&value_key(value)))
                        .cloned()
                        .map_or(JsonValue::Null, JsonValue::Object);
                    record.insert(navigation.name.to_string(), loaded);
                }
            }
        }
    }
    Ok(())
}

fn fetch_related(
    conn: &Connection,
    target: &'static EntityDescriptor,
    column: Column,
    values: &[JsonValue],
    exclude_deleted: bool,
) -> RepoResult<Vec<Record>> {
    let mut related = Vec::new();
    for batch in values.chunks(INCLUDE_BATCH_SIZE) {
        let mut query = Query::from_descriptor(target)
            .without_tracking()
            .filter_in(column, batch)?;
        if !exclude_deleted {
            query = query.with_deleted();
        }
        let (sql, params) = query.select_sql();
        related.extend(select_records(conn, target, &sql, &params)?);
    }
    Ok(related)
}

fn distinct_values(records: &[Record], column: &str) -> Vec<JsonValue> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.get(column))
        .filter(|value| !value.is_null())
        .filter(|value| seen.insert(value_key(value)))
        .cloned()
        .collect()
}

fn value_key(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn flush_changes(conn: &mut Connection, changes: &[PendingChange]) -> RepoResult<usize> {
    let checkpoint = conn.savepoint_with_name(CHECKPOINT_SAVEPOINT)?;
    let mut written = 0;
    for change in changes {
        written += match change.state {
            ChangeState::Insert => insert_row(&checkpoint, change)?,
            ChangeState::Update => update_row(&checkpoint, change)?,
            ChangeState::Delete => delete_row(&checkpoint, change)?,
        };
    }
    checkpoint.commit()?;
    Ok(written)
}

fn bind(change: &PendingChange, column: Column) -> RepoResult<SqlValue> {
    let value = change.record.get(column.name).unwrap_or(&JsonValue::Null);
    let bound = json_to_sql(change.descriptor.table, column, value)?;
    let zero_default = (column == ROW_VERSION && change.descriptor.version_column().is_some())
        || (column == IS_DELETED && change.descriptor.is_soft_deletable());
    if bound == SqlValue::Null && zero_default {
        return Ok(SqlValue::Integer(0));
    }
    Ok(bound)
}

fn insert_row(conn: &Connection, change: &PendingChange) -> RepoResult<usize> {
    let descriptor = change.descriptor;
    let columns = descriptor.persisted_columns();
    let mut names = Vec::with_capacity(columns.len());
    let mut params = Vec::with_capacity(columns.len());
    for column in columns {
        names.push(format!("\"{}\"", column.name));
        params.push(bind(change, column)?);
    }
    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({placeholders})",
        descriptor.table,
        names.join(", ")
    );
    Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
}

fn update_row(conn: &Connection, change: &PendingChange) -> RepoResult<usize> {
    let descriptor = change.descriptor;
    let key = descriptor.key;
    let version = descriptor.version_column();

    let mut assignments = Vec::new();
    let mut params = Vec::new();
    for column in descriptor.persisted_columns() {
        let in_scope = match &change.scope {
            ColumnScope::All => true,
            ColumnScope::Only(names) => names.contains(&column.name),
        };
        if !in_scope || column == key || Some(column) == version || change.is_protected(column.name)
        {
            continue;
        }
        assignments.push(format!("\"{}\" = ?", column.name));
        params.push(bind(change, column)?);
    }
    if let Some(version) = version {
        assignments.push(format!("\"{0}\" = \"{0}\" + 1", version.name));
    }
    if assignments.is_empty() {
        return Ok(0);
    }

    let mut sql = format!(
        "UPDATE \"{}\" SET {} WHERE \"{}\" = ?",
        descriptor.table,
        assignments.join(", "),
        key.name
    );
    params.push(bind(change, key)?);
    if let Some(version) = version {
        sql.push_str(&format!(" AND \"{}\" = ?", version.name));
        params.push(bind(change, version)?);
    }
    if change.origin == ChangeState::Delete && descriptor.is_soft_deletable() {
        sql.push_str(&format!(" AND \"{}\" = 0", IS_DELETED.name));
    }

    match conn.execute(&sql, params_from_iter(params.iter()))? {
        0 => resolve_unmatched(conn, change),
        affected => Ok(affected),
    }
}

fn delete_row(conn: &Connection, change: &PendingChange) -> RepoResult<usize> {
    let descriptor = change.descriptor;
    let mut sql = format!(
        "DELETE FROM \"{}\" WHERE \"{}\" = ?",
        descriptor.table, descriptor.key.name
    );
    let mut params = vec![bind(change, descriptor.key)?];
    if let Some(version) = descriptor.version_column() {
        sql.push_str(&format!(" AND \"{}\" = ?", version.name));
        params.push(bind(change, version)?);
    }

    match conn.execute(&sql, params_from_iter(params.iter()))? {
        0 => resolve_unmatched(conn, change),
        affected => Ok(affected),
    }
}

/// Classifies a write that matched no row.
fn resolve_unmatched(conn: &Connection, change: &PendingChange) -> RepoResult<usize> {
    let descriptor = change.descriptor;
    if change.origin == ChangeState::Delete && descriptor.is_soft_deletable() {
        let sql = format!(
            "SELECT \"{}\" FROM \"{}\" WHERE \"{}\" = ?",
            IS_DELETED.name, descriptor.table, descriptor.key.name
        );
        let deleted: Option<bool> = conn
            .query_row(&sql, [bind(change, descriptor.key)?], |row| row.get(0))
            .optional()?;
        if deleted == Some(true) {
            debug!(
                "event=session_soft_delete module=session status=skipped reason=already_deleted entity={}",
                descriptor.name
            );
            return Ok(0);
        }
    }

    if descriptor.version_column().is_some() {
        Err(RepoError::Concurrency {
            entity: descriptor.name,
            key: change.key_text(),
        })
    } else {
        Err(RepoError::NotFound {
            entity: descriptor.name,
            key: change.key_text(),
        })
    }
}
