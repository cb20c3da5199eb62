//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by session behavior.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied.

use super::migrations::{apply_migrations, Migration};
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Connection-level settings applied during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(
    path: impl AsRef<Path>,
    migrations: &[Migration],
    options: &StoreOptions,
) -> DbResult<Connection> {
    open_with("file", migrations, options, || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies all pending migrations.
///
/// Every call yields an independent database; use [`open_db`] when more than
/// one unit of work must observe the same data.
pub fn open_db_in_memory(migrations: &[Migration], options: &StoreOptions) -> DbResult<Connection> {
    open_with("memory", migrations, options, Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    migrations: &[Migration],
    options: &StoreOptions,
    opener: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match opener() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, migrations, options) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    migrations: &[Migration],
    options: &StoreOptions,
) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(options.busy_timeout)?;
    apply_migrations(conn, migrations)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{open_db, open_db_in_memory, StoreOptions};
    use crate::db::migrations::Migration;

    const SCHEMA: &[Migration] = &[Migration::new(
        1,
        "CREATE TABLE parents (id INTEGER PRIMARY KEY NOT NULL);
         CREATE TABLE children (
            id INTEGER PRIMARY KEY NOT NULL,
            parent_id INTEGER NOT NULL REFERENCES parents(id)
         );",
    )];

    #[test]
    fn in_memory_connection_enforces_foreign_keys() {
        let conn = open_db_in_memory(SCHEMA, &StoreOptions::default()).unwrap();
        let result = conn.execute("INSERT INTO children (id, parent_id) VALUES (1, 99);", []);
        assert!(result.is_err());
    }

    #[test]
    fn file_connection_applies_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");
        let conn = open_db(&path, SCHEMA, &StoreOptions::default()).unwrap();
        conn.execute("INSERT INTO parents (id) VALUES (1);", []).unwrap();
        drop(conn);

        let reopened = open_db(&path, SCHEMA, &StoreOptions::default()).unwrap();
        let count: i64 = reopened
            .query_row("SELECT COUNT(*) FROM parents;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
