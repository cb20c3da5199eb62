//! Schema migration registry and executor.
//!
//! # Responsibility
//! - Accept the application's schema migrations as an ordered static list.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - `version` values must increase strictly; out-of-order lists are rejected
//!   before any SQL runs.
//! - Applied migration version is mirrored to `PRAGMA user_version`.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// One schema step. Entity tables are owned by the application, so the list
/// is supplied by the caller instead of being embedded in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(version: u32, sql: &'static str) -> Self {
        Self { version, sql }
    }
}

/// Returns the latest migration version in `migrations`.
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection, migrations: &[Migration]) -> DbResult<()> {
    check_order(migrations)?;

    let current_version = current_user_version(conn)?;
    let latest = latest_version(migrations);

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in migrations {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={}",
        current_version, latest
    );
    Ok(())
}

/// Reads the schema version recorded on the connection.
pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

fn check_order(migrations: &[Migration]) -> DbResult<()> {
    for pair in migrations.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(DbError::InvalidMigrationOrder {
                previous: pair[0].version,
                next: pair[1].version,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, current_user_version, latest_version, Migration};
    use crate::db::DbError;
    use rusqlite::Connection;

    const STEPS: &[Migration] = &[
        Migration::new(1, "CREATE TABLE widgets (id INTEGER PRIMARY KEY NOT NULL);"),
        Migration::new(2, "ALTER TABLE widgets ADD COLUMN label TEXT;"),
    ];

    #[test]
    fn applies_all_steps_and_records_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn, STEPS).unwrap();
        assert_eq!(current_user_version(&conn).unwrap(), latest_version(STEPS));

        conn.execute("INSERT INTO widgets (id, label) VALUES (1, 'a');", [])
            .unwrap();
    }

    #[test]
    fn reapplying_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn, STEPS).unwrap();
        apply_migrations(&mut conn, STEPS).unwrap();
        assert_eq!(current_user_version(&conn).unwrap(), 2);
    }

    #[test]
    fn rejects_newer_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA user_version = 9;").unwrap();
        let err = apply_migrations(&mut conn, STEPS).unwrap_err();
        assert!(matches!(
            err,
            DbError::UnsupportedSchemaVersion {
                db_version: 9,
                latest_supported: 2
            }
        ));
    }

    #[test]
    fn rejects_out_of_order_registry() {
        let unordered = [Migration::new(2, "SELECT 1;"), Migration::new(1, "SELECT 1;")];
        let mut conn = Connection::open_in_memory().unwrap();
        let err = apply_migrations(&mut conn, &unordered).unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidMigrationOrder {
                previous: 2,
                next: 1
            }
        ));
    }
}
