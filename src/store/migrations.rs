//! Versioned schema migrations embedded in the binary.
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_migrations`. Versions already recorded are skipped, so replaying
//! `migrate` against an up-to-date store is a no-op.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "batch_log",
        sql: include_str!("../../migrations/0001_batch_log.sql"),
    },
    Migration {
        version: 2,
        name: "bronze",
        sql: include_str!("../../migrations/0002_bronze.sql"),
    },
    Migration {
        version: 3,
        name: "ranked",
        sql: include_str!("../../migrations/0003_ranked.sql"),
    },
    Migration {
        version: 4,
        name: "silver",
        sql: include_str!("../../migrations/0004_silver.sql"),
    },
    Migration {
        version: 5,
        name: "run_log",
        sql: include_str!("../../migrations/0005_run_log.sql"),
    },
    Migration {
        version: 6,
        name: "raw_run_index",
        sql: include_str!("../../migrations/0006_raw_run_index.sql"),
    },
];

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// Highest applied version, 0 for an empty store.
pub fn current_version(conn: &Connection) -> Result<u32> {
    ensure_migrations_table(conn)?;
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Apply every pending migration in version order. Returns how many ran.
pub fn apply_pending(conn: &mut Connection) -> Result<usize> {
    ensure_migrations_table(conn)?;
    let mut applied = 0usize;

    for migration in MIGRATIONS {
        let seen: Option<u32> = conn
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;
        if seen.is_some() {
            debug!(version = migration.version, "migration already applied");
            continue;
        }

        let fail = |e: rusqlite::Error| PipelineError::Migration {
            version: migration.version,
            message: e.to_string(),
        };
        let tx = conn.transaction().map_err(fail)?;
        tx.execute_batch(migration.sql).map_err(fail)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                migration.name,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(fail)?;
        tx.commit().map_err(fail)?;

        info!(version = migration.version, name = migration.name, "migration applied");
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_increasing() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn replaying_migrations_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply_pending(&mut conn).unwrap(), MIGRATIONS.len());
        assert_eq!(apply_pending(&mut conn).unwrap(), 0);
        assert_eq!(current_version(&conn).unwrap(), 6);
    }

    #[test]
    fn failed_migration_leaves_no_trace() {
        let mut conn = Connection::open_in_memory().unwrap();
        // Occupy a name the first migration creates.
        conn.execute_batch("CREATE TABLE batch_log (x INTEGER)").unwrap();
        let err = apply_pending(&mut conn).unwrap_err();
        assert!(matches!(err, PipelineError::Migration { version: 1, .. }));
        assert_eq!(current_version(&conn).unwrap(), 0);
    }
}
