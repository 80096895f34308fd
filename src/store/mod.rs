//! SQLite-backed layer store.

pub mod migrations;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{DatasetSpec, Entity};
use crate::error::{PipelineError, Result};

/// Row counts of every layer for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerCounts {
    pub entity: String,
    pub raw: i64,
    pub lineage: i64,
    pub ranked: i64,
    pub clean: i64,
    pub silver: i64,
}

/// One landed batch file.
#[derive(Debug, Clone)]
pub struct BatchLogEntry<'a> {
    pub run_id: &'a str,
    pub entity: Entity,
    pub source_path: &'a str,
    pub fingerprint: &'a str,
    pub row_count: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunLogEntry {
    pub run_id: String,
    pub run_date: String,
    pub started_at: String,
    pub finished_at: String,
    pub succeeded: i64,
    pub skipped: i64,
    pub failed: i64,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the store at `path` and verify it answers queries.
    /// Any failure here means the store is unreachable.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let unreachable = |message: String| PipelineError::Connectivity { message };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| unreachable(format!("cannot create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| unreachable(format!("cannot open {}: {e}", path.display())))?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
            .map_err(|e| unreachable(e.to_string()))?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| unreachable(format!("{}: {e}", path.display())))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(journal_mode = %mode, "store is not in WAL mode");
        }

        let store = Self { conn };
        store.ping()?;
        info!(path = %path.display(), "store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| PipelineError::Connectivity {
            message: e.to_string(),
        })?;
        Ok(Self { conn })
    }

    /// Cheap connectivity check. Any failure here is fatal for a run.
    pub fn ping(&self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| PipelineError::Connectivity {
                message: e.to_string(),
            })
    }

    pub fn migrate(&mut self) -> Result<usize> {
        migrations::apply_pending(&mut self.conn)
    }

    pub fn schema_version(&self) -> Result<u32> {
        migrations::current_version(&self.conn)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn table_count(&self, table: &str) -> Result<i64> {
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn layer_counts(&self, spec: &DatasetSpec) -> Result<LayerCounts> {
        Ok(LayerCounts {
            entity: spec.entity.to_string(),
            raw: self.table_count(&spec.raw_table())?,
            lineage: self.table_count(&spec.lineage_table())?,
            ranked: self.table_count(&spec.ranked_table())?,
            clean: self.table_count(&spec.clean_view())?,
            silver: self.table_count(&spec.silver_table())?,
        })
    }

    pub fn record_run(&self, entry: &RunLogEntry, report_json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO run_log (run_id, run_date, started_at, finished_at, succeeded, skipped, failed, report)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(run_id) DO UPDATE SET
                finished_at = excluded.finished_at,
                succeeded = excluded.succeeded,
                skipped = excluded.skipped,
                failed = excluded.failed,
                report = excluded.report",
            params![
                entry.run_id,
                entry.run_date,
                entry.started_at,
                entry.finished_at,
                entry.succeeded,
                entry.skipped,
                entry.failed,
                report_json
            ],
        )?;
        Ok(())
    }

    pub fn last_run(&self) -> Result<Option<RunLogEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT run_id, run_date, started_at, finished_at, succeeded, skipped, failed
                 FROM run_log ORDER BY finished_at DESC LIMIT 1",
                [],
                |row| {
                    Ok(RunLogEntry {
                        run_id: row.get(0)?,
                        run_date: row.get(1)?,
                        started_at: row.get(2)?,
                        finished_at: row.get(3)?,
                        succeeded: row.get(4)?,
                        skipped: row.get(5)?,
                        failed: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }
}

/// Record a landed batch on `conn` (usually the landing transaction).
///
/// Returns `true` when the same file content was already landed for this
/// entity, i.e. the batch is a replay.
pub fn record_batch(conn: &Connection, entry: &BatchLogEntry<'_>) -> Result<bool> {
    let seen: i64 = conn.query_row(
        "SELECT COUNT(*) FROM batch_log WHERE entity = ?1 AND fingerprint = ?2",
        params![entry.entity.as_str(), entry.fingerprint],
        |row| row.get(0),
    )?;
    let replay = seen > 0;
    conn.execute(
        "INSERT INTO batch_log (run_id, entity, source_path, fingerprint, row_count, rejected, replay, landed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            entry.run_id,
            entry.entity.as_str(),
            entry.source_path,
            entry.fingerprint,
            entry.row_count as i64,
            entry.rejected as i64,
            replay,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::OHLCV;

    fn migrated() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn fresh_store_has_empty_layers() {
        let store = migrated();
        let counts = store.layer_counts(&OHLCV).unwrap();
        assert_eq!(counts.entity, "ohlcv");
        assert_eq!(counts.raw + counts.lineage + counts.ranked + counts.silver, 0);
    }

    #[test]
    fn second_landing_of_same_file_is_a_replay() {
        let store = migrated();
        let entry = BatchLogEntry {
            run_id: "r1",
            entity: Entity::Ohlcv,
            source_path: "landing/ohlcv/AAPL/2024/Jan/02/a.csv",
            fingerprint: "abc",
            row_count: 3,
            rejected: 0,
        };
        assert!(!record_batch(store.conn(), &entry).unwrap());
        assert!(record_batch(store.conn(), &entry).unwrap());

        let other = BatchLogEntry {
            entity: Entity::ExchangeRate,
            ..entry
        };
        assert!(!record_batch(store.conn(), &other).unwrap());
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("finlayer.db");
        let mut store = Store::open(&path, 1_000).unwrap();
        store.migrate().unwrap();
        assert!(path.exists());
        assert_eq!(store.schema_version().unwrap(), 6);
    }

    #[test]
    fn unopenable_path_is_a_connectivity_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let err = Store::open(blocker.join("finlayer.db"), 100).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn last_run_returns_latest_entry() {
        let store = migrated();
        assert!(store.last_run().unwrap().is_none());
        let entry = RunLogEntry {
            run_id: "r1".into(),
            run_date: "2024-01-02".into(),
            started_at: "2024-01-02T10:00:00+00:00".into(),
            finished_at: "2024-01-02T10:00:05+00:00".into(),
            succeeded: 3,
            skipped: 1,
            failed: 0,
        };
        store.record_run(&entry, "{}").unwrap();
        let last = store.last_run().unwrap().unwrap();
        assert_eq!(last.run_id, "r1");
        assert_eq!(last.skipped, 1);
    }
}
