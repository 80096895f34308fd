//! Landing loader: append batches to raw, then upsert lineage by natural key.
//!
//! Each batch is landed in two transactions. The first appends every row
//! verbatim to `<entity>_raw` and records the file in `batch_log`; the second,
//! started only after the first commits, upserts the keyed projection into
//! `<entity>_lineage`. Rows whose natural-key fields are missing are kept out
//! of lineage and reported; the remaining rows are upserted all-or-nothing.

use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::null_fill::{fill_nulls, lineage_history, ImputationReport};
use super::{RunContext, Stage, StageResult};
use crate::batch::{self, Batch};
use crate::domain::{DatasetSpec, Entity};
use crate::error::{PipelineError, Result};
use crate::metrics::core::time_stage;
use crate::metrics::{phase_metric, LandingMetrics};
use crate::store::{record_batch, BatchLogEntry, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    pub source_path: String,
    /// Zero-based data row index within the batch file.
    pub row_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LandingReport {
    pub entity: Entity,
    pub batches: usize,
    pub replays: usize,
    pub rows_landed: usize,
    pub lineage_upserts: usize,
    pub rejected: Vec<RejectedRow>,
    pub imputation: ImputationReport,
}

impl LandingReport {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            batches: 0,
            replays: 0,
            rows_landed: 0,
            lineage_upserts: 0,
            rejected: Vec::new(),
            imputation: ImputationReport::default(),
        }
    }

    fn merge(&mut self, other: LandingReport) {
        self.batches += other.batches;
        self.replays += other.replays;
        self.rows_landed += other.rows_landed;
        self.lineage_upserts += other.lineage_upserts;
        self.rejected.extend(other.rejected);
        self.imputation.columns.extend(other.imputation.columns);
    }
}

fn to_value(v: &Option<String>) -> Value {
    match v {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

fn raw_insert_sql(spec: &DatasetSpec) -> String {
    let columns = spec.column_names();
    let placeholders: Vec<String> = (1..=columns.len() + 2).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} (run_id, insert_datetime, {}) VALUES ({})",
        spec.raw_table(),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn lineage_upsert_sql(spec: &DatasetSpec) -> String {
    let columns = spec.column_names();
    let placeholders: Vec<String> = (1..=columns.len() + 3).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !spec.is_key(c))
        .chain(["raw_id", "run_id", "insert_datetime"].iter())
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    format!(
        "INSERT INTO {table} ({cols}, raw_id, run_id, insert_datetime) VALUES ({vals}) \
         ON CONFLICT ({key}) DO UPDATE SET {updates}",
        table = spec.lineage_table(),
        cols = columns.join(", "),
        vals = placeholders.join(", "),
        key = spec.key.join(", "),
        updates = updates.join(", ")
    )
}

/// Land one batch. Imputation (for grouped datasets) runs before the raw
/// append so filled companions are stored alongside the raw values.
pub fn land_batch(
    store: &mut Store,
    spec: &DatasetSpec,
    batch: &mut Batch,
    run_id: &str,
    landed_at: &str,
) -> Result<LandingReport> {
    let mut report = LandingReport::new(spec.entity);
    report.batches = 1;

    let history = lineage_history(store.conn(), spec, &batch.rows)?;
    report.imputation = fill_nulls(spec, &mut batch.rows, &history);

    let mut accepted: Vec<(usize, Vec<String>)> = Vec::with_capacity(batch.rows.len());
    for (idx, row) in batch.rows.iter().enumerate() {
        match row.natural_key(spec) {
            Ok(key) => accepted.push((idx, key)),
            Err(column) => report.rejected.push(RejectedRow {
                source_path: batch.source_path.clone(),
                row_index: idx,
                reason: format!("natural-key field '{column}' is missing"),
            }),
        }
    }

    // Transaction 1: raw append and batch log.
    let raw_table = spec.raw_table();
    let mut raw_ids = Vec::with_capacity(batch.rows.len());
    let tx = store
        .conn_mut()
        .transaction()
        .map_err(|e| PipelineError::from_sqlite(e, &raw_table, "-"))?;
    {
        let mut stmt = tx.prepare(&raw_insert_sql(spec))?;
        for row in &batch.rows {
            let params = [Value::Text(run_id.to_string()), Value::Text(landed_at.to_string())]
                .into_iter()
                .chain(row.values.iter().map(to_value));
            stmt.execute(params_from_iter(params))
                .map_err(|e| PipelineError::from_sqlite(e, &raw_table, "-"))?;
            raw_ids.push(tx.last_insert_rowid());
        }
    }
    let replay = record_batch(
        &tx,
        &BatchLogEntry {
            run_id,
            entity: spec.entity,
            source_path: &batch.source_path,
            fingerprint: &batch.fingerprint,
            row_count: batch.rows.len(),
            rejected: report.rejected.len(),
        },
    )?;
    tx.commit()?;
    report.rows_landed = batch.rows.len();
    if replay {
        report.replays = 1;
        info!(path = %batch.source_path, fingerprint = %batch.fingerprint, "batch content was landed before");
    }

    // Transaction 2: lineage upsert, all-or-nothing.
    let lineage_table = spec.lineage_table();
    let tx = store.conn_mut().transaction()?;
    {
        let mut stmt = tx.prepare(&lineage_upsert_sql(spec))?;
        let key_idx = spec.key_indices();
        for (idx, key) in &accepted {
            let row = &batch.rows[*idx];
            let mut params: Vec<Value> = row.values.iter().map(to_value).collect();
            for (pos, k) in key_idx.iter().zip(key) {
                params[*pos] = Value::Text(k.clone());
            }
            params.push(Value::Integer(raw_ids[*idx]));
            params.push(Value::Text(run_id.to_string()));
            params.push(Value::Text(landed_at.to_string()));
            stmt.execute(params_from_iter(params))
                .map_err(|e| PipelineError::from_sqlite(e, &lineage_table, &key.join("|")))?;
        }
    }
    tx.commit()?;
    report.lineage_upserts = accepted.len();

    for rejected in &report.rejected {
        warn!(
            entity = %spec.entity,
            path = %rejected.source_path,
            row = rejected.row_index,
            reason = %rejected.reason,
            "row rejected from lineage"
        );
    }
    debug!(
        entity = %spec.entity,
        rows = report.rows_landed,
        upserts = report.lineage_upserts,
        "batch landed"
    );
    Ok(report)
}

/// Locates, reads and lands every batch file of the run date.
pub struct LandStage;

impl Stage for LandStage {
    fn name(&self) -> &'static str {
        "land"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }

    fn execute(&self, entity: Entity, store: &mut Store, ctx: &RunContext<'_>) -> Result<StageResult> {
        let _timing = time_stage(phase_metric!(histogram, "landing", "duration_seconds"), entity.as_str());
        let spec = entity.spec();
        let root = ctx.settings.entity_root(entity);
        let files = batch::locate(entity, &root, ctx.run_date)?;

        let mut report = LandingReport::new(entity);
        for file in &files {
            let mut batch = batch::read_batch(spec, file)?;
            if batch.rows.is_empty() {
                warn!(entity = %entity, path = %batch.source_path, "batch file holds no data rows");
                continue;
            }
            let landed = land_batch(store, spec, &mut batch, &ctx.run_id, &ctx.landed_at())?;
            LandingMetrics::record_batch(entity.as_str(), landed.rows_landed, landed.replays > 0);
            report.merge(landed);
        }
        if report.batches == 0 {
            return Err(PipelineError::EmptyBatch {
                entity: entity.to_string(),
                path: files
                    .first()
                    .map(|f| f.path.display().to_string())
                    .unwrap_or_default(),
            });
        }
        LandingMetrics::record_lineage_upserts(entity.as_str(), report.lineage_upserts);
        LandingMetrics::record_rejected(entity.as_str(), report.rejected.len());
        LandingMetrics::record_imputed(entity.as_str(), report.imputation.total_filled());

        let message = format!(
            "landed {} rows from {} file(s), {} lineage upserts, {} rejected",
            report.rows_landed,
            report.batches,
            report.lineage_upserts,
            report.rejected.len()
        );
        Ok(
            StageResult::with_rejections(report.rows_landed, report.rejected.len(), message)
                .with_metadata("batches", report.batches)
                .with_metadata("replays", report.replays)
                .with_metadata("lineage_upserts", report.lineage_upserts)
                .with_metadata("imputed_cells", report.imputation.total_filled()),
        )
    }
}
