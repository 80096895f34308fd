//! Rank deduplicator.
//!
//! Rebuilds `<entity>_ranked` from every raw row in one transaction. Rows are
//! partitioned by their canonical natural key (text trimmed, ISO dates reduced
//! to `YYYY-MM-DD`) and numbered by raw identity, so the first-seen row of each
//! key gets rank 1. The assignment depends only on stored identities and keys,
//! which makes re-ranking deterministic.
//!
//! Accumulating datasets rank their whole raw history. Datasets promoted by
//! full replacement are point-in-time, so only the current run's raw rows are
//! ranked and the clean set is exactly what this run delivered.

use rusqlite::types::Value;
use serde::Serialize;
use tracing::debug;

use super::{RunContext, Stage, StageResult};
use crate::domain::{ColumnKind, ColumnSpec, DatasetSpec, Entity, PromotionMode, RankedRow};
use crate::error::{PipelineError, Result};
use crate::metrics::core::time_stage;
use crate::metrics::{phase_metric, DedupMetrics};
use crate::store::Store;

/// Which raw rows take part in a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankScope<'a> {
    /// Every raw row ever landed.
    History,
    /// Only the rows landed by one run.
    Run(&'a str),
}

impl<'a> RankScope<'a> {
    pub fn for_mode(mode: PromotionMode, run_id: &'a str) -> Self {
        match mode {
            PromotionMode::AccumulateUpsert => RankScope::History,
            PromotionMode::FullReplace => RankScope::Run(run_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankReport {
    pub entity: Entity,
    pub ranked: usize,
    pub canonical: usize,
    pub duplicates: usize,
}

/// SQL expression producing the canonical form of a raw column.
fn canonical_expr(column: &ColumnSpec) -> String {
    let c = column.name;
    match column.kind {
        ColumnKind::Text => format!("TRIM({c})"),
        ColumnKind::Date => format!(
            "CASE WHEN TRIM({c}) GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*' \
             THEN COALESCE(DATE(TRIM({c})), TRIM({c})) ELSE TRIM({c}) END"
        ),
        ColumnKind::Real | ColumnKind::Integer => c.to_string(),
    }
}

fn rank_sql(spec: &DatasetSpec, scope: RankScope<'_>) -> String {
    let exprs: Vec<String> = spec.columns.iter().map(canonical_expr).collect();
    let key_exprs: Vec<String> = spec
        .key_indices()
        .into_iter()
        .map(|idx| exprs[idx].clone())
        .collect();
    // Rows without a complete key were rejected at landing and never rank.
    let mut key_present: Vec<String> = key_exprs
        .iter()
        .map(|e| format!("COALESCE({e}, '') <> ''"))
        .collect();
    if let RankScope::Run(_) = scope {
        key_present.push("run_id = ?1".to_string());
    }

    format!(
        "INSERT INTO {ranked} (raw_id, {cols}, rank_assigned) \
         SELECT id, {exprs}, ROW_NUMBER() OVER (PARTITION BY {keys} ORDER BY id) \
         FROM {raw} WHERE {present}",
        ranked = spec.ranked_table(),
        cols = spec.column_names().join(", "),
        exprs = exprs.join(", "),
        keys = key_exprs.join(", "),
        raw = spec.raw_table(),
        present = key_present.join(" AND ")
    )
}

/// Rank the whole raw history of `spec`.
pub fn rank(store: &mut Store, spec: &DatasetSpec) -> Result<RankReport> {
    rank_scoped(store, spec, RankScope::History)
}

pub fn rank_scoped(store: &mut Store, spec: &DatasetSpec, scope: RankScope<'_>) -> Result<RankReport> {
    let ranked_table = spec.ranked_table();
    let sql = rank_sql(spec, scope);
    let tx = store.conn_mut().transaction()?;
    tx.execute(&format!("DELETE FROM {ranked_table}"), [])?;
    let inserted = match scope {
        RankScope::History => tx.execute(&sql, []),
        RankScope::Run(run_id) => tx.execute(&sql, [run_id]),
    };
    let ranked = inserted.map_err(|e| PipelineError::from_sqlite(e, &ranked_table, "-"))?;
    let canonical: i64 = tx.query_row(
        &format!("SELECT COUNT(*) FROM {ranked_table} WHERE rank_assigned = 1"),
        [],
        |r| r.get(0),
    )?;
    tx.commit()?;

    let canonical = canonical as usize;
    let report = RankReport {
        entity: spec.entity,
        ranked,
        canonical,
        duplicates: ranked.saturating_sub(canonical),
    };
    debug!(entity = %spec.entity, ranked = report.ranked, canonical = report.canonical, "ranking rebuilt");
    Ok(report)
}

/// Every ranked row, ordered by raw identity.
pub fn ranked_rows(store: &Store, spec: &DatasetSpec) -> Result<Vec<RankedRow>> {
    let sql = format!(
        "SELECT raw_id, {}, rank_assigned FROM {} ORDER BY raw_id",
        spec.column_names().join(", "),
        spec.ranked_table()
    );
    let width = spec.columns.len();
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let values = (1..=width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(RankedRow {
                raw_id: row.get(0)?,
                values,
                rank: row.get(width + 1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub struct RankStage;

impl Stage for RankStage {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["land"]
    }

    fn execute(&self, entity: Entity, store: &mut Store, ctx: &RunContext<'_>) -> Result<StageResult> {
        let _timing = time_stage(phase_metric!(histogram, "dedup", "duration_seconds"), entity.as_str());
        let scope = RankScope::for_mode(ctx.settings.mode_for(entity), &ctx.run_id);
        let report = rank_scoped(store, entity.spec(), scope)?;
        DedupMetrics::record_ranking(entity.as_str(), report.canonical, report.duplicates);

        Ok(StageResult::success(
            report.ranked,
            format!(
                "ranked {} rows: {} canonical, {} duplicates",
                report.ranked, report.canonical, report.duplicates
            ),
        )
        .with_metadata("canonical", report.canonical)
        .with_metadata("duplicates", report.duplicates))
    }
}
