//! Schema-enforced promoter: clean rows into typed silver tables.
//!
//! Every clean row is converted into its [`SilverRecord`] before anything is
//! written, so a single violation aborts the table's promotion with the
//! offending key and leaves the silver table as it was. Writes happen in one
//! transaction per table.

use chrono::NaiveDate;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::Serialize;
use tracing::{debug, error};

use super::null_fill::refill_clean;
use super::{RunContext, Stage, StageResult};
use crate::domain::{
    CleanRow, CompanyProfile, DatasetSpec, Entity, ExchangeRate, MacroObservation, OhlcvBar,
    PromotionMode, SilverRecord,
};
use crate::error::{PipelineError, Result};
use crate::metrics::core::time_stage;
use crate::metrics::{phase_metric, PromotionMetrics};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub entity: Entity,
    pub mode: PromotionMode,
    pub clean_rows: usize,
    /// Silver rows inserted or changed by this promotion.
    pub rows_written: usize,
    pub silver_rows: i64,
}

/// Rank-1 rows of `spec`, ordered by raw identity.
pub fn clean_rows(store: &Store, spec: &DatasetSpec) -> Result<Vec<CleanRow>> {
    let sql = format!(
        "SELECT raw_id, {} FROM {} ORDER BY raw_id",
        spec.column_names().join(", "),
        spec.clean_view()
    );
    let width = spec.columns.len();
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let values = (1..=width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(CleanRow {
                raw_id: row.get(0)?,
                values,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn insert_sql<R: SilverRecord>(mode: PromotionMode) -> String {
    let spec = R::spec();
    let table = spec.silver_table();
    let placeholders: Vec<String> = (1..=R::COLUMNS.len()).map(|i| format!("?{i}")).collect();
    let insert = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        R::COLUMNS.join(", "),
        placeholders.join(", ")
    );
    match mode {
        PromotionMode::FullReplace => insert,
        PromotionMode::AccumulateUpsert => {
            let non_key: Vec<&str> = R::COLUMNS
                .iter()
                .copied()
                .filter(|c| !R::KEY.contains(c))
                .collect();
            let updates: Vec<String> = non_key.iter().map(|c| format!("{c} = excluded.{c}")).collect();
            // Only touch rows whose content changed, so replays keep insert_datetime.
            let changed: Vec<String> = non_key
                .iter()
                .filter(|c| **c != "insert_datetime")
                .map(|c| format!("{table}.{c} IS NOT excluded.{c}"))
                .collect();
            format!(
                "{insert} ON CONFLICT ({}) DO UPDATE SET {} WHERE {}",
                R::KEY.join(", "),
                updates.join(", "),
                changed.join(" OR ")
            )
        }
    }
}

/// Convert the clean set of `R`'s dataset and write it to silver.
pub fn promote_records<R: SilverRecord>(
    store: &mut Store,
    mode: PromotionMode,
    insert_date: NaiveDate,
) -> Result<PromotionReport> {
    let spec = R::spec();
    let table = spec.silver_table();
    let mut clean = clean_rows(store, spec)?;
    let refilled = refill_clean(store.conn(), spec, &mut clean)?;
    if refilled.total_filled() > 0 {
        debug!(table = %table, filled = refilled.total_filled(), "imputed values recomputed over the whole series");
    }

    let records = clean
        .iter()
        .map(|row| {
            R::from_clean(row, insert_date).map_err(|violation| PipelineError::Constraint {
                table: table.clone(),
                key: row.key_label(spec),
                reason: violation.to_string(),
            })
        })
        .collect::<Result<Vec<R>>>()?;

    let tx = store.conn_mut().transaction()?;
    if mode == PromotionMode::FullReplace {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }
    let mut rows_written = 0usize;
    {
        let mut stmt = tx.prepare(&insert_sql::<R>(mode))?;
        for record in &records {
            rows_written += stmt
                .execute(params_from_iter(record.to_params()))
                .map_err(|e| PipelineError::from_sqlite(e, &table, &record.natural_key()))?;
        }
    }
    tx.commit()?;

    let silver_rows = store.table_count(&table)?;
    debug!(table = %table, mode = %mode, written = rows_written, "promotion committed");
    Ok(PromotionReport {
        entity: R::ENTITY,
        mode,
        clean_rows: clean.len(),
        rows_written,
        silver_rows,
    })
}

pub fn promote(
    store: &mut Store,
    entity: Entity,
    mode: PromotionMode,
    insert_date: NaiveDate,
) -> Result<PromotionReport> {
    match entity {
        Entity::Ohlcv => promote_records::<OhlcvBar>(store, mode, insert_date),
        Entity::CompanyMeta => promote_records::<CompanyProfile>(store, mode, insert_date),
        Entity::Macro => promote_records::<MacroObservation>(store, mode, insert_date),
        Entity::ExchangeRate => promote_records::<ExchangeRate>(store, mode, insert_date),
    }
}

pub struct PromoteStage;

impl Stage for PromoteStage {
    fn name(&self) -> &'static str {
        "promote"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["rank"]
    }

    fn execute(&self, entity: Entity, store: &mut Store, ctx: &RunContext<'_>) -> Result<StageResult> {
        let _timing =
            time_stage(phase_metric!(histogram, "promotion", "duration_seconds"), entity.as_str());
        let mode = ctx.settings.mode_for(entity);
        let report = match promote(store, entity, mode, ctx.run_date) {
            Ok(report) => report,
            Err(e) => {
                if matches!(e, PipelineError::Constraint { .. }) {
                    PromotionMetrics::record_constraint_violation(entity.as_str());
                    error!(entity = %entity, error = %e, "promotion aborted, silver left unchanged");
                }
                return Err(e);
            }
        };
        PromotionMetrics::record_promoted(entity.as_str(), mode.as_str(), report.rows_written);
        PromotionMetrics::record_silver_size(entity.as_str(), report.silver_rows);

        Ok(StageResult::success(
            report.rows_written,
            format!(
                "{} promoted {} of {} clean rows, silver holds {}",
                report.mode, report.rows_written, report.clean_rows, report.silver_rows
            ),
        )
        .with_metadata("mode", report.mode)
        .with_metadata("silver_rows", report.silver_rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::domain::entity::{MACRO, OHLCV};
    use crate::domain::RawRow;
    use crate::pipeline::landing::land_batch;
    use crate::pipeline::rank::rank;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    }

    fn store() -> Store {
        let mut store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn add_bar(store: &Store, ticker: &str, date: &str, close: &str) {
        store
            .conn()
            .execute(
                "INSERT INTO ohlcv_raw (run_id, insert_datetime, ticker, date, open, high, low, close, volume)
                 VALUES ('r', 't', ?1, ?2, 1, 2, 0.5, ?3, 100)",
                rusqlite::params![ticker, date, close],
            )
            .unwrap();
    }

    #[test]
    fn accumulate_keeps_rows_outside_the_clean_set() {
        let mut store = store();
        add_bar(&store, "AAPL", "2024-01-02", "10");
        rank(&mut store, &OHLCV).unwrap();
        promote(&mut store, Entity::Ohlcv, PromotionMode::AccumulateUpsert, day()).unwrap();

        // History disappears from raw (simulated) but must survive in silver.
        store.conn().execute("DELETE FROM ohlcv_raw", []).unwrap();
        add_bar(&store, "AAPL", "2024-01-03", "11");
        rank(&mut store, &OHLCV).unwrap();
        let report =
            promote(&mut store, Entity::Ohlcv, PromotionMode::AccumulateUpsert, day()).unwrap();
        assert_eq!(report.silver_rows, 2);
    }

    #[test]
    fn replayed_upsert_writes_nothing() {
        let mut store = store();
        add_bar(&store, "AAPL", "2024-01-02", "10");
        rank(&mut store, &OHLCV).unwrap();
        let first =
            promote(&mut store, Entity::Ohlcv, PromotionMode::AccumulateUpsert, day()).unwrap();
        assert_eq!(first.rows_written, 1);
        let second =
            promote(&mut store, Entity::Ohlcv, PromotionMode::AccumulateUpsert, day()).unwrap();
        assert_eq!(second.rows_written, 0);
        assert_eq!(second.silver_rows, 1);
    }

    #[test]
    fn full_replace_drops_keys_missing_from_the_clean_set() {
        let mut store = store();
        add_bar(&store, "AAPL", "2024-01-02", "10");
        add_bar(&store, "MSFT", "2024-01-02", "20");
        rank(&mut store, &OHLCV).unwrap();
        promote(&mut store, Entity::Ohlcv, PromotionMode::FullReplace, day()).unwrap();

        store.conn().execute("DELETE FROM ohlcv_raw WHERE ticker = 'MSFT'", []).unwrap();
        rank(&mut store, &OHLCV).unwrap();
        let report = promote(&mut store, Entity::Ohlcv, PromotionMode::FullReplace, day()).unwrap();
        assert_eq!(report.silver_rows, 1);
    }

    #[test]
    fn violation_aborts_without_writing() {
        let mut store = store();
        add_bar(&store, "AAPL", "2024-01-02", "10");
        rank(&mut store, &OHLCV).unwrap();
        promote(&mut store, Entity::Ohlcv, PromotionMode::FullReplace, day()).unwrap();

        add_bar(&store, "MSFT", "2024-01-02", "not-a-price");
        rank(&mut store, &OHLCV).unwrap();
        let err = promote(&mut store, Entity::Ohlcv, PromotionMode::FullReplace, day()).unwrap_err();
        match err {
            PipelineError::Constraint { table, key, .. } => {
                assert_eq!(table, "ohlcv_silver");
                assert_eq!(key, "MSFT|2024-01-02");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(store.table_count("ohlcv_silver").unwrap(), 1);
    }

    #[test]
    fn silver_rows_trace_back_to_rank_one() {
        let mut store = store();
        add_bar(&store, "AAPL", "2024-01-02", "10");
        add_bar(&store, "AAPL", "2024-01-02", "99");
        rank(&mut store, &OHLCV).unwrap();
        promote(&mut store, Entity::Ohlcv, PromotionMode::FullReplace, day()).unwrap();

        let (close, rank_assigned): (String, i64) = store
            .conn()
            .query_row(
                "SELECT s.close, r.rank_assigned FROM ohlcv_silver s
                 JOIN ohlcv_ranked r ON r.raw_id = s.source_raw_id",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(close, "10.00");
        assert_eq!(rank_assigned, 1);
    }

    fn land_macro(store: &mut Store, run_id: &str, rows: &[(&str, Option<&str>)]) {
        let rows = rows
            .iter()
            .map(|(year, gdp)| {
                let mut values = vec![
                    Some("BRA".to_string()),
                    Some("Brazil".to_string()),
                    Some(year.to_string()),
                    gdp.map(str::to_string),
                    Some("1".to_string()),
                    Some("2".to_string()),
                    Some("3".to_string()),
                ];
                values.resize(MACRO.columns.len(), None);
                RawRow::new(values)
            })
            .collect();
        let mut batch = Batch {
            source_path: format!("{run_id}.csv"),
            fingerprint: run_id.to_string(),
            rows,
        };
        land_batch(store, &MACRO, &mut batch, run_id, "t").unwrap();
    }

    fn silver_gdp(store: &Store, year: i64) -> f64 {
        store
            .conn()
            .query_row(
                "SELECT nominal_gdp FROM macro_silver WHERE country_code = 'BRA' AND year = ?1",
                [year],
                |r| r.get(0),
            )
            .unwrap()
    }

    #[test]
    fn zero_fill_is_replaced_once_the_group_has_observations() {
        let mut store = store();
        land_macro(&mut store, "r1", &[("2020", None)]);
        rank(&mut store, &MACRO).unwrap();
        promote(&mut store, Entity::Macro, PromotionMode::AccumulateUpsert, day()).unwrap();
        assert_eq!(silver_gdp(&store, 2020), 0.0);

        land_macro(&mut store, "r2", &[("2021", Some("500"))]);
        rank(&mut store, &MACRO).unwrap();
        let report =
            promote(&mut store, Entity::Macro, PromotionMode::AccumulateUpsert, day()).unwrap();
        assert_eq!(report.rows_written, 2);
        assert_eq!(silver_gdp(&store, 2020), 500.0);
        assert_eq!(silver_gdp(&store, 2021), 500.0);
    }
}
