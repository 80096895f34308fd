//! Group-median imputation for missing numeric observations.
//!
//! For every imputed column of a dataset, rows are grouped by the dataset's
//! impute group (the country for macro indicators). A missing value becomes
//! the median of the group's observed values, or 0.0 when the group has no
//! observation at all. Observed values are copied through unchanged and the
//! raw column is never touched; results land in the `<col>_filled` companion.
//!
//! Filling runs twice: at landing, so raw and lineage carry the companions,
//! and again at promotion over the clean rows plus every earlier lineage
//! observation of their groups, so silver reflects the whole series as it
//! stands now rather than as it stood when a row first landed.

use rusqlite::types::Value;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::domain::{CleanRow, DatasetSpec, RawRow};
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnFill {
    pub column: String,
    pub median_fills: usize,
    pub zero_fills: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImputationReport {
    pub columns: Vec<ColumnFill>,
}

impl ImputationReport {
    pub fn total_filled(&self) -> usize {
        self.columns.iter().map(|c| c.median_fills + c.zero_fills).sum()
    }
}

/// Observed numeric value of a raw cell. Unparseable text counts as missing.
fn observed(row: &RawRow, idx: usize) -> Option<f64> {
    row.get(idx)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Median of `values`; the mean of the two middle values for an even count.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn group_of(row: &RawRow, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| row.get(i)).map(|g| g.trim().to_string())
}

/// Fill the imputed columns of `rows` in place.
///
/// `history` holds earlier observations of the same groups that are not part
/// of this batch; they contribute to the medians but are not modified. Row
/// order is preserved. Datasets without an impute group are left untouched.
pub fn fill_nulls(spec: &DatasetSpec, rows: &mut [RawRow], history: &[RawRow]) -> ImputationReport {
    let Some(group_col) = spec.impute_group else {
        return ImputationReport::default();
    };
    let group_idx = spec.index_of(group_col);
    let mut report = ImputationReport::default();

    for (src, filled) in spec.imputed_pairs() {
        let mut observations: HashMap<Option<String>, Vec<f64>> = HashMap::new();
        for row in history.iter().chain(rows.iter()) {
            let entry = observations.entry(group_of(row, group_idx)).or_default();
            if let Some(v) = observed(row, src) {
                entry.push(v);
            }
        }
        let medians: HashMap<Option<String>, Option<f64>> = observations
            .into_iter()
            .map(|(group, mut values)| (group, median(&mut values)))
            .collect();

        let mut fill = ColumnFill {
            column: spec.columns[src].name.to_string(),
            ..ColumnFill::default()
        };
        for row in rows.iter_mut() {
            let value = match observed(row, src) {
                Some(v) => v,
                None => match medians.get(&group_of(row, group_idx)).copied().flatten() {
                    Some(m) => {
                        fill.median_fills += 1;
                        m
                    }
                    None => {
                        fill.zero_fills += 1;
                        0.0
                    }
                },
            };
            if let Some(slot) = row.values.get_mut(filled) {
                *slot = Some(value.to_string());
            }
        }
        report.columns.push(fill);
    }

    report
}

fn value_to_cell(v: Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(_) => None,
    }
}

/// Lineage observations of the groups present in `rows`, excluding keys the
/// rows themselves carry.
pub fn lineage_history(conn: &Connection, spec: &DatasetSpec, rows: &[RawRow]) -> Result<Vec<RawRow>> {
    let Some(group_col) = spec.impute_group else {
        return Ok(Vec::new());
    };
    let Some(group_idx) = spec.index_of(group_col) else {
        return Ok(Vec::new());
    };
    let mut groups: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get(group_idx))
        .map(|g| g.trim().to_string())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    groups.sort();
    let own_keys: HashSet<Vec<String>> = rows.iter().filter_map(|r| r.natural_key(spec).ok()).collect();

    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        spec.column_names().join(", "),
        spec.lineage_table(),
        group_col
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut history = Vec::new();
    for group in groups {
        let mut found = stmt.query([&group])?;
        while let Some(row) = found.next()? {
            let values = (0..spec.columns.len())
                .map(|i| row.get::<_, Value>(i).map(value_to_cell))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let seen = RawRow::new(values);
            match seen.natural_key(spec) {
                Ok(key) if own_keys.contains(&key) => {}
                _ => history.push(seen),
            }
        }
    }
    Ok(history)
}

/// Recompute the filled companions of `rows` from the current lineage.
pub fn refill_clean(conn: &Connection, spec: &DatasetSpec, rows: &mut [CleanRow]) -> Result<ImputationReport> {
    if spec.impute_group.is_none() {
        return Ok(ImputationReport::default());
    }
    let mut raw: Vec<RawRow> = rows
        .iter()
        .map(|r| RawRow::new(r.values.iter().cloned().map(value_to_cell).collect()))
        .collect();
    let history = lineage_history(conn, spec, &raw)?;
    let report = fill_nulls(spec, &mut raw, &history);

    let pairs = spec.imputed_pairs();
    for (clean, refilled) in rows.iter_mut().zip(&raw) {
        for &(_, filled) in &pairs {
            let value = refilled
                .get(filled)
                .and_then(|v| v.parse::<f64>().ok())
                .map_or(Value::Null, Value::Real);
            if let Some(slot) = clean.values.get_mut(filled) {
                *slot = value;
            }
        }
    }
    Ok(report)
}
