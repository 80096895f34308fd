use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;

use super::entity::{ColumnKind, DatasetSpec};

/// Textual markers the extractors write for a missing observation.
const NULL_MARKERS: &[&str] = &["", "nan", "null", "none", "na", "n/a"];

/// Normalise one batch cell: recognised null markers become `None`, anything
/// else is kept verbatim (no trimming).
pub fn cell(raw: &str) -> Option<String> {
    let marker = raw.trim().to_ascii_lowercase();
    if NULL_MARKERS.contains(&marker.as_str()) {
        None
    } else {
        Some(raw.to_string())
    }
}

fn iso_prefix(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}

/// Canonical `YYYY-MM-DD` form of an ISO-8601 date or timestamp, if it parses.
///
/// Offsets are converted to UTC first, the same way SQLite's `DATE()` does, so
/// keys canonicalised here agree with the ranking query.
pub fn canonical_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    if !iso_prefix(s) {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    for fmt in [
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date().format("%Y-%m-%d").to_string());
        }
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.naive_utc().date().format("%Y-%m-%d").to_string())
}

/// One extracted observation as delivered by the extractor. Values are
/// positionally aligned with [`DatasetSpec::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub values: Vec<Option<String>>,
}

impl RawRow {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    /// The canonical natural key of this row, or the name of the first key
    /// column that is missing.
    pub fn natural_key(&self, spec: &DatasetSpec) -> Result<Vec<String>, &'static str> {
        spec.key
            .iter()
            .map(|name| {
                let idx = spec.index_of(name).ok_or(*name)?;
                let value = self.get(idx).map(str::trim).filter(|v| !v.is_empty()).ok_or(*name)?;
                Ok(match spec.columns[idx].kind {
                    ColumnKind::Date => canonical_date(value).unwrap_or_else(|| value.to_string()),
                    _ => value.to_string(),
                })
            })
            .collect()
    }
}

/// A raw row annotated with its deduplication rank. Rank 1 rows are the
/// clean, canonical representation of their natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub raw_id: i64,
    pub values: Vec<Value>,
    pub rank: i64,
}

impl RankedRow {
    pub fn is_canonical(&self) -> bool {
        self.rank == 1
    }
}

/// A rank-1 row, read back from the clean view.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRow {
    pub raw_id: i64,
    pub values: Vec<Value>,
}

impl CleanRow {
    pub fn value(&self, spec: &DatasetSpec, column: &str) -> &Value {
        spec.index_of(column)
            .and_then(|idx| self.values.get(idx))
            .unwrap_or(&Value::Null)
    }

    /// Human-readable natural key used in error reports, e.g. `AAPL|2024-01-02`.
    pub fn key_label(&self, spec: &DatasetSpec) -> String {
        spec.key
            .iter()
            .map(|k| display_value(self.value(spec, k)))
            .collect::<Vec<_>>()
            .join("|")
    }
}

pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::{EXCHANGE_RATE, OHLCV};

    #[test]
    fn null_markers_become_none() {
        assert_eq!(cell(""), None);
        assert_eq!(cell("NaN"), None);
        assert_eq!(cell(" null "), None);
        assert_eq!(cell(" AAPL "), Some(" AAPL ".to_string()));
    }

    #[test]
    fn dates_are_canonicalised() {
        assert_eq!(canonical_date("2024-03-01").as_deref(), Some("2024-03-01"));
        assert_eq!(canonical_date("2024-03-01 00:00:00").as_deref(), Some("2024-03-01"));
        assert_eq!(canonical_date("2024-03-01T09:30:00+05:30").as_deref(), Some("2024-03-01"));
        assert_eq!(canonical_date("2024-03-01T02:00:00+05:30").as_deref(), Some("2024-02-29"));
        assert_eq!(canonical_date("2024-3-1"), None);
        assert_eq!(canonical_date("yesterday"), None);
    }

    #[test]
    fn natural_key_trims_and_reports_missing_column() {
        let row = RawRow::new(vec![
            Some(" AAPL ".into()),
            Some("2024-01-02 00:00:00".into()),
            None,
            None,
            None,
            None,
            None,
        ]);
        assert_eq!(row.natural_key(&OHLCV).unwrap(), vec!["AAPL", "2024-01-02"]);

        let keyless = RawRow::new(vec![Some("   ".into()), Some("83.1".into()), Some("1".into())]);
        assert_eq!(keyless.natural_key(&EXCHANGE_RATE), Err("date"));
    }

    #[test]
    fn key_label_joins_key_values() {
        let row = CleanRow {
            raw_id: 7,
            values: vec![Value::Text("2024-01-02".into()), Value::Real(83.1), Value::Integer(1)],
        };
        assert_eq!(row.key_label(&EXCHANGE_RATE), "2024-01-02");
    }
}
