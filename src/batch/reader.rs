//! Static header mapping and CSV decoding into [`RawRow`]s.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

use super::discovery::BatchFile;
use crate::domain::rows::cell;
use crate::domain::{ColumnSource, DatasetSpec, RawRow};
use crate::error::{PipelineError, Result};

/// A decoded batch file, ready for landing.
#[derive(Debug, Clone)]
pub struct Batch {
    pub source_path: String,
    /// Hex SHA-256 of the file content.
    pub fingerprint: String,
    pub rows: Vec<RawRow>,
}

/// Resolved position of each dataset column in a batch header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMapping {
    /// Indexed by dataset column; `None` when the column is not read from the file.
    positions: Vec<Option<usize>>,
}

fn normalise(header: &str) -> String {
    header.trim().trim_start_matches('\u{feff}').to_ascii_lowercase()
}

impl HeaderMapping {
    /// Match `headers` against the column aliases of `spec`.
    ///
    /// Every header must be claimed by a column or listed as ignored, and
    /// every required column must be present. An ignored header still fills a
    /// column it is an alias for when no better header did.
    pub fn resolve(spec: &DatasetSpec, headers: &[String]) -> Result<Self> {
        let schema_err = |message: String| PipelineError::Schema {
            entity: spec.entity.to_string(),
            message,
        };
        let normalised: Vec<String> = headers.iter().map(|h| normalise(h)).collect();
        let mut positions: Vec<Option<usize>> = vec![None; spec.columns.len()];
        let alias_owner = |header: &str| {
            spec.columns.iter().position(|c| match c.source {
                ColumnSource::Header { aliases, .. } => aliases.contains(&header),
                ColumnSource::Imputed { .. } => false,
            })
        };

        let mut deferred = Vec::new();
        for (pos, header) in normalised.iter().enumerate() {
            if spec.ignored_headers.contains(&header.as_str()) {
                deferred.push((pos, header.as_str()));
                continue;
            }
            let owner = alias_owner(header.as_str())
                .ok_or_else(|| schema_err(format!("unexpected column '{}'", headers[pos].trim())))?;
            if positions[owner].is_some() {
                return Err(schema_err(format!(
                    "column '{}' is supplied more than once",
                    spec.columns[owner].name
                )));
            }
            positions[owner] = Some(pos);
        }
        for (pos, header) in deferred {
            if let Some(owner) = alias_owner(header) {
                if positions[owner].is_none() {
                    positions[owner] = Some(pos);
                }
            }
        }

        let missing: Vec<&str> = spec
            .columns
            .iter()
            .zip(&positions)
            .filter(|(c, p)| {
                p.is_none() && matches!(c.source, ColumnSource::Header { required: true, .. })
            })
            .map(|(c, _)| c.name)
            .collect();
        if !missing.is_empty() {
            return Err(schema_err(format!("missing columns: {}", missing.join(", "))));
        }

        Ok(Self { positions })
    }

    pub fn position(&self, column: usize) -> Option<usize> {
        self.positions.get(column).copied().flatten()
    }
}

/// Decode CSV rows from `input`. `implied` supplies values for columns the
/// file does not carry, such as the ticker taken from the directory name.
pub fn read_rows<R: Read>(
    spec: &DatasetSpec,
    input: R,
    implied: &[(&str, &str)],
) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::None)
        .from_reader(input);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mapping = HeaderMapping::resolve(spec, &headers)?;

    let mut fill: Vec<Option<&str>> = vec![None; spec.columns.len()];
    for (name, value) in implied {
        if let Some(idx) = spec.index_of(name) {
            if mapping.position(idx).is_none() {
                fill[idx] = Some(*value);
            }
        }
    }
    for (idx, column) in spec.columns.iter().enumerate() {
        if spec.is_key(column.name) && mapping.position(idx).is_none() && fill[idx].is_none() {
            return Err(PipelineError::Schema {
                entity: spec.entity.to_string(),
                message: format!("key column '{}' is neither in the file nor implied", column.name),
            });
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let values = (0..spec.columns.len())
            .map(|idx| match mapping.position(idx) {
                Some(pos) => record.get(pos).and_then(cell),
                None => fill[idx].map(str::to_string),
            })
            .collect();
        rows.push(RawRow::new(values));
    }
    Ok(rows)
}

/// Read and fingerprint one located batch file. A blank file yields a batch
/// without rows instead of a header error.
pub fn read_batch(spec: &DatasetSpec, file: &BatchFile) -> Result<Batch> {
    let bytes = std::fs::read(&file.path)?;
    let fingerprint = hex::encode(Sha256::digest(&bytes));
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Batch {
            source_path: display_path(&file.path),
            fingerprint,
            rows: Vec::new(),
        });
    }

    let implied: Vec<(&str, &str)> = file
        .ticker
        .as_deref()
        .map(|t| vec![("ticker", t)])
        .unwrap_or_default();
    let rows = read_rows(spec, bytes.as_slice(), &implied)?;

    Ok(Batch {
        source_path: display_path(&file.path),
        fingerprint,
        rows,
    })
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
