use chrono::{Datelike, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::domain::Entity;
use crate::error::{PipelineError, Result};

/// A batch file chosen for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub entity: Entity,
    pub path: PathBuf,
    /// Instrument implied by the directory layout (price bars only).
    pub ticker: Option<String>,
}

/// `<base>/<YYYY>/<Mon>/<DD>` for the run date, e.g. `2024/Oct/07`.
pub fn partition_dir(base: &Path, run_date: NaiveDate) -> PathBuf {
    base.join(format!("{:04}", run_date.year()))
        .join(run_date.format("%b").to_string())
        .join(format!("{:02}", run_date.day()))
}

/// The most recently modified `*.csv` in `dir`. Ties are broken by file name
/// so the choice is stable.
fn newest_csv(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv || !path.is_file() {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        let newer = match &best {
            None => true,
            Some((t, p)) => modified > *t || (modified == *t && path > *p),
        };
        if newer {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, p)| p))
}

/// Find the batch files for `entity` on `run_date` under `entity_root`.
///
/// Price bars are laid out one directory per instrument
/// (`<root>/<TICKER>/<YYYY>/<Mon>/<DD>`) and yield one file per instrument
/// that has a partition for the date. Other entities yield a single file.
/// Nothing found is a [`PipelineError::MissingBatch`].
pub fn locate(entity: Entity, entity_root: &Path, run_date: NaiveDate) -> Result<Vec<BatchFile>> {
    let missing = || PipelineError::MissingBatch {
        entity: entity.to_string(),
        path: partition_dir(entity_root, run_date).display().to_string(),
    };

    if entity != Entity::Ohlcv {
        let dir = partition_dir(entity_root, run_date);
        let path = newest_csv(&dir)?.ok_or_else(missing)?;
        debug!(entity = %entity, path = %path.display(), "batch located");
        return Ok(vec![BatchFile {
            entity,
            path,
            ticker: None,
        }]);
    }

    if !entity_root.is_dir() {
        return Err(missing());
    }
    let mut tickers: Vec<(String, PathBuf)> = fs::read_dir(entity_root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?.to_string();
            Some((name, p))
        })
        .collect();
    tickers.sort();

    let mut files = Vec::new();
    for (ticker, dir) in tickers {
        if let Some(path) = newest_csv(&partition_dir(&dir, run_date))? {
            debug!(entity = %entity, ticker = %ticker, path = %path.display(), "batch located");
            files.push(BatchFile {
                entity,
                path,
                ticker: Some(ticker),
            });
        }
    }
    if files.is_empty() {
        return Err(missing());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 7).unwrap()
    }

    #[test]
    fn partition_uses_abbreviated_month() {
        let p = partition_dir(Path::new("landing/macro"), date());
        assert_eq!(p, PathBuf::from("landing/macro/2024/Oct/07"));
    }

    #[test]
    fn newest_file_wins() {
        let root = tempfile::tempdir().unwrap();
        let dir = partition_dir(root.path(), date());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.csv"), "old").unwrap();
        sleep(Duration::from_millis(20));
        fs::write(dir.join("a.csv"), "new").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let files = locate(Entity::Macro, root.path(), date()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("a.csv"));
    }

    #[test]
    fn price_bars_are_found_per_instrument() {
        let root = tempfile::tempdir().unwrap();
        for ticker in ["MSFT", "AAPL"] {
            let dir = partition_dir(&root.path().join(ticker), date());
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("bars.csv"), "x").unwrap();
        }
        // An instrument with no partition for the date is left out.
        fs::create_dir_all(root.path().join("TSLA")).unwrap();

        let files = locate(Entity::Ohlcv, root.path(), date()).unwrap();
        let tickers: Vec<_> = files.iter().filter_map(|f| f.ticker.as_deref()).collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn empty_partition_is_a_missing_batch() {
        let root = tempfile::tempdir().unwrap();
        let err = locate(Entity::ExchangeRate, root.path(), date()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingBatch { .. }));
        let err = locate(Entity::Ohlcv, &root.path().join("nope"), date()).unwrap_err();
        assert!(!err.is_fatal());
    }
}
