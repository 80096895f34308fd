//! Analytical fact builder.
//!
//! Facts are read-time projections over silver and are never stored; every
//! call recomputes them from the current silver state, so re-runs cannot
//! leave stale windows behind. Windows count rows, not calendar days.

use serde::Serialize;
use tracing::debug;

use super::{RunContext, Stage, StageResult};
use crate::config::FactSettings;
use crate::domain::Entity;
use crate::error::Result;
use crate::metrics::core::time_stage;
use crate::metrics::{phase_metric, FactsMetrics};
use crate::store::Store;

pub fn has_projection(entity: Entity) -> bool {
    matches!(entity, Entity::Ohlcv | Entity::Macro)
}

/// One silver price bar, as read for the stock projection.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub ticker: String,
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockFact {
    pub stock_id: String,
    pub ticker: String,
    pub trade_date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub prev_close: Option<f64>,
    pub daily_return: Option<f64>,
    pub volatility: Option<f64>,
    pub moving_average: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroPoint {
    pub country_code: String,
    pub country_name: String,
    pub year: i64,
    pub nominal_gdp: f64,
    pub real_gdp: f64,
    pub inflation: f64,
    pub unemployment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroFact {
    pub country_code: String,
    pub country_name: String,
    pub year: i64,
    pub nominal_gdp: f64,
    pub real_gdp: f64,
    pub inflation: f64,
    pub unemployment: f64,
    pub nominal_gdp_growth: Option<f64>,
    pub real_gdp_growth: Option<f64>,
    pub inflation_change: Option<f64>,
    pub unemployment_change: Option<f64>,
}

/// Sample standard deviation; `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

/// Relative change from `prev`; undefined without a prior value or when it is zero.
fn ratio_change(current: f64, prev: Option<f64>) -> Option<f64> {
    prev.filter(|p| *p != 0.0).map(|p| (current - p) / p)
}

fn windows_of<T>(items: &[T], len: usize, end: usize) -> &[T] {
    let start = (end + 1).saturating_sub(len);
    &items[start..=end]
}

/// Stock facts for `points`, which must be ordered by ticker then date.
pub fn compute_stock_facts(points: &[PricePoint], windows: FactSettings) -> Vec<StockFact> {
    let mut facts = Vec::with_capacity(points.len());
    for series in points.chunk_by(|a, b| a.ticker == b.ticker) {
        let mut returns: Vec<Option<f64>> = Vec::with_capacity(series.len());
        let closes: Vec<f64> = series.iter().map(|p| p.close).collect();

        for (i, point) in series.iter().enumerate() {
            let prev_close = i.checked_sub(1).map(|j| series[j].close);
            let daily_return = ratio_change(point.close, prev_close);
            returns.push(daily_return);

            let observed: Vec<f64> = windows_of(&returns, windows.volatility_window, i)
                .iter()
                .flatten()
                .copied()
                .collect();
            let avg_window = windows_of(&closes, windows.average_window, i);
            let moving_average = avg_window.iter().sum::<f64>() / avg_window.len() as f64;

            facts.push(StockFact {
                stock_id: format!("STK_{}", point.ticker),
                ticker: point.ticker.clone(),
                trade_date: point.date.clone(),
                open: point.open,
                high: point.high,
                low: point.low,
                close: point.close,
                volume: point.volume,
                prev_close,
                daily_return,
                volatility: sample_std(&observed),
                moving_average,
            });
        }
    }
    facts
}

/// Macro facts for `points`, which must be ordered by country then year.
/// Each row is compared with the immediately preceding row of its country.
pub fn compute_macro_facts(points: &[MacroPoint]) -> Vec<MacroFact> {
    let mut facts = Vec::with_capacity(points.len());
    for series in points.chunk_by(|a, b| a.country_code == b.country_code) {
        for (i, point) in series.iter().enumerate() {
            let prev = i.checked_sub(1).map(|j| &series[j]);
            facts.push(MacroFact {
                country_code: point.country_code.clone(),
                country_name: point.country_name.clone(),
                year: point.year,
                nominal_gdp: point.nominal_gdp,
                real_gdp: point.real_gdp,
                inflation: point.inflation,
                unemployment: point.unemployment,
                nominal_gdp_growth: ratio_change(point.nominal_gdp, prev.map(|p| p.nominal_gdp)),
                real_gdp_growth: ratio_change(point.real_gdp, prev.map(|p| p.real_gdp)),
                inflation_change: prev.map(|p| point.inflation - p.inflation),
                unemployment_change: prev.map(|p| point.unemployment - p.unemployment),
            });
        }
    }
    facts
}

fn parse_price(text: String) -> rusqlite::Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

pub fn stock_facts(store: &Store, windows: FactSettings, ticker: Option<&str>) -> Result<Vec<StockFact>> {
    let mut stmt = store.conn().prepare(
        "SELECT ticker, date, open, high, low, close, volume FROM ohlcv_silver
         WHERE ?1 IS NULL OR ticker = ?1
         ORDER BY ticker, date",
    )?;
    let points = stmt
        .query_map([ticker], |row| {
            Ok(PricePoint {
                ticker: row.get(0)?,
                date: row.get(1)?,
                open: parse_price(row.get(2)?)?,
                high: parse_price(row.get(3)?)?,
                low: parse_price(row.get(4)?)?,
                close: parse_price(row.get(5)?)?,
                volume: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(compute_stock_facts(&points, windows))
}

pub fn macro_facts(store: &Store, country: Option<&str>) -> Result<Vec<MacroFact>> {
    let mut stmt = store.conn().prepare(
        "SELECT country_code, country_name, year, nominal_gdp, real_gdp, inflation, unemployment
         FROM macro_silver
         WHERE ?1 IS NULL OR country_code = ?1
         ORDER BY country_code, year",
    )?;
    let points = stmt
        .query_map([country], |row| {
            Ok(MacroPoint {
                country_code: row.get(0)?,
                country_name: row.get(1)?,
                year: row.get(2)?,
                nominal_gdp: row.get(3)?,
                real_gdp: row.get(4)?,
                inflation: row.get(5)?,
                unemployment: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(compute_macro_facts(&points))
}

pub fn to_json<T: Serialize>(rows: &[T]) -> Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Recomputes the entity's projection to check it builds, and reports its size.
pub struct FactsStage;

impl Stage for FactsStage {
    fn name(&self) -> &'static str {
        "facts"
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["promote"]
    }

    fn execute(&self, entity: Entity, store: &mut Store, ctx: &RunContext<'_>) -> Result<StageResult> {
        let _timing = time_stage(phase_metric!(histogram, "facts", "duration_seconds"), entity.as_str());
        let rows = match entity {
            Entity::Ohlcv => stock_facts(store, ctx.settings.facts, None)?.len(),
            Entity::Macro => macro_facts(store, None)?.len(),
            Entity::CompanyMeta | Entity::ExchangeRate => 0,
        };
        FactsMetrics::record_projection(entity.as_str(), rows);
        debug!(entity = %entity, rows, "fact projection computed");
        Ok(StageResult::success(rows, format!("{rows} fact rows")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ticker: &str, day: u32, close: f64) -> PricePoint {
        PricePoint {
            ticker: ticker.to_string(),
            date: format!("2024-01-{day:02}"),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1,
        }
    }

    fn windows(volatility_window: usize, average_window: usize) -> FactSettings {
        FactSettings {
            volatility_window,
            average_window,
        }
    }

    #[test]
    fn returns_and_two_row_average() {
        let points = vec![bar("AAPL", 2, 100.0), bar("AAPL", 3, 110.0), bar("AAPL", 4, 121.0)];
        let facts = compute_stock_facts(&points, windows(30, 2));
        let returns: Vec<_> = facts.iter().map(|f| f.daily_return).collect();
        assert_eq!(returns, vec![None, Some(0.10), Some(0.10)]);
        assert_eq!(facts[2].moving_average, 115.5);
        assert_eq!(facts[0].moving_average, 100.0);
        assert_eq!(facts[0].stock_id, "STK_AAPL");
    }

    #[test]
    fn volatility_needs_two_returns_and_respects_the_window() {
        let points = vec![
            bar("AAPL", 2, 100.0),
            bar("AAPL", 3, 110.0),
            bar("AAPL", 4, 99.0),
            bar("AAPL", 5, 99.0),
        ];
        let facts = compute_stock_facts(&points, windows(2, 90));
        assert_eq!(facts[0].volatility, None);
        // Window of two rows on row 1 holds one null and one return.
        assert_eq!(facts[1].volatility, None);
        let expected = sample_std(&[0.10, -0.10]).unwrap();
        assert!((facts[2].volatility.unwrap() - expected).abs() < 1e-12);
        let expected = sample_std(&[-0.10, 0.0]).unwrap();
        assert!((facts[3].volatility.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn series_do_not_leak_across_tickers() {
        let points = vec![bar("AAPL", 2, 100.0), bar("MSFT", 2, 50.0), bar("MSFT", 3, 55.0)];
        let facts = compute_stock_facts(&points, windows(30, 90));
        assert_eq!(facts[1].prev_close, None);
        assert_eq!(facts[2].moving_average, 52.5);
    }

    #[test]
    fn zero_previous_close_has_no_return() {
        let points = vec![bar("X", 2, 0.0), bar("X", 3, 5.0)];
        let facts = compute_stock_facts(&points, windows(30, 90));
        assert_eq!(facts[1].daily_return, None);
        assert_eq!(facts[1].prev_close, Some(0.0));
    }

    fn obs(code: &str, year: i64, gdp: f64, infl: f64, unemp: f64) -> MacroPoint {
        MacroPoint {
            country_code: code.to_string(),
            country_name: code.to_string(),
            year,
            nominal_gdp: gdp,
            real_gdp: gdp,
            inflation: infl,
            unemployment: unemp,
        }
    }

    #[test]
    fn year_over_year_deltas() {
        let points = vec![
            obs("IND", 2019, 100.0, 4.0, 7.0),
            obs("IND", 2020, 110.0, 6.5, 8.0),
            obs("USA", 2020, 0.0, 1.0, 3.0),
            obs("USA", 2021, 5.0, 0.5, 3.5),
        ];
        let facts = compute_macro_facts(&points);
        assert_eq!(facts[0].nominal_gdp_growth, None);
        assert_eq!(facts[0].inflation_change, None);
        assert!((facts[1].nominal_gdp_growth.unwrap() - 0.10).abs() < 1e-12);
        assert_eq!(facts[1].inflation_change, Some(2.5));
        assert_eq!(facts[1].unemployment_change, Some(1.0));
        // Zero prior makes the ratio undefined; differences still apply.
        assert_eq!(facts[3].real_gdp_growth, None);
        assert_eq!(facts[3].inflation_change, Some(-0.5));
    }

    #[test]
    fn csv_export_leaves_missing_values_empty() {
        let facts = compute_stock_facts(&[bar("AAPL", 2, 100.0)], windows(30, 90));
        let csv = to_csv(&facts).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("stock_id,ticker,trade_date"));
        assert!(lines.next().unwrap().contains(",,,"));
    }
}
