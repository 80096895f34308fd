//! Strongly typed silver records.
//!
//! Each record is built from exactly one clean row. Construction is where the
//! silver constraints live: required fields, fixed-precision prices, bounded
//! integer widths and bounded strings. A failed construction carries the
//! offending column so the promoter can report it with the natural key.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::str::FromStr;

use super::entity::{DatasetSpec, Entity, COMPANY_META, EXCHANGE_RATE, MACRO, OHLCV};
use super::rows::{display_value, CleanRow};

static TICKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.\-=^_]*$").expect("valid ticker regex"));

pub const MAX_TICKER_LEN: usize = 16;

/// Precision/scale pair for a fixed-point column, like SQL `DECIMAL(p, s)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalSpec {
    pub precision: u32,
    pub scale: u32,
}

pub const PRICE: DecimalSpec = DecimalSpec {
    precision: 14,
    scale: 2,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub column: &'static str,
    pub reason: String,
}

impl Violation {
    fn new(column: &'static str, reason: impl Into<String>) -> Self {
        Self {
            column,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.column, self.reason)
    }
}

/// A clean row cast into its typed destination.
pub trait SilverRecord: Sized {
    const ENTITY: Entity;
    /// Silver columns written by the promoter, surrogate id excluded.
    const COLUMNS: &'static [&'static str];
    /// Natural key columns; the silver table is unique on these.
    const KEY: &'static [&'static str];

    fn from_clean(row: &CleanRow, insert_date: NaiveDate) -> Result<Self, Violation>;

    fn natural_key(&self) -> String;

    fn to_params(&self) -> Vec<Value>;

    fn spec() -> &'static DatasetSpec {
        Self::ENTITY.spec()
    }
}

fn required<'a>(row: &'a CleanRow, spec: &DatasetSpec, column: &'static str) -> Result<&'a Value, Violation> {
    match row.value(spec, column) {
        Value::Null => Err(Violation::new(column, "required field is NULL")),
        v => Ok(v),
    }
}

fn text(
    row: &CleanRow,
    spec: &DatasetSpec,
    column: &'static str,
    max_len: usize,
) -> Result<String, Violation> {
    let value = match required(row, spec, column)? {
        Value::Text(s) => s.trim().to_string(),
        other => display_value(other),
    };
    if value.is_empty() {
        return Err(Violation::new(column, "required field is empty"));
    }
    if value.chars().count() > max_len {
        return Err(Violation::new(
            column,
            format!("'{value}' exceeds {max_len} characters"),
        ));
    }
    Ok(value)
}

fn ticker(row: &CleanRow, spec: &DatasetSpec) -> Result<String, Violation> {
    let value = text(row, spec, "ticker", MAX_TICKER_LEN)?;
    if !TICKER_RE.is_match(&value) {
        return Err(Violation::new("ticker", format!("'{value}' is not a ticker symbol")));
    }
    Ok(value)
}

fn date(row: &CleanRow, spec: &DatasetSpec, column: &'static str) -> Result<NaiveDate, Violation> {
    match required(row, spec, column)? {
        Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| Violation::new(column, format!("'{s}' is not a YYYY-MM-DD date"))),
        other => Err(Violation::new(
            column,
            format!("expected a date, found {}", display_value(other)),
        )),
    }
}

fn real(row: &CleanRow, spec: &DatasetSpec, column: &'static str) -> Result<f64, Violation> {
    let v = match required(row, spec, column)? {
        Value::Integer(i) => *i as f64,
        Value::Real(f) => *f,
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Violation::new(column, format!("type mismatch: '{s}' is not numeric")))?,
        Value::Blob(_) => return Err(Violation::new(column, "type mismatch: blob")),
        Value::Null => unreachable!("required() rejects NULL"),
    };
    if !v.is_finite() {
        return Err(Violation::new(column, format!("{v} is not finite")));
    }
    Ok(v)
}

fn integer(
    row: &CleanRow,
    spec: &DatasetSpec,
    column: &'static str,
    min: i64,
    max: i64,
) -> Result<i64, Violation> {
    let v = match required(row, spec, column)? {
        Value::Integer(i) => *i,
        _ => {
            let f = real(row, spec, column)?;
            if f.fract() != 0.0 {
                return Err(Violation::new(column, format!("{f} is not a whole number")));
            }
            if f < i64::MIN as f64 || f > i64::MAX as f64 {
                return Err(Violation::new(column, format!("{f} overflows a 64-bit integer")));
            }
            f as i64
        }
    };
    if v < min || v > max {
        return Err(Violation::new(column, format!("{v} outside [{min}, {max}]")));
    }
    Ok(v)
}

fn decimal(
    row: &CleanRow,
    spec: &DatasetSpec,
    column: &'static str,
    dspec: DecimalSpec,
) -> Result<Decimal, Violation> {
    let f = real(row, spec, column)?;
    let mut d = Decimal::from_str(&f.to_string())
        .map_err(|e| Violation::new(column, format!("{f} is not representable: {e}")))?
        .round_dp_with_strategy(dspec.scale, RoundingStrategy::MidpointAwayFromZero);
    d.rescale(dspec.scale);
    let limit = Decimal::from(10_i64.pow(dspec.precision - dspec.scale));
    if d.abs() >= limit {
        return Err(Violation::new(
            column,
            format!("{d} exceeds DECIMAL({}, {})", dspec.precision, dspec.scale),
        ));
    }
    if d.is_sign_negative() && !d.is_zero() {
        return Err(Violation::new(column, format!("{d} is negative")));
    }
    Ok(d)
}

fn date_param(d: NaiveDate) -> Value {
    Value::Text(d.format("%Y-%m-%d").to_string())
}

fn decimal_param(d: Decimal) -> Value {
    Value::Text(d.to_string())
}

/// One daily price bar for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvBar {
    pub source_raw_id: i64,
    pub ticker: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub insert_date: NaiveDate,
}

impl OhlcvBar {
    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(f64::NAN)
    }
}

impl SilverRecord for OhlcvBar {
    const ENTITY: Entity = Entity::Ohlcv;
    const COLUMNS: &'static [&'static str] = &[
        "source_raw_id",
        "ticker",
        "date",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "insert_datetime",
    ];
    const KEY: &'static [&'static str] = &["ticker", "date"];

    fn from_clean(row: &CleanRow, insert_date: NaiveDate) -> Result<Self, Violation> {
        let spec = &OHLCV;
        let bar = Self {
            source_raw_id: row.raw_id,
            ticker: ticker(row, spec)?,
            date: date(row, spec, "date")?,
            open: decimal(row, spec, "open", PRICE)?,
            high: decimal(row, spec, "high", PRICE)?,
            low: decimal(row, spec, "low", PRICE)?,
            close: decimal(row, spec, "close", PRICE)?,
            volume: integer(row, spec, "volume", 0, i64::MAX)?,
            insert_date,
        };
        if bar.high < bar.low {
            return Err(Violation::new(
                "high",
                format!("high {} is below low {}", bar.high, bar.low),
            ));
        }
        Ok(bar)
    }

    fn natural_key(&self) -> String {
        format!("{}|{}", self.ticker, self.date)
    }

    fn to_params(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.source_raw_id),
            Value::Text(self.ticker.clone()),
            date_param(self.date),
            decimal_param(self.open),
            decimal_param(self.high),
            decimal_param(self.low),
            decimal_param(self.close),
            Value::Integer(self.volume),
            date_param(self.insert_date),
        ]
    }
}

/// Point-in-time company reference data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyProfile {
    pub source_raw_id: i64,
    pub company_name: String,
    pub ticker: String,
    pub price: Decimal,
    pub market_cap: i64,
    pub sector: String,
    pub industry: String,
    pub insert_date: NaiveDate,
}

impl SilverRecord for CompanyProfile {
    const ENTITY: Entity = Entity::CompanyMeta;
    const COLUMNS: &'static [&'static str] = &[
        "source_raw_id",
        "company_name",
        "ticker",
        "price",
        "market_cap",
        "sector",
        "industry",
        "insert_datetime",
    ];
    const KEY: &'static [&'static str] = &["ticker"];

    fn from_clean(row: &CleanRow, insert_date: NaiveDate) -> Result<Self, Violation> {
        let spec = &COMPANY_META;
        Ok(Self {
            source_raw_id: row.raw_id,
            company_name: text(row, spec, "company_name", 100)?,
            ticker: ticker(row, spec)?,
            price: decimal(row, spec, "price", PRICE)?,
            market_cap: integer(row, spec, "market_cap", 0, i64::MAX)?,
            sector: text(row, spec, "sector", 50)?,
            industry: text(row, spec, "industry", 50)?,
            insert_date,
        })
    }

    fn natural_key(&self) -> String {
        self.ticker.clone()
    }

    fn to_params(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.source_raw_id),
            Value::Text(self.company_name.clone()),
            Value::Text(self.ticker.clone()),
            decimal_param(self.price),
            Value::Integer(self.market_cap),
            Value::Text(self.sector.clone()),
            Value::Text(self.industry.clone()),
            date_param(self.insert_date),
        ]
    }
}

/// Yearly macro indicators for one country, with missing values imputed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroObservation {
    pub source_raw_id: i64,
    pub country_code: String,
    pub country_name: String,
    pub year: i64,
    pub nominal_gdp: f64,
    pub real_gdp: f64,
    pub inflation: f64,
    pub unemployment: f64,
    pub insert_date: NaiveDate,
}

impl SilverRecord for MacroObservation {
    const ENTITY: Entity = Entity::Macro;
    const COLUMNS: &'static [&'static str] = &[
        "source_raw_id",
        "country_code",
        "country_name",
        "year",
        "nominal_gdp",
        "real_gdp",
        "inflation",
        "unemployment",
        "insert_datetime",
    ];
    const KEY: &'static [&'static str] = &["country_code", "year"];

    fn from_clean(row: &CleanRow, insert_date: NaiveDate) -> Result<Self, Violation> {
        let spec = &MACRO;
        Ok(Self {
            source_raw_id: row.raw_id,
            country_code: text(row, spec, "country_code", 25)?,
            country_name: text(row, spec, "country_name", 60)?,
            year: integer(row, spec, "year", 1000, 9999)?,
            nominal_gdp: real(row, spec, "nominal_gdp_filled")?,
            real_gdp: real(row, spec, "real_gdp_filled")?,
            inflation: real(row, spec, "inflation_filled")?,
            unemployment: real(row, spec, "unemployment_filled")?,
            insert_date,
        })
    }

    fn natural_key(&self) -> String {
        format!("{}|{}", self.country_code, self.year)
    }

    fn to_params(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.source_raw_id),
            Value::Text(self.country_code.clone()),
            Value::Text(self.country_name.clone()),
            Value::Integer(self.year),
            Value::Real(self.nominal_gdp),
            Value::Real(self.real_gdp),
            Value::Real(self.inflation),
            Value::Real(self.unemployment),
            date_param(self.insert_date),
        ]
    }
}

/// Daily INR reference rate against a USD amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRate {
    pub source_raw_id: i64,
    pub date: NaiveDate,
    pub inr_rate: f64,
    pub usd_amount: i16,
    pub insert_date: NaiveDate,
}

impl SilverRecord for ExchangeRate {
    const ENTITY: Entity = Entity::ExchangeRate;
    const COLUMNS: &'static [&'static str] = &[
        "source_raw_id",
        "date",
        "inr_rate",
        "usd_amount",
        "insert_datetime",
    ];
    const KEY: &'static [&'static str] = &["date"];

    fn from_clean(row: &CleanRow, insert_date: NaiveDate) -> Result<Self, Violation> {
        let spec = &EXCHANGE_RATE;
        let inr_rate = real(row, spec, "inr_rate")?;
        if inr_rate <= 0.0 {
            return Err(Violation::new("inr_rate", format!("{inr_rate} is not positive")));
        }
        Ok(Self {
            source_raw_id: row.raw_id,
            date: date(row, spec, "date")?,
            inr_rate,
            usd_amount: integer(row, spec, "usd_amount", i16::MIN as i64, i16::MAX as i64)? as i16,
            insert_date,
        })
    }

    fn natural_key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    fn to_params(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.source_raw_id),
            date_param(self.date),
            Value::Real(self.inr_rate),
            Value::Integer(self.usd_amount as i64),
            date_param(self.insert_date),
        ]
    }
}
