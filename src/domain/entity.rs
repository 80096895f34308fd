use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four datasets that flow through the layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Ohlcv,
    CompanyMeta,
    Macro,
    ExchangeRate,
}

impl Entity {
    pub const ALL: [Entity; 4] = [
        Entity::Ohlcv,
        Entity::CompanyMeta,
        Entity::Macro,
        Entity::ExchangeRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Ohlcv => "ohlcv",
            Entity::CompanyMeta => "company_meta",
            Entity::Macro => "macro",
            Entity::ExchangeRate => "exchange_rate",
        }
    }

    pub fn spec(&self) -> &'static DatasetSpec {
        match self {
            Entity::Ohlcv => &OHLCV,
            Entity::CompanyMeta => &COMPANY_META,
            Entity::Macro => &MACRO,
            Entity::ExchangeRate => &EXCHANGE_RATE,
        }
    }

    /// Point-in-time reference data is rebuilt in place; time series accumulate.
    pub fn default_mode(&self) -> PromotionMode {
        match self {
            Entity::Ohlcv | Entity::ExchangeRate => PromotionMode::AccumulateUpsert,
            Entity::CompanyMeta | Entity::Macro => PromotionMode::FullReplace,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ohlcv" | "prices" => Ok(Entity::Ohlcv),
            "company_meta" | "company" => Ok(Entity::CompanyMeta),
            "macro" => Ok(Entity::Macro),
            "exchange_rate" | "fx" => Ok(Entity::ExchangeRate),
            other => Err(format!("unknown entity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionMode {
    /// Truncate the silver table and reload it from the clean set.
    FullReplace,
    /// Merge the clean set by natural key, keeping every other row.
    AccumulateUpsert,
}

impl PromotionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionMode::FullReplace => "full_replace",
            PromotionMode::AccumulateUpsert => "accumulate_upsert",
        }
    }
}

impl fmt::Display for PromotionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Real,
    Integer,
    Date,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Text | ColumnKind::Date => "TEXT",
            ColumnKind::Real => "REAL",
            ColumnKind::Integer => "INTEGER",
        }
    }
}

/// Where a raw column gets its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// Mapped from one of the listed batch headers (matched case-insensitively).
    Header {
        aliases: &'static [&'static str],
        required: bool,
    },
    /// Filled by the null normalizer from another column.
    Imputed { from: &'static str },
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub source: ColumnSource,
}

const fn header(
    name: &'static str,
    kind: ColumnKind,
    aliases: &'static [&'static str],
) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        source: ColumnSource::Header {
            aliases,
            required: true,
        },
    }
}

const fn optional_header(
    name: &'static str,
    kind: ColumnKind,
    aliases: &'static [&'static str],
) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        source: ColumnSource::Header {
            aliases,
            required: false,
        },
    }
}

const fn imputed(name: &'static str, from: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Real,
        source: ColumnSource::Imputed { from },
    }
}

/// Static description of one dataset: its raw columns, the header mapping
/// used to read batches, and the natural key.
#[derive(Debug)]
pub struct DatasetSpec {
    pub entity: Entity,
    pub columns: &'static [ColumnSpec],
    pub key: &'static [&'static str],
    /// Batch headers that are known and deliberately not loaded.
    pub ignored_headers: &'static [&'static str],
    /// Grouping column for null imputation, when the dataset is imputed.
    pub impute_group: Option<&'static str>,
}

impl DatasetSpec {
    pub fn raw_table(&self) -> String {
        format!("{}_raw", self.entity)
    }

    pub fn lineage_table(&self) -> String {
        format!("{}_lineage", self.entity)
    }

    pub fn ranked_table(&self) -> String {
        format!("{}_ranked", self.entity)
    }

    pub fn clean_view(&self) -> String {
        format!("{}_clean", self.entity)
    }

    pub fn silver_table(&self) -> String {
        format!("{}_silver", self.entity)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn key_indices(&self) -> Vec<usize> {
        self.key
            .iter()
            .filter_map(|k| self.index_of(k))
            .collect()
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key.contains(&name)
    }

    /// Pairs of (raw column, filled column) handled by the null normalizer.
    pub fn imputed_pairs(&self) -> Vec<(usize, usize)> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(filled_idx, c)| match c.source {
                ColumnSource::Imputed { from } => self.index_of(from).map(|src| (src, filled_idx)),
                ColumnSource::Header { .. } => None,
            })
            .collect()
    }
}

pub static OHLCV: DatasetSpec = DatasetSpec {
    entity: Entity::Ohlcv,
    columns: &[
        optional_header("ticker", ColumnKind::Text, &["company_ticker", "ticker", "symbol"]),
        header("date", ColumnKind::Date, &["date"]),
        header("open", ColumnKind::Real, &["open"]),
        header("high", ColumnKind::Real, &["high"]),
        header("low", ColumnKind::Real, &["low"]),
        header("close", ColumnKind::Real, &["close"]),
        header("volume", ColumnKind::Real, &["volume"]),
    ],
    key: &["ticker", "date"],
    ignored_headers: &["adj close", "adj_close"],
    impute_group: None,
};

pub static COMPANY_META: DatasetSpec = DatasetSpec {
    entity: Entity::CompanyMeta,
    columns: &[
        header("company_name", ColumnKind::Text, &["companyname", "company_name"]),
        header("ticker", ColumnKind::Text, &["symbol", "ticker"]),
        header("price", ColumnKind::Real, &["price"]),
        header("market_cap", ColumnKind::Real, &["marketcap", "market_cap"]),
        header("sector", ColumnKind::Text, &["sector"]),
        header("industry", ColumnKind::Text, &["industry"]),
    ],
    key: &["ticker"],
    ignored_headers: &[],
    impute_group: None,
};

pub static MACRO: DatasetSpec = DatasetSpec {
    entity: Entity::Macro,
    columns: &[
        header("country_code", ColumnKind::Text, &["iso3", "country_code", "id"]),
        header("country_name", ColumnKind::Text, &["countryname", "country_name"]),
        header("year", ColumnKind::Integer, &["year"]),
        header("nominal_gdp", ColumnKind::Real, &["nominal_gdp", "ngdp"]),
        header("real_gdp", ColumnKind::Real, &["real_gdp", "rgdp"]),
        header("inflation", ColumnKind::Real, &["inflation", "infl"]),
        header("unemployment", ColumnKind::Real, &["unemployment", "unemp"]),
        imputed("nominal_gdp_filled", "nominal_gdp"),
        imputed("real_gdp_filled", "real_gdp"),
        imputed("inflation_filled", "inflation"),
        imputed("unemployment_filled", "unemployment"),
    ],
    key: &["country_code", "year"],
    ignored_headers: &["id"],
    impute_group: Some("country_code"),
};

pub static EXCHANGE_RATE: DatasetSpec = DatasetSpec {
    entity: Entity::ExchangeRate,
    columns: &[
        header("date", ColumnKind::Date, &["date"]),
        header("inr_rate", ColumnKind::Real, &["inr_amount", "inr_rate", "inr"]),
        header("usd_amount", ColumnKind::Real, &["usd_rate", "usd_amount"]),
    ],
    key: &["date"],
    ignored_headers: &[],
    impute_group: None,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_column_is_declared() {
        for entity in Entity::ALL {
            let spec = entity.spec();
            assert_eq!(spec.key_indices().len(), spec.key.len(), "{entity}");
        }
    }

    #[test]
    fn macro_imputes_four_indicators() {
        let pairs = MACRO.imputed_pairs();
        assert_eq!(pairs.len(), 4);
        let (src, filled) = pairs[0];
        assert_eq!(MACRO.columns[src].name, "nominal_gdp");
        assert_eq!(MACRO.columns[filled].name, "nominal_gdp_filled");
    }

    #[test]
    fn entity_names_round_trip_through_from_str() {
        for entity in Entity::ALL {
            assert_eq!(entity.as_str().parse::<Entity>().unwrap(), entity);
        }
        assert!("bonds".parse::<Entity>().is_err());
    }

    #[test]
    fn promotion_mode_names_match_config_spelling() {
        for mode in [PromotionMode::FullReplace, PromotionMode::AccumulateUpsert] {
            let parsed: PromotionMode = serde_json::from_str(&format!("\"{}\"", mode.as_str())).unwrap();
            assert_eq!(parsed, mode);
            assert_eq!(mode.to_string(), mode.as_str());
        }
    }

    #[test]
    fn time_series_accumulate_and_reference_data_replaces() {
        assert_eq!(Entity::Ohlcv.default_mode(), PromotionMode::AccumulateUpsert);
        assert_eq!(Entity::ExchangeRate.default_mode(), PromotionMode::AccumulateUpsert);
        assert_eq!(Entity::CompanyMeta.default_mode(), PromotionMode::FullReplace);
        assert_eq!(Entity::Macro.default_mode(), PromotionMode::FullReplace);
    }
}
