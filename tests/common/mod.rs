#![allow(dead_code)]

use chrono::NaiveDate;
use finlayer::batch::partition_dir;
use finlayer::{Settings, Store};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A throwaway store and landing tree.
pub struct Workspace {
    pub dir: TempDir,
    pub settings: Settings,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.store.path = dir.path().join("db").join("finlayer.db");
        settings.batches.root = dir.path().join("landing");
        settings.logging.dir = dir.path().join("logs");
        settings.logging.console = false;
        Self { dir, settings }
    }

    /// Write `contents` to `<landing>/<rel>/<YYYY>/<Mon>/<DD>/<name>`.
    pub fn write_batch(&self, rel: &str, date: NaiveDate, name: &str, contents: &str) -> PathBuf {
        let dir = partition_dir(&self.settings.batches.root.join(rel), date);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn store(&self) -> Store {
        let mut store = Store::open(&self.settings.store.path, 1_000).unwrap();
        store.migrate().unwrap();
        store
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub const OHLCV_AAPL: &str = "\
Date,Open,High,Low,Close,Volume
2024-01-02,99.5,101,99,100,1000
2024-01-03,100,111,100,110,1100
2024-01-04,110,122,109,121,1200
";

pub const COMPANY: &str = "\
companyName,symbol,price,marketCap,sector,industry
Apple Inc.,AAPL,190.5,2950000000000,Technology,Consumer Electronics
Microsoft Corporation,MSFT,375.25,2790000000000,Technology,Software
";

pub const MACRO: &str = "\
ISO3,countryname,year,NOMINAL_GDP,REAL_GDP,INFLATION,UNEMPLOYMENT
IND,India,2020,100,90,6.2,
IND,India,2021,110,99,5.5,
IND,India,2022,NaN,104,6.7,
";

pub const FX: &str = "\
Date,INR_amount,USD_rate
2024-01-02,83.21,1
2024-01-03,83.30,1
";
