use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use finlayer::batch::Batch;
use finlayer::domain::{Entity, PromotionMode, RawRow};
use finlayer::pipeline::{landing, promote, rank};
use finlayer::Store;
use proptest::prelude::*;
use rusqlite::types::Value;

const TICKERS: [&str; 3] = ["AAPL", "MSFT", "TSLA"];

fn bar(ticker: usize, day: u32, close: u32) -> RawRow {
    let close = format!("{}.{:02}", close / 100, close % 100);
    RawRow::new(vec![
        Some(TICKERS[ticker].to_string()),
        // Mix in timestamp spellings of the same calendar date.
        Some(if day % 2 == 0 {
            format!("2024-01-{day:02}")
        } else {
            format!("2024-01-{day:02} 00:00:00")
        }),
        Some(close.clone()),
        Some(format!("{close}1")),
        Some(close.clone()),
        Some(close),
        Some("100".to_string()),
    ])
}

fn rows_strategy() -> impl Strategy<Value = Vec<Vec<(usize, u32, u32)>>> {
    let row = (0..TICKERS.len(), 1u32..8, 100u32..50_000);
    prop::collection::vec(prop::collection::vec(row, 1..12), 1..4)
}

fn key_of(values: &[Value]) -> (String, String) {
    match (&values[0], &values[1]) {
        (Value::Text(t), Value::Text(d)) => (t.clone(), d.clone()),
        other => panic!("unexpected key {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_key_has_exactly_one_canonical_row(batches in rows_strategy()) {
        let spec = Entity::Ohlcv.spec();
        let mut store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();

        let mut distinct = BTreeSet::new();
        let mut total = 0usize;
        for (i, rows) in batches.iter().enumerate() {
            let mut batch = Batch {
                source_path: format!("batch-{i}.csv"),
                fingerprint: format!("fp-{i}"),
                rows: rows.iter().map(|&(t, d, c)| bar(t, d, c)).collect(),
            };
            for &(t, d, _) in rows {
                distinct.insert((TICKERS[t].to_string(), format!("2024-01-{d:02}")));
            }
            total += rows.len();
            landing::land_batch(&mut store, spec, &mut batch, "run", "2024-02-01T00:00:00Z").unwrap();
        }

        let report = rank::rank(&mut store, spec).unwrap();
        prop_assert_eq!(report.ranked, total);
        prop_assert_eq!(report.canonical, distinct.len());

        let ranked = rank::ranked_rows(&store, spec).unwrap();
        let mut groups: BTreeMap<(String, String), Vec<(i64, i64)>> = BTreeMap::new();
        for row in &ranked {
            groups.entry(key_of(&row.values)).or_default().push((row.raw_id, row.rank));
        }
        prop_assert_eq!(groups.keys().cloned().collect::<BTreeSet<_>>(), distinct.clone());
        for members in groups.values() {
            let min_id = members.iter().map(|(id, _)| *id).min().unwrap();
            let canonical: Vec<_> = members.iter().filter(|(_, r)| *r == 1).collect();
            prop_assert_eq!(canonical.len(), 1);
            prop_assert_eq!(canonical[0].0, min_id);
            let mut ranks: Vec<i64> = members.iter().map(|(_, r)| *r).collect();
            ranks.sort_unstable();
            prop_assert_eq!(ranks, (1..=members.len() as i64).collect::<Vec<_>>());
        }

        rank::rank(&mut store, spec).unwrap();
        prop_assert_eq!(rank::ranked_rows(&store, spec).unwrap(), ranked);

        let insert_date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        promote::promote(&mut store, Entity::Ohlcv, PromotionMode::AccumulateUpsert, insert_date).unwrap();
        let counts = store.layer_counts(spec).unwrap();
        prop_assert_eq!(counts.lineage as usize, distinct.len());
        prop_assert_eq!(counts.clean as usize, distinct.len());
        prop_assert_eq!(counts.silver as usize, distinct.len());
    }
}
