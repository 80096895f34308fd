//! Landing phase metrics: raw appends, lineage upserts and rejected rows.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct LandingMetrics;

impl LandingMetrics {
    pub fn record_batch(entity: &'static str, rows: usize, replay: bool) {
        ::metrics::counter!(phase_metric!(counter, "landing", "batches"), "entity" => entity)
            .increment(1);
        ::metrics::counter!(phase_metric!(counter, "landing", "rows_landed"), "entity" => entity)
            .increment(rows as u64);
        if replay {
            ::metrics::counter!(phase_metric!(counter, "landing", "replays"), "entity" => entity)
                .increment(1);
        }
    }

    pub fn record_lineage_upserts(entity: &'static str, rows: usize) {
        ::metrics::counter!(phase_metric!(counter, "landing", "lineage_upserts"), "entity" => entity)
            .increment(rows as u64);
    }

    pub fn record_rejected(entity: &'static str, rows: usize) {
        ::metrics::counter!(phase_metric!(counter, "landing", "rows_rejected"), "entity" => entity)
            .increment(rows as u64);
    }

    pub fn record_imputed(entity: &'static str, cells: usize) {
        ::metrics::counter!(phase_metric!(counter, "landing", "cells_imputed"), "entity" => entity)
            .increment(cells as u64);
    }
}

impl PhaseMetrics for LandingMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "landing", "batches"));
        let _ = counter!(phase_metric!(counter, "landing", "rows_landed"));
        let _ = counter!(phase_metric!(counter, "landing", "replays"));
        let _ = counter!(phase_metric!(counter, "landing", "lineage_upserts"));
        let _ = counter!(phase_metric!(counter, "landing", "rows_rejected"));
        let _ = counter!(phase_metric!(counter, "landing", "cells_imputed"));
        let _ = histogram!(phase_metric!(histogram, "landing", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "landing"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "landing", "batches"),
                metric_type: MetricType::Counter,
                help: "Batch files appended to a raw table",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(counter, "landing", "rows_landed"),
                metric_type: MetricType::Counter,
                help: "Rows appended to raw tables",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(counter, "landing", "replays"),
                metric_type: MetricType::Counter,
                help: "Batches whose content was already landed",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(counter, "landing", "lineage_upserts"),
                metric_type: MetricType::Counter,
                help: "Rows upserted into lineage tables",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(counter, "landing", "rows_rejected"),
                metric_type: MetricType::Counter,
                help: "Rows kept out of lineage because a natural-key field was missing",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(counter, "landing", "cells_imputed"),
                metric_type: MetricType::Counter,
                help: "Missing numeric cells filled by the null normalizer",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "landing", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of the landing stage",
                labels: vec!["entity"],
            },
        ]
    }
}
