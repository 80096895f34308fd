//! Rank deduplication metrics.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct DedupMetrics;

impl DedupMetrics {
    pub fn record_ranking(entity: &'static str, canonical: usize, duplicates: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "dedup", "canonical_rows"), "entity" => entity)
            .set(canonical as f64);
        ::metrics::gauge!(phase_metric!(gauge, "dedup", "duplicate_rows"), "entity" => entity)
            .set(duplicates as f64);
        ::metrics::counter!(phase_metric!(counter, "dedup", "rankings"), "entity" => entity)
            .increment(1);
    }
}

impl PhaseMetrics for DedupMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "dedup", "rankings"));
        let _ = gauge!(phase_metric!(gauge, "dedup", "canonical_rows"));
        let _ = gauge!(phase_metric!(gauge, "dedup", "duplicate_rows"));
        let _ = histogram!(phase_metric!(histogram, "dedup", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "dedup"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "dedup", "rankings"),
                metric_type: MetricType::Counter,
                help: "Ranked table rebuilds",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(gauge, "dedup", "canonical_rows"),
                metric_type: MetricType::Gauge,
                help: "Rank-1 rows after the latest ranking",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(gauge, "dedup", "duplicate_rows"),
                metric_type: MetricType::Gauge,
                help: "Rows ranked below 1 after the latest ranking",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "dedup", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of the ranking stage",
                labels: vec!["entity"],
            },
        ]
    }
}
