//! Promotion metrics.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct PromotionMetrics;

impl PromotionMetrics {
    pub fn record_promoted(entity: &'static str, mode: &'static str, rows: usize) {
        ::metrics::counter!(
            phase_metric!(counter, "promotion", "rows_written"),
            "entity" => entity,
            "mode" => mode
        )
        .increment(rows as u64);
    }

    pub fn record_silver_size(entity: &'static str, rows: i64) {
        ::metrics::gauge!(phase_metric!(gauge, "promotion", "silver_rows"), "entity" => entity)
            .set(rows as f64);
    }

    pub fn record_constraint_violation(entity: &'static str) {
        ::metrics::counter!(
            phase_metric!(counter, "promotion", "constraint_violations"),
            "entity" => entity
        )
        .increment(1);
    }
}

impl PhaseMetrics for PromotionMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "promotion", "rows_written"));
        let _ = counter!(phase_metric!(counter, "promotion", "constraint_violations"));
        let _ = gauge!(phase_metric!(gauge, "promotion", "silver_rows"));
        let _ = histogram!(phase_metric!(histogram, "promotion", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "promotion"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "promotion", "rows_written"),
                metric_type: MetricType::Counter,
                help: "Silver rows inserted or updated",
                labels: vec!["entity", "mode"],
            },
            MetricDoc {
                name: phase_metric!(counter, "promotion", "constraint_violations"),
                metric_type: MetricType::Counter,
                help: "Promotions aborted by a constraint violation",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(gauge, "promotion", "silver_rows"),
                metric_type: MetricType::Gauge,
                help: "Rows in the silver table after promotion",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "promotion", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time of the promotion stage",
                labels: vec!["entity"],
            },
        ]
    }
}
