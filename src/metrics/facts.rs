use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct FactsMetrics;

impl FactsMetrics {
    pub fn record_projection(entity: &'static str, rows: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "facts", "rows"), "entity" => entity)
            .set(rows as f64);
    }
}

impl PhaseMetrics for FactsMetrics {
    fn register_metrics() {
        use metrics::{gauge, histogram};

        let _ = gauge!(phase_metric!(gauge, "facts", "rows"));
        let _ = histogram!(phase_metric!(histogram, "facts", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "facts"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(gauge, "facts", "rows"),
                metric_type: MetricType::Gauge,
                help: "Rows in the latest fact projection",
                labels: vec!["entity"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "facts", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Wall time to compute a fact projection",
                labels: vec!["entity"],
            },
        ]
    }
}
