//! Registration of every phase's metrics, with conflict detection.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub fn register_all_metrics() {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<super::landing::LandingMetrics>(&mut all_metrics);
    register_phase_metrics::<super::dedup::DedupMetrics>(&mut all_metrics);
    register_phase_metrics::<super::promotion::PromotionMetrics>(&mut all_metrics);
    register_phase_metrics::<super::facts::FactsMetrics>(&mut all_metrics);

    info!(
        "Registered {} total metrics across all phases",
        all_metrics.len()
    );
}

fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<&'static str, MetricDoc>) {
    T::register_metrics();
    let phase_name = T::phase_name();

    for doc in T::metrics_documentation() {
        if extract_phase_from_metric_name(doc.name) != phase_name {
            warn!(metric = doc.name, phase = phase_name, "metric name does not carry its phase");
        }
        if let Some(existing) = all_metrics.get(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' ({}) registered again by phase '{}'",
                doc.name, existing.help, phase_name
            );
        } else {
            debug!(metric = doc.name, kind = ?doc.metric_type, labels = ?doc.labels, "metric registered");
            all_metrics.insert(doc.name, doc);
        }
    }
}

/// `finlayer_promotion_rows_written_total` -> `promotion`
fn extract_phase_from_metric_name(metric_name: &str) -> &str {
    if let Some(stripped) = metric_name.strip_prefix("finlayer_") {
        if let Some(next_underscore) = stripped.find('_') {
            return &stripped[..next_underscore];
        }
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{DedupMetrics, FactsMetrics, LandingMetrics, PromotionMetrics};

    #[test]
    fn phase_is_read_from_metric_name() {
        assert_eq!(
            extract_phase_from_metric_name("finlayer_landing_rows_landed_total"),
            "landing"
        );
        assert_eq!(extract_phase_from_metric_name("other_gateway_total"), "unknown");
    }

    #[test]
    fn every_documented_metric_belongs_to_its_phase() {
        let phases = [
            (LandingMetrics::phase_name(), LandingMetrics::metrics_documentation()),
            (DedupMetrics::phase_name(), DedupMetrics::metrics_documentation()),
            (PromotionMetrics::phase_name(), PromotionMetrics::metrics_documentation()),
            (FactsMetrics::phase_name(), FactsMetrics::metrics_documentation()),
        ];
        let mut seen = std::collections::HashSet::new();
        for (phase, docs) in phases {
            for doc in docs {
                assert_eq!(extract_phase_from_metric_name(doc.name), phase, "{}", doc.name);
                assert!(seen.insert(doc.name), "duplicate metric {}", doc.name);
            }
        }
    }
}
