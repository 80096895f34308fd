//! Phase-organized metrics for the consolidation stages.
//!
//! Each phase owns its metric names in a dedicated submodule. Without an
//! installed recorder every call is a no-op, so library code records
//! unconditionally.

pub mod core;
pub mod dedup;
pub mod facts;
pub mod landing;
pub mod promotion;
pub mod registry;

pub use dedup::DedupMetrics;
pub use facts::FactsMetrics;
pub use landing::LandingMetrics;
pub use promotion::PromotionMetrics;

use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::config::MetricsSettings;

static EXPORTER: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder with its HTTP listener and register every
/// phase's metrics. The exporter runs on its own background thread.
///
/// Idempotent. Does nothing unless `listen_addr` is configured.
pub fn init_metrics(settings: &MetricsSettings) {
    let Some(addr_str) = settings.listen_addr.as_deref() else {
        return;
    };
    if EXPORTER.get().is_some() {
        return;
    }
    let addr = match addr_str.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics addr '{}': {}", addr_str, e);
            return;
        }
    };

    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => {
            if EXPORTER.set(addr).is_err() {
                warn!("metrics exporter was already recorded as installed");
            }
            info!("Prometheus exporter listening at http://{}/metrics", addr);
            registry::register_all_metrics();
        }
        Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
    }
}

/// Address the exporter serves `/metrics` on, once installed.
pub fn exporter_addr() -> Option<SocketAddr> {
    EXPORTER.get().copied()
}

/// Implemented by each phase's metrics collection.
pub trait PhaseMetrics {
    /// Pre-register every metric so it is exported before the first event.
    fn register_metrics();

    fn phase_name() -> &'static str;

    fn metrics_documentation() -> Vec<MetricDoc>;
}

#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// `finlayer_{phase}_{name}`, with `_total` appended to counters.
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("finlayer_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("finlayer_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("finlayer_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

/// Count finished runs by outcome.
pub fn record_run(outcome: &'static str) {
    ::metrics::counter!("finlayer_runs_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_naming_convention() {
        assert_eq!(
            phase_metric!(counter, "landing", "rows_landed"),
            "finlayer_landing_rows_landed_total"
        );
        assert_eq!(
            phase_metric!(histogram, "promotion", "duration_seconds"),
            "finlayer_promotion_duration_seconds"
        );
        assert_eq!(
            phase_metric!(gauge, "dedup", "duplicate_rows"),
            "finlayer_dedup_duplicate_rows"
        );
    }

    #[test]
    fn init_without_address_installs_nothing() {
        init_metrics(&MetricsSettings::default());
        assert!(exporter_addr().is_none());
    }

    #[test]
    fn unparseable_address_installs_nothing() {
        init_metrics(&MetricsSettings {
            listen_addr: Some("not an address".to_string()),
        });
        assert!(exporter_addr().is_none());
    }
}
