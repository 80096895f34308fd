//! Timing helpers shared by the phase metrics.

use std::time::Instant;

/// Records the elapsed time into a histogram when dropped.
pub struct TimingGuard {
    start: Instant,
    histogram_name: &'static str,
    entity: &'static str,
}

impl TimingGuard {
    pub fn new(histogram_name: &'static str, entity: &'static str) -> Self {
        Self {
            start: Instant::now(),
            histogram_name,
            entity,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        ::metrics::histogram!(self.histogram_name, "entity" => self.entity).record(duration);
    }
}

/// Time a stage for one entity.
///
/// ```ignore
/// let _timing = time_stage(phase_metric!(histogram, "dedup", "duration_seconds"), "ohlcv");
/// ```
pub fn time_stage(histogram_name: &'static str, entity: &'static str) -> TimingGuard {
    TimingGuard::new(histogram_name, entity)
}
