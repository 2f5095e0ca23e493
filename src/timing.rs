//! Timing instrumentation. Measurement only - no algorithm in the crate
//! consults a clock for its decisions.

use hdrhistogram::Histogram;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock nanoseconds since the Unix epoch.
#[inline]
pub fn nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Percentile summary of recorded latencies, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: u64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub max: u64,
}

/// Latency histogram kept off the hot path's critical dependency chain:
/// recording is a single array increment, reporting happens at shutdown.
pub struct LatencyStats {
    histogram: Histogram<u64>,
}

impl LatencyStats {
    /// Tracks 1ns..10ms at three significant figures.
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(1, 10_000_000, 3)
                .expect("static histogram bounds are valid"),
        }
    }

    #[inline]
    pub fn record(&mut self, nanos: u64) {
        // Saturates out-of-range samples rather than erroring.
        self.histogram.saturating_record(nanos.max(1));
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.histogram.len(),
            p50: self.histogram.value_at_quantile(0.50),
            p90: self.histogram.value_at_quantile(0.90),
            p99: self.histogram.value_at_quantile(0.99),
            max: self.histogram.max(),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
