//! Push-based metrics reporter
//!
//! Emits one structured JSON line per finished cycle on stdout.
//!
//! **Security**: This system only SENDS data, never accepts requests.

use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

/// Metrics snapshot for JSON output
#[derive(Serialize)]
pub struct MetricsSnapshot<'a, T: Serialize> {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub cycle_duration_ms: u128,
    pub cycle: &'a T,
}

/// Push-based metrics reporter
pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Update cycle gauges and build the snapshot
    pub fn snapshot<'a, T: Serialize>(
        &self,
        cycle: &'a T,
        elapsed: Duration,
    ) -> MetricsSnapshot<'a, T> {
        let uptime = self.start_time.elapsed().as_secs();
        let now = chrono::Utc::now();

        self.metrics.uptime_seconds.set(uptime as f64);
        self.metrics
            .cycle_duration_seconds
            .observe(elapsed.as_secs_f64());
        self.metrics.last_cycle_timestamp.set(now.timestamp() as f64);

        MetricsSnapshot {
            timestamp: now.to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            cycle_duration_ms: elapsed.as_millis(),
            cycle,
        }
    }

    pub fn report<T: Serialize>(&self, cycle: &T, elapsed: Duration) {
        let snapshot = self.snapshot(cycle, elapsed);
        match serde_json::to_string(&snapshot) {
            // Special prefix so logs can be easily filtered
            Ok(json) => println!("METRICS_JSON:{}", json),
            Err(e) => warn!("Failed to serialize metrics: {}", e),
        }
    }
}
