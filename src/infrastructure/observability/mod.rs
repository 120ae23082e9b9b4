//! Push-based observability for the ML signal service
//!
//! Observability is **outbound data only**, no HTTP server:
//!
//! 1. **Structured JSON Logs**: one `METRICS_JSON:` line per cycle on stdout
//! 2. **Prometheus text**: `Metrics::render` for the `metrics` CLI command
//!    or a pushgateway sidecar

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
