//! Prometheus metric registration and publishing.
//!
//! Metrics live in an explicitly owned [`prometheus::Registry`] rather than the
//! process-global default, which keeps tests hermetic and makes the exporter's
//! full metric surface visible in one place.

mod usage;

pub use usage::UsageMetrics;
