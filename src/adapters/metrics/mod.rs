//! Metrics and Monitoring Adapters
//!
//! Prometheus export of feed telemetry plus the `/live`, `/ready` and
//! `/metrics` handlers mounted by the HTTP adapter.

pub mod health;
pub mod prometheus;

pub use prometheus::FeedMetrics;
