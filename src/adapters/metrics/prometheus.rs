//! Prometheus Metrics Registry - Feed Observability
//!
//! Implements the `FeedTelemetry` port on top of a Prometheus registry.
//! Covers tick throughput and latency, write outcomes, the effective
//! interval, memory and lifecycle events. Exposed on `/metrics` by the
//! HTTP adapter.

use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

use crate::domain::feed::{FeedPhase, TickReport};
use crate::ports::memory::MemorySample;
use crate::ports::telemetry::FeedTelemetry;

/// Centralized Prometheus metrics for the price feed.
///
/// All metrics follow the naming convention `price_feed_*`.
pub struct FeedMetrics {
    registry: Registry,
    /// Completed ticks.
    pub ticks: IntCounter,
    /// Timer fires dropped because a tick overran.
    pub ticks_skipped: IntCounter,
    /// Symbol writes by result (`ok`, `failed`, `excluded`).
    pub writes: IntCounterVec,
    /// Wall time of one tick in seconds.
    pub tick_duration: Histogram,
    /// Effective tick interval.
    pub interval_ms: IntGauge,
    /// Heap bytes at the last sample.
    pub heap_bytes: IntGauge,
    /// Resident bytes at the last sample.
    pub resident_bytes: IntGauge,
    /// 1 while the feed is running.
    pub running: IntGauge,
    /// Restarts performed.
    pub restarts: IntCounter,
    /// Reclamations that actually ran.
    pub reclamations: IntCounter,
}

fn gauge_value(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

impl FeedMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks = IntCounter::new("price_feed_ticks_total", "Completed price update ticks")?;

        let ticks_skipped = IntCounter::new(
            "price_feed_ticks_skipped_total",
            "Timer fires skipped because a tick overran its interval",
        )?;

        let writes = IntCounterVec::new(
            Opts::new("price_feed_symbol_writes_total", "Per-symbol price writes"),
            &["result"],
        )?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "price_feed_tick_duration_seconds",
                "Wall time of one price update tick",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        let interval_ms = IntGauge::new(
            "price_feed_interval_ms",
            "Effective tick interval in milliseconds",
        )?;

        let heap_bytes = IntGauge::new(
            "price_feed_heap_bytes",
            "Heap bytes allocated at the last memory sample",
        )?;

        let resident_bytes = IntGauge::new(
            "price_feed_resident_bytes",
            "Resident bytes at the last memory sample",
        )?;

        let running = IntGauge::new(
            "price_feed_running",
            "Whether the feed is running (1=yes, 0=no)",
        )?;

        let restarts = IntCounter::new("price_feed_restarts_total", "Feed restarts performed")?;

        let reclamations = IntCounter::new(
            "price_feed_reclamations_total",
            "Memory reclamations that actually ran",
        )?;

        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(ticks_skipped.clone()))?;
        registry.register(Box::new(writes.clone()))?;
        registry.register(Box::new(tick_duration.clone()))?;
        registry.register(Box::new(interval_ms.clone()))?;
        registry.register(Box::new(heap_bytes.clone()))?;
        registry.register(Box::new(resident_bytes.clone()))?;
        registry.register(Box::new(running.clone()))?;
        registry.register(Box::new(restarts.clone()))?;
        registry.register(Box::new(reclamations.clone()))?;

        Ok(Self {
            registry,
            ticks,
            ticks_skipped,
            writes,
            tick_duration,
            interval_ms,
            heap_bytes,
            resident_bytes,
            running,
            restarts,
            reclamations,
        })
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn count_writes(&self, result: &str, n: usize) {
        if n > 0 {
            self.writes
                .with_label_values(&[result])
                .inc_by(u64::try_from(n).unwrap_or(u64::MAX));
        }
    }
}

impl FeedTelemetry for FeedMetrics {
    fn on_tick(&self, report: &TickReport, elapsed: Duration) {
        self.ticks.inc();
        self.tick_duration.observe(elapsed.as_secs_f64());
        self.count_writes("ok", report.succeeded);
        self.count_writes("failed", report.failed);
        self.count_writes("excluded", report.excluded);
    }

    fn on_skipped_fires(&self, count: u64) {
        self.ticks_skipped.inc_by(count);
    }

    fn on_phase(&self, phase: FeedPhase) {
        self.running.set(i64::from(phase == FeedPhase::Running));
    }

    fn on_interval(&self, interval_ms: u64) {
        self.interval_ms.set(gauge_value(interval_ms));
    }

    fn on_restart(&self) {
        self.restarts.inc();
    }

    fn on_memory(&self, sample: &MemorySample) {
        self.heap_bytes.set(gauge_value(sample.heap_used_bytes));
        self.resident_bytes.set(gauge_value(sample.resident_bytes));
    }

    fn on_reclaim(&self) {
        self.reclamations.inc();
    }
}

/// Text body for `/metrics`; an encoding failure yields an empty body.
pub fn render(metrics: &FeedMetrics) -> String {
    metrics.encode().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to encode metrics");
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_updates_counters() {
        let metrics = FeedMetrics::new().unwrap();
        let report = TickReport {
            total: 5,
            attempted: 4,
            succeeded: 3,
            failed: 1,
            excluded: 1,
            chunks: 1,
        };

        metrics.on_tick(&report, Duration::from_millis(20));
        metrics.on_phase(FeedPhase::Running);
        metrics.on_interval(2000);

        assert_eq!(metrics.ticks.get(), 1);
        assert_eq!(metrics.writes.with_label_values(&["ok"]).get(), 3);
        assert_eq!(metrics.writes.with_label_values(&["failed"]).get(), 1);
        assert_eq!(metrics.running.get(), 1);
        assert_eq!(metrics.interval_ms.get(), 2000);
    }

    #[test]
    fn test_encode_contains_metric_names() {
        let metrics = FeedMetrics::new().unwrap();
        metrics.on_restart();
        let body = metrics.encode().unwrap();
        assert!(body.contains("price_feed_restarts_total 1"));
        assert!(body.contains("price_feed_interval_ms"));
    }
}
