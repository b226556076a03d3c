//! Resource Monitor - Memory-Adaptive Interval Control
//!
//! Samples process memory on its own timer and applies the hysteresis
//! policy from `domain::memory`:
//! - above threshold: reclaim (cooldown-gated) and double the interval
//! - below the low watermark: halve the interval back towards the floor
//!
//! It never restarts the feed itself; it returns the interval it wants
//! and the feed controller coalesces and applies it. Between chunks of a
//! tick it also acts as the executor's backpressure gate.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::memory::{MemoryDecision, MemoryPolicy, MemoryStatus};
use crate::ports::memory::{MemoryProbe, MemorySample, Reclaimer};
use crate::ports::telemetry::FeedTelemetry;

use super::batch_executor::Backpressure;

const MIB: u64 = 1024 * 1024;

/// Minimum spacing between routine memory log lines.
const USAGE_LOG_PERIOD: Duration = Duration::from_secs(300);

/// Timing knobs for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// How often the sampling timer fires.
    pub sample_interval: Duration,
    /// Minimum spacing between two reclamations.
    pub reclaim_cooldown: Duration,
    /// Pause inserted between chunks under heavy pressure.
    pub chunk_pause: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(30),
            reclaim_cooldown: Duration::from_secs(10),
            chunk_pause: Duration::from_millis(100),
        }
    }
}

/// Memory sampler, reclamation gate and interval advisor.
pub struct ResourceMonitor {
    probe: Arc<dyn MemoryProbe>,
    reclaimer: Arc<dyn Reclaimer>,
    telemetry: Arc<dyn FeedTelemetry>,
    policy: MemoryPolicy,
    settings: MonitorSettings,
    /// When reclamation last ran.
    last_reclaim_at: Mutex<Option<Instant>>,
    /// Wall-clock time of the last reclamation, for status.
    last_reclaim_wall: Mutex<Option<DateTime<Utc>>>,
    /// When the routine usage line was last logged.
    last_log_at: Mutex<Option<Instant>>,
}

impl ResourceMonitor {
    pub fn new(
        probe: Arc<dyn MemoryProbe>,
        reclaimer: Arc<dyn Reclaimer>,
        telemetry: Arc<dyn FeedTelemetry>,
        policy: MemoryPolicy,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            probe,
            reclaimer,
            telemetry,
            policy,
            settings,
            last_reclaim_at: Mutex::new(None),
            last_reclaim_wall: Mutex::new(None),
            last_log_at: Mutex::new(None),
        }
    }

    pub const fn policy(&self) -> &MemoryPolicy {
        &self.policy
    }

    pub const fn sample_interval(&self) -> Duration {
        self.settings.sample_interval
    }

    /// Read memory once and report it to telemetry.
    pub fn sample(&self) -> MemorySample {
        let sample = self.probe.sample();
        self.telemetry.on_memory(&sample);
        sample
    }

    /// Memory block for the feed status.
    pub fn status(&self) -> MemoryStatus {
        let sample = self.probe.sample();
        MemoryStatus {
            used_bytes: sample.heap_used_bytes,
            resident_bytes: sample.resident_bytes,
            threshold_bytes: self.policy.threshold_bytes,
            usage_percent: self.policy.usage_percent(sample.heap_used_bytes),
        }
    }

    /// When reclamation last actually ran.
    pub fn last_reclaim_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_reclaim_wall
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reclaim unless one ran within the cooldown.
    ///
    /// Returns `true` only when the reclaimer actually ran. An
    /// unsupported reclaimer is a skipped optimization, not an error.
    pub fn try_reclaim(&self) -> bool {
        let now = Instant::now();
        let mut last = self
            .last_reclaim_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(at) = *last {
            if now.duration_since(at) < self.settings.reclaim_cooldown {
                debug!("Reclamation skipped, still cooling down");
                return false;
            }
        }

        if self.reclaimer.reclaim() {
            *last = Some(now);
            *self
                .last_reclaim_wall
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
            self.telemetry.on_reclaim();
            info!(reclaimer = self.reclaimer.name(), "Memory reclamation ran");
            true
        } else {
            debug!(
                reclaimer = self.reclaimer.name(),
                "Reclamation unavailable, skipping"
            );
            false
        }
    }

    /// Take a sample and decide on the tick interval.
    ///
    /// Returns the interval the feed should restart with, or `None` to
    /// keep the current one.
    pub fn evaluate(&self, current_interval_ms: u64) -> Option<u64> {
        let sample = self.sample();
        let used = sample.heap_used_bytes;
        self.log_usage_periodically(&sample);

        match self.policy.decide(used, current_interval_ms) {
            MemoryDecision::Pressure { new_interval_ms } => {
                warn!(
                    heap_mb = used / MIB,
                    threshold_mb = self.policy.threshold_bytes / MIB,
                    "Memory threshold exceeded"
                );
                self.try_reclaim();
                if let Some(ms) = new_interval_ms {
                    info!(
                        from_ms = current_interval_ms,
                        to_ms = ms,
                        "Slowing price feed to relieve memory"
                    );
                }
                new_interval_ms
            }
            MemoryDecision::Relax { new_interval_ms } => {
                info!(
                    from_ms = current_interval_ms,
                    to_ms = new_interval_ms,
                    "Memory settled, speeding price feed back up"
                );
                Some(new_interval_ms)
            }
            MemoryDecision::Hold => None,
        }
    }

    fn log_usage_periodically(&self, sample: &MemorySample) {
        let now = Instant::now();
        let mut last = self.last_log_at.lock().unwrap_or_else(PoisonError::into_inner);
        let due = last.is_none_or(|at| now.duration_since(at) >= USAGE_LOG_PERIOD);
        if due {
            *last = Some(now);
            info!(
                heap_mb = sample.heap_used_bytes / MIB,
                rss_mb = sample.resident_bytes / MIB,
                usage_pct = self.policy.usage_percent(sample.heap_used_bytes),
                "Memory usage"
            );
        }
    }
}

#[async_trait]
impl Backpressure for ResourceMonitor {
    async fn after_chunk(&self) {
        let used = self.probe.sample().heap_used_bytes;
        let pressure = self.policy.chunk_pressure(used);

        if pressure.reclaim {
            self.try_reclaim();
        }
        if pressure.pause {
            debug!(
                pause_ms = self.settings.chunk_pause.as_millis(),
                heap_mb = used / MIB,
                "Pausing between chunks under memory pressure"
            );
            tokio::time::sleep(self.settings.chunk_pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    use crate::ports::telemetry::NoopTelemetry;

    struct SettableProbe(AtomicU64);

    impl MemoryProbe for SettableProbe {
        fn sample(&self) -> MemorySample {
            MemorySample {
                heap_used_bytes: self.0.load(Ordering::SeqCst),
                resident_bytes: 0,
            }
        }
    }

    #[derive(Default)]
    struct CountingReclaimer(AtomicU32);

    impl Reclaimer for CountingReclaimer {
        fn reclaim(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn monitor(used: u64) -> (ResourceMonitor, Arc<SettableProbe>, Arc<CountingReclaimer>) {
        let probe = Arc::new(SettableProbe(AtomicU64::new(used)));
        let reclaimer = Arc::new(CountingReclaimer::default());
        let policy = MemoryPolicy {
            threshold_bytes: 100 * MIB,
            ..MemoryPolicy::default()
        };
        let monitor = ResourceMonitor::new(
            probe.clone(),
            reclaimer.clone(),
            Arc::new(NoopTelemetry),
            policy,
            MonitorSettings::default(),
        );
        (monitor, probe, reclaimer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pressure_requests_double_and_reclaims() {
        let (monitor, _, reclaimer) = monitor(150 * MIB);
        assert_eq!(monitor.evaluate(1000), Some(2000));
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaim_respects_cooldown() {
        let (monitor, _, reclaimer) = monitor(150 * MIB);
        assert!(monitor.last_reclaim_at().is_none());
        assert!(monitor.try_reclaim());
        assert!(monitor.last_reclaim_at().is_some());
        assert!(!monitor.try_reclaim());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(monitor.try_reclaim());
        assert_eq!(reclaimer.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_usage_relaxes_interval() {
        let (monitor, probe, _) = monitor(10 * MIB);
        assert_eq!(monitor.evaluate(4000), Some(2000));
        probe.0.store(80 * MIB, Ordering::SeqCst);
        assert_eq!(monitor.evaluate(2000), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_gate_pauses_under_heavy_pressure() {
        let (monitor, probe, _) = monitor(95 * MIB);
        let before = Instant::now();
        monitor.after_chunk().await;
        assert!(before.elapsed() >= Duration::from_millis(100));

        probe.0.store(10 * MIB, Ordering::SeqCst);
        let before = Instant::now();
        monitor.after_chunk().await;
        assert!(before.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_status_reports_percent() {
        let (monitor, _, _) = monitor(25 * MIB);
        let status = monitor.status();
        assert_eq!(status.usage_percent, 25);
        assert_eq!(status.threshold_bytes, 100 * MIB);
    }
}
