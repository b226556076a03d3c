//! Memory hysteresis policy.
//!
//! Pure decision logic for the resource monitor: given a heap sample and
//! the current tick interval, decide whether to back off, speed up or
//! hold. The trigger-up watermark (100% of threshold) and trigger-down
//! watermark (`low_watermark`, 70% by default) must differ, otherwise the
//! interval would flip on every sample.

use serde::Serialize;

/// Thresholds and interval bounds for the adaptive loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryPolicy {
    /// Heap usage above which the feed backs off.
    pub threshold_bytes: u64,
    /// Fraction of threshold below which the feed speeds up again.
    pub low_watermark: f64,
    /// Fastest interval the monitor will restore.
    pub interval_floor_ms: u64,
    /// Slowest interval the monitor will back off to.
    pub interval_ceiling_ms: u64,
    /// Fraction of threshold that triggers reclamation between chunks.
    pub chunk_reclaim_fraction: f64,
    /// Fraction of threshold that pauses between chunks.
    pub chunk_pause_fraction: f64,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            threshold_bytes: 1536 * 1024 * 1024,
            low_watermark: 0.7,
            interval_floor_ms: 1000,
            interval_ceiling_ms: 5000,
            chunk_reclaim_fraction: 0.8,
            chunk_pause_fraction: 0.9,
        }
    }
}

/// What the monitor should do after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryDecision {
    /// Usage above threshold. Reclaim, and slow down if `new_interval_ms`.
    Pressure { new_interval_ms: Option<u64> },
    /// Usage well below threshold; speed back up.
    Relax { new_interval_ms: u64 },
    Hold,
}

/// Between-chunk backpressure verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkPressure {
    pub reclaim: bool,
    pub pause: bool,
}

impl MemoryPolicy {
    /// Decide the interval action for a heap sample.
    #[allow(clippy::cast_precision_loss)]
    pub fn decide(&self, used_bytes: u64, current_interval_ms: u64) -> MemoryDecision {
        if used_bytes > self.threshold_bytes {
            let new_interval_ms = (current_interval_ms < self.interval_ceiling_ms)
                .then(|| current_interval_ms.saturating_mul(2).min(self.interval_ceiling_ms));
            return MemoryDecision::Pressure { new_interval_ms };
        }

        let low = self.threshold_bytes as f64 * self.low_watermark;
        if (used_bytes as f64) < low && current_interval_ms > self.interval_floor_ms {
            return MemoryDecision::Relax {
                new_interval_ms: (current_interval_ms / 2).max(self.interval_floor_ms),
            };
        }

        MemoryDecision::Hold
    }

    /// Decide whether to reclaim and/or pause after a chunk.
    #[allow(clippy::cast_precision_loss)]
    pub fn chunk_pressure(&self, used_bytes: u64) -> ChunkPressure {
        let used = used_bytes as f64;
        let threshold = self.threshold_bytes as f64;
        ChunkPressure {
            reclaim: used > threshold * self.chunk_reclaim_fraction,
            pause: used > threshold * self.chunk_pause_fraction,
        }
    }

    /// Usage as a whole percentage of the threshold.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn usage_percent(&self, used_bytes: u64) -> u64 {
        if self.threshold_bytes == 0 {
            return 0;
        }
        (used_bytes as f64 / self.threshold_bytes as f64 * 100.0).round() as u64
    }
}

/// Memory section of the feed status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatus {
    pub used_bytes: u64,
    pub resident_bytes: u64,
    pub threshold_bytes: u64,
    pub usage_percent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn policy() -> MemoryPolicy {
        MemoryPolicy {
            threshold_bytes: 100 * MIB,
            ..MemoryPolicy::default()
        }
    }

    #[test]
    fn test_pressure_doubles_interval() {
        assert_eq!(
            policy().decide(120 * MIB, 1000),
            MemoryDecision::Pressure { new_interval_ms: Some(2000) }
        );
    }

    #[test]
    fn test_pressure_caps_at_ceiling() {
        assert_eq!(
            policy().decide(120 * MIB, 4000),
            MemoryDecision::Pressure { new_interval_ms: Some(5000) }
        );
        assert_eq!(
            policy().decide(120 * MIB, 5000),
            MemoryDecision::Pressure { new_interval_ms: None }
        );
    }

    #[test]
    fn test_relax_halves_interval_to_floor() {
        assert_eq!(
            policy().decide(10 * MIB, 4000),
            MemoryDecision::Relax { new_interval_ms: 2000 }
        );
        assert_eq!(
            policy().decide(10 * MIB, 1500),
            MemoryDecision::Relax { new_interval_ms: 1000 }
        );
        assert_eq!(policy().decide(10 * MIB, 1000), MemoryDecision::Hold);
    }

    #[test]
    fn test_hysteresis_band_holds() {
        // Between 70% and 100%: neither watermark fires.
        assert_eq!(policy().decide(80 * MIB, 2000), MemoryDecision::Hold);
        assert_eq!(policy().decide(100 * MIB, 2000), MemoryDecision::Hold);
    }

    #[test]
    fn test_chunk_pressure_levels() {
        let p = policy();
        assert_eq!(p.chunk_pressure(50 * MIB), ChunkPressure::default());
        assert_eq!(
            p.chunk_pressure(85 * MIB),
            ChunkPressure { reclaim: true, pause: false }
        );
        assert_eq!(
            p.chunk_pressure(95 * MIB),
            ChunkPressure { reclaim: true, pause: true }
        );
    }

    #[test]
    fn test_usage_percent() {
        assert_eq!(policy().usage_percent(50 * MIB), 50);
        let zero = MemoryPolicy { threshold_bytes: 0, ..policy() };
        assert_eq!(zero.usage_percent(10), 0);
    }
}
