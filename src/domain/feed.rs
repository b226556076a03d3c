//! Feed configuration, lifecycle phase and tick accounting.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest tick interval the feed accepts.
pub const MIN_INTERVAL_MS: u64 = 100;

/// Largest variation fraction the feed accepts (±50%).
pub const MAX_VARIATION_FRACTION: f64 = 0.5;

/// Runtime-adjustable feed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConfig {
    /// Tick period in milliseconds (>= 100).
    pub interval_ms: u64,
    /// Half-width of the multiplier band, in (0, 0.5].
    pub variation_fraction: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            variation_fraction: 0.05,
        }
    }
}

impl FeedConfig {
    /// Build a config, rejecting the first out-of-range field.
    pub fn new(interval_ms: u64, variation_fraction: f64) -> Result<Self, ConfigRejection> {
        Ok(Self {
            interval_ms: Self::check_interval(interval_ms)?,
            variation_fraction: Self::check_variation(variation_fraction)?,
        })
    }

    pub fn check_interval(interval_ms: u64) -> Result<u64, ConfigRejection> {
        if interval_ms < MIN_INTERVAL_MS {
            return Err(ConfigRejection::IntervalTooShort {
                got_ms: interval_ms,
                min_ms: MIN_INTERVAL_MS,
            });
        }
        Ok(interval_ms)
    }

    pub fn check_variation(variation_fraction: f64) -> Result<f64, ConfigRejection> {
        if !(variation_fraction > 0.0 && variation_fraction <= MAX_VARIATION_FRACTION) {
            return Err(ConfigRejection::VariationOutOfRange {
                got: variation_fraction,
                max: MAX_VARIATION_FRACTION,
            });
        }
        Ok(variation_fraction)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Multiplier band `(1 - f, 1 + f)`.
    pub fn bounds(&self) -> VariationBounds {
        VariationBounds {
            low: 1.0 - self.variation_fraction,
            high: 1.0 + self.variation_fraction,
        }
    }
}

/// Lower and upper multiplier for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VariationBounds {
    pub low: f64,
    pub high: f64,
}

/// Partial update accepted by `configure`.
///
/// Accepts both the camelCase names and the short `interval` /
/// `variation` keys older dashboards send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default, alias = "interval")]
    pub interval_ms: Option<u64>,
    #[serde(default, alias = "variation")]
    pub variation_fraction: Option<f64>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.interval_ms.is_none() && self.variation_fraction.is_none()
    }
}

/// Why a configure field was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigRejection {
    #[error("interval {got_ms}ms is below the {min_ms}ms minimum")]
    IntervalTooShort { got_ms: u64, min_ms: u64 },

    #[error("variation fraction {got} must be in (0, {max}]")]
    VariationOutOfRange { got: f64, max: f64 },
}

/// Result of a configure call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureOutcome {
    /// Config in effect after the call.
    pub applied: FeedConfig,
    /// Fields that were refused; empty on full success.
    pub rejected: Vec<ConfigRejection>,
    /// Whether the running feed was restarted to pick up the change.
    pub restarted: bool,
}

impl ConfigureOutcome {
    pub fn is_ok(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Lifecycle phase of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedPhase {
    Stopped,
    Running,
}

impl fmt::Display for FeedPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Lifecycle failures reported to callers.
///
/// `AlreadyRunning` and `NotRunning` are benign: nothing changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("price feed is already running")]
    AlreadyRunning,

    #[error("price feed is not running")]
    NotRunning,

    #[error("failed to connect to price store: {0}")]
    Connect(String),
}

impl FeedError {
    /// True for invalid-transition no-ops.
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning)
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Symbols in the snapshot.
    pub total: usize,
    /// Symbols a write was issued for.
    pub attempted: usize,
    /// Writes the store acknowledged.
    pub succeeded: usize,
    /// Writes that failed (logged, non-fatal).
    pub failed: usize,
    /// Symbols skipped because they are excluded.
    pub excluded: usize,
    /// Chunks processed.
    pub chunks: usize,
}
