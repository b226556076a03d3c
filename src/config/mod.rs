//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml` with
//! environment variable overrides via `.env` files.
//! Every tuning knob of the feed, the memory policy and the store
//! lives here; nothing is hardcoded in the domain layer beyond defaults.

pub mod hot_reload;
pub mod loader;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::feed::FeedConfig;
use crate::domain::memory::MemoryPolicy;
use crate::usecases::feed_controller::FeedSettings;
use crate::usecases::resource_monitor::MonitorSettings;

/// Top-level service configuration.
///
/// Every section is optional in the file; missing sections fall back
/// to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  #[serde(default)]
  pub service: ServiceConfig,
  /// Tick interval, variation band and batching.
  #[serde(default)]
  pub feed: FeedSection,
  /// Memory threshold and adaptive interval policy.
  #[serde(default)]
  pub memory: MemorySection,
  /// Price table backend.
  #[serde(default)]
  pub store: StoreConfig,
  /// Control API listener.
  #[serde(default)]
  pub http: HttpConfig,
  /// Metrics export.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  #[serde(default = "default_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Emit JSON log lines instead of the human format.
  #[serde(default = "default_true")]
  pub json_logs: bool,
}

/// Feed parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedSection {
  /// Tick period (>= 100ms).
  #[serde(default = "default_interval_ms")]
  pub interval_ms: u64,
  /// Half-width of the multiplier band, in (0, 0.5].
  #[serde(default = "default_variation")]
  pub variation_fraction: f64,
  /// Maximum concurrent writes per chunk.
  #[serde(default = "default_batch_size")]
  pub batch_size: usize,
  /// Pause between stop and start on restart.
  #[serde(default = "default_settle_delay_ms")]
  pub settle_delay_ms: u64,
  /// Start the feed once at boot.
  #[serde(default = "default_true")]
  pub autostart: bool,
}

/// Memory policy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySection {
  /// Heap usage considered "high" (bytes).
  #[serde(default = "default_threshold_bytes")]
  pub threshold_bytes: u64,
  /// Sampling timer period.
  #[serde(default = "default_sample_interval_ms")]
  pub sample_interval_ms: u64,
  /// Minimum spacing between reclamations.
  #[serde(default = "default_gc_cooldown_ms")]
  pub gc_cooldown_ms: u64,
  /// Interval the feed relaxes back to.
  #[serde(default = "default_interval_floor_ms")]
  pub interval_floor_ms: u64,
  /// Interval the feed never slows beyond.
  #[serde(default = "default_interval_ceiling_ms")]
  pub interval_ceiling_ms: u64,
  /// Fraction of the threshold under which the interval relaxes.
  #[serde(default = "default_low_watermark")]
  pub low_watermark: f64,
  /// Fraction of the threshold that triggers reclamation between chunks.
  #[serde(default = "default_chunk_reclaim_fraction")]
  pub chunk_reclaim_fraction: f64,
  /// Fraction of the threshold that pauses between chunks.
  #[serde(default = "default_chunk_pause_fraction")]
  pub chunk_pause_fraction: f64,
  /// Length of that pause.
  #[serde(default = "default_chunk_pause_ms")]
  pub chunk_pause_ms: u64,
  /// Use the allocator's purge when available.
  #[serde(default = "default_true")]
  pub reclaim: bool,
}

/// Which store backs the price table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
  /// Process-local table, lost on exit.
  #[default]
  Memory,
  /// JSON `{symbol: price}` file persisted after every tick.
  Json,
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
  #[serde(default)]
  pub backend: StoreBackend,
  /// Table file for the json backend.
  #[serde(default = "default_store_path")]
  pub path: String,
  /// Initial symbols when the table is empty or missing.
  #[serde(default)]
  pub seed: BTreeMap<String, u64>,
}

/// Control API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
  /// Listener address for the control API, health and metrics.
  #[serde(default = "default_http_addr")]
  pub bind_address: String,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
  /// Expose Prometheus metrics on `/metrics`.
  #[serde(default = "default_true")]
  pub enabled: bool,
}

impl AppConfig {
  pub fn feed_config(&self) -> FeedConfig {
    FeedConfig {
      interval_ms: self.feed.interval_ms,
      variation_fraction: self.feed.variation_fraction,
    }
  }

  pub fn feed_settings(&self) -> FeedSettings {
    FeedSettings {
      batch_size: self.feed.batch_size,
      settle_delay: Duration::from_millis(self.feed.settle_delay_ms),
    }
  }

  pub fn memory_policy(&self) -> MemoryPolicy {
    MemoryPolicy {
      threshold_bytes: self.memory.threshold_bytes,
      low_watermark: self.memory.low_watermark,
      interval_floor_ms: self.memory.interval_floor_ms,
      interval_ceiling_ms: self.memory.interval_ceiling_ms,
      chunk_reclaim_fraction: self.memory.chunk_reclaim_fraction,
      chunk_pause_fraction: self.memory.chunk_pause_fraction,
    }
  }

  pub fn monitor_settings(&self) -> MonitorSettings {
    MonitorSettings {
      sample_interval: Duration::from_millis(self.memory.sample_interval_ms),
      reclaim_cooldown: Duration::from_millis(self.memory.gc_cooldown_ms),
      chunk_pause: Duration::from_millis(self.memory.chunk_pause_ms),
    }
  }
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_name(),
      log_level: default_log_level(),
      json_logs: true,
    }
  }
}

impl Default for FeedSection {
  fn default() -> Self {
    Self {
      interval_ms: default_interval_ms(),
      variation_fraction: default_variation(),
      batch_size: default_batch_size(),
      settle_delay_ms: default_settle_delay_ms(),
      autostart: true,
    }
  }
}

impl Default for MemorySection {
  fn default() -> Self {
    Self {
      threshold_bytes: default_threshold_bytes(),
      sample_interval_ms: default_sample_interval_ms(),
      gc_cooldown_ms: default_gc_cooldown_ms(),
      interval_floor_ms: default_interval_floor_ms(),
      interval_ceiling_ms: default_interval_ceiling_ms(),
      low_watermark: default_low_watermark(),
      chunk_reclaim_fraction: default_chunk_reclaim_fraction(),
      chunk_pause_fraction: default_chunk_pause_fraction(),
      chunk_pause_ms: default_chunk_pause_ms(),
      reclaim: true,
    }
  }
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      backend: StoreBackend::default(),
      path: default_store_path(),
      seed: BTreeMap::new(),
    }
  }
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      bind_address: default_http_addr(),
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self { enabled: true }
  }
}

// Default value functions for serde

fn default_name() -> String {
  "price-feed-sim".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_interval_ms() -> u64 {
  1000
}

fn default_variation() -> f64 {
  0.05
}

fn default_batch_size() -> usize {
  500
}

fn default_settle_delay_ms() -> u64 {
  1000
}

fn default_threshold_bytes() -> u64 {
  1_610_612_736 // 1.5 GiB
}

fn default_sample_interval_ms() -> u64 {
  30_000
}

fn default_gc_cooldown_ms() -> u64 {
  10_000
}

fn default_interval_floor_ms() -> u64 {
  1000
}

fn default_interval_ceiling_ms() -> u64 {
  5000
}

fn default_low_watermark() -> f64 {
  0.7
}

fn default_chunk_reclaim_fraction() -> f64 {
  0.8
}

fn default_chunk_pause_fraction() -> f64 {
  0.9
}

fn default_chunk_pause_ms() -> u64 {
  100
}

fn default_store_path() -> String {
  "data/prices.json".to_string()
}

fn default_http_addr() -> String {
  "0.0.0.0:8080".to_string()
}
