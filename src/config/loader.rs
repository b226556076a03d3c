//! Configuration Loader - File Loading, Env Overrides and Validation
//!
//! Handles loading `config.toml`, applying `PRICE_FEED_*` environment
//! overrides, validating all parameters, and providing clear error
//! messages for misconfiguration.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::AppConfig;
use crate::domain::feed::{MAX_VARIATION_FRACTION, MIN_INTERVAL_MS};

/// Load, override and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - An env override doesn't parse
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let mut config = parse_config(&content)?;
  apply_env_overrides(&mut config)?;
  validate_config(&config)?;

  info!(
    interval_ms = config.feed.interval_ms,
    variation = config.feed.variation_fraction,
    batch_size = config.feed.batch_size,
    threshold_mb = config.memory.threshold_bytes / (1024 * 1024),
    backend = ?config.store.backend,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Like `load_config`, but a missing file yields the defaults.
///
/// A file that exists but is broken is still an error.
pub fn load_config_or_default(path: &str) -> Result<AppConfig> {
  if Path::new(path).exists() {
    return load_config(path);
  }

  warn!(path, "Config file not found, using defaults");
  let mut config = AppConfig::default();
  apply_env_overrides(&mut config)?;
  validate_config(&config)?;
  Ok(config)
}

/// Parse TOML text without touching the environment.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  toml::from_str(content).context("Failed to parse config.toml")
}

/// Apply `PRICE_FEED_*` environment variables on top of the file.
pub fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
  if let Some(v) = env_var("PRICE_FEED_INTERVAL_MS")? {
    config.feed.interval_ms = v;
  }
  if let Some(v) = env_var("PRICE_FEED_VARIATION")? {
    config.feed.variation_fraction = v;
  }
  if let Some(v) = env_var("PRICE_FEED_BATCH_SIZE")? {
    config.feed.batch_size = v;
  }
  if let Some(v) = env_var("PRICE_FEED_MEMORY_THRESHOLD_BYTES")? {
    config.memory.threshold_bytes = v;
  }
  if let Some(v) = env_var::<String>("PRICE_FEED_STORE_PATH")? {
    config.store.path = v;
  }
  if let Some(v) = env_var::<String>("PRICE_FEED_HTTP_ADDR")? {
    config.http.bind_address = v;
  }
  Ok(())
}

fn env_var<T>(key: &str) -> Result<Option<T>>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match std::env::var(key) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map(Some)
      .map_err(|e| anyhow::anyhow!("Invalid {key}={raw}: {e}")),
    Err(_) => Ok(None),
  }
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Feed interval and variation inside the accepted ranges
/// - Non-zero batch size
/// - A consistent memory hysteresis band
/// - Non-empty listener address and store path
pub fn validate_config(config: &AppConfig) -> Result<()> {
  // Feed validation
  anyhow::ensure!(
    config.feed.interval_ms >= MIN_INTERVAL_MS,
    "feed.interval_ms must be >= {}, got {}",
    MIN_INTERVAL_MS,
    config.feed.interval_ms
  );
  anyhow::ensure!(
    config.feed.variation_fraction > 0.0
      && config.feed.variation_fraction <= MAX_VARIATION_FRACTION,
    "feed.variation_fraction must be in (0, {}], got {}",
    MAX_VARIATION_FRACTION,
    config.feed.variation_fraction
  );
  anyhow::ensure!(
    config.feed.batch_size >= 1,
    "feed.batch_size must be at least 1"
  );

  // Memory validation
  let memory = &config.memory;
  anyhow::ensure!(
    memory.threshold_bytes > 0,
    "memory.threshold_bytes must be positive"
  );
  anyhow::ensure!(
    memory.low_watermark > 0.0 && memory.low_watermark < 1.0,
    "memory.low_watermark must be in (0, 1), got {}",
    memory.low_watermark
  );
  anyhow::ensure!(
    memory.interval_floor_ms >= MIN_INTERVAL_MS,
    "memory.interval_floor_ms must be >= {}, got {}",
    MIN_INTERVAL_MS,
    memory.interval_floor_ms
  );
  anyhow::ensure!(
    memory.interval_floor_ms <= memory.interval_ceiling_ms,
    "memory.interval_floor_ms ({}) must not exceed interval_ceiling_ms ({})",
    memory.interval_floor_ms,
    memory.interval_ceiling_ms
  );
  anyhow::ensure!(
    memory.chunk_reclaim_fraction > 0.0
      && memory.chunk_reclaim_fraction <= memory.chunk_pause_fraction,
    "memory.chunk_reclaim_fraction must be in (0, chunk_pause_fraction], got {}",
    memory.chunk_reclaim_fraction
  );
  anyhow::ensure!(
    memory.sample_interval_ms > 0,
    "memory.sample_interval_ms must be positive"
  );

  // Surfaces
  anyhow::ensure!(
    !config.http.bind_address.is_empty(),
    "http.bind_address must not be empty"
  );
  anyhow::ensure!(
    !config.store.path.is_empty(),
    "store.path must not be empty"
  );

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::StoreBackend;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = parse_config("").unwrap();
    assert_eq!(config, AppConfig::default());
    assert_eq!(config.feed.interval_ms, 1000);
    assert_eq!(config.memory.threshold_bytes, 1_610_612_736);
    assert!(validate_config(&config).is_ok());
  }

  #[test]
  fn test_parse_sections() {
    let config = parse_config(
      r#"
        [feed]
        interval_ms = 2000
        variation_fraction = 0.1
        batch_size = 50

        [store]
        backend = "json"
        path = "/tmp/prices.json"
        seed = { AAPL = 18000, MSFT = 41000 }
      "#,
    )
    .unwrap();

    assert_eq!(config.feed.interval_ms, 2000);
    assert_eq!(config.feed.batch_size, 50);
    assert!(config.feed.autostart);
    assert_eq!(config.store.backend, StoreBackend::Json);
    assert_eq!(config.store.seed.get("MSFT"), Some(&41_000));
  }

  #[test]
  fn test_rejects_short_interval() {
    let mut config = AppConfig::default();
    config.feed.interval_ms = 50;
    assert!(validate_config(&config).is_err());
  }

  #[test]
  fn test_rejects_inverted_hysteresis() {
    let mut config = AppConfig::default();
    config.memory.interval_floor_ms = 6000;
    assert!(validate_config(&config).is_err());

    let mut config = AppConfig::default();
    config.memory.low_watermark = 1.0;
    assert!(validate_config(&config).is_err());
  }

  #[test]
  fn test_rejects_zero_batch() {
    let mut config = AppConfig::default();
    config.feed.batch_size = 0;
    assert!(validate_config(&config).is_err());
  }
}
