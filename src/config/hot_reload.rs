//! Config Hot-Reload - Watch config.toml for Changes Every 60s
//!
//! Periodically re-reads config.toml and compares with the current
//! config. If changes are detected, broadcasts the new config via
//! a `tokio::sync::watch` channel. The composition root turns `[feed]`
//! changes into a `configure` call on the running feed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use super::{AppConfig, FeedSection};
use crate::domain::feed::ConfigPatch;

/// Default polling period.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(60);

/// Watches config.toml for changes and broadcasts updates.
///
/// Polls the file instead of using a filesystem watcher, which has
/// portability issues across Linux/macOS/Docker volumes.
pub struct ConfigWatcher {
    config_path: PathBuf,
    poll_period: Duration,
    config_tx: watch::Sender<AppConfig>,
    /// Hash of the last successfully loaded file contents.
    last_hash: Option<u64>,
}

impl ConfigWatcher {
    /// Create a new config watcher.
    ///
    /// Returns the watcher and a `watch::Receiver` that consumers
    /// can use to get notified of config changes.
    pub fn new(
        config_path: impl Into<PathBuf>,
        initial_config: AppConfig,
    ) -> (Self, watch::Receiver<AppConfig>) {
        let (config_tx, config_rx) = watch::channel(initial_config);

        let watcher = Self {
            config_path: config_path.into(),
            poll_period: DEFAULT_POLL_PERIOD,
            config_tx,
            last_hash: None,
        };

        (watcher, config_rx)
    }

    #[must_use]
    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    /// Run the watcher loop until shutdown.
    #[instrument(skip(self, shutdown_rx), fields(path = %self.config_path.display()))]
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            period_s = self.poll_period.as_secs(),
            "Config watcher started"
        );

        self.last_hash = self.compute_hash().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Config watcher shutting down");
                    return Ok(());
                }
                () = tokio::time::sleep(self.poll_period) => {
                    self.check_and_reload().await;
                }
            }
        }
    }

    /// Check if config has changed and reload if so.
    async fn check_and_reload(&mut self) {
        let new_hash = self.compute_hash().await;

        if new_hash == self.last_hash {
            debug!("Config unchanged");
            return;
        }

        info!("Config change detected, reloading");

        let path = self.config_path.to_string_lossy();
        match super::loader::load_config(&path) {
            Ok(new_config) => {
                self.last_hash = new_hash;
                if self.config_tx.send(new_config).is_err() {
                    warn!("No config subscribers, update dropped");
                } else {
                    info!("Config reloaded successfully");
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload config, keeping current");
            }
        }
    }

    /// Hash of the config file contents for diff detection.
    async fn compute_hash(&self) -> Option<u64> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let content = tokio::fs::read_to_string(&self.config_path).await.ok()?;

        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Some(hasher.finish())
    }
}

/// The runtime-adjustable part of a `[feed]` change.
///
/// Only interval and variation can change without a process restart;
/// other fields are picked up at the next boot.
pub fn feed_patch(previous: &FeedSection, next: &FeedSection) -> ConfigPatch {
    ConfigPatch {
        interval_ms: (previous.interval_ms != next.interval_ms).then_some(next.interval_ms),
        variation_fraction: ((previous.variation_fraction - next.variation_fraction).abs()
            > f64::EPSILON)
            .then_some(next.variation_fraction),
    }
}
