//! Price Feed Simulator - Entry Point
//!
//! Initializes configuration, logging, the price store and the feed
//! controller, then serves the control API until SIGINT.
//!
//! Wiring sequence:
//! 1. Load .env, then config.toml + env overrides + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create Prometheus metrics (FeedTelemetry sink)
//! 4. Create memory probe, reclaimer and resource monitor
//! 5. Create price store from `[store]`
//! 6. Create FeedController
//! 7. Spawn HTTP server (control API + /live + /ready + /metrics)
//! 8. Spawn config watcher and forward `[feed]` changes to configure
//! 9. Autostart the feed
//! 10. Wait for SIGINT → stop feed (timers, connection) → exit

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use price_feed_sim::adapters::http::{self, AppState};
use price_feed_sim::adapters::metrics::FeedMetrics;
use price_feed_sim::adapters::{store, system};
use price_feed_sim::config::hot_reload::{ConfigWatcher, feed_patch};
use price_feed_sim::config::{self, AppConfig};
use price_feed_sim::domain::feed::FeedError;
use price_feed_sim::domain::price::ThreadRandom;
use price_feed_sim::ports::telemetry::{FeedTelemetry, NoopTelemetry};
use price_feed_sim::usecases::feed_controller::FeedController;
use price_feed_sim::usecases::resource_monitor::ResourceMonitor;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load .env and configuration ──────────────────────
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("Failed to load .env");
        }
    }
    let config_path =
        std::env::var("PRICE_FEED_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = config::loader::load_config_or_default(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured logging ────────────────────
    init_tracing(&config);

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        interval_ms = config.feed.interval_ms,
        backend = ?config.store.backend,
        "Starting price feed simulator"
    );

    // ── 3. Metrics ──────────────────────────────────────────
    let metrics = if config.metrics.enabled {
        Some(Arc::new(
            FeedMetrics::new().context("Failed to create metrics registry")?,
        ))
    } else {
        None
    };
    let telemetry: Arc<dyn FeedTelemetry> = match &metrics {
        Some(m) => Arc::clone(m) as Arc<dyn FeedTelemetry>,
        None => Arc::new(NoopTelemetry),
    };

    // ── 4. Memory monitoring ────────────────────────────────
    let monitor = Arc::new(ResourceMonitor::new(
        system::default_probe(),
        system::default_reclaimer(config.memory.reclaim),
        Arc::clone(&telemetry),
        config.memory_policy(),
        config.monitor_settings(),
    ));

    // ── 5-6. Store and feed controller ──────────────────────
    let price_store = store::from_config(&config.store);
    let controller = FeedController::new(
        Arc::clone(&price_store),
        monitor,
        Arc::new(ThreadRandom),
        telemetry,
        config.feed_config(),
        config.feed_settings(),
    );

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 7. HTTP server ──────────────────────────────────────
    let app = http::router(AppState {
        controller: Arc::clone(&controller),
        store: price_store,
        metrics,
    });
    let http_handle = tokio::spawn(http::serve(
        app,
        config.http.bind_address.clone(),
        shutdown_tx.subscribe(),
    ));

    // ── 8. Config hot reload ────────────────────────────────
    let (mut watcher, config_rx) = ConfigWatcher::new(&config_path, config.clone());
    let watcher_shutdown = shutdown_tx.subscribe();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(watcher_shutdown).await {
            error!(error = %e, "Config watcher failed");
        }
    });
    let forward_handle = tokio::spawn(forward_feed_changes(
        Arc::clone(&controller),
        config_rx,
        shutdown_tx.subscribe(),
    ));

    // ── 9. Autostart ────────────────────────────────────────
    if config.feed.autostart {
        if let Err(e) = controller.start().await {
            error!(error = %e, "Autostart failed, feed stays stopped");
        }
    } else {
        info!("Autostart disabled, waiting for /api/price/start");
    }

    info!("Price feed simulator is running");

    // ── 10. Wait for SIGINT ─────────────────────────────────
    tokio::select! {
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "Failed to listen for SIGINT");
            }
            info!("SIGINT received, initiating graceful shutdown");
        }
        res = http_server_exit(http_handle) => {
            if let Err(e) = res {
                error!(error = %e, "HTTP server exited");
            }
        }
    }

    let _ = shutdown_tx.send(());

    match controller.stop().await {
        Ok(()) | Err(FeedError::NotRunning) => {}
        Err(e) => warn!(error = %e, "Failed to stop price feed cleanly"),
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), watcher_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), forward_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.service.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn http_server_exit(handle: tokio::task::JoinHandle<Result<()>>) -> Result<()> {
    handle.await.context("HTTP server task panicked")?
}

/// Apply reloaded `[feed]` interval / variation to the running feed.
async fn forward_feed_changes(
    controller: Arc<FeedController>,
    mut config_rx: watch::Receiver<AppConfig>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut current = config_rx.borrow_and_update().feed;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let next = config_rx.borrow_and_update().feed;
        let patch = feed_patch(&current, &next);
        current = next;

        if patch.is_empty() {
            debug!("Reloaded config has no runtime feed changes");
            continue;
        }

        let outcome = controller.configure(patch).await;
        info!(
            interval_ms = outcome.applied.interval_ms,
            variation = outcome.applied.variation_fraction,
            restarted = outcome.restarted,
            "Reloaded feed config applied"
        );
    }
}
