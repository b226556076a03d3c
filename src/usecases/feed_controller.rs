//! Feed Controller - Price Feed State Machine
//!
//! Owns the `Stopped` / `Running` lifecycle, the store connection, the
//! tick timer and the memory-sampling timer. Lifecycle operations
//! (start, stop, restart, configure, monitor-driven interval changes) are
//! serialized by one async mutex. Config and exclusions sit behind short
//! synchronous locks that are never held across an await, so a tick always
//! reads one consistent snapshot and `status()` never waits on a tick.
//!
//! The controller is an explicitly constructed `Arc` owned by the
//! composition root; there is no process-wide instance.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::exclusion::ExclusionSet;
use crate::domain::feed::{
    ConfigPatch, ConfigureOutcome, FeedConfig, FeedError, FeedPhase, TickReport, VariationBounds,
};
use crate::domain::memory::MemoryStatus;
use crate::domain::price::{RandomSource, Symbol};
use crate::ports::price_store::{PriceStore, StoreConnection};
use crate::ports::telemetry::FeedTelemetry;

use super::batch_executor::{BatchExecutor, TickPlan};
use super::resource_monitor::ResourceMonitor;
use super::scheduler::RepeatingTask;

/// Minimum spacing between routine tick summary log lines.
const TICK_LOG_PERIOD: Duration = Duration::from_secs(10);

/// Fixed lifecycle knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    /// Maximum symbols per chunk.
    pub batch_size: usize,
    /// Pause between stop and start during a restart.
    pub settle_delay: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            settle_delay: Duration::from_millis(1000),
        }
    }
}

/// Most recent completed tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastTick {
    pub report: TickReport,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Point-in-time view of the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    pub phase: FeedPhase,
    pub interval_ms: u64,
    pub variation_fraction: f64,
    pub variation_bounds: VariationBounds,
    pub connected: bool,
    pub memory: MemoryStatus,
    pub batch_size: usize,
    pub excluded_count: usize,
    pub ticks: u64,
    pub skipped_fires: u64,
    pub restarts: u64,
    /// Interval change requested by the monitor but not yet applied.
    pub pending_interval_ms: Option<u64>,
    pub last_tick: Option<LastTick>,
    pub last_reclaim_at: Option<DateTime<Utc>>,
}

/// Live resources that exist only while running.
struct Runtime {
    phase: FeedPhase,
    connection: Option<Arc<dyn StoreConnection>>,
    tick_task: Option<RepeatingTask>,
    monitor_task: Option<RepeatingTask>,
}

impl Runtime {
    const fn stopped() -> Self {
        Self {
            phase: FeedPhase::Stopped,
            connection: None,
            tick_task: None,
            monitor_task: None,
        }
    }
}

/// Interval change asked for by the monitor.
///
/// `from_ms` is the configured interval the request was computed against;
/// once the config moves away from it the request is stale.
#[derive(Debug, Clone, Copy)]
struct IntervalRequest {
    from_ms: u64,
    to_ms: u64,
}

/// State shared with the timer tasks.
struct FeedShared {
    config: RwLock<FeedConfig>,
    exclusions: RwLock<ExclusionSet>,
    executor: BatchExecutor,
    monitor: Arc<ResourceMonitor>,
    telemetry: Arc<dyn FeedTelemetry>,
    batch_size: usize,
    running: AtomicBool,
    connected: AtomicBool,
    tick_in_flight: AtomicBool,
    ticks: AtomicU64,
    skipped_fires: AtomicU64,
    restarts: AtomicU64,
    last_tick: Mutex<Option<LastTick>>,
    last_tick_log: Mutex<Option<Instant>>,
    /// Latest unapplied interval request from the monitor.
    pending_interval: Mutex<Option<IntervalRequest>>,
    interval_requested: Arc<Notify>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FeedShared {
    /// Run one tick against `connection`.
    ///
    /// Returns `None` when the feed is not running or another tick is
    /// still in flight; the overlapping request is dropped, never queued.
    async fn run_tick(&self, connection: &dyn StoreConnection) -> Option<TickReport> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        if self
            .tick_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.skipped_fires.fetch_add(1, Ordering::Relaxed);
            self.telemetry.on_skipped_fires(1);
            debug!("Tick already in flight, skipping fire");
            return None;
        }

        let report = self.tick_body(connection).await;
        self.tick_in_flight.store(false, Ordering::SeqCst);
        report
    }

    async fn tick_body(&self, connection: &dyn StoreConnection) -> Option<TickReport> {
        let started = Instant::now();
        let config = *read(&self.config);
        let exclusions = read(&self.exclusions).clone();

        let records = match connection.list_all_symbol_prices().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to list symbol prices, tick skipped");
                return None;
            }
        };

        if records.is_empty() {
            debug!("No symbols to update");
        }

        let plan = TickPlan {
            variation_fraction: config.variation_fraction,
            batch_size: self.batch_size,
        };
        let report = self
            .executor
            .run_one_tick(connection, &records, &exclusions, &plan, self.monitor.as_ref())
            .await;

        if let Err(e) = connection.flush().await {
            warn!(error = %e, "Failed to flush price writes");
        }

        let elapsed = started.elapsed();
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.telemetry.on_tick(&report, elapsed);
        *lock(&self.last_tick) = Some(LastTick {
            report,
            finished_at: Utc::now(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });

        let period = config.interval();
        if elapsed >= period {
            let missed = u64::try_from(elapsed.as_nanos() / period.as_nanos().max(1))
                .unwrap_or(u64::MAX);
            self.skipped_fires.fetch_add(missed, Ordering::Relaxed);
            self.telemetry.on_skipped_fires(missed);
            warn!(
                elapsed_ms = elapsed.as_millis(),
                interval_ms = config.interval_ms,
                missed,
                "Tick overran its interval, fires skipped"
            );
        }

        self.log_tick_periodically(&report);
        Some(report)
    }

    fn log_tick_periodically(&self, report: &TickReport) {
        let now = Instant::now();
        let mut last = lock(&self.last_tick_log);
        if last.is_none_or(|at| now.duration_since(at) > TICK_LOG_PERIOD) {
            *last = Some(now);
            let memory = self.monitor.status();
            info!(
                succeeded = report.succeeded,
                attempted = report.attempted,
                total = report.total,
                failed = report.failed,
                heap_mb = memory.used_bytes / (1024 * 1024),
                "Price update tick complete"
            );
        }
    }

    /// Timer job for the memory monitor.
    fn sample_memory(&self) {
        let configured = read(&self.config).interval_ms;
        let current = lock(&self.pending_interval).map_or(configured, |request| request.to_ms);
        if let Some(ms) = self.monitor.evaluate(current) {
            self.request_interval(IntervalRequest {
                from_ms: configured,
                to_ms: ms,
            });
        }
    }

    /// Queue an interval change; later requests overwrite earlier ones.
    fn request_interval(&self, request: IntervalRequest) {
        *lock(&self.pending_interval) = Some(request);
        self.interval_requested.notify_one();
    }

    /// Drop any queued monitor request; the next restart supersedes it.
    fn discard_pending_interval(&self) {
        if let Some(request) = lock(&self.pending_interval).take() {
            debug!(to_ms = request.to_ms, "Pending interval request superseded");
        }
    }
}

/// Price feed state machine.
pub struct FeedController {
    store: Arc<dyn PriceStore>,
    shared: Arc<FeedShared>,
    runtime: tokio::sync::Mutex<Runtime>,
    settle_delay: Duration,
}

impl FeedController {
    /// Build a stopped controller.
    ///
    /// Must be called inside a tokio runtime: it spawns the listener that
    /// applies monitor-driven interval changes. The listener holds only a
    /// weak reference and exits once the controller is dropped.
    pub fn new(
        store: Arc<dyn PriceStore>,
        monitor: Arc<ResourceMonitor>,
        rng: Arc<dyn RandomSource>,
        telemetry: Arc<dyn FeedTelemetry>,
        config: FeedConfig,
        settings: FeedSettings,
    ) -> Arc<Self> {
        let interval_requested = Arc::new(Notify::new());
        telemetry.on_phase(FeedPhase::Stopped);
        telemetry.on_interval(config.interval_ms);

        let shared = Arc::new(FeedShared {
            config: RwLock::new(config),
            exclusions: RwLock::new(ExclusionSet::new()),
            executor: BatchExecutor::new(rng),
            monitor,
            telemetry,
            batch_size: settings.batch_size.max(1),
            running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            tick_in_flight: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            skipped_fires: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            last_tick: Mutex::new(None),
            last_tick_log: Mutex::new(None),
            pending_interval: Mutex::new(None),
            interval_requested: Arc::clone(&interval_requested),
        });

        let controller = Arc::new(Self {
            store,
            shared,
            runtime: tokio::sync::Mutex::new(Runtime::stopped()),
            settle_delay: settings.settle_delay,
        });

        tokio::spawn(Self::follow_interval_requests(
            Arc::downgrade(&controller),
            interval_requested,
        ));

        controller
    }

    /// Start the feed.
    ///
    /// Connects, runs one tick immediately, then arms the tick and memory
    /// timers. `AlreadyRunning` leaves everything untouched.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), FeedError> {
        let mut runtime = self.runtime.lock().await;
        self.start_locked(&mut runtime).await
    }

    /// Stop the feed, cancelling both timers and closing the connection.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), FeedError> {
        let mut runtime = self.runtime.lock().await;
        self.stop_locked(&mut runtime).await
    }

    /// Stop, wait the settle delay, start.
    ///
    /// From `Stopped` this is just a delayed start.
    #[instrument(skip(self))]
    pub async fn restart(&self) -> Result<(), FeedError> {
        let mut runtime = self.runtime.lock().await;
        self.restart_locked(&mut runtime).await
    }

    /// Apply a partial config update.
    ///
    /// Each field is validated on its own: a rejected field leaves its
    /// current value in place while valid fields still apply. A running
    /// feed restarts when anything changed.
    #[instrument(skip(self))]
    pub async fn configure(&self, patch: ConfigPatch) -> ConfigureOutcome {
        let mut runtime = self.runtime.lock().await;
        let mut rejected = Vec::new();
        let mut changed = false;

        let applied = {
            let mut config = write(&self.shared.config);
            if let Some(ms) = patch.interval_ms {
                match FeedConfig::check_interval(ms) {
                    Ok(ms) => {
                        changed |= config.interval_ms != ms;
                        config.interval_ms = ms;
                        self.shared.discard_pending_interval();
                        info!(interval_ms = ms, "Tick interval updated");
                    }
                    Err(rejection) => {
                        warn!(%rejection, "Interval change rejected");
                        rejected.push(rejection);
                    }
                }
            }
            if let Some(fraction) = patch.variation_fraction {
                match FeedConfig::check_variation(fraction) {
                    Ok(fraction) => {
                        changed |= (config.variation_fraction - fraction).abs() > f64::EPSILON;
                        config.variation_fraction = fraction;
                        let bounds = config.bounds();
                        info!(low = bounds.low, high = bounds.high, "Variation band updated");
                    }
                    Err(rejection) => {
                        warn!(%rejection, "Variation change rejected");
                        rejected.push(rejection);
                    }
                }
            }
            *config
        };

        if changed {
            self.shared.telemetry.on_interval(applied.interval_ms);
        }

        let restarted = if changed && runtime.phase == FeedPhase::Running {
            match self.restart_locked(&mut runtime).await {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "Restart after configure failed");
                    false
                }
            }
        } else {
            false
        };

        ConfigureOutcome {
            applied,
            rejected,
            restarted,
        }
    }

    /// Exclude a symbol from future ticks. Returns `true` if newly added.
    pub fn exclude_symbol(&self, symbol: &str) -> bool {
        let added = write(&self.shared.exclusions).exclude(symbol);
        if added {
            info!(symbol, "Symbol excluded from price updates");
        }
        added
    }

    /// Re-include a symbol. Returns whether it had been excluded.
    pub fn include_symbol(&self, symbol: &str) -> bool {
        let removed = write(&self.shared.exclusions).include(symbol);
        if removed {
            info!(symbol, "Symbol included in price updates again");
        } else {
            debug!(symbol, "Symbol was already included");
        }
        removed
    }

    pub fn list_excluded(&self) -> Vec<Symbol> {
        read(&self.shared.exclusions).list()
    }

    pub fn config(&self) -> FeedConfig {
        *read(&self.shared.config)
    }

    pub fn phase(&self) -> FeedPhase {
        if self.shared.running.load(Ordering::SeqCst) {
            FeedPhase::Running
        } else {
            FeedPhase::Stopped
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of the feed. Never waits on lifecycle operations or ticks.
    pub fn status(&self) -> FeedStatus {
        let shared = &self.shared;
        let config = *read(&shared.config);
        FeedStatus {
            phase: self.phase(),
            interval_ms: config.interval_ms,
            variation_fraction: config.variation_fraction,
            variation_bounds: config.bounds(),
            connected: self.is_connected(),
            memory: shared.monitor.status(),
            batch_size: shared.batch_size,
            excluded_count: read(&shared.exclusions).len(),
            ticks: shared.ticks.load(Ordering::Relaxed),
            skipped_fires: shared.skipped_fires.load(Ordering::Relaxed),
            restarts: shared.restarts.load(Ordering::Relaxed),
            pending_interval_ms: lock(&shared.pending_interval).map(|request| request.to_ms),
            last_tick: *lock(&shared.last_tick),
            last_reclaim_at: shared.monitor.last_reclaim_at(),
        }
    }

    /// Run a tick right now on the live connection.
    ///
    /// Holds the lifecycle lock for the whole tick, so `stop` and
    /// `restart` wait for it. `Ok(None)` means a timer tick was already
    /// in flight.
    pub async fn tick_now(&self) -> Result<Option<TickReport>, FeedError> {
        let runtime = self.runtime.lock().await;
        let connection = runtime.connection.as_ref().ok_or(FeedError::NotRunning)?;
        Ok(self.shared.run_tick(connection.as_ref()).await)
    }

    async fn start_locked(&self, runtime: &mut Runtime) -> Result<(), FeedError> {
        if runtime.phase == FeedPhase::Running {
            warn!("Price feed is already running");
            return Err(FeedError::AlreadyRunning);
        }

        let connection = self.store.connect().await.map_err(|e| {
            error!(error = %e, "Price store connection failed, feed stays stopped");
            FeedError::Connect(format!("{e:#}"))
        })?;

        let shared = &self.shared;
        runtime.phase = FeedPhase::Running;
        shared.running.store(true, Ordering::SeqCst);
        shared.connected.store(true, Ordering::SeqCst);
        shared.telemetry.on_phase(FeedPhase::Running);

        let config = *read(&shared.config);
        info!(
            interval_ms = config.interval_ms,
            low = config.bounds().low,
            high = config.bounds().high,
            batch_size = shared.batch_size,
            threshold_mb = shared.monitor.policy().threshold_bytes / (1024 * 1024),
            "Price feed starting"
        );

        // Fresh prices are visible as soon as start returns.
        shared.run_tick(connection.as_ref()).await;

        let tick_shared = Arc::clone(shared);
        let tick_connection = Arc::clone(&connection);
        runtime.tick_task = Some(RepeatingTask::spawn(
            "price-tick",
            config.interval(),
            move || {
                let shared = Arc::clone(&tick_shared);
                let connection = Arc::clone(&tick_connection);
                async move {
                    shared.run_tick(connection.as_ref()).await;
                }
            },
        ));

        let monitor_shared = Arc::clone(shared);
        runtime.monitor_task = Some(RepeatingTask::spawn(
            "memory-monitor",
            shared.monitor.sample_interval(),
            move || {
                let shared = Arc::clone(&monitor_shared);
                async move { shared.sample_memory() }
            },
        ));

        runtime.connection = Some(connection);
        Ok(())
    }

    async fn stop_locked(&self, runtime: &mut Runtime) -> Result<(), FeedError> {
        if runtime.phase == FeedPhase::Stopped {
            debug!("Price feed is not running");
            return Err(FeedError::NotRunning);
        }

        let shared = &self.shared;
        runtime.phase = FeedPhase::Stopped;
        shared.running.store(false, Ordering::SeqCst);

        if let Some(task) = runtime.tick_task.take() {
            task.cancel().await;
        }
        if let Some(task) = runtime.monitor_task.take() {
            task.cancel().await;
        }
        if let Some(connection) = runtime.connection.take() {
            connection.disconnect().await;
        }

        shared.connected.store(false, Ordering::SeqCst);
        shared.telemetry.on_phase(FeedPhase::Stopped);
        info!("Price feed stopped");
        Ok(())
    }

    async fn restart_locked(&self, runtime: &mut Runtime) -> Result<(), FeedError> {
        info!(settle_ms = self.settle_delay.as_millis(), "Restarting price feed");
        self.shared.discard_pending_interval();
        self.shared.restarts.fetch_add(1, Ordering::Relaxed);
        self.shared.telemetry.on_restart();

        match self.stop_locked(runtime).await {
            Ok(()) | Err(FeedError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        tokio::time::sleep(self.settle_delay).await;
        self.start_locked(runtime).await
    }

    /// Apply monitor interval requests until the controller is dropped.
    async fn follow_interval_requests(controller: Weak<Self>, requested: Arc<Notify>) {
        loop {
            requested.notified().await;
            let Some(controller) = controller.upgrade() else {
                break;
            };

            let mut runtime = controller.runtime.lock().await;
            // Requests that arrived while waiting for the lock collapse
            // into the latest one.
            let Some(request) = lock(&controller.shared.pending_interval).take() else {
                continue;
            };

            let interval_ms = request.to_ms;
            let current = {
                let mut config = write(&controller.shared.config);
                if config.interval_ms != request.from_ms {
                    debug!(
                        from_ms = request.from_ms,
                        current_ms = config.interval_ms,
                        "Stale interval request dropped"
                    );
                    continue;
                }
                if config.interval_ms == interval_ms {
                    continue;
                }
                std::mem::replace(&mut config.interval_ms, interval_ms)
            };
            controller.shared.telemetry.on_interval(interval_ms);
            info!(from_ms = current, to_ms = interval_ms, "Applying memory-driven interval");

            if runtime.phase == FeedPhase::Running {
                if let Err(e) = controller.restart_locked(&mut runtime).await {
                    error!(error = %e, "Restart after interval change failed");
                }
            }
        }
        debug!("Interval request listener exited");
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        // Wake the listener so it notices the controller is gone.
        self.shared.interval_requested.notify_one();
    }
}
