//! Integration Tests - End-to-end Feed Component Testing
//!
//! Tests the interaction between the feed controller, the ports and
//! mock / in-memory adapters. Uses mockall for trait mocking and
//! `tokio::test(start_paused = true)` for timer-driven scenarios.

use std::sync::Arc;
use std::time::Duration;

use mockall::mock;
use mockall::predicate::*;
use tokio_test::{assert_err, assert_ok};

use price_feed_sim::adapters::store::InMemoryPriceStore;
use price_feed_sim::adapters::system::FixedProbe;
use price_feed_sim::domain::feed::{ConfigPatch, FeedConfig, FeedError, FeedPhase};
use price_feed_sim::domain::memory::MemoryPolicy;
use price_feed_sim::domain::price::{FixedRandom, PriceRecord};
use price_feed_sim::ports::memory::NoopReclaimer;
use price_feed_sim::ports::price_store::{PriceStore, StoreConnection};
use price_feed_sim::ports::telemetry::NoopTelemetry;
use price_feed_sim::usecases::feed_controller::{FeedController, FeedSettings};
use price_feed_sim::usecases::resource_monitor::{MonitorSettings, ResourceMonitor};

const MIB: u64 = 1024 * 1024;

// ---- Mock Definitions ----

mock! {
    pub Store {}

    #[async_trait::async_trait]
    impl PriceStore for Store {
        async fn connect(&self) -> anyhow::Result<Arc<dyn StoreConnection>>;
        async fn read_prices(&self) -> anyhow::Result<Vec<PriceRecord>>;
    }
}

mock! {
    pub Conn {}

    #[async_trait::async_trait]
    impl StoreConnection for Conn {
        async fn list_all_symbol_prices(&self) -> anyhow::Result<Vec<PriceRecord>>;
        async fn set_price(&self, symbol: &str, price: u64) -> anyhow::Result<()>;
        async fn flush(&self) -> anyhow::Result<()>;
        async fn disconnect(&self);
    }
}

// ---- Harness ----

struct Harness {
    feed: Arc<FeedController>,
    probe: Arc<FixedProbe>,
}

fn build(store: Arc<dyn PriceStore>, config: FeedConfig, heap_bytes: u64, u: f64) -> Harness {
    let probe = Arc::new(FixedProbe::new(heap_bytes));
    let monitor = Arc::new(ResourceMonitor::new(
        probe.clone(),
        Arc::new(NoopReclaimer),
        Arc::new(NoopTelemetry),
        MemoryPolicy {
            threshold_bytes: 100 * MIB,
            ..MemoryPolicy::default()
        },
        MonitorSettings::default(),
    ));
    let feed = FeedController::new(
        store,
        monitor,
        Arc::new(FixedRandom::new(u)),
        Arc::new(NoopTelemetry),
        config,
        FeedSettings::default(),
    );
    Harness { feed, probe }
}

fn two_symbol_store() -> InMemoryPriceStore {
    InMemoryPriceStore::with_prices([("A", 100), ("B", 200)])
}

// ---- Integration Tests ----

#[tokio::test(start_paused = true)]
async fn test_connection_failure_leaves_feed_stopped() {
    let mut store = MockStore::new();
    store
        .expect_connect()
        .times(1)
        .returning(|| Err(anyhow::anyhow!("connection refused")));

    let h = build(Arc::new(store), FeedConfig::default(), 10 * MIB, 0.5);

    let err = h.feed.start().await.unwrap_err();
    assert!(matches!(err, FeedError::Connect(ref msg) if msg.contains("connection refused")));
    assert_eq!(h.feed.phase(), FeedPhase::Stopped);
    assert!(!h.feed.is_connected());
    assert_eq!(h.feed.stop().await, Err(FeedError::NotRunning));
}

#[tokio::test(start_paused = true)]
async fn test_stop_closes_connection_exactly_once() {
    let mut conn = MockConn::new();
    conn.expect_list_all_symbol_prices()
        .returning(|| Ok(vec![PriceRecord::new("A", 100)]));
    conn.expect_set_price()
        .with(eq("A"), always())
        .returning(|_, _| Ok(()));
    conn.expect_flush().returning(|| Ok(()));
    conn.expect_disconnect().times(1).returning(|| ());
    let conn: Arc<dyn StoreConnection> = Arc::new(conn);

    let mut store = MockStore::new();
    store
        .expect_connect()
        .times(1)
        .returning(move || Ok(Arc::clone(&conn)));

    let h = build(Arc::new(store), FeedConfig::default(), 10 * MIB, 0.5);
    assert_ok!(h.feed.start().await);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_ok!(h.feed.stop().await);
    assert_eq!(h.feed.status().ticks, 2);
}

#[tokio::test(start_paused = true)]
async fn test_listing_failure_skips_tick_but_keeps_running() {
    let mut conn = MockConn::new();
    conn.expect_list_all_symbol_prices()
        .returning(|| Err(anyhow::anyhow!("table locked")));
    conn.expect_set_price().never();
    conn.expect_flush().never();
    conn.expect_disconnect().returning(|| ());
    let conn: Arc<dyn StoreConnection> = Arc::new(conn);

    let mut store = MockStore::new();
    store
        .expect_connect()
        .returning(move || Ok(Arc::clone(&conn)));

    let h = build(Arc::new(store), FeedConfig::default(), 10 * MIB, 0.5);
    assert_ok!(h.feed.start().await);
    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert_eq!(h.feed.phase(), FeedPhase::Running);
    assert_eq!(h.feed.status().ticks, 0);
    assert_ok!(h.feed.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_double_start_does_not_double_arm() {
    let store = two_symbol_store();
    let h = build(Arc::new(store.clone()), FeedConfig::default(), 10 * MIB, 0.5);

    assert_ok!(h.feed.start().await);
    assert_eq!(h.feed.start().await, Err(FeedError::AlreadyRunning));
    assert_eq!(store.connect_count(), 1);

    // Immediate tick only; the first timer fire is at 1000ms.
    tokio::time::sleep(Duration::from_millis(999)).await;
    assert_eq!(store.write_count(), 2);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(store.write_count(), 4);

    assert_ok!(h.feed.stop().await);
    assert_eq!(h.feed.stop().await, Err(FeedError::NotRunning));
}

#[tokio::test(start_paused = true)]
async fn test_neutral_draw_then_exclusion() {
    let store = two_symbol_store();
    let h = build(Arc::new(store.clone()), FeedConfig::default(), 10 * MIB, 0.5);

    assert_ok!(h.feed.start().await);
    assert_eq!(store.get("A"), Some(100));
    assert_eq!(store.get("B"), Some(200));

    assert!(h.feed.exclude_symbol("A"));
    let report = h.feed.tick_now().await.unwrap().unwrap();
    assert_eq!(report.excluded, 1);
    assert_eq!(report.attempted, 1);
    assert_eq!(store.get("A"), Some(100));
    assert_eq!(store.get("B"), Some(200));

    assert_ok!(h.feed.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_lowest_draw_moves_only_included_symbols() {
    let store = two_symbol_store();
    let h = build(Arc::new(store.clone()), FeedConfig::default(), 10 * MIB, 0.0);

    h.feed.exclude_symbol("A");
    assert_ok!(h.feed.start().await);

    assert_eq!(store.get("A"), Some(100));
    assert_eq!(store.get("B"), Some(190));

    assert!(h.feed.include_symbol("A"));
    assert!(!h.feed.include_symbol("A"));
    h.feed.tick_now().await.unwrap();
    assert_eq!(store.get("A"), Some(95));

    assert_ok!(h.feed.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_configure_rejects_short_interval() {
    let h = build(Arc::new(two_symbol_store()), FeedConfig::default(), 10 * MIB, 0.5);
    assert_ok!(h.feed.start().await);

    let outcome = h
        .feed
        .configure(ConfigPatch {
            interval_ms: Some(50),
            variation_fraction: None,
        })
        .await;

    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.applied.interval_ms, 1000);
    assert!(!outcome.restarted);
    assert_eq!(h.feed.status().interval_ms, 1000);
    assert_ok!(h.feed.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_configure_while_stopped_does_not_start() {
    let h = build(Arc::new(two_symbol_store()), FeedConfig::default(), 10 * MIB, 0.5);

    let outcome = h
        .feed
        .configure(ConfigPatch {
            interval_ms: Some(2500),
            variation_fraction: None,
        })
        .await;

    assert!(outcome.is_ok());
    assert!(!outcome.restarted);
    assert_eq!(h.feed.phase(), FeedPhase::Stopped);
    assert_eq!(h.feed.config().interval_ms, 2500);
}

#[tokio::test(start_paused = true)]
async fn test_memory_pressure_doubles_interval_with_one_restart() {
    let store = two_symbol_store();
    let h = build(Arc::new(store.clone()), FeedConfig::default(), 150 * MIB, 0.5);
    assert_ok!(h.feed.start().await);

    tokio::time::sleep(Duration::from_millis(29_000)).await;
    assert_eq!(h.feed.status().restarts, 0);

    // Sample at 30s, settle 1s, back up by 31s.
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let status = h.feed.status();
    assert_eq!(status.interval_ms, 2000);
    assert_eq!(status.restarts, 1);
    assert_eq!(status.phase, FeedPhase::Running);
    assert!(status.pending_interval_ms.is_none());
    assert_eq!(store.connect_count(), 2);

    assert_ok!(h.feed.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_interval_caps_at_ceiling() {
    let config = assert_ok!(FeedConfig::new(5000, 0.05));
    let h = build(Arc::new(two_symbol_store()), config, 150 * MIB, 0.5);
    assert_ok!(h.feed.start().await);

    tokio::time::sleep(Duration::from_secs(65)).await;
    let status = h.feed.status();
    assert_eq!(status.interval_ms, 5000);
    assert_eq!(status.restarts, 0);

    assert_ok!(h.feed.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_low_memory_relaxes_interval() {
    let config = assert_ok!(FeedConfig::new(4000, 0.05));
    let h = build(Arc::new(two_symbol_store()), config, 150 * MIB, 0.5);
    h.probe.set(10 * MIB);
    assert_ok!(h.feed.start().await);

    tokio::time::sleep(Duration::from_millis(31_500)).await;
    assert_eq!(h.feed.status().interval_ms, 2000);
    assert_eq!(h.feed.status().restarts, 1);

    assert_ok!(h.feed.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_write_failures_do_not_stop_feed() {
    let store = two_symbol_store();
    store.fail_writes_for("B");
    let h = build(Arc::new(store.clone()), FeedConfig::default(), 10 * MIB, 0.0);

    assert_ok!(h.feed.start().await);
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let status = h.feed.status();
    assert_eq!(status.phase, FeedPhase::Running);
    assert_eq!(status.ticks, 3);
    let last = status.last_tick.unwrap().report;
    assert_eq!(last.failed, 1);
    assert_eq!(last.succeeded, 1);
    assert_eq!(store.get("B"), Some(200));

    assert_ok!(h.feed.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_restart_from_stopped_starts() {
    let store = two_symbol_store();
    let h = build(Arc::new(store.clone()), FeedConfig::default(), 10 * MIB, 0.5);

    assert_ok!(h.feed.restart().await);
    assert_eq!(h.feed.phase(), FeedPhase::Running);
    assert_eq!(h.feed.status().restarts, 1);

    store.set_reachable(false);
    assert_err!(h.feed.restart().await);
    assert_eq!(h.feed.phase(), FeedPhase::Stopped);
}
