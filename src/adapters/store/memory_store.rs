//! In-Memory Price Store - Shared Symbol Table
//!
//! The table outlives connections: stopping and restarting the feed
//! keeps the prices. Reachability and per-symbol failures can be toggled
//! to exercise the feed's error paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::price::{MIN_PRICE, PriceRecord};
use crate::ports::price_store::{PriceStore, StoreConnection};

#[derive(Default)]
struct Inner {
    table: RwLock<BTreeMap<String, u64>>,
    unreachable: AtomicBool,
    failing: RwLock<HashSet<String>>,
    writes: AtomicU64,
    connects: AtomicU64,
}

impl Inner {
    fn snapshot(&self) -> Vec<PriceRecord> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(symbol, price)| PriceRecord::new(symbol.clone(), *price))
            .collect()
    }
}

/// Process-local price table.
#[derive(Clone, Default)]
pub struct InMemoryPriceStore {
    inner: Arc<Inner>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `prices`; zero prices are raised to the minimum.
    pub fn with_prices<I, S>(prices: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut table = store.inner.table.write().unwrap_or_else(PoisonError::into_inner);
            for (symbol, price) in prices {
                table.insert(symbol.into(), price.max(MIN_PRICE));
            }
        }
        store
    }

    pub fn insert(&self, symbol: impl Into<String>, price: u64) {
        self.inner
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.into(), price.max(MIN_PRICE));
    }

    pub fn get(&self, symbol: &str) -> Option<u64> {
        self.inner
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
    }

    pub fn snapshot(&self) -> Vec<PriceRecord> {
        self.inner.snapshot()
    }

    /// Make `connect` fail until set back.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Make writes for `symbol` fail.
    pub fn fail_writes_for(&self, symbol: impl Into<String>) {
        self.inner
            .failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.into());
    }

    /// Successful writes across all connections.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn connect(&self) -> anyhow::Result<Arc<dyn StoreConnection>> {
        anyhow::ensure!(
            !self.inner.unreachable.load(Ordering::SeqCst),
            "in-memory price store is unreachable"
        );
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        debug!("In-memory price store connected");
        Ok(Arc::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
            open: AtomicBool::new(true),
        }))
    }

    async fn read_prices(&self) -> anyhow::Result<Vec<PriceRecord>> {
        Ok(self.inner.snapshot())
    }
}

struct MemoryConnection {
    inner: Arc<Inner>,
    open: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.open.load(Ordering::SeqCst), "connection is closed");
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn list_all_symbol_prices(&self) -> anyhow::Result<Vec<PriceRecord>> {
        self.ensure_open()?;
        Ok(self.inner.snapshot())
    }

    async fn set_price(&self, symbol: &str, price: u64) -> anyhow::Result<()> {
        self.ensure_open()?;
        let failing = self
            .inner
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(symbol);
        anyhow::ensure!(!failing, "write rejected for {symbol}");

        let mut table = self.inner.table.write().unwrap_or_else(PoisonError::into_inner);
        let slot = table
            .get_mut(symbol)
            .ok_or_else(|| anyhow::anyhow!("unknown symbol {symbol}"))?;
        *slot = price.max(MIN_PRICE);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        self.ensure_open()
    }

    async fn disconnect(&self) {
        self.open.store(false, Ordering::SeqCst);
        debug!("In-memory price store disconnected");
    }
}
