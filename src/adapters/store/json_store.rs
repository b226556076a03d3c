//! JSON File Price Store - Atomic Table Persistence
//!
//! The table is a single JSON object `{ "SYMBOL": price, ... }`. A
//! connection loads it into memory, applies writes there, and persists
//! on `flush` (end of every tick) and on `disconnect` using a tmp file
//! plus rename, so the file is always either the old or the new version.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::domain::price::{MIN_PRICE, PriceRecord};
use crate::ports::price_store::{PriceStore, StoreConnection};

type Table = BTreeMap<String, u64>;

/// Price table backed by a JSON file.
pub struct JsonFilePriceStore {
    path: PathBuf,
    /// Written to `path` when the file does not exist yet.
    seed: Table,
}

impl JsonFilePriceStore {
    pub fn new(path: impl Into<PathBuf>, seed: Table) -> Self {
        Self {
            path: path.into(),
            seed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Table> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(self.seed.clone());
        }
        let raw = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read price table: {}", self.path.display()))?;
        let table: Table = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse price table: {}", self.path.display()))?;
        Ok(table
            .into_iter()
            .map(|(symbol, price)| (symbol, price.max(MIN_PRICE)))
            .collect())
    }
}

/// Write `table` to `path` via a sibling tmp file and rename.
async fn persist(path: &Path, table: &Table) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .context("Failed to create price table directory")?;
    }

    let json = serde_json::to_string_pretty(table).context("Failed to serialize price table")?;
    let tmp_path = path.with_extension("json.tmp");

    fs::write(&tmp_path, &json)
        .await
        .context("Failed to write tmp price table")?;
    fs::rename(&tmp_path, path)
        .await
        .context("Failed to rename price table")?;

    debug!(path = %path.display(), symbols = table.len(), "Price table persisted");
    Ok(())
}

#[async_trait]
impl PriceStore for JsonFilePriceStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>> {
        let existed = fs::try_exists(&self.path).await.unwrap_or(false);
        let table = self.load().await?;
        if !existed {
            persist(&self.path, &table).await?;
            info!(symbols = table.len(), "Price table created from seed");
        }

        info!(symbols = table.len(), "JSON price store connected");
        Ok(Arc::new(JsonConnection {
            path: self.path.clone(),
            table: RwLock::new(table),
            dirty: AtomicBool::new(false),
            open: AtomicBool::new(true),
        }))
    }

    async fn read_prices(&self) -> Result<Vec<PriceRecord>> {
        let table = self.load().await?;
        Ok(table
            .into_iter()
            .map(|(symbol, price)| PriceRecord::new(symbol, price))
            .collect())
    }
}

struct JsonConnection {
    path: PathBuf,
    table: RwLock<Table>,
    dirty: AtomicBool,
    open: AtomicBool,
}

impl JsonConnection {
    fn ensure_open(&self) -> Result<()> {
        anyhow::ensure!(self.open.load(Ordering::SeqCst), "connection is closed");
        Ok(())
    }

    async fn persist_if_dirty(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Err(e) = persist(&self.path, &table).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for JsonConnection {
    async fn list_all_symbol_prices(&self) -> Result<Vec<PriceRecord>> {
        self.ensure_open()?;
        Ok(self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(symbol, price)| PriceRecord::new(symbol.clone(), *price))
            .collect())
    }

    async fn set_price(&self, symbol: &str, price: u64) -> Result<()> {
        self.ensure_open()?;
        {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            let slot = table
                .get_mut(symbol)
                .ok_or_else(|| anyhow::anyhow!("unknown symbol {symbol}"))?;
            *slot = price.max(MIN_PRICE);
        }
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.persist_if_dirty().await
    }

    async fn disconnect(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.persist_if_dirty().await {
            warn!(error = %e, path = %self.path.display(), "Failed to persist price table on disconnect");
        }
        debug!("JSON price store disconnected");
    }
}
