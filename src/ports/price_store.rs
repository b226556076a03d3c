//! Price Store Port - Symbol → Price Table Interface
//!
//! The feed never caches authoritative prices: every tick lists the
//! table through a connection owned by the feed controller and writes
//! each new price back individually.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::price::PriceRecord;

/// Factory for exclusive store connections.
///
/// `connect` is called once per `start()`. A failure leaves the feed
/// stopped and is not retried automatically.
#[async_trait]
pub trait PriceStore: Send + Sync + 'static {
  /// Open a connection the feed will own while running.
  async fn connect(&self) -> anyhow::Result<Arc<dyn StoreConnection>>;

  /// Read-only view of the current table for downstream consumers
  /// (dashboards, valuation). Does not touch the feed's connection.
  async fn read_prices(&self) -> anyhow::Result<Vec<PriceRecord>>;
}

/// A live connection to the price table.
#[async_trait]
pub trait StoreConnection: Send + Sync {
  /// Snapshot every symbol with its current price.
  async fn list_all_symbol_prices(&self) -> anyhow::Result<Vec<PriceRecord>>;

  /// Persist a new price. Unknown symbols are an error.
  async fn set_price(&self, symbol: &str, price: u64) -> anyhow::Result<()>;

  /// Make the writes of the finished tick durable.
  async fn flush(&self) -> anyhow::Result<()>;

  /// Close the connection. Further writes fail.
  async fn disconnect(&self);
}
