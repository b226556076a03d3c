//! Price Store Adapters
//!
//! Two `PriceStore` implementations selected by `store.backend`:
//! - `memory`: process-local table, shared with the read-only prices route
//! - `json`: `{symbol: price}` file persisted atomically after every tick

pub mod json_store;
pub mod memory_store;

use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::ports::price_store::PriceStore;

pub use json_store::JsonFilePriceStore;
pub use memory_store::InMemoryPriceStore;

/// Build the store described by `config`.
pub fn from_config(config: &StoreConfig) -> Arc<dyn PriceStore> {
    match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryPriceStore::with_prices(
            config.seed.iter().map(|(s, p)| (s.clone(), *p)),
        )),
        StoreBackend::Json => Arc::new(JsonFilePriceStore::new(&config.path, config.seed.clone())),
    }
}
