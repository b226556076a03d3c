//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Traits the use cases depend on; adapters provide the implementations.
//!
//! Ports:
//! - `PriceStore` / `StoreConnection`: the symbol → price table
//! - `MemoryProbe` / `Reclaimer`: process memory
//! - `FeedTelemetry`: observability sink

pub mod memory;
pub mod price_store;
pub mod telemetry;
