//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! infrastructure. Each sub-module groups adapters by concern.
//!
//! Adapter categories:
//! - `http`: axum control API, health probes and `/metrics`
//! - `metrics`: Prometheus export of feed telemetry
//! - `store`: in-memory and JSON-file price tables
//! - `system`: jemalloc memory probe and reclaimer

pub mod http;
pub mod metrics;
pub mod store;
pub mod system;
