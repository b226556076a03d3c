//! Use Cases Layer - Price Feed Workflows
//!
//! Orchestrates the domain with the store, memory and telemetry ports.
//!
//! Use cases:
//! - `FeedController`: Start/stop/restart/configure state machine
//! - `BatchExecutor`: One chunked pass of the random walk
//! - `ResourceMonitor`: Memory sampling, reclamation, interval advice
//! - `RepeatingTask`: Cancellable fixed-period timer

pub mod batch_executor;
pub mod feed_controller;
pub mod resource_monitor;
pub mod scheduler;
