//! Telemetry Port - Feed Observability Sink
//!
//! Usecases report what happened; adapters decide how to export it.
//! Every method defaults to a no-op so sinks only implement what they
//! care about.

use std::time::Duration;

use crate::domain::feed::{FeedPhase, TickReport};
use crate::ports::memory::MemorySample;

/// Receives feed events.
pub trait FeedTelemetry: Send + Sync {
  /// A tick finished.
  fn on_tick(&self, _report: &TickReport, _elapsed: Duration) {}

  /// Timer fires dropped because a tick overran its interval.
  fn on_skipped_fires(&self, _count: u64) {}

  /// The feed changed phase.
  fn on_phase(&self, _phase: FeedPhase) {}

  /// The effective tick interval changed.
  fn on_interval(&self, _interval_ms: u64) {}

  /// A restart was performed.
  fn on_restart(&self) {}

  /// A memory sample was taken.
  fn on_memory(&self, _sample: &MemorySample) {}

  /// Reclamation actually ran.
  fn on_reclaim(&self) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl FeedTelemetry for NoopTelemetry {}
