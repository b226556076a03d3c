//! Memory Port - Process Memory Sampling and Reclamation
//!
//! Reclamation is best-effort: a runtime without an explicit trigger
//! uses `NoopReclaimer`, which simply reports that nothing happened.

use serde::Serialize;

/// One memory reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
  /// Bytes currently allocated on the heap.
  pub heap_used_bytes: u64,
  /// Bytes resident in physical memory.
  pub resident_bytes: u64,
}

/// Reads current process memory usage.
pub trait MemoryProbe: Send + Sync {
  fn sample(&self) -> MemorySample;
}

/// Asks the allocator to hand memory back.
pub trait Reclaimer: Send + Sync {
  /// Attempt reclamation. Returns `false` when unsupported or failed.
  fn reclaim(&self) -> bool;

  /// Short name for logs.
  fn name(&self) -> &'static str;
}

/// Reclaimer for runtimes with no explicit trigger.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReclaimer;

impl Reclaimer for NoopReclaimer {
  fn reclaim(&self) -> bool {
    false
  }

  fn name(&self) -> &'static str {
    "noop"
  }
}
