//! System Adapters - Process Memory Probing and Reclamation
//!
//! On non-MSVC targets the process runs on jemalloc and both the probe
//! and the reclaimer talk to it directly. Elsewhere the feed runs with a
//! fixed probe and no reclamation.

#[cfg(not(target_env = "msvc"))]
pub mod jemalloc;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ports::memory::{MemoryProbe, MemorySample, NoopReclaimer, Reclaimer};

/// Probe returning whatever was last set.
#[derive(Debug, Default)]
pub struct FixedProbe {
    heap_used_bytes: AtomicU64,
}

impl FixedProbe {
    pub fn new(heap_used_bytes: u64) -> Self {
        Self {
            heap_used_bytes: AtomicU64::new(heap_used_bytes),
        }
    }

    pub fn set(&self, heap_used_bytes: u64) {
        self.heap_used_bytes.store(heap_used_bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedProbe {
    fn sample(&self) -> MemorySample {
        let used = self.heap_used_bytes.load(Ordering::SeqCst);
        MemorySample {
            heap_used_bytes: used,
            resident_bytes: used,
        }
    }
}

/// Best probe for this target.
pub fn default_probe() -> Arc<dyn MemoryProbe> {
    #[cfg(not(target_env = "msvc"))]
    {
        Arc::new(jemalloc::JemallocProbe)
    }
    #[cfg(target_env = "msvc")]
    {
        Arc::new(FixedProbe::default())
    }
}

/// Best reclaimer for this target; `enabled = false` forces the no-op.
pub fn default_reclaimer(enabled: bool) -> Arc<dyn Reclaimer> {
    if !enabled {
        return Arc::new(NoopReclaimer);
    }
    #[cfg(not(target_env = "msvc"))]
    {
        Arc::new(jemalloc::JemallocReclaimer)
    }
    #[cfg(target_env = "msvc")]
    {
        Arc::new(NoopReclaimer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_probe_reports_last_value() {
        let probe = FixedProbe::new(10);
        assert_eq!(probe.sample().heap_used_bytes, 10);
        probe.set(42);
        assert_eq!(probe.sample().heap_used_bytes, 42);
    }

    #[test]
    fn test_disabled_reclaimer_is_noop() {
        let reclaimer = default_reclaimer(false);
        assert_eq!(reclaimer.name(), "noop");
        assert!(!reclaimer.reclaim());
    }

    #[test]
    fn test_reclaim_flag_selects_reclaimer() {
        let config = crate::config::loader::parse_config("[memory]\nreclaim = false\n").unwrap();
        assert_eq!(default_reclaimer(config.memory.reclaim).name(), "noop");

        let config = crate::config::loader::parse_config("").unwrap();
        assert!(config.memory.reclaim);
        #[cfg(not(target_env = "msvc"))]
        assert_eq!(default_reclaimer(config.memory.reclaim).name(), "jemalloc");
    }
}
