//! jemalloc probe and reclaimer.
//!
//! Statistics are cached by jemalloc and only refreshed when the epoch
//! advances, so every sample advances it first.

use tikv_jemalloc_ctl::{epoch, stats};
use tracing::debug;

use crate::ports::memory::{MemoryProbe, MemorySample, Reclaimer};

/// `MALLCTL_ARENAS_ALL` purge.
const PURGE_ALL_ARENAS: &[u8] = b"arena.4096.purge\0";

/// Reads `stats.allocated` and `stats.resident`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JemallocProbe;

impl MemoryProbe for JemallocProbe {
    fn sample(&self) -> MemorySample {
        if let Err(e) = epoch::advance() {
            debug!(error = %e, "jemalloc epoch advance failed");
        }
        let allocated = stats::allocated::read().unwrap_or(0);
        let resident = stats::resident::read().unwrap_or(0);
        MemorySample {
            heap_used_bytes: allocated as u64,
            resident_bytes: resident as u64,
        }
    }
}

/// Returns dirty pages of every arena to the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct JemallocReclaimer;

impl Reclaimer for JemallocReclaimer {
    fn reclaim(&self) -> bool {
        // SAFETY: the name is NUL-terminated and purge takes no input or
        // output, so all pointers may be null.
        let rc = unsafe {
            tikv_jemalloc_sys::mallctl(
                PURGE_ALL_ARENAS.as_ptr().cast(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                0,
            )
        };
        if rc != 0 {
            debug!(rc, "jemalloc arena purge failed");
        }
        rc == 0
    }

    fn name(&self) -> &'static str {
        "jemalloc"
    }
}
