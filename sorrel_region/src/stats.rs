//! Region subsystem statistics.
//!
//! Process-wide counters in the style of a collector's stats block:
//! plain atomics, `Relaxed` ordering, cheap enough to leave on.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for allocation and reclamation activity.
#[derive(Debug)]
pub struct RegionStats {
    /// Total objects allocated into regions.
    pub objects_allocated: AtomicU64,
    /// Total bytes handed out to region objects.
    pub bytes_allocated: AtomicU64,
    /// Objects finalized during tidy or drop.
    pub objects_finalized: AtomicU64,
    /// Objects physically freed.
    pub objects_freed: AtomicU64,
    /// Bytes returned to the allocator (object or chunk granularity).
    pub bytes_freed: AtomicU64,
    /// Regions created.
    pub regions_created: AtomicU64,
    /// Regions fully dropped.
    pub regions_dropped: AtomicU64,
    /// In-place collections run.
    pub tidy_runs: AtomicU64,
}

impl RegionStats {
    const fn new() -> Self {
        Self {
            objects_allocated: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            objects_finalized: AtomicU64::new(0),
            objects_freed: AtomicU64::new(0),
            bytes_freed: AtomicU64::new(0),
            regions_created: AtomicU64::new(0),
            regions_dropped: AtomicU64::new(0),
            tidy_runs: AtomicU64::new(0),
        }
    }

    /// Record an object allocation.
    #[inline]
    pub fn record_allocation(&self, size: usize) {
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record a finalizer run.
    #[inline]
    pub fn record_finalized(&self) {
        self.objects_finalized.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a physical free.
    #[inline]
    pub fn record_freed(&self, objects: u64, bytes: usize) {
        self.objects_freed.fetch_add(objects, Ordering::Relaxed);
        self.bytes_freed.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

static STATS: RegionStats = RegionStats::new();

/// Process-wide region statistics.
#[inline]
pub fn stats() -> &'static RegionStats {
    &STATS
}
