//! Epoch-based deferred reclamation.
//!
//! A process-wide logical clock bounds when memory handed to the
//! reclamation layer may be physically freed. Each worker periodically
//! publishes the epoch it has observed; a retirement recorded at epoch
//! `e` is freed only once every worker has published an epoch greater
//! than `e` — at which point no worker can still hold a transient
//! reference taken before the retirement.
//!
//! The clock only advances cooperatively: when every worker has published
//! the current epoch, any worker may bump it. A worker stuck inside a
//! long behavior simply delays reclamation; it never blocks other
//! workers.

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// A deferred free: the closure releases the retired memory.
struct Deferred {
    epoch: u64,
    free: Box<dyn FnOnce() + Send>,
}

/// Global epoch clock plus per-worker published epochs and the
/// deferred-free list.
pub struct EpochManager {
    /// Monotonically increasing global epoch.
    global: AtomicU64,
    /// Last epoch each worker published. Padded: slots are written by
    /// different threads at a steady cadence.
    slots: Box<[CachePadded<AtomicU64>]>,
    /// Retired allocations awaiting a safe epoch.
    deferred: Mutex<Vec<Deferred>>,
}

impl EpochManager {
    /// Create a manager for `workers` participating threads.
    ///
    /// All slots start at the initial epoch, so nothing retired is freed
    /// before every worker has had a chance to publish.
    pub fn new(workers: usize) -> Self {
        Self {
            global: AtomicU64::new(1),
            slots: (0..workers)
                .map(|_| CachePadded::new(AtomicU64::new(1)))
                .collect(),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// The current global epoch.
    #[inline]
    pub fn current(&self) -> u64 {
        self.global.load(Ordering::Acquire)
    }

    /// Publish the calling worker's observed epoch.
    #[inline]
    pub fn publish(&self, worker: usize) {
        let epoch = self.global.load(Ordering::Acquire);
        self.slots[worker].store(epoch, Ordering::Release);
    }

    /// Retire an allocation: `free` runs once no worker can still
    /// observe it.
    pub fn retire(&self, free: impl FnOnce() + Send + 'static) {
        let epoch = self.global.load(Ordering::Acquire);
        self.deferred.lock().push(Deferred {
            epoch,
            free: Box::new(free),
        });
    }

    /// Advance the global epoch if every worker has caught up, then free
    /// whatever has become safe. Returns true if the epoch advanced.
    pub fn try_advance(&self) -> bool {
        let current = self.global.load(Ordering::Acquire);
        let all_caught_up = self
            .slots
            .iter()
            .all(|s| s.load(Ordering::Acquire) >= current);

        let advanced = all_caught_up
            && self
                .global
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
        if advanced {
            trace!(epoch = current + 1, "advanced global epoch");
        }

        self.reclaim();
        advanced
    }

    /// Free every retirement whose recorded epoch precedes the minimum
    /// published epoch.
    fn reclaim(&self) {
        let min_published = self
            .slots
            .iter()
            .map(|s| s.load(Ordering::Acquire))
            .min()
            .unwrap_or(u64::MAX);

        let ready: Vec<Deferred> = {
            let mut deferred = self.deferred.lock();
            let mut ready = Vec::new();
            let mut index = 0;
            while index < deferred.len() {
                if deferred[index].epoch < min_published {
                    ready.push(deferred.swap_remove(index));
                } else {
                    index += 1;
                }
            }
            ready
        };

        // Run the frees outside the lock: a free may itself retire
        // (sub-region chains through cown payloads).
        for d in ready {
            (d.free)();
        }
    }

    /// Free everything unconditionally. Only valid once all workers have
    /// stopped: with no possible observers left, no deferral is needed.
    pub fn drain_all(&self) {
        let pending: Vec<Deferred> = std::mem::take(&mut *self.deferred.lock());
        for d in pending {
            (d.free)();
        }
    }

    /// Number of retirements still waiting. For tests and introspection.
    pub fn pending(&self) -> usize {
        self.deferred.lock().len()
    }
}
