//! Cowns: concurrency-safe, single-writer object wrappers.
//!
//! A cown owns a private region holding its payload and exposes the
//! payload only through behaviors. At most one thread ever runs with a
//! given cown acquired; the scheduling state (held flag plus FIFO backlog
//! of waiting behaviors) lives behind a short mutex, which is the entire
//! per-cown critical section.
//!
//! Handles are reference counted by hand. The final release does not free
//! the cown directly: the cown and its payload region are retired to the
//! epoch manager, because another worker may still be holding a transient
//! pointer taken while the count dropped.

use crate::behavior::Behavior;
use crate::epoch::EpochManager;
use parking_lot::Mutex;
use sorrel_core::Reference;
use sorrel_region::RegionRoot;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Monotonic id source; ids define the canonical acquisition order.
static NEXT_COWN_ID: AtomicU64 = AtomicU64::new(1);

/// Scheduling state guarded by the cown's mutex.
pub(crate) struct CownSched {
    /// True while a behavior holds this cown exclusively.
    pub(crate) held: bool,
    /// Behaviors waiting for this cown, FIFO.
    pub(crate) backlog: VecDeque<Arc<Behavior>>,
}

/// A promoted object: payload region plus scheduling state.
pub struct Cown {
    id: u64,
    refcount: AtomicUsize,
    /// Behaviors scheduled but not yet completed that require this cown.
    pending: AtomicUsize,
    pub(crate) sched: Mutex<CownSched>,
    /// Entrypoint of the private payload region.
    payload: NonNull<sorrel_core::Object>,
    /// Epoch manager of the runtime this cown belongs to.
    epoch: Arc<EpochManager>,
}

// Safety: all mutable state is behind atomics or the sched mutex; the
// payload region is only touched by the thread whose behavior holds the
// cown.
unsafe impl Send for Cown {}
unsafe impl Sync for Cown {}

impl Cown {
    /// Promote an owned region into a cown. The region root is consumed:
    /// the cown now owns the region and releases it when the last handle
    /// drops.
    pub(crate) fn promote(root: RegionRoot, epoch: Arc<EpochManager>) -> CownRef {
        let cown = Box::new(Cown {
            id: NEXT_COWN_ID.fetch_add(1, Ordering::Relaxed),
            refcount: AtomicUsize::new(1),
            pending: AtomicUsize::new(0),
            sched: Mutex::new(CownSched {
                held: false,
                backlog: VecDeque::new(),
            }),
            payload: root.into_entry(),
            epoch,
        });
        let ptr = NonNull::from(Box::leak(cown));
        trace!(id = unsafe { ptr.as_ref() }.id, "promoted region to cown");
        CownRef { ptr }
    }

    /// This cown's position in the global acquisition order.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unowned reference to the payload.
    ///
    /// Contract: only meaningful from within a behavior that has this
    /// cown acquired (or before the cown is first shared).
    #[inline]
    pub fn payload(&self) -> Reference {
        Reference::new(self.payload)
    }

    /// Record one scheduled behavior requiring this cown. Fires the
    /// payload's `notified` hook when the cown gains pending work while
    /// idle.
    pub(crate) fn register_pending(&self) {
        let prev = self.pending.fetch_add(1, Ordering::AcqRel);
        if prev == 0 && !self.sched.lock().held {
            let payload = self.payload();
            if let Some(notified) = payload.descriptor().notified {
                notified(&payload);
            }
        }
    }

    /// Record one completed behavior that required this cown.
    pub(crate) fn complete_pending(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of scheduled-but-incomplete behaviors requiring this cown.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// A counted handle to a cown. Freely clonable and sendable; the cown
/// dies when the last handle drops and no behavior still references it.
pub struct CownRef {
    ptr: NonNull<Cown>,
}

// Safety: the handle is a counted pointer to a Sync structure.
unsafe impl Send for CownRef {}
unsafe impl Sync for CownRef {}

impl CownRef {
    #[inline]
    pub(crate) fn get(&self) -> &Cown {
        unsafe { self.ptr.as_ref() }
    }

    /// This cown's position in the global acquisition order.
    #[inline]
    pub fn id(&self) -> u64 {
        self.get().id()
    }

    /// Unowned reference to the payload. See [`Cown::payload`].
    #[inline]
    pub fn payload(&self) -> Reference {
        self.get().payload()
    }
}

impl Clone for CownRef {
    fn clone(&self) -> Self {
        self.get().refcount.fetch_add(1, Ordering::Relaxed);
        CownRef { ptr: self.ptr }
    }
}

impl Drop for CownRef {
    fn drop(&mut self) {
        if self.get().refcount.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);

        // Last handle gone: retire the cown and its payload region. The
        // physical free waits until every worker has moved past the
        // current epoch.
        let raw = RetiredCown(self.ptr);
        let epoch = self.get().epoch.clone();
        trace!(id = self.get().id, "retiring cown");
        epoch.retire(move || {
            // Capture the whole `RetiredCown` (which is `Send`), not just its
            // inner `NonNull` field, so the closure stays `Send` under
            // edition-2021 disjoint closure captures.
            let raw = raw;
            let cown = unsafe { Box::from_raw(raw.0.as_ptr()) };
            debug_assert_eq!(cown.pending.load(Ordering::Acquire), 0);
            // Reclaim the payload region through the normal drop path.
            drop(unsafe { RegionRoot::from_entry(cown.payload) });
        });
    }
}

impl std::fmt::Debug for CownRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CownRef(id = {})", self.id())
    }
}

/// Pointer wrapper so the retirement closure is `Send`.
struct RetiredCown(NonNull<Cown>);
unsafe impl Send for RetiredCown {}
