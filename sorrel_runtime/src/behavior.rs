//! Behaviors and the ordered acquisition protocol.
//!
//! A behavior is a closure plus the set of cowns it needs. The set is
//! canonicalized at creation: sorted by cown id and deduplicated, so
//! every behavior that touches overlapping cowns attempts them in the
//! same total order regardless of how the program spelled the set.
//!
//! Acquisition never waits while holding: on the first busy cown the
//! behavior parks itself in that cown's backlog and releases everything
//! it had taken. Two behaviors can therefore never each hold a prefix of
//! the other's needs — the circular wait underlying deadlock cannot
//! form, and no worker thread is ever parked holding partial
//! acquisitions.

use crate::cown::CownRef;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::trace;

type Closure = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// Every required cown is held; the closure may run.
    Ready,
    /// A cown was busy; the behavior is parked in its backlog and holds
    /// nothing.
    Parked,
}

/// A pending unit of work bound to an ordered set of cowns.
pub struct Behavior {
    /// Required cowns, sorted by id, deduplicated.
    cowns: SmallVec<[CownRef; 4]>,
    /// The work. Taken exactly once, when all cowns are held.
    closure: Mutex<Option<Closure>>,
}

impl Behavior {
    /// Canonicalize the cown set and wrap the closure.
    pub(crate) fn new(cowns: &[CownRef], f: impl FnOnce() + Send + 'static) -> Arc<Self> {
        let mut set: SmallVec<[CownRef; 4]> = cowns.iter().cloned().collect();
        set.sort_by_key(CownRef::id);
        set.dedup_by_key(|c| c.id());
        Arc::new(Behavior {
            cowns: set,
            closure: Mutex::new(Some(Box::new(f))),
        })
    }

    /// The canonicalized cown set.
    pub(crate) fn cowns(&self) -> &[CownRef] {
        &self.cowns
    }

    /// Attempt to acquire every required cown, in canonical order.
    ///
    /// On conflict the behavior parks in the busy cown's backlog,
    /// releases the prefix it had taken (re-injecting any behavior those
    /// releases wake), and reports [`Acquire::Parked`].
    pub(crate) fn try_acquire(
        self: &Arc<Self>,
        reinject: &mut dyn FnMut(Arc<Behavior>),
    ) -> Acquire {
        for (index, cown) in self.cowns.iter().enumerate() {
            let mut sched = cown.get().sched.lock();
            if sched.held {
                sched.backlog.push_back(self.clone());
                drop(sched);
                trace!(blocked_on = cown.id(), "behavior parked");
                self.release_range(..index, reinject);
                return Acquire::Parked;
            }
            sched.held = true;
        }
        Acquire::Ready
    }

    /// Run the closure. Requires a preceding [`Acquire::Ready`].
    pub(crate) fn run(&self) {
        let closure = self
            .closure
            .lock()
            .take()
            .expect("behavior executed twice");
        closure();
    }

    /// Release every required cown, waking one backlogged behavior per
    /// cown.
    pub(crate) fn release_all(&self, reinject: &mut dyn FnMut(Arc<Behavior>)) {
        self.release_range(.., reinject);
    }

    fn release_range(
        &self,
        range: impl std::slice::SliceIndex<[CownRef], Output = [CownRef]>,
        reinject: &mut dyn FnMut(Arc<Behavior>),
    ) {
        for cown in &self.cowns[range] {
            let woken = {
                let mut sched = cown.get().sched.lock();
                debug_assert!(sched.held);
                sched.held = false;
                sched.backlog.pop_front()
            };
            // Wake outside the cown's mutex.
            if let Some(next) = woken {
                reinject(next);
            }
        }
    }
}

impl std::fmt::Debug for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<u64> = self.cowns.iter().map(CownRef::id).collect();
        write!(f, "Behavior(cowns = {ids:?})")
    }
}
