//! The worker-pool scheduler.
//!
//! A fixed, symmetric pool of OS threads runs ready behaviors. Each
//! worker owns a local deque; spill-over and externally scheduled work go
//! through a global injector, and idle workers steal from peers starting
//! at a random position. There is no designated main executor: any worker
//! may run any behavior.
//!
//! A behavior either fully acquires its cowns and runs to completion on
//! one worker, or parks itself in a busy cown's backlog and is
//! re-injected when that cown releases. Workers never block holding
//! partial acquisitions.
//!
//! Workers publish their observed epoch at a configurable cadence and
//! whenever they go idle, driving the deferred-reclamation clock.

use crate::behavior::{Acquire, Behavior};
use crate::config::SchedulerConfig;
use crate::cown::{Cown, CownRef};
use crate::epoch::EpochManager;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex};
use sorrel_region::RegionRoot;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace};

/// Scheduler activity counters.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Behaviors run to completion.
    pub behaviors_run: AtomicU64,
    /// Acquisition attempts that parked on a busy cown.
    pub acquisitions_parked: AtomicU64,
    /// Behaviors stolen from a peer's deque.
    pub steals: AtomicU64,
    /// Global epoch advances.
    pub epoch_advances: AtomicU64,
}

/// The runtime: worker pool, queues, and the epoch clock.
///
/// Dropping the runtime shuts the pool down and drains all deferred
/// reclamation.
pub struct Runtime {
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    injector: Injector<Arc<Behavior>>,
    stealers: Vec<Stealer<Arc<Behavior>>>,
    epoch: Arc<EpochManager>,
    /// Behaviors scheduled but not yet completed (queued, backlogged, or
    /// running).
    in_flight: AtomicUsize,
    idle_lock: Mutex<()>,
    idle_cv: Condvar,
    work_lock: Mutex<()>,
    work_cv: Condvar,
    shutdown: AtomicBool,
    config: SchedulerConfig,
    stats: SchedulerStats,
}

impl Runtime {
    /// Start a runtime with the given configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        config.validate().expect("invalid scheduler configuration");

        let workers: Vec<Worker<Arc<Behavior>>> =
            (0..config.workers).map(|_| Worker::new_fifo()).collect();
        let stealers = workers.iter().map(Worker::stealer).collect();

        let inner = Arc::new(Inner {
            injector: Injector::new(),
            stealers,
            epoch: Arc::new(EpochManager::new(config.workers)),
            in_flight: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle_cv: Condvar::new(),
            work_lock: Mutex::new(()),
            work_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            config,
            stats: SchedulerStats::default(),
        });

        let handles = workers
            .into_iter()
            .enumerate()
            .map(|(index, local)| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("sorrel-worker-{index}"))
                    .spawn(move || worker_main(&inner, &local, index))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!(workers = inner.config.workers, "runtime started");
        Runtime {
            inner,
            handles: Mutex::new(handles),
        }
    }

    /// Start a runtime with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SchedulerConfig::default())
    }

    /// Promote an owned region into a cown managed by this runtime.
    pub fn promote(&self, root: RegionRoot) -> CownRef {
        Cown::promote(root, self.inner.epoch.clone())
    }

    /// Schedule a behavior: run `f` once every cown in `cowns` is
    /// exclusively acquired.
    pub fn when(&self, cowns: &[CownRef], f: impl FnOnce() + Send + 'static) {
        let behavior = Behavior::new(cowns, f);
        for cown in behavior.cowns() {
            cown.get().register_pending();
        }
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        self.inner.inject(behavior);
    }

    /// Block until every scheduled behavior has completed.
    pub fn run_until_idle(&self) {
        let mut guard = self.inner.idle_lock.lock();
        while self.inner.in_flight.load(Ordering::Acquire) > 0 {
            self.inner
                .idle_cv
                .wait_for(&mut guard, Duration::from_millis(10));
        }
    }

    /// Stop the worker pool and drain deferred reclamation. Idempotent.
    ///
    /// Behaviors still queued when shutdown begins do not run; call
    /// [`Runtime::run_until_idle`] first for a graceful stop.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _guard = self.inner.work_lock.lock();
        }
        self.inner.work_cv.notify_all();
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
        // No workers left: every retirement is safe to free.
        self.inner.epoch.drain_all();
        debug!("runtime stopped");
    }

    /// Scheduler activity counters.
    pub fn stats(&self) -> &SchedulerStats {
        &self.inner.stats
    }

    /// The epoch clock, for introspection.
    pub fn epoch_manager(&self) -> &EpochManager {
        &self.inner.epoch
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    /// Push a behavior onto the global queue and wake a worker.
    fn inject(&self, behavior: Arc<Behavior>) {
        self.injector.push(behavior);
        {
            let _guard = self.work_lock.lock();
        }
        self.work_cv.notify_one();
    }

    /// Run the acquisition protocol for one popped behavior and, on
    /// success, the behavior itself.
    fn run_behavior(&self, behavior: Arc<Behavior>) {
        let mut reinject = |b: Arc<Behavior>| self.inject(b);
        match behavior.try_acquire(&mut reinject) {
            Acquire::Ready => {
                trace!(behavior = ?behavior, "running behavior");
                behavior.run();
                behavior.release_all(&mut reinject);
                for cown in behavior.cowns() {
                    cown.get().complete_pending();
                }
                self.stats.behaviors_run.fetch_add(1, Ordering::Relaxed);
                if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let _guard = self.idle_lock.lock();
                    drop(_guard);
                    self.idle_cv.notify_all();
                }
            }
            Acquire::Parked => {
                self.stats
                    .acquisitions_parked
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn publish_epoch(&self, index: usize) {
        self.epoch.publish(index);
        if self.epoch.try_advance() {
            self.stats.epoch_advances.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// Worker loop
// =============================================================================

fn worker_main(inner: &Inner, local: &Worker<Arc<Behavior>>, index: usize) {
    let mut rng = StealRng::new(index as u64 + 1);
    let mut ticks: u32 = 0;
    trace!(worker = index, "worker started");

    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        match find_task(inner, local, index, &mut rng) {
            Some(behavior) => inner.run_behavior(behavior),
            None => {
                // Idle boundary: publish eagerly, then park until work
                // arrives or the timeout elapses.
                inner.publish_epoch(index);
                let mut guard = inner.work_lock.lock();
                if inner.injector.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
                    inner
                        .work_cv
                        .wait_for(&mut guard, inner.config.park_timeout);
                }
            }
        }

        ticks = ticks.wrapping_add(1);
        if ticks % inner.config.epoch_cadence == 0 {
            inner.publish_epoch(index);
        }
    }

    trace!(worker = index, "worker stopped");
}

/// Pop local work, then global, then steal from a random peer.
fn find_task(
    inner: &Inner,
    local: &Worker<Arc<Behavior>>,
    index: usize,
    rng: &mut StealRng,
) -> Option<Arc<Behavior>> {
    if let Some(behavior) = local.pop() {
        return Some(behavior);
    }

    loop {
        match inner.injector.steal_batch_and_pop(local) {
            Steal::Success(behavior) => return Some(behavior),
            Steal::Empty => break,
            Steal::Retry => {}
        }
    }

    let peers = inner.stealers.len();
    let start = rng.next_usize(peers);
    for offset in 0..peers {
        let peer = (start + offset) % peers;
        if peer == index {
            continue;
        }
        loop {
            match inner.stealers[peer].steal() {
                Steal::Success(behavior) => {
                    inner.stats.steals.fetch_add(1, Ordering::Relaxed);
                    return Some(behavior);
                }
                Steal::Empty => break,
                Steal::Retry => {}
            }
        }
    }

    None
}

/// Small xorshift generator for randomized steal starts.
struct StealRng(u64);

impl StealRng {
    fn new(seed: u64) -> Self {
        StealRng(seed | 1)
    }

    fn next_usize(&mut self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x % bound as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorrel_core::DescriptorBuilder;
    use sorrel_region::{Region, RegionKind};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runtime_starts_and_stops() {
        let rt = Runtime::new(SchedulerConfig::with_workers(2));
        rt.run_until_idle();
        rt.shutdown();
        // Idempotent.
        rt.shutdown();
    }

    #[test]
    fn test_behavior_with_no_cowns_runs() {
        let rt = Runtime::new(SchedulerConfig::with_workers(2));
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        rt.when(&[], move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        rt.run_until_idle();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(rt.stats().behaviors_run.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_single_cown_behaviors_all_run() {
        let rt = Runtime::new(SchedulerConfig::with_workers(4));
        let desc = DescriptorBuilder::new("Payload").data_bytes(8).build();
        let cown = rt.promote(Region::create(RegionKind::Trace, desc));

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let flag = ran.clone();
            rt.when(std::slice::from_ref(&cown), move || {
                flag.fetch_add(1, Ordering::SeqCst);
            });
        }
        rt.run_until_idle();
        assert_eq!(ran.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_duplicate_cowns_in_set_collapse() {
        let rt = Runtime::new(SchedulerConfig::with_workers(2));
        let desc = DescriptorBuilder::new("Payload").build();
        let cown = rt.promote(Region::create(RegionKind::Trace, desc));

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        // The same cown twice must not self-deadlock.
        rt.when(&[cown.clone(), cown.clone()], move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        rt.run_until_idle();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
