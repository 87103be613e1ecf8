//! Region facade: the strategy dispatch and the owning handle.
//!
//! A region is created with one of two reclamation strategies and never
//! changes strategy. The externally visible handle is [`RegionRoot`], an
//! owning reference to the entrypoint: dropping the root reclaims the
//! region (the "drop" operation), [`RegionRoot::tidy`] collects in place,
//! and ownership transfer (storing the root into another object's field,
//! promotion to a cown) consumes the root without reclaiming.
//!
//! Reclaiming a region can uncover owned sub-regions (enqueued by
//! finalizers of dying owner objects). These are drained with an explicit
//! worklist so deeply nested ownership chains cannot overflow the stack.

use crate::arena::ArenaRegion;
use crate::config::RegionConfig;
use crate::registry;
use crate::stats::stats;
use crate::trace_region::TraceRegion;
use sorrel_core::{Descriptor, Object, ObjectStack, Reference};
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use tracing::debug;

/// Reclamation strategy, chosen at region creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Objects individually tracked, reclaimed by reachability.
    Trace,
    /// Bump-allocated, freed wholesale; `tidy` is a no-op.
    Arena,
}

/// A region: one entrypoint, one strategy, a set of objects.
pub enum Region {
    /// Tracing strategy.
    Trace(TraceRegion),
    /// Arena strategy.
    Arena(ArenaRegion),
}

impl Region {
    /// Create a region of the given kind whose entrypoint is a fresh
    /// object of `desc`, using the default configuration.
    pub fn create(kind: RegionKind, desc: &'static Descriptor) -> RegionRoot {
        Self::create_with_config(kind, desc, &RegionConfig::default())
    }

    /// Create a region with an explicit configuration.
    pub fn create_with_config(
        kind: RegionKind,
        desc: &'static Descriptor,
        config: &RegionConfig,
    ) -> RegionRoot {
        config.validate().expect("invalid region configuration");

        let region = Box::new(match kind {
            RegionKind::Trace => Region::Trace(TraceRegion::new(config.mark_capacity)),
            RegionKind::Arena => Region::Arena(ArenaRegion::new(config.arena_chunk_size)),
        });
        // The box's address is the region's identity: every member's
        // owner word points at it.
        let raw = Box::into_raw(region);
        let entry = unsafe { (*raw).alloc_raw(desc) };
        match unsafe { &mut *raw } {
            Region::Trace(r) => r.set_entry(entry),
            Region::Arena(r) => r.set_entry(entry),
        }
        registry::register(entry, raw);
        stats().regions_created.fetch_add(1, Ordering::Relaxed);
        debug!(kind = ?kind, entry = ?entry, "created region");

        RegionRoot { entry }
    }

    /// Allocate a new member object.
    fn alloc_raw(&mut self, desc: &'static Descriptor) -> NonNull<Object> {
        let region = self as *mut Region as *mut ();
        match self {
            Region::Trace(r) => r.alloc(desc, region),
            Region::Arena(r) => r.alloc(desc, region),
        }
    }

    /// The region's entrypoint.
    pub fn entry(&self) -> NonNull<Object> {
        match self {
            Region::Trace(r) => r.entry(),
            Region::Arena(r) => r.entry(),
        }
    }

    /// This region's strategy.
    pub fn kind(&self) -> RegionKind {
        match self {
            Region::Trace(_) => RegionKind::Trace,
            Region::Arena(_) => RegionKind::Arena,
        }
    }

    fn tidy(&mut self, sub_regions: &mut ObjectStack) {
        let region = self as *mut Region as *mut ();
        match self {
            Region::Trace(r) => r.tidy(region, sub_regions),
            Region::Arena(r) => r.tidy(),
        }
    }

    fn release(&mut self, sub_regions: &mut ObjectStack) {
        match self {
            Region::Trace(r) => r.release(sub_regions),
            Region::Arena(r) => r.release(sub_regions),
        }
    }
}

/// Allocate a new object into the region that owns `target`.
///
/// `target` may be any member of the region, not just the entrypoint.
/// Contract: the caller holds the owning reference chain for that region
/// (regions are never accessed by two threads at once), and the region is
/// live. Violations are the caller's bug; the runtime does not defend
/// against them beyond the null check.
pub fn alloc_in(target: Reference, desc: &'static Descriptor) -> Reference {
    let region = target.owner() as *mut Region;
    assert!(
        !region.is_null(),
        "allocation target is not a region member"
    );
    let obj = unsafe { (*region).alloc_raw(desc) };
    Reference::new(obj)
}

/// In-place collection of the region rooted at `entry`. Entrypoint
/// retained; owned sub-regions of dying objects are fully dropped.
pub(crate) fn tidy_entry(entry: NonNull<Object>) {
    let region = registry::resolve(entry)
        .expect("tidy on a dead or foreign entrypoint (contract violation)")
        .0;
    let mut sub_regions = ObjectStack::new();
    unsafe { (*region).tidy(&mut sub_regions) };
    drain_sub_regions(&mut sub_regions);
}

/// Fully reclaim the region rooted at `entry`, then every owned
/// sub-region discovered during reclamation, iteratively.
pub(crate) fn release_entry(entry: NonNull<Object>) {
    let mut sub_regions = ObjectStack::new();
    release_one(entry, &mut sub_regions);
    drain_sub_regions(&mut sub_regions);
}

fn drain_sub_regions(sub_regions: &mut ObjectStack) {
    while let Some(entry) = sub_regions.pop() {
        release_one(entry, sub_regions);
    }
}

fn release_one(entry: NonNull<Object>, sub_regions: &mut ObjectStack) {
    let Some(region) = registry::take(entry) else {
        panic!("drop of a dead or foreign region entrypoint (contract violation)");
    };
    // Re-box: the region was leaked at creation and dies here.
    let mut region = unsafe { Box::from_raw(region.0) };
    region.release(sub_regions);
    stats().regions_dropped.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// Owning handle
// =============================================================================

/// The owned reference to a region's entrypoint.
///
/// Exactly one `RegionRoot` exists per region (the type system upstream
/// guarantees owned references are unique). Dropping the root reclaims
/// the region and, recursively, every region it owns.
pub struct RegionRoot {
    entry: NonNull<Object>,
}

impl RegionRoot {
    /// An unowned reference to the entrypoint (the "view" operation).
    #[inline]
    pub fn view(&self) -> Reference {
        Reference::new(self.entry)
    }

    /// In-place collection; the entrypoint and everything reachable from
    /// it survive.
    pub fn tidy(&self) {
        tidy_entry(self.entry);
    }

    /// Consume the root without reclaiming, returning the raw entrypoint.
    ///
    /// Used when ownership moves into the object graph (an owning field)
    /// or into a cown. The receiver becomes responsible for eventually
    /// releasing the region.
    pub fn into_entry(self) -> NonNull<Object> {
        let entry = self.entry;
        std::mem::forget(self);
        entry
    }

    /// Re-form an owning root from a raw entrypoint.
    ///
    /// # Safety
    ///
    /// `entry` must root a live region with no other owning reference
    /// outstanding.
    pub unsafe fn from_entry(entry: NonNull<Object>) -> Self {
        RegionRoot { entry }
    }
}

impl Drop for RegionRoot {
    fn drop(&mut self) {
        release_entry(self.entry);
    }
}

impl std::fmt::Debug for RegionRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegionRoot({:p})", self.entry)
    }
}

// Safety: an owning handle moves between threads with its region; access
// remains single-threaded by construction.
unsafe impl Send for RegionRoot {}

#[cfg(test)]
mod tests {
    use super::*;
    use sorrel_core::{finalize_region_fields, DescriptorBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_create_and_drop_trace_region() {
        let desc = DescriptorBuilder::new("Root").field("a").build();
        let root = Region::create(RegionKind::Trace, desc);
        let entry = root.view();
        assert!(entry.is_entrypoint());
        assert!(registry::is_live_entrypoint(entry.as_non_null()));
        drop(root);
    }

    #[test]
    fn test_registry_cleared_after_drop() {
        let desc = DescriptorBuilder::new("Root").build();
        let root = Region::create(RegionKind::Trace, desc);
        let entry = root.view().as_non_null();
        drop(root);
        assert!(!registry::is_live_entrypoint(entry));
    }

    #[test]
    fn test_alloc_in_resolves_region_from_any_member() {
        let desc = DescriptorBuilder::new("Node").field("next").build();
        let root = Region::create(RegionKind::Trace, desc);
        let entry = root.view();

        let child = alloc_in(entry, desc);
        entry.set_field(0, Some(child.as_non_null()));
        // Allocating through the child lands in the same region.
        let grandchild = alloc_in(child, desc);
        assert_eq!(grandchild.owner(), entry.owner());
    }

    #[test]
    fn test_owned_subregion_dropped_with_parent() {
        static FINALIZED: AtomicUsize = AtomicUsize::new(0);
        fn count_finalize(
            obj: &mut Object,
            entry: Option<NonNull<Object>>,
            sub: &mut ObjectStack,
        ) {
            FINALIZED.fetch_add(1, Ordering::SeqCst);
            finalize_region_fields(obj, entry, sub);
        }

        let desc = DescriptorBuilder::new("Owner")
            .field("child_region")
            .finalizer(count_finalize)
            .build();

        let inner = Region::create(RegionKind::Trace, desc);
        let outer = Region::create(RegionKind::Trace, desc);
        // Transfer ownership of `inner` into a field of `outer`'s entry.
        outer
            .view()
            .set_field(0, Some(inner.into_entry()));

        drop(outer);
        // Both entrypoints were finalized: the outer region's release
        // discovered and dropped the inner region.
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_nested_subregion_chain() {
        let owner = DescriptorBuilder::new("ChainOwner")
            .field("child")
            .finalizer(finalize_region_fields)
            .build();

        // c owned by b owned by a.
        let c = Region::create(RegionKind::Trace, owner);
        let c_entry = c.view().as_non_null();
        let b = Region::create(RegionKind::Trace, owner);
        b.view().set_field(0, Some(c.into_entry()));
        let a = Region::create(RegionKind::Trace, owner);
        a.view().set_field(0, Some(b.into_entry()));

        drop(a);
        assert!(!registry::is_live_entrypoint(c_entry));
    }

    #[test]
    fn test_arena_subregion_exception() {
        // Arena members normally get no per-object work on drop, but an
        // object with a finalizer still releases its owned sub-region.
        let plain = DescriptorBuilder::new("Plain").build();
        let owner = DescriptorBuilder::new("ArenaOwner")
            .field("child")
            .finalizer(finalize_region_fields)
            .build();

        let inner = Region::create(RegionKind::Trace, plain);
        let inner_entry = inner.view().as_non_null();

        let arena = Region::create(RegionKind::Arena, plain);
        let holder = alloc_in(arena.view(), owner);
        holder.set_field(0, Some(inner.into_entry()));

        drop(arena);
        assert!(!registry::is_live_entrypoint(inner_entry));
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_double_drop_is_fatal() {
        let desc = DescriptorBuilder::new("Root").build();
        let root = Region::create(RegionKind::Trace, desc);
        let entry = root.view().as_non_null();
        drop(root);
        // Forging a second owning reference is exactly the misuse the
        // registry exists to catch.
        let forged = unsafe { RegionRoot::from_entry(entry) };
        drop(forged);
    }
}
