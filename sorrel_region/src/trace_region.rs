//! Tracing regions: individually tracked objects, reclaimed by
//! reachability from the entrypoint.
//!
//! Every allocation is tracked in a member list. `tidy` marks from the
//! entrypoint and frees what the mark did not reach; `drop` finalizes and
//! frees everything, entrypoint included. Finalizers of dying objects may
//! enqueue owned sub-regions, which the caller drains iteratively.
//!
//! Reclamation is a quiescent phase: no other thread accesses the region
//! while it runs. Finalizers for one collection all run before the first
//! free of that collection, so a finalizer never observes freed memory.

use crate::mark::Marker;
use crate::stats::stats;
use sorrel_core::{Object, ObjectStack, ObjectStatus};
use std::ptr::NonNull;
use tracing::debug;

/// A region whose objects are reclaimed by tracing from the entrypoint.
pub struct TraceRegion {
    /// All members, entrypoint included.
    members: Vec<NonNull<Object>>,
    entry: Option<NonNull<Object>>,
    marker: Marker,
}

impl TraceRegion {
    /// Create an empty tracing region.
    pub fn new(mark_capacity: usize) -> Self {
        Self {
            members: Vec::new(),
            entry: None,
            marker: Marker::with_capacity(mark_capacity),
        }
    }

    /// Allocate a member object. `region` is the stable address of the
    /// enclosing region, written into the object's owner word.
    pub fn alloc(
        &mut self,
        desc: &'static sorrel_core::Descriptor,
        region: *mut (),
    ) -> NonNull<Object> {
        let obj = unsafe { Object::alloc(desc) };
        unsafe { obj.as_ref() }.set_owner(region);
        self.members.push(obj);
        stats().record_allocation(desc.size());
        obj
    }

    /// Record the region's entrypoint. Called once, at region creation.
    pub fn set_entry(&mut self, entry: NonNull<Object>) {
        debug_assert!(self.entry.is_none());
        unsafe { entry.as_ref() }.set_status(ObjectStatus::ENTRYPOINT);
        self.entry = Some(entry);
    }

    /// The region's entrypoint.
    pub fn entry(&self) -> NonNull<Object> {
        self.entry.expect("tracing region has no entrypoint")
    }

    /// Number of tracked members (entrypoint included).
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the region tracks no objects.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// In-place collection: mark from the entrypoint, then finalize and
    /// free every unmarked member. The entrypoint is retained.
    ///
    /// Owned sub-regions discovered by finalizers of dying objects are
    /// pushed onto `sub_regions` for the caller to drop.
    pub fn tidy(&mut self, region: *mut (), sub_regions: &mut ObjectStack) {
        let entry = self.entry();
        let live = self.marker.mark_from(entry, region);

        // Finalize all dead members before freeing any of them.
        for &obj in &self.members {
            if !self.marker.is_marked(obj) {
                finalize_object(obj, Some(entry), sub_regions);
            }
        }

        let before = self.members.len();
        let Self { members, marker, .. } = self;
        members.retain(|&obj| {
            if marker.is_marked(obj) {
                true
            } else {
                destroy_object(obj);
                false
            }
        });

        stats().tidy_runs.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(
            live,
            freed = before - self.members.len(),
            "tidied tracing region"
        );
    }

    /// Full reclamation: finalize every member (entrypoint included), run
    /// destructors, and free all memory. The region is unusable afterward.
    pub fn release(&mut self, sub_regions: &mut ObjectStack) {
        let entry = self.entry();

        for &obj in &self.members {
            finalize_object(obj, Some(entry), sub_regions);
        }
        let freed = self.members.len();
        for &obj in &self.members {
            destroy_object(obj);
        }
        self.members.clear();
        self.entry = None;

        debug!(freed, "released tracing region");
    }
}

// Safety: a region is accessed by one thread at a time; it moves between
// threads only with its owning reference (region root or cown).
unsafe impl Send for TraceRegion {}

/// Run the object's finalizer once, if it has one.
pub(crate) fn finalize_object(
    obj: NonNull<Object>,
    entry: Option<NonNull<Object>>,
    sub_regions: &mut ObjectStack,
) {
    let obj_ref = unsafe { obj.as_ref() };
    if obj_ref.status().contains(ObjectStatus::FINALIZED) {
        return;
    }
    obj_ref.set_status(ObjectStatus::FINALIZED);
    if let Some(finalize) = obj_ref.descriptor().finalize {
        finalize(unsafe { &mut *obj.as_ptr() }, entry, sub_regions);
        stats().record_finalized();
    }
}

/// Run the destructor and return the object's memory.
pub(crate) fn destroy_object(obj: NonNull<Object>) {
    let desc = unsafe { obj.as_ref() }.descriptor();
    if let Some(destructor) = desc.destructor {
        destructor(unsafe { &mut *obj.as_ptr() });
    }
    stats().record_freed(1, desc.size());
    unsafe { Object::dealloc(obj) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorrel_core::DescriptorBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn region_with_entry(desc: &'static sorrel_core::Descriptor) -> (TraceRegion, NonNull<Object>) {
        let mut region = TraceRegion::new(16);
        let fake_region = 0x1000 as *mut ();
        let entry = region.alloc(desc, fake_region);
        region.set_entry(entry);
        (region, entry)
    }

    #[test]
    fn test_tidy_keeps_reachable() {
        let desc = DescriptorBuilder::new("Node").field("a").field("b").build();
        let (mut region, entry) = region_with_entry(desc);
        let region_ptr = 0x1000 as *mut ();

        let a = region.alloc(desc, region_ptr);
        let b = region.alloc(desc, region_ptr);
        unsafe { entry.as_ref() }.set_field(0, Some(a));
        unsafe { entry.as_ref() }.set_field(1, Some(b));

        let mut sub = ObjectStack::new();
        region.tidy(region_ptr, &mut sub);
        assert_eq!(region.len(), 3);
        assert!(sub.is_empty());

        region.release(&mut sub);
    }

    #[test]
    fn test_tidy_frees_unreachable() {
        static FINALIZED: AtomicUsize = AtomicUsize::new(0);
        fn count_finalize(
            _obj: &mut Object,
            _entry: Option<NonNull<Object>>,
            _sub: &mut ObjectStack,
        ) {
            FINALIZED.fetch_add(1, Ordering::SeqCst);
        }

        let desc = DescriptorBuilder::new("Node")
            .field("a")
            .field("b")
            .finalizer(count_finalize)
            .build();
        let (mut region, entry) = region_with_entry(desc);
        let region_ptr = 0x1000 as *mut ();

        let a = region.alloc(desc, region_ptr);
        unsafe { entry.as_ref() }.set_field(0, Some(a));
        let _orphan = region.alloc(desc, region_ptr);

        let mut sub = ObjectStack::new();
        region.tidy(region_ptr, &mut sub);
        assert_eq!(region.len(), 2);
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);

        region.release(&mut sub);
    }

    #[test]
    fn test_tidy_handles_member_cycles() {
        let desc = DescriptorBuilder::new("Node").field("a").field("b").build();
        let (mut region, entry) = region_with_entry(desc);
        let region_ptr = 0x1000 as *mut ();

        // Reachable cycle: entry -> a <-> b
        let a = region.alloc(desc, region_ptr);
        let b = region.alloc(desc, region_ptr);
        unsafe { entry.as_ref() }.set_field(0, Some(a));
        unsafe { a.as_ref() }.set_field(0, Some(b));
        unsafe { b.as_ref() }.set_field(0, Some(a));

        // Unreachable cycle: c <-> d
        let c = region.alloc(desc, region_ptr);
        let d = region.alloc(desc, region_ptr);
        unsafe { c.as_ref() }.set_field(0, Some(d));
        unsafe { d.as_ref() }.set_field(0, Some(c));

        let mut sub = ObjectStack::new();
        region.tidy(region_ptr, &mut sub);
        assert_eq!(region.len(), 3);

        region.release(&mut sub);
    }

    #[test]
    fn test_release_finalizes_everything() {
        static FINALIZED: AtomicUsize = AtomicUsize::new(0);
        fn count_finalize(
            _obj: &mut Object,
            _entry: Option<NonNull<Object>>,
            _sub: &mut ObjectStack,
        ) {
            FINALIZED.fetch_add(1, Ordering::SeqCst);
        }

        let desc = DescriptorBuilder::new("Node")
            .field("a")
            .field("b")
            .finalizer(count_finalize)
            .build();
        let (mut region, _entry) = region_with_entry(desc);
        let region_ptr = 0x1000 as *mut ();
        region.alloc(desc, region_ptr);
        region.alloc(desc, region_ptr);

        let mut sub = ObjectStack::new();
        region.release(&mut sub);
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 3);
        assert!(region.is_empty());
    }

    #[test]
    fn test_destructor_runs_on_free() {
        static DESTROYED: AtomicUsize = AtomicUsize::new(0);
        fn count_destructor(_obj: &mut Object) {
            DESTROYED.fetch_add(1, Ordering::SeqCst);
        }

        let desc = DescriptorBuilder::new("Res")
            .destructor(count_destructor)
            .build();
        let (mut region, _entry) = region_with_entry(desc);

        let mut sub = ObjectStack::new();
        region.release(&mut sub);
        assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);
    }
}
