//! The mark phase.
//!
//! Reachability is computed from the region's entrypoint with an explicit
//! worklist and a visited set, never recursion: region graphs are legal
//! with cycles and may be arbitrarily deep.
//!
//! Foreign pointers discovered during tracing — entrypoints of owned
//! sub-regions, cown payloads — are simply skipped: only members of the
//! region being collected are marked. Liveness of a sub-region is decided
//! by its owning object, whose finalizer enqueues the sub-region if the
//! owner dies.

use rustc_hash::FxHashSet;
use sorrel_core::{Object, ObjectStack};
use std::ptr::NonNull;

/// Worklist-based marker, reused across collections of a region.
pub struct Marker {
    /// Addresses of objects already visited (marked live).
    visited: FxHashSet<usize>,
    /// Gray worklist: discovered, children not yet scanned.
    worklist: ObjectStack,
}

impl Marker {
    /// Create a marker with pre-sized structures.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            visited: FxHashSet::with_capacity_and_hasher(capacity, Default::default()),
            worklist: ObjectStack::new(),
        }
    }

    /// Mark every member of `region` reachable from `entry`.
    ///
    /// Each reachable member is visited exactly once regardless of cycles.
    /// Returns the number of live objects.
    pub fn mark_from(&mut self, entry: NonNull<Object>, region: *mut ()) -> usize {
        self.visited.clear();
        self.worklist.clear();
        self.worklist.push(entry);

        while let Some(obj) = self.worklist.pop() {
            let obj_ref = unsafe { obj.as_ref() };
            if obj_ref.owner() != region {
                // Foreign reference: sub-region entrypoint or cown payload.
                continue;
            }
            if !self.visited.insert(obj.as_ptr() as usize) {
                continue;
            }
            (obj_ref.descriptor().trace)(obj_ref, &mut self.worklist);
        }

        self.visited.len()
    }

    /// True if the object was reached by the last `mark_from`.
    #[inline]
    pub fn is_marked(&self, obj: NonNull<Object>) -> bool {
        self.visited.contains(&(obj.as_ptr() as usize))
    }

    /// Number of objects marked by the last `mark_from`.
    #[inline]
    pub fn marked_count(&self) -> usize {
        self.visited.len()
    }
}
