//! Arena regions: bump-allocated, freed wholesale.
//!
//! Objects are carved out of fixed-size chunks with a bump pointer;
//! nothing tracks individual members. `tidy` is defined as a no-op and
//! `drop` returns whole chunks to the allocator without per-object work —
//! with one exception: objects carrying a finalizer are recorded at
//! allocation time so that owned sub-regions can still be discovered and
//! dropped. Everything else in an arena must be trivially reclaimable.

use crate::stats::stats;
use sorrel_core::{Object, ObjectStack, ObjectStatus};
use std::ptr::NonNull;
use tracing::{debug, trace};

/// One bump-allocated chunk.
struct Chunk {
    start: *mut u8,
    size: usize,
    /// Bump offset of the next free byte.
    top: usize,
}

impl Chunk {
    fn new(size: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(size, 8).expect("invalid chunk layout");
        let start = unsafe { std::alloc::alloc_zeroed(layout) };
        if start.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Self { start, size, top: 0 }
    }

    /// Bump-allocate `size` bytes, or None if the chunk is exhausted.
    #[inline]
    fn bump(&mut self, size: usize) -> Option<*mut u8> {
        if self.top + size > self.size {
            return None;
        }
        let ptr = unsafe { self.start.add(self.top) };
        self.top += size;
        Some(ptr)
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        let layout =
            std::alloc::Layout::from_size_align(self.size, 8).expect("invalid chunk layout");
        unsafe { std::alloc::dealloc(self.start, layout) };
    }
}

/// A region reclaimed as a whole, with bump allocation.
pub struct ArenaRegion {
    chunks: Vec<Chunk>,
    entry: Option<NonNull<Object>>,
    /// Members whose descriptor has a finalizer. The only per-object
    /// record an arena keeps.
    finalizers: Vec<NonNull<Object>>,
    chunk_size: usize,
}

impl ArenaRegion {
    /// Create an empty arena with the given chunk size.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunks: Vec::new(),
            entry: None,
            finalizers: Vec::new(),
            chunk_size,
        }
    }

    /// Bump-allocate a member object. `region` is the stable address of
    /// the enclosing region, written into the object's owner word.
    pub fn alloc(
        &mut self,
        desc: &'static sorrel_core::Descriptor,
        region: *mut (),
    ) -> NonNull<Object> {
        let size = desc.size();
        let raw = match self.chunks.last_mut().and_then(|c| c.bump(size)) {
            Some(raw) => raw,
            None => {
                // Oversized objects get a dedicated chunk.
                let chunk_size = self.chunk_size.max(size);
                self.chunks.push(Chunk::new(chunk_size));
                self.chunks
                    .last_mut()
                    .and_then(|c| c.bump(size))
                    .expect("fresh chunk cannot be exhausted")
            }
        };

        // Chunk memory is pre-zeroed, so only the descriptor and owner
        // words need writing.
        let obj = unsafe { Object::format(raw, desc) };
        unsafe { obj.as_ref() }.set_owner(region);
        if desc.needs_finalize() {
            self.finalizers.push(obj);
        }
        stats().record_allocation(size);
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
        self.entry.expect("arena region has no entrypoint")
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Bytes bump-allocated so far.
    pub fn allocated(&self) -> usize {
        self.chunks.iter().map(|c| c.top).sum()
    }

    /// In-place collection is a no-op for arenas: members are never
    /// individually reclaimed.
    pub fn tidy(&self) {
        trace!("tidy on arena region is a no-op");
    }

    /// Full reclamation: run the registered finalizers (the sub-region
    /// ownership exception), then free every chunk at once. No
    /// destructors, no per-object frees.
    pub fn release(&mut self, sub_regions: &mut ObjectStack) {
        let entry = self.entry;
        for &obj in &self.finalizers {
            crate::trace_region::finalize_object(obj, entry, sub_regions);
        }
        self.finalizers.clear();
        self.entry = None;

        let bytes: usize = self.chunks.iter().map(|c| c.size).sum();
        let freed = self.chunks.len();
        self.chunks.clear();
        stats().record_freed(0, bytes);

        debug!(chunks = freed, bytes, "released arena region");
    }
}

// Safety: same single-threaded ownership discipline as TraceRegion.
unsafe impl Send for ArenaRegion {}
