//! Object header and raw object layout.
//!
//! All heap allocations begin with an [`ObjectHeader`]: a descriptor
//! pointer, a status word, and an owner word. The body that follows is
//! `field_count` reference slots and then `data_bytes` of untyped payload,
//! both described by the descriptor.
//!
//! ```text
//! +--------------------+
//! | descriptor ptr     |  8 bytes
//! | status | (pad)     |  4 + 4 bytes
//! | owner ptr          |  8 bytes
//! +--------------------+
//! | slot 0 .. slot n-1 |  8 bytes each, null = none
//! +--------------------+
//! | raw data           |  data_bytes, opaque to tracing
//! +--------------------+
//! ```
//!
//! The owner word points at the region that contains the object. It is
//! how the mark phase decides whether a traced reference is a member of
//! the region being collected, and how `new_object` resolves an arbitrary
//! member reference back to its region.

use crate::descriptor::Descriptor;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

bitflags::bitflags! {
    /// Status bits stored in the object header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectStatus: u32 {
        /// The object roots a region: it is the externally visible owned
        /// reference through which the whole region is reached.
        const ENTRYPOINT = 1 << 0;
        /// The object's finalizer has already run.
        const FINALIZED = 1 << 1;
    }
}

/// Common header for every runtime allocation.
#[repr(C)]
pub struct ObjectHeader {
    /// Per-type metadata table. Never null, never changes after allocation.
    descriptor: *const Descriptor,
    /// Status bits. Written only by the thread owning the enclosing
    /// region, so `Relaxed` is sufficient.
    status: AtomicU32,
    _pad: u32,
    /// The region (or cown storage) that owns this object. Opaque at this
    /// layer; `sorrel_region` stores its region pointer here.
    owner: AtomicPtr<()>,
}

/// A runtime object. Only ever handled by pointer; the slots and raw data
/// live immediately after the header, at offsets computed from the
/// descriptor.
#[repr(C)]
pub struct Object {
    header: ObjectHeader,
}

impl Object {
    /// Allocate a zeroed object for `desc` from the global allocator.
    ///
    /// Fields start null and the raw data area starts zeroed. Allocation
    /// failure is fatal: the runtime does not degrade under OOM.
    ///
    /// # Safety
    ///
    /// The caller must hand the object to an owner (region or cown
    /// storage) that will eventually pass it back to [`Object::dealloc`].
    pub unsafe fn alloc(desc: &'static Descriptor) -> NonNull<Object> {
        let layout = layout_for(desc.size());
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        if raw.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        unsafe { Object::format(raw, desc) }
    }

    /// Format pre-zeroed memory as an object for `desc`.
    ///
    /// Used by bump allocators that carve objects out of zeroed chunks.
    ///
    /// # Safety
    ///
    /// `raw` must point to at least `desc.size()` bytes of zeroed,
    /// 8-aligned memory that outlives the object.
    pub unsafe fn format(raw: *mut u8, desc: &'static Descriptor) -> NonNull<Object> {
        let ptr = unsafe { NonNull::new_unchecked(raw.cast::<Object>()) };
        unsafe {
            std::ptr::addr_of_mut!((*ptr.as_ptr()).header.descriptor).write(desc);
        }
        ptr
    }

    /// Return an object's memory to the allocator.
    ///
    /// # Safety
    ///
    /// `obj` must have come from [`Object::alloc`], must not be reachable
    /// from any live object, and must not be used afterwards.
    pub unsafe fn dealloc(obj: NonNull<Object>) {
        let size = unsafe { obj.as_ref() }.descriptor().size();
        unsafe { std::alloc::dealloc(obj.as_ptr().cast::<u8>(), layout_for(size)) };
    }

    /// The descriptor this object was allocated with.
    #[inline]
    pub fn descriptor(&self) -> &'static Descriptor {
        // Written once at allocation, immutable afterwards.
        unsafe { &*self.header.descriptor }
    }

    /// Current status bits.
    #[inline]
    pub fn status(&self) -> ObjectStatus {
        ObjectStatus::from_bits_truncate(self.header.status.load(Ordering::Relaxed))
    }

    /// Set status bits (OR into the current word).
    #[inline]
    pub fn set_status(&self, bits: ObjectStatus) {
        self.header.status.fetch_or(bits.bits(), Ordering::Relaxed);
    }

    /// True if this object roots a region.
    #[inline]
    pub fn is_entrypoint(&self) -> bool {
        self.status().contains(ObjectStatus::ENTRYPOINT)
    }

    /// The owner word (region pointer), or null if unowned.
    #[inline]
    pub fn owner(&self) -> *mut () {
        self.header.owner.load(Ordering::Relaxed)
    }

    /// Install the owner word.
    #[inline]
    pub fn set_owner(&self, owner: *mut ()) {
        self.header.owner.store(owner, Ordering::Relaxed);
    }

    /// Number of reference slots in this object.
    #[inline]
    pub fn field_count(&self) -> usize {
        self.descriptor().field_count()
    }

    /// Read reference slot `index`.
    ///
    /// Panics if `index` is out of range: a bad slot index cannot be
    /// produced by a well-typed program, so it is a contract violation.
    pub fn field(&self, index: usize) -> Option<NonNull<Object>> {
        assert!(
            index < self.field_count(),
            "field index {index} out of range for type `{}`",
            self.descriptor().name()
        );
        let slot = unsafe { &*self.slots().add(index) };
        NonNull::new(slot.load(Ordering::Relaxed))
    }

    /// Replace reference slot `index`, returning the previous value.
    pub fn set_field(
        &self,
        index: usize,
        value: Option<NonNull<Object>>,
    ) -> Option<NonNull<Object>> {
        assert!(
            index < self.field_count(),
            "field index {index} out of range for type `{}`",
            self.descriptor().name()
        );
        let raw = value.map_or(std::ptr::null_mut(), NonNull::as_ptr);
        let slot = unsafe { &*self.slots().add(index) };
        NonNull::new(slot.swap(raw, Ordering::Relaxed))
    }

    /// Pointer to the raw data area after the reference slots.
    ///
    /// The data area is `descriptor().data_bytes()` long and opaque to the
    /// tracer. Access is only valid while the caller has exclusive access
    /// to the object (region ownership, or an exclusively acquired cown).
    #[inline]
    pub fn data_ptr(&self) -> *mut u8 {
        let base = self as *const Object as *mut u8;
        unsafe { base.add(Descriptor::slots_offset() + self.field_count() * 8) }
    }

    #[inline]
    fn slots(&self) -> *const AtomicPtr<Object> {
        let base = self as *const Object as *const u8;
        unsafe { base.add(Descriptor::slots_offset()).cast::<AtomicPtr<Object>>() }
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.descriptor().name())
            .field("status", &self.status())
            .finish()
    }
}

#[inline]
fn layout_for(size: usize) -> std::alloc::Layout {
    std::alloc::Layout::from_size_align(size, 8).expect("invalid object layout")
}

/// Align a size up to the given alignment (power of two).
#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

// =============================================================================
// References
// =============================================================================

/// An unowned reference to an object.
///
/// `Reference` is `Copy` and carries no lifetime: validity is guaranteed
/// by the region/cown ownership discipline the type system enforces
/// upstream, not by the borrow checker. The `view` and `copy` operations
/// both produce values of this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference(NonNull<Object>);

impl Reference {
    /// Wrap a raw object pointer.
    #[inline]
    pub fn new(ptr: NonNull<Object>) -> Self {
        Reference(ptr)
    }

    /// The underlying object pointer.
    #[inline]
    pub fn as_non_null(self) -> NonNull<Object> {
        self.0
    }

    /// The underlying raw pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut Object {
        self.0.as_ptr()
    }
}

impl Deref for Reference {
    type Target = Object;

    #[inline]
    fn deref(&self) -> &Object {
        unsafe { self.0.as_ref() }
    }
}

impl std::fmt::Debug for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reference({:p}: {})", self.0, self.descriptor().name())
    }
}

// Safety: references move between threads when their region moves (cown
// promotion, behavior execution). Thread confinement of the *object* is
// enforced by the ownership discipline upstream; the handle itself is a
// plain pointer.
unsafe impl Send for Reference {}
unsafe impl Sync for Reference {}
