//! Per-type metadata tables.
//!
//! A [`Descriptor`] is a plain table of function pointers plus layout
//! data, created once per concrete type and shared by every instance via
//! the object header. The four hooks mirror what the reclamation and
//! scheduling machinery needs from a type:
//!
//! - `trace` — push every reference the object holds onto a worklist.
//!   Omitting a live reference causes premature reclamation; reporting a
//!   dead one is only a performance cost.
//! - `finalize` — runs before reclamation; may enqueue owned sub-regions
//!   discovered in the object's fields.
//! - `notified` — runs when a cown transitions to "has pending work"
//!   while idle.
//! - `destructor` — releases non-memory resources after finalization.
//!
//! Descriptors are `'static`: builders leak them once at type
//! registration, the same way the type registry holds `&'static` type
//! objects for the life of the process.

use crate::object::{align_up, Object, ObjectHeader};
use crate::stack::ObjectStack;
use rustc_hash::FxHashMap;
use std::ptr::NonNull;

/// Pushes every reference reachable from the object onto the worklist.
pub type TraceFn = fn(&Object, &mut ObjectStack);

/// Runs before the object is reclaimed. `region` is the entrypoint of the
/// region being collected (when there is one); owned sub-regions the
/// object holds must be pushed onto `sub_regions` so reclamation can
/// continue into them.
pub type FinalizeFn = fn(&mut Object, Option<NonNull<Object>>, &mut ObjectStack);

/// Runs when the cown wrapping this object gains pending work while idle.
pub type NotifiedFn = fn(&Object);

/// Releases external resources; runs after `finalize`, before the memory
/// is returned.
pub type DestructorFn = fn(&mut Object);

/// Immutable per-type metadata: layout plus the four hooks.
pub struct Descriptor {
    name: String,
    /// Total allocation size: header + reference slots + raw data.
    size: usize,
    field_count: usize,
    data_bytes: usize,
    /// Field-name table for the compiler-facing named-field operations.
    fields: FxHashMap<String, usize>,
    /// Reference discovery. Required.
    pub trace: TraceFn,
    /// Pre-reclamation hook. Optional.
    pub finalize: Option<FinalizeFn>,
    /// Pending-work hook for cowns. Optional.
    pub notified: Option<NotifiedFn>,
    /// Resource release hook. Optional.
    pub destructor: Option<DestructorFn>,
}

impl Descriptor {
    /// Byte offset of the first reference slot (end of the header).
    #[inline]
    pub const fn slots_offset() -> usize {
        std::mem::size_of::<ObjectHeader>()
    }

    /// Type name, for diagnostics.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total allocation size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of reference slots.
    #[inline]
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Size of the raw data area.
    #[inline]
    pub fn data_bytes(&self) -> usize {
        self.data_bytes
    }

    /// Resolve a field name to its slot index.
    #[inline]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.get(name).copied()
    }

    /// True if the type has a finalizer.
    #[inline]
    pub fn needs_finalize(&self) -> bool {
        self.finalize.is_some()
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("field_count", &self.field_count)
            .field("finalize", &self.finalize.is_some())
            .field("notified", &self.notified.is_some())
            .field("destructor", &self.destructor.is_some())
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds a `'static` descriptor for a class with named reference fields
/// and an optional raw data area.
///
/// ```ignore
/// let node = DescriptorBuilder::new("Node")
///     .field("next")
///     .field("payload")
///     .finalizer(finalize_region_fields)
///     .build();
/// ```
pub struct DescriptorBuilder {
    name: String,
    fields: Vec<String>,
    data_bytes: usize,
    trace: TraceFn,
    finalize: Option<FinalizeFn>,
    notified: Option<NotifiedFn>,
    destructor: Option<DestructorFn>,
}

impl DescriptorBuilder {
    /// Start a descriptor for the named type.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            data_bytes: 0,
            trace: trace_fields,
            finalize: None,
            notified: None,
            destructor: None,
        }
    }

    /// Append a named reference field. Slot indices follow declaration
    /// order.
    pub fn field(mut self, name: &str) -> Self {
        self.fields.push(name.to_string());
        self
    }

    /// Reserve an untyped data area after the reference slots.
    pub fn data_bytes(mut self, bytes: usize) -> Self {
        self.data_bytes = bytes;
        self
    }

    /// Replace the default field-walking trace function.
    pub fn trace(mut self, f: TraceFn) -> Self {
        self.trace = f;
        self
    }

    /// Install a finalizer.
    pub fn finalizer(mut self, f: FinalizeFn) -> Self {
        self.finalize = Some(f);
        self
    }

    /// Install the pending-work hook.
    pub fn notified(mut self, f: NotifiedFn) -> Self {
        self.notified = Some(f);
        self
    }

    /// Install a destructor.
    pub fn destructor(mut self, f: DestructorFn) -> Self {
        self.destructor = Some(f);
        self
    }

    /// Finish the descriptor, leaking it to `'static`.
    pub fn build(self) -> &'static Descriptor {
        let mut fields = FxHashMap::default();
        for (index, name) in self.fields.iter().enumerate() {
            let clash = fields.insert(name.clone(), index);
            assert!(
                clash.is_none(),
                "duplicate field `{name}` on type `{}`",
                self.name
            );
        }
        let size = align_up(
            Descriptor::slots_offset() + self.fields.len() * 8 + self.data_bytes,
            8,
        );
        Box::leak(Box::new(Descriptor {
            name: self.name,
            size,
            field_count: self.fields.len(),
            data_bytes: self.data_bytes,
            fields,
            trace: self.trace,
            finalize: self.finalize,
            notified: self.notified,
            destructor: self.destructor,
        }))
    }
}

// =============================================================================
// Canonical hooks
// =============================================================================

/// Default trace function: report every non-null reference slot once.
pub fn trace_fields(obj: &Object, stack: &mut ObjectStack) {
    for index in 0..obj.field_count() {
        if let Some(child) = obj.field(index) {
            stack.push(child);
        }
    }
}

/// Canonical finalizer for classes whose fields may own sub-regions.
///
/// Scans the reference slots for entrypoints of *other* regions and
/// enqueues them, transferring responsibility for those regions to the
/// reclamation worklist. The compiler installs this (or a specialization
/// of it) on every class with owning fields.
pub fn finalize_region_fields(
    obj: &mut Object,
    _region: Option<NonNull<Object>>,
    sub_regions: &mut ObjectStack,
) {
    let own_owner = obj.owner();
    for index in 0..obj.field_count() {
        if let Some(child) = obj.field(index) {
            let child_ref = unsafe { child.as_ref() };
            if child_ref.is_entrypoint() && child_ref.owner() != own_owner {
                sub_regions.push(child);
            }
        }
    }
}
