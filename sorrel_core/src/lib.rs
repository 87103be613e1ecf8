//! Sorrel object and descriptor model.
//!
//! Every allocation the runtime makes — region members, region entrypoints,
//! cown payloads — shares one header layout and one per-type metadata table
//! (the [`Descriptor`]). The descriptor is a plain table of function
//! pointers selected at allocation time: trace, finalize, notified,
//! destructor. No dynamic type information exists beyond the descriptor
//! pointer in the header.
//!
//! This crate is the foundation for `sorrel_region` (region-scoped
//! allocation and reclamation) and `sorrel_runtime` (cowns, behaviors,
//! scheduling). It owns no policy: it defines what an object *is*, not
//! when it lives or dies.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod descriptor;
pub mod object;
pub mod stack;

pub use descriptor::{
    Descriptor, DescriptorBuilder, DestructorFn, FinalizeFn, NotifiedFn, TraceFn,
    finalize_region_fields, trace_fields,
};
pub use object::{align_up, Object, ObjectHeader, ObjectStatus, Reference};
pub use stack::ObjectStack;
