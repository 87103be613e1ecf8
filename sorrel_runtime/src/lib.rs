//! Sorrel concurrent runtime: cowns, behaviors, and the scheduler.
//!
//! This crate layers the concurrency half of the runtime over the object
//! model (`sorrel_core`) and the region subsystem (`sorrel_region`):
//!
//! - [`CownRef`] — a counted handle to a concurrency-safe, single-writer
//!   wrapper around a private region.
//! - [`Runtime::when`] — schedule a behavior: a closure bound to a set of
//!   cowns, run once all of them are exclusively acquired. Acquisition is
//!   in a canonical id order with park-and-release on conflict, so
//!   overlapping behaviors can never deadlock.
//! - [`EpochManager`] — the global clock bounding when retired memory may
//!   be physically freed while other workers might still hold transient
//!   references.
//! - [`ops`] — the small operation vocabulary the compiler lowers to.
//!
//! Behaviors sharing a cown are serialized on it; behaviors with disjoint
//! cown sets run fully concurrently across the worker pool.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod behavior;
pub mod config;
pub mod cown;
pub mod epoch;
pub mod ops;
pub mod sched;

pub use behavior::Behavior;
pub use config::{ConfigError, SchedulerConfig};
pub use cown::{Cown, CownRef};
pub use epoch::EpochManager;
pub use sched::{Runtime, SchedulerStats};

// Re-export the storage-layer types behaviors and ops traffic in.
pub use sorrel_core::{Descriptor, DescriptorBuilder, Reference};
pub use sorrel_region::{RegionKind, RegionRoot};
