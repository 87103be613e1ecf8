//! Global entrypoint → region table.
//!
//! Every live region is registered under the address of its entrypoint.
//! The table serves two purposes: resolving an owned entrypoint reference
//! discovered during reclamation back to its region, and detecting the
//! fatal contract violation of dropping a region twice (or dropping
//! something that is not a region entrypoint).

use crate::region::Region;
use dashmap::DashMap;
use sorrel_core::Object;
use std::ptr::NonNull;
use std::sync::OnceLock;

/// Region pointer stored in the table. Regions themselves are accessed
/// only by their owning thread; the table just carries the address.
#[derive(Clone, Copy)]
pub(crate) struct RegionPtr(pub *mut Region);

// Safety: the table stores addresses; access to the pointee is governed
// by the ownership discipline, not by the table.
unsafe impl Send for RegionPtr {}
unsafe impl Sync for RegionPtr {}

static REGISTRY: OnceLock<DashMap<usize, RegionPtr>> = OnceLock::new();

fn table() -> &'static DashMap<usize, RegionPtr> {
    REGISTRY.get_or_init(DashMap::new)
}

/// Register a freshly created region under its entrypoint address.
pub(crate) fn register(entry: NonNull<Object>, region: *mut Region) {
    let clash = table().insert(entry.as_ptr() as usize, RegionPtr(region));
    debug_assert!(clash.is_none(), "entrypoint registered twice");
}

/// Remove and return the region owning `entry`.
///
/// Returns `None` if `entry` does not root a live region — the caller
/// treats that as a fatal contract violation.
pub(crate) fn take(entry: NonNull<Object>) -> Option<RegionPtr> {
    table().remove(&(entry.as_ptr() as usize)).map(|(_, r)| r)
}

/// Look up the region owning `entry` without removing it.
pub(crate) fn resolve(entry: NonNull<Object>) -> Option<RegionPtr> {
    table().get(&(entry.as_ptr() as usize)).map(|r| *r)
}

/// True if `entry` currently roots a live region.
pub fn is_live_entrypoint(entry: NonNull<Object>) -> bool {
    table().contains_key(&(entry.as_ptr() as usize))
}
