//! The compiler-facing operation set.
//!
//! These are the only points of contact the lowering layer needs: eight
//! data operations over references and regions, plus cown promotion and
//! behavior scheduling. Everything upstream — parsing, typechecking,
//! optimization — is external and is trusted to uphold the ownership and
//! field-typing contracts; misuse that a well-typed program cannot
//! produce is answered with a panic, not an error value.

use crate::cown::CownRef;
use crate::sched::Runtime;
use sorrel_core::{Descriptor, Reference};
use sorrel_region::{alloc_in, Region, RegionKind, RegionRoot};

/// Named initial value for a field of a freshly allocated object.
pub type FieldInit<'a> = (&'a str, Reference);

/// `copy`: produce another handle to the same object.
#[inline]
pub fn copy(reference: Reference) -> Reference {
    reference
}

/// `view`: an unowned reference to the same object. For an unowned input
/// this is the identity; for an owned region root use
/// [`RegionRoot::view`], which never consumes the root.
#[inline]
pub fn view(reference: Reference) -> Reference {
    reference
}

/// `field_read`: the field's current value, as an unowned reference.
///
/// A nonexistent field is a contract violation (fatal): upstream
/// typechecking is the sole guard.
pub fn field_read(object: Reference, field: &str) -> Option<Reference> {
    let index = resolve_field(object, field);
    object.field(index).map(Reference::new)
}

/// `field_write`: replace the field's value, returning the previous one.
pub fn field_write(
    object: Reference,
    field: &str,
    value: Option<Reference>,
) -> Option<Reference> {
    let index = resolve_field(object, field);
    object
        .set_field(index, value.map(Reference::as_non_null))
        .map(Reference::new)
}

/// `field_write` with an owned region as the new value: ownership of the
/// sub-region transfers into the object graph. The object's finalizer is
/// then responsible for enqueueing the sub-region at reclamation
/// (`finalize_region_fields` is the canonical choice).
pub fn field_write_owned(
    object: Reference,
    field: &str,
    value: RegionRoot,
) -> Option<Reference> {
    let index = resolve_field(object, field);
    object
        .set_field(index, Some(value.into_entry()))
        .map(Reference::new)
}

/// `tidy`: in-place reclamation of the region; the entrypoint is
/// retained.
pub fn tidy(root: &RegionRoot) {
    root.tidy();
}

/// `drop`: fully reclaim the region, consuming the owned reference. All
/// members are finalized and freed, including recursively discovered
/// owned sub-regions.
pub fn region_drop(root: RegionRoot) {
    drop(root);
}

/// `new_region`: a fresh tracing region whose entrypoint is a new object
/// of `desc`, with named fields initialized.
pub fn new_region(desc: &'static Descriptor, fields: &[FieldInit<'_>]) -> RegionRoot {
    new_region_with(RegionKind::Trace, desc, fields)
}

/// `new_region` with an explicit reclamation strategy.
pub fn new_region_with(
    kind: RegionKind,
    desc: &'static Descriptor,
    fields: &[FieldInit<'_>],
) -> RegionRoot {
    let root = Region::create(kind, desc);
    init_fields(root.view(), fields);
    root
}

/// `new_object`: allocate into the region owning `target` (any member of
/// the region), returning an unowned reference to the new object.
pub fn new_object(
    desc: &'static Descriptor,
    fields: &[FieldInit<'_>],
    target: Reference,
) -> Reference {
    let object = alloc_in(target, desc);
    init_fields(object, fields);
    object
}

/// `promote`: convert an owned region into a cown scheduled by `runtime`.
pub fn promote(runtime: &Runtime, root: RegionRoot) -> CownRef {
    runtime.promote(root)
}

/// `when`: schedule `f` to run once every cown in `cowns` is exclusively
/// acquired.
pub fn when(runtime: &Runtime, cowns: &[CownRef], f: impl FnOnce() + Send + 'static) {
    runtime.when(cowns, f);
}

fn resolve_field(object: Reference, field: &str) -> usize {
    let desc = object.descriptor();
    match desc.field_index(field) {
        Some(index) => index,
        None => panic!(
            "no field `{field}` on type `{}` (contract violation)",
            desc.name()
        ),
    }
}

fn init_fields(object: Reference, fields: &[FieldInit<'_>]) {
    for (name, value) in fields {
        let index = resolve_field(object, name);
        object.set_field(index, Some(value.as_non_null()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sorrel_core::DescriptorBuilder;

    #[test]
    fn test_field_round_trip() {
        let desc = DescriptorBuilder::new("Pair").field("a").field("b").build();
        let root = new_region(desc, &[]);
        let x = root.view();

        let child = new_object(desc, &[], x);
        assert_eq!(field_write(x, "a", Some(child)), None);
        assert_eq!(field_read(x, "a"), Some(child));
        assert_eq!(field_read(x, "b"), None);
        assert_eq!(field_write(x, "a", None), Some(child));
    }

    #[test]
    fn test_new_object_with_field_inits() {
        let desc = DescriptorBuilder::new("Pair").field("a").field("b").build();
        let root = new_region(desc, &[]);
        let x = root.view();

        let first = new_object(desc, &[], x);
        let second = new_object(desc, &[("a", first)], x);
        assert_eq!(field_read(second, "a"), Some(first));
    }

    #[test]
    fn test_copy_and_view_preserve_identity() {
        let desc = DescriptorBuilder::new("Unit").build();
        let root = new_region(desc, &[]);
        let x = root.view();
        assert_eq!(copy(x), x);
        assert_eq!(view(x), x);
        assert_eq!(root.view(), x);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_unknown_field_is_fatal() {
        let desc = DescriptorBuilder::new("Unit").build();
        let root = new_region(desc, &[]);
        field_read(root.view(), "missing");
    }
}
