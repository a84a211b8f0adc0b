//! Supplier selection policy.
//!
//! The default ranking prefers the system bundle, then resolved suppliers,
//! then higher versions, then lower bundle ids. An injected
//! [`SelectionPolicy`] replaces that ranking entirely, both for candidate
//! ordering and for singleton tie-breaks.

use std::cmp::Ordering;
use trellis_core::types::{BundleDescriptor, Version};

/// What a policy gets to see about a supplier
#[derive(Debug, Clone, Copy)]
pub struct SupplierInfo<'a> {
    /// Capability name (package, generic capability or bundle symbolic name)
    pub name: &'a str,
    /// Capability version (the bundle version for bundle suppliers)
    pub version: &'a Version,
    /// Bundle the supplier is attributed to
    pub bundle: &'a BundleDescriptor,
    pub resolved: bool,
}

/// Ordering strategy over suppliers; `Less` means `a` is preferred
pub trait SelectionPolicy: Send + Sync {
    fn compare(&self, a: &SupplierInfo<'_>, b: &SupplierInfo<'_>) -> Ordering;
}

impl<F> SelectionPolicy for F
where
    F: Fn(&SupplierInfo<'_>, &SupplierInfo<'_>) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &SupplierInfo<'_>, b: &SupplierInfo<'_>) -> Ordering {
        self(a, b)
    }
}

/// Default supplier ranking
pub fn default_compare(
    a: &SupplierInfo<'_>,
    b: &SupplierInfo<'_>,
    system_bundle: &str,
) -> Ordering {
    let a_system = a.bundle.symbolic_name == system_bundle;
    let b_system = b.bundle.symbolic_name == system_bundle;
    match (a_system, b_system) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    b.resolved
        .cmp(&a.resolved)
        .then_with(|| b.version.cmp(a.version))
        .then_with(|| a.bundle.bundle_id.cmp(&b.bundle.bundle_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info<'a>(bundle: &'a BundleDescriptor, resolved: bool) -> SupplierInfo<'a> {
        SupplierInfo {
            name: "pkg",
            version: &bundle.version,
            bundle,
            resolved,
        }
    }

    #[test]
    fn test_default_ranking() {
        let system = BundleDescriptor::new(0, "system.bundle", Version::new(0, 1, 0));
        let old = BundleDescriptor::new(1, "a", Version::new(1, 0, 0));
        let new = BundleDescriptor::new(2, "a", Version::new(2, 0, 0));
        let twin = BundleDescriptor::new(3, "a", Version::new(2, 0, 0));

        assert_eq!(
            default_compare(&info(&system, false), &info(&new, true), "system.bundle"),
            Ordering::Less
        );
        assert_eq!(
            default_compare(&info(&old, true), &info(&new, false), "system.bundle"),
            Ordering::Less
        );
        assert_eq!(
            default_compare(&info(&new, false), &info(&old, false), "system.bundle"),
            Ordering::Less
        );
        assert_eq!(
            default_compare(&info(&new, false), &info(&twin, false), "system.bundle"),
            Ordering::Less
        );
    }

    #[test]
    fn test_closure_policy() {
        let lowest_first = |a: &SupplierInfo<'_>, b: &SupplierInfo<'_>| a.version.cmp(b.version);
        let old = BundleDescriptor::new(1, "a", Version::new(1, 0, 0));
        let new = BundleDescriptor::new(2, "a", Version::new(2, 0, 0));
        assert_eq!(
            SelectionPolicy::compare(&lowest_first, &info(&old, false), &info(&new, false)),
            Ordering::Less
        );
    }
}
