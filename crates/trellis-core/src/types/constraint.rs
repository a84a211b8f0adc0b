//! Constraint clauses declared by bundle descriptors.
//!
//! Each clause is the immutable, declared half of a constraint: the resolver
//! builds its mutable candidate state on top of these.

use super::attributes::{AttrValue, Attributes};
use super::descriptor::{BundleDescriptor, ExportSpec, GenericCapabilitySpec};
use super::filter::Filter;
use super::version::VersionRange;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolution directive of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Must be wired for the bundle to resolve
    #[default]
    Static,
    /// Wired when possible; never fails the bundle
    Optional,
    /// Only wired on demand at run time, never during a resolve pass
    Dynamic,
}

/// Import-package clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImportSpec {
    /// Package name; dynamic imports may use `*` or a `prefix.*` wildcard
    pub name: String,
    #[serde(default)]
    pub version: VersionRange,
    #[serde(default)]
    pub bundle_symbolic_name: Option<String>,
    #[serde(default)]
    pub bundle_version: VersionRange,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub resolution: Resolution,
}

/// Require-bundle clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequireSpec {
    pub name: String,
    #[serde(default)]
    pub version: VersionRange,
    #[serde(default)]
    pub optional: bool,
    /// `visibility:=reexport`
    #[serde(default)]
    pub reexport: bool,
}

/// Generic requirement clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GenericRequirementSpec {
    pub name: String,
    #[serde(default)]
    pub version: VersionRange,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub optional: bool,
    /// May bind to every matching capability instead of just one
    #[serde(default)]
    pub multiple: bool,
}

/// Fragment-host clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostSpec {
    pub name: String,
    #[serde(default)]
    pub version: VersionRange,
}

impl ImportSpec {
    /// Create a static import of any version of a package
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: VersionRange::any(),
            bundle_symbolic_name: None,
            bundle_version: VersionRange::any(),
            attributes: Attributes::new(),
            resolution: Resolution::Static,
        }
    }

    /// Restrict the acceptable export versions
    pub fn with_version(mut self, range: VersionRange) -> Self {
        self.version = range;
        self
    }

    /// Only accept exports from the named bundle
    pub fn from_bundle(mut self, symbolic_name: impl Into<String>) -> Self {
        self.bundle_symbolic_name = Some(symbolic_name.into());
        self
    }

    /// Restrict the exporting bundle's version
    pub fn with_bundle_version(mut self, range: VersionRange) -> Self {
        self.bundle_version = range;
        self
    }

    /// Require a matching attribute on the export
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Mark the import `resolution:=optional`
    pub fn optional(mut self) -> Self {
        self.resolution = Resolution::Optional;
        self
    }

    /// Mark the import as a dynamic import template
    pub fn dynamic(mut self) -> Self {
        self.resolution = Resolution::Dynamic;
        self
    }

    pub fn is_optional(&self) -> bool {
        self.resolution == Resolution::Optional
    }

    pub fn is_dynamic(&self) -> bool {
        self.resolution == Resolution::Dynamic
    }

    /// Check if this import (for the concrete package `name`) accepts an
    /// export declared by `exporter`
    ///
    /// `exporter` is the bundle the export is attributed to, which for
    /// fragment exports is the host and for re-export copies the re-exporter.
    pub fn accepts(&self, name: &str, export: &ExportSpec, exporter: &BundleDescriptor) -> bool {
        if export.name != name || !self.version.includes(&export.version) {
            return false;
        }
        if let Some(bsn) = &self.bundle_symbolic_name {
            if bsn != &exporter.symbolic_name {
                return false;
            }
        }
        if !self.bundle_version.includes(&exporter.version) {
            return false;
        }
        self.attributes
            .iter()
            .all(|(key, value)| export.attributes.get(key) == Some(value))
    }

    /// Check if a dynamic import template covers a requested package name
    pub fn covers(&self, package: &str) -> bool {
        crate::utils::matches_package_pattern(&self.name, package)
    }
}

impl RequireSpec {
    /// Create a mandatory require of any version of a bundle
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: VersionRange::any(),
            optional: false,
            reexport: false,
        }
    }

    pub fn with_version(mut self, range: VersionRange) -> Self {
        self.version = range;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Re-export the required bundle's packages (`visibility:=reexport`)
    pub fn reexport(mut self) -> Self {
        self.reexport = true;
        self
    }

    /// Check if a bundle satisfies this require
    pub fn accepts(&self, bundle: &BundleDescriptor) -> bool {
        !bundle.is_fragment()
            && bundle.symbolic_name == self.name
            && self.version.includes(&bundle.version)
    }
}

impl GenericRequirementSpec {
    /// Create a mandatory requirement on any capability named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: VersionRange::any(),
            filter: None,
            optional: false,
            multiple: false,
        }
    }

    pub fn with_version(mut self, range: VersionRange) -> Self {
        self.version = range;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Check if a generic capability satisfies this requirement
    ///
    /// The filter sees the capability attributes plus its `version`.
    pub fn accepts(&self, capability: &GenericCapabilitySpec) -> bool {
        if capability.name != self.name || !self.version.includes(&capability.version) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => {
                let mut attrs = capability.attributes.clone();
                attrs
                    .entry("version".to_string())
                    .or_insert_with(|| AttrValue::Version(capability.version.clone()));
                filter.matches(&attrs)
            }
        }
    }
}

impl HostSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: VersionRange::any(),
        }
    }

    pub fn with_version(mut self, range: VersionRange) -> Self {
        self.version = range;
        self
    }

    /// Check if a bundle can host a fragment with this clause
    pub fn accepts(&self, bundle: &BundleDescriptor) -> bool {
        !bundle.is_fragment()
            && bundle.symbolic_name == self.name
            && self.version.includes(&bundle.version)
    }
}

impl fmt::Display for ImportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Import-Package: {}", self.name)?;
        if !self.version.is_any() {
            write!(f, "; version=\"{}\"", self.version)?;
        }
        if let Some(bsn) = &self.bundle_symbolic_name {
            write!(f, "; bundle-symbolic-name=\"{}\"", bsn)?;
        }
        match self.resolution {
            Resolution::Static => Ok(()),
            Resolution::Optional => write!(f, "; resolution:=optional"),
            Resolution::Dynamic => write!(f, "; resolution:=dynamic"),
        }
    }
}

impl fmt::Display for RequireSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Require-Bundle: {}", self.name)?;
        if !self.version.is_any() {
            write!(f, "; bundle-version=\"{}\"", self.version)?;
        }
        if self.optional {
            write!(f, "; resolution:=optional")?;
        }
        Ok(())
    }
}

impl fmt::Display for GenericRequirementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Require-Capability: {}", self.name)?;
        if !self.version.is_any() {
            write!(f, "; version=\"{}\"", self.version)?;
        }
        if let Some(filter) = &self.filter {
            write!(f, "; filter:=\"{}\"", filter)?;
        }
        Ok(())
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fragment-Host: {}", self.name)?;
        if !self.version.is_any() {
            write!(f, "; bundle-version=\"{}\"", self.version)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Version;

    fn range(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn test_import_accepts_matching_export() {
        let exporter = BundleDescriptor::new(1, "a", Version::new(1, 0, 0));
        let export = ExportSpec::new("pkg.a").with_version(Version::new(1, 5, 0));

        assert!(ImportSpec::new("pkg.a").accepts("pkg.a", &export, &exporter));
        assert!(ImportSpec::new("pkg.a")
            .with_version(range("[1.0,2.0)"))
            .accepts("pkg.a", &export, &exporter));
        assert!(!ImportSpec::new("pkg.a")
            .with_version(range("[2.0,3.0)"))
            .accepts("pkg.a", &export, &exporter));
        assert!(!ImportSpec::new("pkg.b").accepts("pkg.b", &export, &exporter));
    }

    #[test]
    fn test_import_bundle_and_attribute_matching() {
        let exporter = BundleDescriptor::new(1, "a", Version::new(2, 0, 0));
        let export = ExportSpec::new("pkg.a").with_attribute("vendor", "acme");

        assert!(ImportSpec::new("pkg.a")
            .from_bundle("a")
            .with_bundle_version(range("2.0"))
            .accepts("pkg.a", &export, &exporter));
        assert!(!ImportSpec::new("pkg.a")
            .from_bundle("b")
            .accepts("pkg.a", &export, &exporter));
        assert!(ImportSpec::new("pkg.a")
            .with_attribute("vendor", "acme")
            .accepts("pkg.a", &export, &exporter));
        assert!(!ImportSpec::new("pkg.a")
            .with_attribute("vendor", "other")
            .accepts("pkg.a", &export, &exporter));
    }

    #[test]
    fn test_require_and_host_reject_fragments() {
        let host = BundleDescriptor::new(1, "host", Version::new(1, 0, 0));
        let fragment = BundleDescriptor::new(2, "host", Version::new(1, 0, 0))
            .with_host(HostSpec::new("other"));

        assert!(RequireSpec::new("host").accepts(&host));
        assert!(!RequireSpec::new("host").accepts(&fragment));
        assert!(HostSpec::new("host").accepts(&host));
        assert!(!HostSpec::new("host")
            .with_version(range("[2.0,3.0)"))
            .accepts(&host));
    }

    #[test]
    fn test_generic_filter_sees_version() {
        let capability = GenericCapabilitySpec::new("osgi.ee", Version::new(1, 8, 0))
            .with_attribute("osgi.ee", "JavaSE");
        let spec = GenericRequirementSpec::new("osgi.ee")
            .with_filter(Filter::parse("(&(osgi.ee=JavaSE)(version>=1.7))").unwrap());
        assert!(spec.accepts(&capability));

        let spec = GenericRequirementSpec::new("osgi.ee")
            .with_filter(Filter::parse("(version>=9)").unwrap());
        assert!(!spec.accepts(&capability));
    }

    #[test]
    fn test_dynamic_template_coverage() {
        assert!(ImportSpec::new("*").dynamic().covers("any.thing"));
        assert!(ImportSpec::new("org.acme.*").dynamic().covers("org.acme.util"));
        assert!(!ImportSpec::new("org.acme.*").dynamic().covers("com.acme"));
        assert!(ImportSpec::new("org.acme").dynamic().covers("org.acme"));
    }

    #[test]
    fn test_display() {
        let spec = ImportSpec::new("pkg.a").with_version(range("[1.0,2.0)")).optional();
        assert_eq!(
            spec.to_string(),
            "Import-Package: pkg.a; version=\"[1.0.0,2.0.0)\"; resolution:=optional"
        );
        assert_eq!(RequireSpec::new("b").to_string(), "Require-Bundle: b");
    }
}
