//! Bundle descriptor types.
//!
//! A descriptor is the read-only input the resolver works from: identity,
//! eligibility checks, the capabilities a bundle offers and the constraints
//! it declares.

use super::attributes::{AttrValue, Attributes};
use super::constraint::{GenericRequirementSpec, HostSpec, ImportSpec, RequireSpec};
use super::filter::Filter;
use super::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Install id of a bundle; unique within a store
pub type BundleId = u64;

/// Bundle descriptor supplied by the descriptor store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BundleDescriptor {
    pub bundle_id: BundleId,
    pub symbolic_name: String,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub singleton: bool,
    #[serde(default)]
    pub execution_environments: Vec<String>,
    #[serde(default)]
    pub platform_filter: Option<Filter>,
    #[serde(default)]
    pub imports: Vec<ImportSpec>,
    #[serde(default)]
    pub requires: Vec<RequireSpec>,
    #[serde(default)]
    pub generic_requires: Vec<GenericRequirementSpec>,
    #[serde(default)]
    pub exports: Vec<ExportSpec>,
    #[serde(default)]
    pub generic_capabilities: Vec<GenericCapabilitySpec>,
    #[serde(default)]
    pub host: Option<HostSpec>,
}

/// Export-package clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExportSpec {
    pub name: String,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub attributes: Attributes,
    /// Packages whose providers must stay consistent with this export's wiring
    #[serde(default)]
    pub uses: Vec<String>,
}

/// Generic capability clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GenericCapabilitySpec {
    pub name: String,
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub attributes: Attributes,
}

impl BundleDescriptor {
    /// Create a descriptor with no capabilities or constraints
    pub fn new(bundle_id: BundleId, symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            bundle_id,
            symbolic_name: symbolic_name.into(),
            version,
            singleton: false,
            execution_environments: Vec::new(),
            platform_filter: None,
            imports: Vec::new(),
            requires: Vec::new(),
            generic_requires: Vec::new(),
            exports: Vec::new(),
            generic_capabilities: Vec::new(),
            host: None,
        }
    }

    /// Mark the bundle `singleton:=true`
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn with_execution_environment(mut self, ee: impl Into<String>) -> Self {
        self.execution_environments.push(ee.into());
        self
    }

    pub fn with_platform_filter(mut self, filter: Filter) -> Self {
        self.platform_filter = Some(filter);
        self
    }

    pub fn with_import(mut self, spec: ImportSpec) -> Self {
        self.imports.push(spec);
        self
    }

    pub fn with_require(mut self, spec: RequireSpec) -> Self {
        self.requires.push(spec);
        self
    }

    pub fn with_generic_requirement(mut self, spec: GenericRequirementSpec) -> Self {
        self.generic_requires.push(spec);
        self
    }

    pub fn with_export(mut self, spec: ExportSpec) -> Self {
        self.exports.push(spec);
        self
    }

    pub fn with_generic_capability(mut self, spec: GenericCapabilitySpec) -> Self {
        self.generic_capabilities.push(spec);
        self
    }

    /// Turn the bundle into a fragment of the given host
    pub fn with_host(mut self, spec: HostSpec) -> Self {
        self.host = Some(spec);
        self
    }

    pub fn is_fragment(&self) -> bool {
        self.host.is_some()
    }

    /// Check if this is a valid symbolic name
    pub fn is_valid_symbolic_name(name: &str) -> bool {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == '_')
            && !name.starts_with('.')
            && !name.ends_with('.')
    }

    /// Non-dynamic imports in declaration order
    pub fn static_imports(&self) -> impl Iterator<Item = (usize, &ImportSpec)> {
        self.imports.iter().enumerate().filter(|(_, i)| !i.is_dynamic())
    }

    /// Dynamic import templates in declaration order
    pub fn dynamic_imports(&self) -> impl Iterator<Item = (usize, &ImportSpec)> {
        self.imports.iter().enumerate().filter(|(_, i)| i.is_dynamic())
    }

    /// Check if this bundle declares an export of a package
    pub fn exports_package(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e.name == name)
    }
}

impl fmt::Display for BundleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbolic_name, self.version)
    }
}

impl ExportSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Version::empty(),
            attributes: Attributes::new(),
            uses: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a package to the `uses` directive
    pub fn uses(mut self, package: impl Into<String>) -> Self {
        self.uses.push(package.into());
        self
    }
}

impl GenericCapabilitySpec {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_display() {
        let bundle = BundleDescriptor::new(3, "org.acme.core", Version::new(1, 2, 0))
            .singleton()
            .with_export(ExportSpec::new("org.acme").uses("org.acme.spi"))
            .with_import(ImportSpec::new("org.other"))
            .with_import(ImportSpec::new("org.dyn.*").dynamic());

        assert!(bundle.singleton);
        assert!(!bundle.is_fragment());
        assert!(bundle.exports_package("org.acme"));
        assert_eq!(bundle.static_imports().count(), 1);
        assert_eq!(bundle.dynamic_imports().count(), 1);
        assert_eq!(bundle.to_string(), "org.acme.core@1.2.0");
    }

    #[test]
    fn test_valid_symbolic_names() {
        assert!(BundleDescriptor::is_valid_symbolic_name("org.acme.core"));
        assert!(BundleDescriptor::is_valid_symbolic_name("my-bundle_2"));
        assert!(!BundleDescriptor::is_valid_symbolic_name(""));
        assert!(!BundleDescriptor::is_valid_symbolic_name(".hidden"));
        assert!(!BundleDescriptor::is_valid_symbolic_name("bad name"));
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "bundle-id": 7,
            "symbolic-name": "b",
            "version": "1.0.0",
            "imports": [{"name": "pkg.a", "version": "[1.0,2.0)"}],
            "exports": [{"name": "pkg.b", "uses": ["pkg.a"]}],
            "platform-filter": "(osgi.os=linux)"
        }"#;
        let bundle: BundleDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(bundle.bundle_id, 7);
        assert_eq!(bundle.imports[0].name, "pkg.a");
        assert_eq!(bundle.exports[0].uses, vec!["pkg.a".to_string()]);
        assert!(bundle.platform_filter.is_some());
    }
}
