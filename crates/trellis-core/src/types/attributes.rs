//! Typed attribute values attached to capabilities and platform dictionaries.

use super::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map keyed by attribute name
pub type Attributes = BTreeMap<String, AttrValue>;

/// Platform property dictionary (`osgi.os`, `framework.executionenvironment`, ...)
pub type PlatformProperties = BTreeMap<String, String>;

/// A single typed attribute value
///
/// Filter comparisons are typed by the stored value: strings compare
/// lexically, longs numerically, versions by version order and lists match
/// when any element matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Long(i64),
    List(Vec<String>),
    String(String),
    Version(Version),
}

impl AttrValue {
    /// Compare this value against a filter operand
    ///
    /// Returns `None` when the operand cannot be converted to this value's type.
    pub fn compare_operand(&self, operand: &str) -> Option<Ordering> {
        match self {
            AttrValue::String(s) => Some(s.as_str().cmp(operand)),
            AttrValue::Long(n) => operand.trim().parse::<i64>().ok().map(|o| n.cmp(&o)),
            AttrValue::Version(v) => Version::parse(operand).ok().map(|o| v.cmp(&o)),
            AttrValue::List(_) => None,
        }
    }

    /// Borrow the value as a string when it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::String(s) => write!(f, "{}", s),
            AttrValue::Long(n) => write!(f, "{}", n),
            AttrValue::Version(v) => write!(f, "{}", v),
            AttrValue::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Long(value)
    }
}

impl From<Version> for AttrValue {
    fn from(value: Version) -> Self {
        AttrValue::Version(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        AttrValue::List(value)
    }
}

/// Convert a platform dictionary into an attribute map of string values
pub fn properties_to_attributes(properties: &PlatformProperties) -> Attributes {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), AttrValue::String(v.clone())))
        .collect()
}
