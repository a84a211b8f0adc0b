//! Bundle version types with rkyv support.
//!
//! Provides the four-part `Version` (major.minor.micro.qualifier) and the
//! interval-style `VersionRange` used by every constraint kind, both with
//! zero-copy serialization support.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bundle version (major.minor.micro.qualifier)
///
/// Missing numeric parts default to zero and an empty qualifier sorts before
/// any non-empty one. Comparison is numeric on the first three parts and
/// lexical on the qualifier.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeDeserialize,
    SerdeSerialize,
)]
#[archive(check_bytes)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: String,
}

/// Version range in interval notation (`[1.0,2.0)`, `(1.0,1.5]`, `1.0`)
///
/// A bare version means "at least this version" with no upper bound.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeDeserialize,
    SerdeSerialize,
)]
#[archive(check_bytes)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    pub min: Version,
    pub include_min: bool,
    pub max: Option<Version>,
    pub include_max: bool,
}

/// Version parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version format: {input}")]
    InvalidFormat { input: String },

    #[error("Invalid number in version: {component}")]
    InvalidNumber { component: String },

    #[error("Invalid qualifier in version: {qualifier}")]
    InvalidQualifier { qualifier: String },

    #[error("Invalid version range: {input}")]
    InvalidRange { input: String },
}

impl Version {
    /// Create a new version with an empty qualifier
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// Create a new version with a qualifier
    pub fn with_qualifier(
        major: u32,
        minor: u32,
        micro: u32,
        qualifier: impl Into<String>,
    ) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: qualifier.into(),
        }
    }

    /// The empty version `0.0.0`
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        Self::from_str(input)
    }

    /// Check if this version falls inside a range
    pub fn satisfies(&self, range: &VersionRange) -> bool {
        range.includes(self)
    }
}

fn parse_component(component: &str) -> Result<u32, VersionError> {
    component
        .trim()
        .parse()
        .map_err(|_| VersionError::InvalidNumber {
            component: component.to_string(),
        })
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Ok(Version::empty());
        }

        let parts: Vec<&str> = input.splitn(4, '.').collect();
        let mut version = Version::empty();
        version.major = parse_component(parts[0])?;
        if let Some(minor) = parts.get(1) {
            version.minor = parse_component(minor)?;
        }
        if let Some(micro) = parts.get(2) {
            version.micro = parse_component(micro)?;
        }
        if let Some(qualifier) = parts.get(3) {
            let valid = qualifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(VersionError::InvalidQualifier {
                    qualifier: qualifier.to_string(),
                });
            }
            version.qualifier = qualifier.to_string();
        }

        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;

        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }

        Ok(())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.micro)
            .cmp(&(other.major, other.minor, other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::from_str(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl VersionRange {
    /// Range that includes every version
    pub fn any() -> Self {
        Self::at_least(Version::empty())
    }

    /// Range with an inclusive lower bound and no upper bound
    pub fn at_least(min: Version) -> Self {
        Self {
            min,
            include_min: true,
            max: None,
            include_max: false,
        }
    }

    /// Range that matches exactly one version
    pub fn exactly(version: Version) -> Self {
        Self {
            min: version.clone(),
            include_min: true,
            max: Some(version),
            include_max: true,
        }
    }

    /// Parse a version range string
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        Self::from_str(input)
    }

    /// Check if a version is inside this range
    pub fn includes(&self, version: &Version) -> bool {
        let above_min = match version.cmp(&self.min) {
            Ordering::Greater => true,
            Ordering::Equal => self.include_min,
            Ordering::Less => false,
        };
        if !above_min {
            return false;
        }
        match &self.max {
            None => true,
            Some(max) => match version.cmp(max) {
                Ordering::Less => true,
                Ordering::Equal => self.include_max,
                Ordering::Greater => false,
            },
        }
    }

    /// True when no version can satisfy this range
    pub fn is_empty(&self) -> bool {
        match &self.max {
            None => false,
            Some(max) => match self.min.cmp(max) {
                Ordering::Greater => true,
                Ordering::Equal => !(self.include_min && self.include_max),
                Ordering::Less => false,
            },
        }
    }

    /// True when this range places no restriction at all
    pub fn is_any(&self) -> bool {
        self.max.is_none() && self.include_min && self.min == Version::empty()
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim().trim_matches('"');
        let invalid = || VersionError::InvalidRange {
            input: s.to_string(),
        };

        let include_min = match input.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Ok(VersionRange::at_least(Version::from_str(input)?)),
        };
        let include_max = match input.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(invalid()),
        };
        if input.len() < 2 {
            return Err(invalid());
        }

        let body = &input[1..input.len() - 1];
        let (min, max) = body.split_once(',').ok_or_else(invalid)?;

        let max = match max.trim() {
            "" => None,
            max => Some(Version::from_str(max)?),
        };

        Ok(VersionRange {
            min: Version::from_str(min)?,
            include_min,
            max,
            include_max,
        })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.max {
            None if self.include_min => write!(f, "{}", self.min),
            None => write!(f, "({},)", self.min),
            Some(max) => write!(
                f,
                "{}{},{}{}",
                if self.include_min { '[' } else { '(' },
                self.min,
                max,
                if self.include_max { ']' } else { ')' }
            ),
        }
    }
}

impl TryFrom<String> for VersionRange {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VersionRange::from_str(&value)
    }
}

impl From<VersionRange> for String {
    fn from(range: VersionRange) -> Self {
        range.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = Version::from_str("1.2.3").unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.minor, 2);
        assert_eq!(v.micro, 3);
        assert!(v.qualifier.is_empty());
    }

    #[test]
    fn test_version_partial_parts_default_to_zero() {
        assert_eq!(Version::from_str("2").unwrap(), Version::new(2, 0, 0));
        assert_eq!(Version::from_str("2.5").unwrap(), Version::new(2, 5, 0));
        assert_eq!(Version::from_str("").unwrap(), Version::empty());
    }

    #[test]
    fn test_version_with_qualifier() {
        let v = Version::from_str("3.4.0.v20070101").unwrap();
        assert_eq!(v.qualifier, "v20070101");
        assert_eq!(v.to_string(), "3.4.0.v20070101");
    }

    #[test]
    fn test_version_rejects_garbage() {
        assert!(Version::from_str("a.b.c").is_err());
        assert!(Version::from_str("1.0.0.bad qualifier").is_err());
    }

    #[test]
    fn test_version_comparison() {
        let v1 = Version::new(1, 0, 0);
        let v2 = Version::new(2, 0, 0);
        let v3 = Version::new(1, 1, 0);
        let q = Version::with_qualifier(1, 0, 0, "a");

        assert!(v1 < v2);
        assert!(v1 < v3);
        assert!(v3 < v2);
        assert!(v1 < q);
        assert!(Version::new(1, 10, 0) > Version::new(1, 9, 0));
    }

    #[test]
    fn test_range_interval() {
        let range = VersionRange::from_str("[1.0,2.0)").unwrap();
        assert!(range.includes(&Version::new(1, 0, 0)));
        assert!(range.includes(&Version::new(1, 9, 9)));
        assert!(!range.includes(&Version::new(2, 0, 0)));
        assert!(!range.includes(&Version::new(0, 9, 0)));

        let range = VersionRange::from_str("(1.0,2.0]").unwrap();
        assert!(!range.includes(&Version::new(1, 0, 0)));
        assert!(range.includes(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_range_bare_version_is_at_least() {
        let range = VersionRange::from_str("1.5").unwrap();
        assert!(range.includes(&Version::new(1, 5, 0)));
        assert!(range.includes(&Version::new(99, 0, 0)));
        assert!(!range.includes(&Version::new(1, 4, 9)));
        assert_eq!(range.to_string(), "1.5.0");
    }

    #[test]
    fn test_empty_range_matches_nothing() {
        let range = VersionRange::from_str("(1.0,1.0]").unwrap();
        assert!(range.is_empty());
        assert!(!range.includes(&Version::new(1, 0, 0)));
    }

    #[test]
    fn test_range_display() {
        let range = VersionRange::from_str("[1.0, 2.0)").unwrap();
        assert_eq!(range.to_string(), "[1.0.0,2.0.0)");
        assert!(VersionRange::any().is_any());
    }

    #[test]
    fn test_range_errors() {
        assert!(VersionRange::from_str("[1.0,2.0").is_err());
        assert!(VersionRange::from_str("[1.0)").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let v: Version = serde_json::from_str("\"1.2.3.beta\"").unwrap();
        assert_eq!(v, Version::with_qualifier(1, 2, 3, "beta"));
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.2.3.beta\"");

        let r: VersionRange = serde_json::from_str("\"[1.0,2.0)\"").unwrap();
        assert!(r.includes(&Version::new(1, 5, 0)));
    }
}
