//! trellis.toml parsing and serialization

use crate::ConfigResult;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;
use trellis_core::error::TrellisError;
use trellis_core::types::{BundleDescriptor, PlatformProperties};
use trellis_resolver::{ResolverOptions, State};

/// Complete trellis.toml configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrellisToml {
    /// Resolver switches
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Platform property dictionaries; the first one carries the mode keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platform: Vec<PlatformProperties>,

    /// Bundle descriptors making up a fixture state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bundle: Vec<BundleDescriptor>,
}

/// `[resolver]` section
///
/// Every field is optional so layers can be merged; unset fields fall back
/// to the resolver defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolverConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub development_mode: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_optional: Option<bool>,

    /// Symbolic name of the system bundle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_bundle: Option<String>,

    /// Bound on uses-conflict combination search
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_combinations: Option<usize>,
}

impl ResolverConfig {
    /// Fill unset fields from a lower-priority layer
    pub fn or(self, fallback: ResolverConfig) -> ResolverConfig {
        ResolverConfig {
            development_mode: self.development_mode.or(fallback.development_mode),
            resolve_optional: self.resolve_optional.or(fallback.resolve_optional),
            system_bundle: self.system_bundle.or(fallback.system_bundle),
            max_combinations: self.max_combinations.or(fallback.max_combinations),
        }
    }

    /// Resolver options with unset fields at their defaults
    pub fn to_options(&self) -> ResolverOptions {
        let defaults = ResolverOptions::default();
        ResolverOptions {
            development_mode: self.development_mode.unwrap_or(defaults.development_mode),
            resolve_optional: self.resolve_optional.unwrap_or(defaults.resolve_optional),
            system_bundle: self.system_bundle.clone().unwrap_or(defaults.system_bundle),
            max_combinations: self.max_combinations.unwrap_or(defaults.max_combinations),
        }
    }
}

impl TrellisToml {
    /// Build a state holding every `[[bundle]]` descriptor
    pub fn to_state(&self) -> ConfigResult<State> {
        let mut state = State::new();
        for bundle in &self.bundle {
            state.add_bundle(bundle.clone())?;
        }
        Ok(state)
    }
}

/// Parse TOML string to TrellisToml configuration
pub fn parse_trellis_toml(content: &str) -> ConfigResult<TrellisToml> {
    // toml_edit reports syntax errors with a span
    content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| parse_error(content, e.message(), e.span()))?;

    let config: TrellisToml =
        ::toml::from_str(content).map_err(|e| parse_error(content, e.message(), e.span()))?;

    validate_config(&config)?;
    Ok(config)
}

/// Serialize TrellisToml to TOML string
pub fn serialize_trellis_toml(config: &TrellisToml) -> ConfigResult<String> {
    ::toml::to_string_pretty(config).map_err(|e| TrellisError::Serialization {
        what: "trellis.toml".to_string(),
        message: e.to_string(),
    })
}

/// Validate configuration completeness
pub fn validate_config(config: &TrellisToml) -> ConfigResult<()> {
    if config.resolver.max_combinations == Some(0) {
        return Err(TrellisError::config(
            "resolver.max-combinations",
            "must be at least 1",
        ));
    }
    if let Some(name) = &config.resolver.system_bundle {
        if !BundleDescriptor::is_valid_symbolic_name(name) {
            return Err(TrellisError::config(
                "resolver.system-bundle",
                format!("'{}' is not a valid symbolic name", name),
            ));
        }
    }

    let mut seen = BTreeSet::new();
    for bundle in &config.bundle {
        if !seen.insert(bundle.bundle_id) {
            return Err(TrellisError::config(
                "bundle.bundle-id",
                format!("bundle id {} is used more than once", bundle.bundle_id),
            ));
        }
        if !BundleDescriptor::is_valid_symbolic_name(&bundle.symbolic_name) {
            return Err(TrellisError::config(
                "bundle.symbolic-name",
                format!("'{}' is not a valid symbolic name", bundle.symbolic_name),
            ));
        }
    }
    Ok(())
}

/// Load and parse trellis.toml from file path
pub async fn load_from_file(path: &Utf8Path) -> ConfigResult<TrellisToml> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TrellisError::io(format!("Failed to read {}", path), e))?;

    parse_trellis_toml(&content).map_err(|e| match e {
        TrellisError::TomlParse { message, line, column } => TrellisError::TomlParse {
            message: format!("in {}: {}", path, message),
            line,
            column,
        },
        TrellisError::ConfigValidation { field, reason } => TrellisError::ConfigValidation {
            field,
            reason: format!("in {}: {}", path, reason),
        },
        other => other,
    })
}

fn parse_error(content: &str, message: &str, span: Option<Range<usize>>) -> TrellisError {
    let (line, column) = span.map_or((0, 0), |span| locate(content, span.start));
    TrellisError::TomlParse {
        message: message.trim().to_string(),
        line,
        column,
    }
}

/// One-based line and column of a byte offset
fn locate(content: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(content.len());
    let before = content.get(..offset).unwrap_or(content);
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}
