//! Configuration layering, fallback logic, and environment overrides

use crate::toml::{ResolverConfig, TrellisToml};
use crate::ConfigResult;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use tracing::debug;
use trellis_core::error::TrellisError;

/// Project configuration file name
pub const CONFIG_FILE: &str = "trellis.toml";

/// Prefix of environment overrides
const ENV_PREFIX: &str = "TRELLIS_";

/// Main configuration loading interface
pub struct ConfigLoader {
    /// Current working directory
    cwd: Utf8PathBuf,
    /// Global config location; `~/.trellis/config.toml` unless overridden
    global_path: Option<Utf8PathBuf>,
}

/// Configuration layering and merging
pub struct ConfigLayering;

/// Configuration source tracking
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Global config file
    Global(Utf8PathBuf),
    /// Project trellis.toml file
    Project(Utf8PathBuf),
    /// Environment variable
    Environment(String),
    /// Explicit override passed by the caller
    Override,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new(cwd: Utf8PathBuf) -> Self {
        Self { cwd, global_path: None }
    }

    /// Use a specific global config file instead of the one in the home directory
    pub fn with_global_path(mut self, path: Utf8PathBuf) -> Self {
        self.global_path = Some(path);
        self
    }

    /// Load project configuration, walking up from the working directory
    pub async fn load_project_config(&self) -> ConfigResult<(TrellisToml, ConfigSource)> {
        let path = self.resolve_config_path(CONFIG_FILE)?;
        if !path.exists() {
            return Err(TrellisError::config(
                "config",
                format!("No {} found in {} or its parent directories", CONFIG_FILE, self.cwd),
            ));
        }
        let config = crate::toml::load_from_file(&path).await?;
        debug!(path = %path, "Loaded project configuration");
        Ok((config, ConfigSource::Project(path)))
    }

    /// Find configuration file in project (walks up directory tree)
    pub fn resolve_config_path(&self, filename: &str) -> ConfigResult<Utf8PathBuf> {
        let mut current: Option<&Utf8Path> = Some(self.cwd.as_path());
        while let Some(dir) = current {
            let config_path = dir.join(filename);
            if config_path.exists() {
                return Ok(config_path);
            }
            current = dir.parent();
        }

        // Return path in current directory even if it doesn't exist
        Ok(self.cwd.join(filename))
    }

    /// Location of the global configuration file
    pub fn global_config_path(&self) -> ConfigResult<Utf8PathBuf> {
        if let Some(path) = &self.global_path {
            return Ok(path.clone());
        }
        let home_dir = dirs::home_dir()
            .ok_or_else(|| TrellisError::config("home_dir", "Could not determine home directory"))?;
        let home = Utf8PathBuf::try_from(home_dir)
            .map_err(|e| {
                TrellisError::config("home_dir", format!("Invalid home directory path: {}", e))
            })?;
        Ok(home.join(".trellis").join("config.toml"))
    }

    /// Load global configuration
    pub async fn load_global_config(&self) -> ConfigResult<Option<TrellisToml>> {
        let path = self.global_config_path()?;
        if path.exists() {
            let config = crate::toml::load_from_file(&path).await?;
            debug!(path = %path, "Loaded global configuration");
            Ok(Some(config))
        } else {
            Ok(None)
        }
    }

    /// Load every layer: global file, project file, `TRELLIS_*` environment
    /// variables, then explicit overrides
    pub async fn load(&self, overrides: HashMap<String, String>) -> ConfigResult<TrellisToml> {
        self.load_with_env(ConfigLayering::collect_env_overrides(), overrides)
            .await
    }

    /// [`ConfigLoader::load`] with a given set of environment overrides
    pub async fn load_with_env(
        &self,
        env_overrides: HashMap<String, String>,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<TrellisToml> {
        let global = self.load_global_config().await?;
        let (project, _) = self.load_project_config().await?;
        ConfigLayering::merge_configs(global, project, env_overrides, overrides)
    }
}

impl ConfigLayering {
    /// Merge multiple configuration layers
    ///
    /// Resolver switches fall back from the project to the global layer;
    /// platform dictionaries come from the project when it has any. Bundle
    /// fixtures are never inherited from the global layer.
    pub fn merge_configs(
        global_config: Option<TrellisToml>,
        project_config: TrellisToml,
        env_overrides: HashMap<String, String>,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<TrellisToml> {
        let mut merged = project_config;

        if let Some(global) = global_config {
            merged.resolver = merged.resolver.or(global.resolver);
            if merged.platform.is_empty() {
                merged.platform = global.platform;
            }
        }

        for (key, value) in &env_overrides {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let field = field.to_lowercase().replace('_', "-");
            Self::apply_override(
                &mut merged.resolver,
                &field,
                value,
                ConfigSource::Environment(key.clone()),
            )?;
        }

        // explicit overrides win
        for (key, value) in &overrides {
            Self::apply_override(&mut merged.resolver, key, value, ConfigSource::Override)?;
        }

        crate::toml::validate_config(&merged)?;
        Ok(merged)
    }

    /// Set one `[resolver]` field; unknown fields are ignored
    fn apply_override(
        config: &mut ResolverConfig,
        field: &str,
        value: &str,
        source: ConfigSource,
    ) -> ConfigResult<()> {
        let invalid = |reason: String| {
            let origin = match &source {
                ConfigSource::Environment(var) => var.clone(),
                _ => field.to_string(),
            };
            TrellisError::config(origin, reason)
        };
        let flag = || {
            parse_bool(value).ok_or_else(|| invalid(format!("'{}' is not a boolean", value)))
        };
        match field {
            "development-mode" => {
                config.development_mode = Some(flag()?);
            }
            "resolve-optional" => {
                config.resolve_optional = Some(flag()?);
            }
            "system-bundle" => {
                config.system_bundle = Some(value.to_string());
            }
            "max-combinations" => {
                let n = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| invalid(format!("'{}' is not a count: {}", value, e)))?;
                config.max_combinations = Some(n);
            }
            _ => {
                debug!(field, "Ignoring unknown configuration override");
                return Ok(());
            }
        }
        debug!(field, value, source = ?source, "Applied configuration override");
        Ok(())
    }

    /// Collect environment variable overrides
    pub fn collect_env_overrides() -> HashMap<String, String> {
        std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
