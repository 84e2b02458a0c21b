//! Registry configuration and its loaders
//!
//! ## Sources
//! - TOML or JSON text ([`RegistryConfig::from_toml_str`],
//!   [`RegistryConfig::from_json_str`])
//! - a file, format chosen by extension ([`RegistryConfig::load_from_file`])
//! - environment variables ([`RegistryConfig::load_from_env`])
//!
//! ## Environment Variables
//! - `OBSERVA_ENABLED`: whether observations are recorded (true/false)
//! - `OBSERVA_DISABLED_OBSERVATIONS`: comma-separated name prefixes to skip
//! - `OBSERVA_COMMON_TAGS`: `key=value` pairs, comma-separated, added as
//!   low-cardinality tags to every observation
//!
//! Unset variables keep their defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ObservationError, ObservationResult};
use crate::key_value::KeyValues;
use crate::registry::ObservationRegistry;
use crate::tags::CommonTagsProvider;

/// Master switch, `true` or `false`
pub const ENV_ENABLED: &str = "OBSERVA_ENABLED";
/// Comma-separated observation name prefixes to disable
pub const ENV_DISABLED_OBSERVATIONS: &str = "OBSERVA_DISABLED_OBSERVATIONS";
/// Comma-separated `key=value` common tags
pub const ENV_COMMON_TAGS: &str = "OBSERVA_COMMON_TAGS";

/// Declarative registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Master switch; a disabled registry only creates no-op observations
    pub enabled: bool,
    /// Observation name prefixes that are turned into no-ops
    pub disabled_observations: Vec<String>,
    /// Low-cardinality tags added to every observation
    pub common_low_cardinality_tags: BTreeMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_observations: Vec::new(),
            common_low_cardinality_tags: BTreeMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Parse TOML text
    pub fn from_toml_str(contents: &str) -> ObservationResult<Self> {
        toml::from_str(contents)
            .map_err(|e| ObservationError::config(format!("Invalid TOML format: {e}")))
    }

    /// Parse JSON text
    pub fn from_json_str(contents: &str) -> ObservationResult<Self> {
        serde_json::from_str(contents)
            .map_err(|e| ObservationError::config(format!("Invalid JSON format: {e}")))
    }

    /// Load from a `.toml` or `.json` file
    ///
    /// # Errors
    /// Returns [`ObservationError::Config`] if the file is missing or
    /// unreadable, the extension is unsupported, or the contents do not parse.
    pub fn load_from_file(path: impl AsRef<Path>) -> ObservationResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ObservationError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        info!(path = %path.display(), "Loading observation registry configuration");
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ObservationError::config(format!("Failed to read config file: {e}")))?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("json") {
            "toml" => Self::from_toml_str(&contents),
            "json" => Self::from_json_str(&contents),
            other => {
                Err(ObservationError::config(format!("Unsupported config format: {other}")))
            }
        }
    }

    /// Load from the process environment
    pub fn load_from_env() -> ObservationResult<Self> {
        Self::from_env_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_env_lookup(lookup: impl Fn(&str) -> Option<String>) -> ObservationResult<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_ENABLED) {
            config.enabled = parse_bool(ENV_ENABLED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DISABLED_OBSERVATIONS) {
            config.disabled_observations = split_list(&raw).map(str::to_string).collect();
        }
        if let Some(raw) = lookup(ENV_COMMON_TAGS) {
            config.common_low_cardinality_tags = parse_tags(&raw)?;
        }

        debug!(?config, "registry configuration read from environment");
        Ok(config)
    }

    /// Apply these settings to an existing registry
    pub fn apply_to(&self, registry: &ObservationRegistry) {
        registry.set_enabled(self.enabled);

        if !self.disabled_observations.is_empty() {
            let prefixes = self.disabled_observations.clone();
            registry.register_predicate(move |name, _| {
                !prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
            });
        }

        if !self.common_low_cardinality_tags.is_empty() {
            let tags = KeyValues::of(self.common_low_cardinality_tags.clone());
            registry.register_tags_provider(Arc::new(CommonTagsProvider::new(tags)));
        }
    }
}

impl ObservationRegistry {
    /// Registry configured from `config`, with no handlers yet
    pub fn from_config(config: &RegistryConfig) -> Self {
        let registry = Self::new();
        config.apply_to(&registry);
        registry
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_bool(key: &str, raw: &str) -> ObservationResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ObservationError::config(format!("Invalid boolean for {key}: {other}"))),
    }
}

fn parse_tags(raw: &str) -> ObservationResult<BTreeMap<String, String>> {
    split_list(raw)
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ObservationError::config(format!("Invalid tag '{pair}', expected key=value"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ObservationError::config(format!("Empty tag key in '{pair}'")));
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
