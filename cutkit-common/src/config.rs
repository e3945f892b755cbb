//! Configuration loading and resolution
//!
//! Configuration file resolution follows a fixed priority order:
//! 1. Explicit path (e.g. a command-line argument, highest priority)
//! 2. `CUTKIT_CONFIG` environment variable
//! 3. User config file (`~/.config/cutkit/config.toml` on Linux)
//! 4. Built-in defaults (fallback)
//!
//! A missing file at priority 3 is not an error; an explicitly requested file
//! that does not exist or fails to parse is.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a configuration file
pub const CONFIG_ENV_VAR: &str = "CUTKIT_CONFIG";

/// Default number of cuts per shard
pub const DEFAULT_SHARD_SIZE: usize = 1000;

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct TomlConfig {
    /// Shar export defaults
    #[serde(default)]
    pub shar: SharConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults for sharded exports
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SharConfig {
    /// Cuts per shard; `0` disables sharding
    #[serde(default = "default_shard_size")]
    pub shard_size: usize,

    /// Index of the first shard
    #[serde(default)]
    pub shard_offset: usize,

    /// Suffix used when sharding is disabled
    #[serde(default)]
    pub shard_suffix: Option<String>,

    /// Warn when a cut carries data for a field that is not exported
    #[serde(default = "default_true")]
    pub warn_unused_fields: bool,

    /// Write the `cuts` metadata stream
    #[serde(default = "default_true")]
    pub include_cuts: bool,

    /// Exported fields, in order (`[[shar.fields]]` tables)
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

/// One exported field and its writer codec
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FieldConfig {
    pub name: String,
    pub format: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SharConfig {
    fn default() -> Self {
        Self {
            shard_size: default_shard_size(),
            shard_offset: 0,
            shard_suffix: None,
            warn_unused_fields: true,
            include_cuts: true,
            fields: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SharConfig {
    /// Shard size as an option (`None` when sharding is disabled)
    pub fn shard_size(&self) -> Option<usize> {
        (self.shard_size > 0).then_some(self.shard_size)
    }
}

fn default_shard_size() -> usize {
    DEFAULT_SHARD_SIZE
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve and load configuration following the priority order
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg)? {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => {
                debug!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.shar.fields {
            if field.name.is_empty() {
                return Err(Error::Config("Field name must not be empty".to_string()));
            }
            if field.name == "cuts" {
                return Err(Error::Config(
                    "Field name 'cuts' is reserved for the metadata stream".to_string(),
                ));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::Config(format!("Duplicate field '{}'", field.name)));
            }
        }
        if self.shar.shard_size > 0 && self.shar.shard_suffix.is_some() {
            return Err(Error::Config(
                "shard_suffix can only be set when sharding is disabled (shard_size = 0)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Find the configuration file to load, if any
///
/// Explicit and environment-provided paths must exist; the user config file
/// is optional.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: Explicit path
    if let Some(path) = cli_arg {
        return require_existing(path.to_path_buf()).map(Some);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return require_existing(PathBuf::from(path)).map(Some);
        }
    }

    // Priority 3: User config file
    if let Some(path) = default_config_file() {
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // Priority 4: Built-in defaults
    Ok(None)
}

fn require_existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}

/// Platform config file location (`<config_dir>/cutkit/config.toml`)
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cutkit").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.shar.shard_size, DEFAULT_SHARD_SIZE);
        assert_eq!(config.shar.shard_size(), Some(DEFAULT_SHARD_SIZE));
        assert!(config.shar.warn_unused_fields);
        assert!(config.shar.include_cuts);
        assert!(config.shar.fields.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_fields_keep_order() {
        let config = TomlConfig::from_toml_str(
            r#"
            [shar]
            shard_size = 10

            [[shar.fields]]
            name = "recording"
            format = "wav"

            [[shar.fields]]
            name = "features"
            format = "numpy"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.shar.shard_size(), Some(10));
        let names: Vec<_> = config.shar.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["recording", "features"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_shard_size_disables_sharding() {
        let config = TomlConfig::from_toml_str(
            "[shar]\nshard_size = 0\nshard_suffix = \".part\"\n",
        )
        .unwrap();
        assert_eq!(config.shar.shard_size(), None);
        assert_eq!(config.shar.shard_suffix.as_deref(), Some(".part"));
    }

    #[test]
    fn test_suffix_with_sharding_is_rejected() {
        let result = TomlConfig::from_toml_str("[shar]\nshard_size = 5\nshard_suffix = \"x\"\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_reserved_and_duplicate_fields_rejected() {
        let reserved = TomlConfig::from_toml_str(
            "[[shar.fields]]\nname = \"cuts\"\nformat = \"jsonl\"\n",
        );
        assert!(reserved.is_err());

        let duplicate = TomlConfig::from_toml_str(
            "[[shar.fields]]\nname = \"a\"\nformat = \"jsonl\"\n\
             [[shar.fields]]\nname = \"a\"\nformat = \"numpy\"\n",
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let result = TomlConfig::from_toml_str("[shar\nshard_size = ");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }
}
