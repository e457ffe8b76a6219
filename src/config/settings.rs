//! `fmtree.toml` parsing, discovery and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::{Error, Result};

/// Names the config file is searched under, in order of preference.
pub const CONFIG_FILE_NAMES: &[&str] = &["fmtree.toml", ".fmtree.toml"];

/// Starter configuration written by `fmtree --init`.
pub const INIT_TEMPLATE: &str = r#"# One command to format your repository.
# https://github.com/fmtree/fmtree

[global]
# Glob patterns excluded from every formatter. A trailing slash marks a
# directory that is never descended into.
excludes = ["*.lock", "target/", "node_modules/"]

# [formatter.rust]
# command = "rustfmt"
# options = ["--edition", "2021"]
# includes = ["*.rs"]

# [formatter.nix]
# command = "nixpkgs-fmt"
# includes = ["*.nix"]
# # Run before the `rust` formatter:
# # before = "rust"
"#;

/// Root of the parsed `fmtree.toml`.
///
/// Formatter tables are keyed by name; TOML itself rejects duplicate keys,
/// which gives us name uniqueness for free. `BTreeMap` keeps iteration
/// order deterministic.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Settings applied to every formatter.
    #[serde(default)]
    pub global: GlobalConfig,

    /// Formatter definitions, keyed by unique name.
    #[serde(default)]
    pub formatter: BTreeMap<String, FormatterConfig>,
}

/// The `[global]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Glob patterns excluded from all formatters.
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// A `[formatter.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatterConfig {
    /// Executable to invoke, resolved against `PATH`.
    pub command: String,

    /// Arguments passed before the file paths.
    #[serde(default)]
    pub options: Vec<String>,

    /// Glob patterns selecting files for this formatter.
    #[serde(default)]
    pub includes: Vec<String>,

    /// Glob patterns removing files from this formatter.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Name of a formatter this one must run before.
    #[serde(default)]
    pub before: Option<String>,

    /// Spawn-order tiebreaker within a dependency batch.
    #[serde(default)]
    pub priority: i32,
}

impl Config {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            Error::Config(ConfigError::Parse { source, .. }) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
            .into(),
            other => other,
        })?;
        Ok(config)
    }

    /// Parse config from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any formatter definition is invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, formatter) in &self.formatter {
            if name.is_empty() {
                return Err(Error::config("formatter name cannot be empty"));
            }
            if formatter.command.trim().is_empty() {
                return Err(Error::config(format!(
                    "formatter {name}: command cannot be empty"
                )));
            }
            if formatter.includes.is_empty() {
                tracing::warn!(formatter = %name, "formatter has no includes and will match nothing");
            }
        }
        Ok(())
    }
}

/// Search upwards from `start` for a config file.
///
/// # Errors
///
/// Returns `ConfigError::NotFound` when no candidate exists in `start` or
/// any of its ancestors.
pub fn find_up(start: &Path) -> Result<PathBuf> {
    for dir in start.ancestors() {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    Err(ConfigError::NotFound {
        start: start.to_path_buf(),
    }
    .into())
}
