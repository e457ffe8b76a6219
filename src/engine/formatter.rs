//! Formatter descriptors.
//!
//! A descriptor resolves a configured formatter into an executable path,
//! compiled match patterns and an identity signature. The signature
//! digests the executable's `(mtime, size)` together with the option
//! list, so upgrading the tool or editing its options invalidates cached
//! file state.

use std::path::{Path, PathBuf};

use crate::config::{Config, FormatterConfig};
use crate::error::PlanError;
use crate::glob::PatternSet;
use crate::walk::mtime_nanos;
use crate::Result;

/// A formatter ready to be planned and invoked.
#[derive(Debug)]
pub struct Formatter {
    /// Unique name from the config table.
    pub name: String,
    /// Resolved absolute path of the executable.
    pub command: PathBuf,
    /// Arguments passed before the file paths.
    pub options: Vec<String>,
    /// Patterns selecting files.
    pub includes: PatternSet,
    /// Patterns removing files.
    pub excludes: PatternSet,
    /// Formatter this one must run before.
    pub before: Option<String>,
    /// Spawn-order tiebreaker within a batch.
    pub priority: i32,
    /// Identity digest, hex encoded.
    pub signature: String,
}

impl Formatter {
    /// Build a descriptor from its config table.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::CommandNotFound` when the executable cannot be
    /// resolved, or a config error for invalid patterns.
    pub fn from_config(name: &str, config: &FormatterConfig) -> Result<Self> {
        let command = which::which(&config.command).map_err(|_| PlanError::CommandNotFound {
            name: name.to_string(),
            command: config.command.clone(),
        })?;

        let signature = compute_signature(&command, &config.options)?;

        Ok(Self {
            name: name.to_string(),
            command,
            options: config.options.clone(),
            includes: PatternSet::compile(&config.includes)?,
            excludes: PatternSet::compile(&config.excludes)?,
            before: config.before.clone(),
            priority: config.priority,
            signature,
        })
    }

    /// True when this formatter claims a path relative to the tree root.
    #[must_use]
    pub fn is_match(&self, rel: &Path) -> bool {
        !self.includes.is_empty() && self.includes.is_match(rel) && !self.excludes.is_match(rel)
    }
}

/// Digest of the executable's `(mtime, size)` and the option list.
fn compute_signature(command: &Path, options: &[String]) -> Result<String> {
    let metadata = std::fs::metadata(command)?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(&mtime_nanos(&metadata).to_le_bytes());
    hasher.update(&metadata.len().to_le_bytes());
    for option in options {
        hasher.update(option.as_bytes());
        hasher.update(&[0]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Resolve every configured formatter.
///
/// With `allow_missing` set, formatters whose executables are absent from
/// `PATH` are dropped with a warning instead of failing the run.
///
/// # Errors
///
/// Returns the first resolution or pattern error encountered.
pub fn load_formatters(config: &Config, allow_missing: bool) -> Result<Vec<Formatter>> {
    let mut formatters = Vec::with_capacity(config.formatter.len());

    for (name, formatter_config) in &config.formatter {
        match Formatter::from_config(name, formatter_config) {
            Ok(formatter) => {
                tracing::debug!(
                    formatter = %name,
                    command = %formatter.command.display(),
                    "resolved formatter"
                );
                formatters.push(formatter);
            }
            Err(err @ crate::Error::Plan(PlanError::CommandNotFound { .. })) if allow_missing => {
                tracing::warn!(formatter = %name, "{err}, skipping");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(formatters)
}

/// Digest over all formatter signatures, name-sorted.
///
/// Adding, removing or altering any formatter changes this value, which
/// invalidates the whole cache on the next run.
pub fn global_signature<'a, I>(formatters: I) -> String
where
    I: IntoIterator<Item = &'a Formatter>,
{
    let mut pairs: Vec<(&str, &str)> = formatters
        .into_iter()
        .map(|f| (f.name.as_str(), f.signature.as_str()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    for (name, signature) in pairs {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(signature.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}
