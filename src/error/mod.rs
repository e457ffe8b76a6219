//! Error types and Result aliases for fmtree.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using fmtree's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fmtree operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Formatter graph / planning error.
    #[error("{0}")]
    Plan(#[from] PlanError),

    /// File discovery error.
    #[error("walk error: {0}")]
    Walk(#[from] WalkError),

    /// Pipeline / formatter execution error.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// Cache error.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Files changed while `--fail-on-change` was set.
    #[error("{changed} files changed while --fail-on-change is set")]
    FailOnChange { changed: u64 },

    /// The run was interrupted by a signal.
    #[error("interrupted")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No config file found searching upwards.
    #[error("no fmtree.toml or .fmtree.toml found in {} or any parent directory", .start.display())]
    NotFound { start: PathBuf },

    /// Config file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Semantic validation failure.
    #[error("{0}")]
    Invalid(String),
}

/// Formatter dependency graph errors, detected before any work starts.
#[derive(Error, Debug)]
pub enum PlanError {
    /// A `before` edge points at a formatter that is not declared
    /// (or was dropped by a `--formatters` restriction).
    #[error("formatter {formatter} is before {before} but config for {before} was not found")]
    UnknownBefore { formatter: String, before: String },

    /// The `before` graph contains a cycle.
    #[error("formatter cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// A `--formatters` restriction named an undeclared formatter.
    #[error("formatter not found in config: {0}")]
    UnknownFormatter(String),

    /// A formatter's executable could not be resolved on `PATH`.
    #[error("formatter {name}: command not found on PATH: {command}")]
    CommandNotFound { name: String, command: String },
}

/// File discovery errors.
#[derive(Error, Debug)]
pub enum WalkError {
    /// `walk = "git"` was requested outside a git working tree.
    #[error("{} is not inside a git working tree", .path.display())]
    NotAWorkingTree { path: PathBuf },

    /// git enumeration failed for another reason.
    #[error("git enumeration failed: {0}")]
    Git(String),

    /// Filesystem traversal failed.
    #[error("failed to walk '{path}': {reason}")]
    Traverse { path: String, reason: String },
}

/// Formatter execution errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A formatter process exited non-zero.
    #[error("formatter {name} exited with status {code}: {stderr}")]
    FormatterFailed {
        name: String,
        code: i32,
        stderr: String,
    },

    /// A formatter process could not be spawned.
    #[error("failed to spawn formatter {name} ({command}): {reason}")]
    Spawn {
        name: String,
        command: String,
        reason: String,
    },

    /// The run was cancelled while the formatter was executing.
    #[error("formatter {name} interrupted")]
    Interrupted { name: String },

    /// An internal pipeline stage disappeared.
    #[error("pipeline stage stopped unexpectedly: {0}")]
    StageLost(&'static str),
}

/// Cache errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Another fmtree instance holds the cache lock for this tree.
    #[error("cache is locked by another fmtree instance")]
    Busy,

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Database(String),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl Error {
    /// Create a configuration validation error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(ConfigError::Invalid(msg.into()))
    }

    /// True when the error should abort before any file is touched.
    #[must_use]
    pub fn is_fatal_before_work(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Plan(_) | Self::Cache(CacheError::Busy)
        )
    }
}

#[cfg(test)]
mod tests;
