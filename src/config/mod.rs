//! Configuration management for fmtree.
//!
//! Supports configuration from:
//! - Command-line arguments (highest priority)
//! - Environment variables
//! - `fmtree.toml` (formatter definitions and global excludes)

mod settings;

pub use settings::{find_up, Config, FormatterConfig, GlobalConfig, INIT_TEMPLATE};
