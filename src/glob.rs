//! Compiled glob pattern sets for path classification.
//!
//! Patterns use shell-style syntax: `*` matches within a path component,
//! `**` crosses component boundaries, `?` matches a single character and
//! `[...]` is a character class. A pattern without a separator also matches
//! against the file name alone, so `*.nix` excludes nix files at any depth.
//! Matching is purely lexical against paths relative to the tree root.

use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::ConfigError;
use crate::Result;

/// A compiled set of glob patterns.
#[derive(Debug, Clone)]
pub struct PatternSet {
    set: GlobSet,
    /// Compiled from patterns without a `/`, tested against file names.
    name_set: GlobSet,
    /// Directory names from patterns with a trailing slash, used by the
    /// walker to prune whole subtrees.
    prune_dirs: Vec<String>,
    patterns: Vec<String>,
}

impl PatternSet {
    /// Compile a list of patterns.
    ///
    /// A trailing-slash pattern such as `node_modules/` marks a directory
    /// name for pruning and also excludes everything beneath it.
    ///
    /// # Errors
    ///
    /// Returns an error if any pattern fails to compile.
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut name_builder = GlobSetBuilder::new();
        let mut prune_dirs = Vec::new();

        for pattern in patterns {
            if let Some(dir) = pattern.strip_suffix('/') {
                prune_dirs.push(dir.to_string());
                builder.add(compile_glob(&format!("{dir}/**"))?);
                continue;
            }

            builder.add(compile_glob(pattern)?);
            if !pattern.contains('/') {
                name_builder.add(compile_glob(pattern)?);
            }
        }

        let set = builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("invalid glob set: {e}")))?;
        let name_set = name_builder
            .build()
            .map_err(|e| ConfigError::Invalid(format!("invalid glob set: {e}")))?;

        Ok(Self {
            set,
            name_set,
            prune_dirs,
            patterns: patterns.to_vec(),
        })
    }

    /// An empty set that matches nothing.
    ///
    /// # Errors
    ///
    /// Never fails in practice; kept fallible for a uniform call shape.
    pub fn empty() -> Result<Self> {
        Self::compile(&[])
    }

    /// Test a path relative to the tree root.
    #[must_use]
    pub fn is_match(&self, rel: &Path) -> bool {
        if self.set.is_match(rel) {
            return true;
        }
        match rel.file_name() {
            Some(name) => self.name_set.is_match(name),
            None => false,
        }
    }

    /// True if a directory with this name should not be descended into.
    #[must_use]
    pub fn prunes_dir(&self, name: &str) -> bool {
        self.prune_dirs.iter().any(|d| d == name)
    }

    /// Directory names marked for pruning by trailing-slash patterns.
    #[must_use]
    pub fn prune_dirs(&self) -> &[String] {
        &self.prune_dirs
    }

    /// True if the set contains no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The original pattern strings.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn compile_glob(pattern: &str) -> Result<globset::Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("invalid glob '{pattern}': {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(patterns: &[&str]) -> PatternSet {
        let patterns: Vec<String> = patterns.iter().map(ToString::to_string).collect();
        PatternSet::compile(&patterns).unwrap()
    }

    #[test]
    fn test_star_stays_within_component() {
        let s = set(&["src/*.rs"]);
        assert!(s.is_match(Path::new("src/main.rs")));
        assert!(!s.is_match(Path::new("src/nested/main.rs")));
    }

    #[test]
    fn test_bare_extension_matches_any_depth() {
        let s = set(&["*.nix"]);
        assert!(s.is_match(Path::new("default.nix")));
        assert!(s.is_match(Path::new("pkgs/deep/module.nix")));
        assert!(!s.is_match(Path::new("pkgs/deep/module.rs")));
    }

    #[test]
    fn test_double_star_crosses_components() {
        let s = set(&["docs/**/*.md"]);
        assert!(s.is_match(Path::new("docs/guide/intro.md")));
        assert!(s.is_match(Path::new("docs/a/b/c.md")));
        assert!(!s.is_match(Path::new("src/readme.md")));
    }

    #[test]
    fn test_question_mark_single_char() {
        let s = set(&["?.rs"]);
        assert!(s.is_match(Path::new("a.rs")));
        assert!(!s.is_match(Path::new("ab.rs")));
    }

    #[test]
    fn test_character_class() {
        let s = set(&["[ab].toml"]);
        assert!(s.is_match(Path::new("a.toml")));
        assert!(s.is_match(Path::new("b.toml")));
        assert!(!s.is_match(Path::new("c.toml")));
    }

    #[test]
    fn test_trailing_slash_prunes_and_excludes() {
        let s = set(&["node_modules/"]);
        assert!(s.prunes_dir("node_modules"));
        assert!(!s.prunes_dir("src"));
        assert!(s.is_match(Path::new("node_modules/pkg/index.js")));
        assert!(!s.is_match(Path::new("src/index.js")));
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let s = PatternSet::empty().unwrap();
        assert!(s.is_empty());
        assert!(!s.is_match(Path::new("anything")));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = PatternSet::compile(&["[".to_string()]).unwrap_err();
        assert!(err.to_string().contains("invalid glob"));
    }
}
