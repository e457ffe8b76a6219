//! File discovery.
//!
//! Two walker variants share one output contract: a lazy, finite,
//! lexicographically ordered sequence of [`FileRecord`]s sent over a
//! bounded channel.
//!
//! - [`filesystem`]: recursive directory traversal from the tree root
//! - [`git`]: files tracked or staged in the enclosing git repository

mod filesystem;
mod git;

pub use filesystem::walk_filesystem;
pub use git::walk_git;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::glob::PatternSet;
use crate::{Error, Result};

/// Walker variant selected by the `walk` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkKind {
    /// Recursive directory traversal.
    Filesystem,
    /// Files tracked in the git index.
    Git,
}

impl FromStr for WalkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filesystem" => Ok(Self::Filesystem),
            "git" => Ok(Self::Git),
            other => Err(Error::config(format!(
                "invalid walk type '{other}', must be one of: filesystem, git"
            ))),
        }
    }
}

/// A file observed by a walker.
///
/// `rel` is the path relative to the tree root and is the file's identity
/// for matching and caching; `size` and `mtime_ns` snapshot its pre-run
/// state.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub rel: PathBuf,
    pub abs: PathBuf,
    pub size: u64,
    pub mtime_ns: i64,
}

/// Walk the tree, sending records into `tx`.
///
/// Runs synchronously; callers put it on a blocking task. Returns `Ok` when
/// the receiver is dropped early (cancellation).
///
/// # Errors
///
/// Returns a `WalkError` on traversal failure.
pub fn walk(
    kind: WalkKind,
    root: &Path,
    excludes: &PatternSet,
    tx: &mpsc::Sender<FileRecord>,
) -> Result<()> {
    match kind {
        WalkKind::Filesystem => walk_filesystem(root, excludes, tx),
        WalkKind::Git => walk_git(root, excludes, tx),
    }
}

/// Modification time as nanoseconds since the Unix epoch.
#[must_use]
pub fn mtime_nanos(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_nanos()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_kind_from_str() {
        assert_eq!("filesystem".parse::<WalkKind>().unwrap(), WalkKind::Filesystem);
        assert_eq!("git".parse::<WalkKind>().unwrap(), WalkKind::Git);
        assert!("auto".parse::<WalkKind>().is_err());
    }

    #[test]
    fn test_mtime_nanos_positive_for_fresh_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let md = tmp.path().metadata().unwrap();
        assert!(mtime_nanos(&md) > 0);
    }
}
