//! Git index enumeration.
//!
//! Lists files tracked or staged in the repository whose working tree
//! contains the tree root. Untracked files are ignored; entries staged for
//! deletion disappear from the index and are therefore skipped, even when
//! the working-tree copy still exists.

use std::path::Path;
use std::process::Command;

use tokio::sync::mpsc;

use super::{mtime_nanos, FileRecord};
use crate::error::WalkError;
use crate::glob::PatternSet;
use crate::Result;

/// Exit status git uses for "not a repository".
const GIT_NOT_A_REPO: i32 = 128;

pub fn walk_git(
    root: &Path,
    excludes: &PatternSet,
    tx: &mpsc::Sender<FileRecord>,
) -> Result<()> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["ls-files", "-z"])
        .output()
        .map_err(|e| WalkError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.code() == Some(GIT_NOT_A_REPO) {
            return Err(WalkError::NotAWorkingTree {
                path: root.to_path_buf(),
            }
            .into());
        }
        return Err(WalkError::Git(stderr).into());
    }

    // `git ls-files -z` emits NUL-separated paths relative to the tree
    // root, already sorted.
    for raw in output.stdout.split(|&b| b == 0) {
        if raw.is_empty() {
            continue;
        }
        let rel = Path::new(
            std::str::from_utf8(raw)
                .map_err(|e| WalkError::Git(format!("non-utf8 path in git output: {e}")))?,
        )
        .to_path_buf();

        if excludes.is_match(&rel) {
            continue;
        }

        let abs = root.join(&rel);
        let metadata = match abs.metadata() {
            Ok(md) => md,
            // tracked but gone from the working tree (e.g. deletion in
            // progress): nothing to format
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(WalkError::Traverse {
                    path: abs.display().to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let record = FileRecord {
            rel,
            size: metadata.len(),
            mtime_ns: mtime_nanos(&metadata),
            abs,
        };

        if tx.blocking_send(record).is_err() {
            tracing::debug!("walk receiver closed, stopping enumeration");
            break;
        }
    }

    Ok(())
}
