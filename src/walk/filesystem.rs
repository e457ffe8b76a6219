//! Recursive filesystem traversal.
//!
//! Walks the tree root depth-first in lexicographic order and sends file
//! records for formatting. Global excludes with a trailing slash prune
//! whole directories; symbolic links are followed only while they resolve
//! inside the tree root.

use std::path::Path;

use ignore::WalkBuilder;
use tokio::sync::mpsc;

use super::{mtime_nanos, FileRecord};
use crate::error::WalkError;
use crate::glob::PatternSet;
use crate::Result;

pub fn walk_filesystem(
    root: &Path,
    excludes: &PatternSet,
    tx: &mpsc::Sender<FileRecord>,
) -> Result<()> {
    let root_canonical = root
        .canonicalize()
        .map_err(|e| WalkError::Traverse {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

    let prune_dirs = excludes.prune_dirs().to_vec();
    let filter_root = root_canonical.clone();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(true)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let name = entry.file_name().to_string_lossy();

            // the repository metadata directory is never formatted
            if name == ".git" {
                return false;
            }

            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            if is_dir && prune_dirs.iter().any(|d| name == d.as_str()) {
                return false;
            }

            // follow symlinks only while they stay inside the tree root
            if entry.path_is_symlink() {
                match entry.path().canonicalize() {
                    Ok(target) => {
                        if !target.starts_with(&filter_root) {
                            tracing::debug!(
                                path = %entry.path().display(),
                                "skipping symlink escaping the tree root"
                            );
                            return false;
                        }
                    }
                    Err(_) => return false,
                }
            }

            true
        })
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| WalkError::Traverse {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

        let file_type = match entry.file_type() {
            Some(ft) => ft,
            None => continue, // stdin pseudo-entry, never produced here
        };
        if file_type.is_dir() {
            continue;
        }

        let abs = entry.path().to_path_buf();
        let metadata = abs.metadata().map_err(|e| WalkError::Traverse {
            path: abs.display().to_string(),
            reason: e.to_string(),
        })?;
        if !metadata.is_file() {
            continue;
        }

        let rel = abs
            .strip_prefix(root)
            .unwrap_or(&abs)
            .to_path_buf();

        let record = FileRecord {
            rel,
            size: metadata.len(),
            mtime_ns: mtime_nanos(&metadata),
            abs,
        };

        if tx.blocking_send(record).is_err() {
            tracing::debug!("walk receiver closed, stopping traversal");
            break;
        }
    }

    Ok(())
}
