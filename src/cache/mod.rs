//! Persistent file-state cache.
//!
//! One `SQLite` database per tree root stores, for every formatted file,
//! the `(size, mtime)` observed after its last successful formatting,
//! plus the global signature of the formatter set that produced it.
//! A file is skipped on the next run only when the stored signature
//! matches the current one and its `(size, mtime)` are unchanged.
//!
//! The database is held under a process-exclusive lock for the whole run;
//! a second fmtree instance fails fast with a `Busy` error.

mod connection;
mod schema;

pub use connection::Database;
pub use schema::{migrate, SCHEMA_VERSION};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::CacheError;
use crate::{Error, Result};

/// Reserved `meta` key holding the global formatter signature.
const GLOBAL_SIG_KEY: &str = "global_signature";

/// Post-run state recorded for one file.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Path relative to the tree root.
    pub path: String,
    pub size: u64,
    pub mtime_ns: i64,
}

/// Handle to the per-tree cache database.
#[derive(Debug)]
pub struct Cache {
    db: Database,
    /// True when the persisted global signature matches the current run.
    /// While false, every `is_unchanged` lookup reports stale.
    fresh: AtomicBool,
}

impl Cache {
    /// Open (or create) the cache for a tree root at the default location.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Busy` when another instance holds the lock,
    /// or a database error after a failed rebuild.
    pub fn open_for_tree(tree_root: &Path) -> Result<Self> {
        Self::open(&Self::db_path(tree_root))
    }

    /// Open (or create) a cache database at an explicit path.
    ///
    /// A corrupt database is deleted and rebuilt once before giving up.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Busy` when another instance holds the lock,
    /// or a database error after a failed rebuild.
    pub fn open(path: &Path) -> Result<Self> {
        match Self::try_open(path) {
            Ok(cache) => Ok(cache),
            Err(Error::Cache(CacheError::Busy)) => Err(CacheError::Busy.into()),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "cache unusable, rebuilding"
                );
                let _ = std::fs::remove_file(path);
                let _ = std::fs::remove_file(journal_path(path));
                Self::try_open(path)
            }
        }
    }

    fn try_open(path: &Path) -> Result<Self> {
        let db = Database::open(path)?;
        db.with_conn(migrate)?;
        Ok(Self {
            db,
            fresh: AtomicBool::new(false),
        })
    }

    /// In-memory cache for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        db.with_conn(migrate)?;
        Ok(Self {
            db,
            fresh: AtomicBool::new(false),
        })
    }

    /// Default database path for a tree root.
    ///
    /// The file name is derived from the canonical root path, so each
    /// tree gets its own cache and a renamed tree starts cold.
    #[must_use]
    pub fn db_path(tree_root: &Path) -> PathBuf {
        let canonical = tree_root
            .canonicalize()
            .unwrap_or_else(|_| tree_root.to_path_buf());
        let digest = blake3::hash(canonical.to_string_lossy().as_bytes());
        let name = format!("{}.db", &digest.to_hex()[..32]);
        state_dir().join("fmtree").join(name)
    }

    /// Compare the persisted global signature against this run's.
    ///
    /// While they disagree every lookup reports stale; the new signature
    /// is only persisted by [`Cache::finish_run`] after a complete run.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn begin_run(&self, global_signature: &str) -> Result<()> {
        let stored = self.global_signature()?;
        let fresh = stored.as_deref() == Some(global_signature);
        self.fresh.store(fresh, Ordering::Relaxed);
        if !fresh {
            if stored.is_some() {
                self.log_signature_diff()?;
            }
            tracing::debug!("formatter set changed, cache entries treated as stale");
        }
        Ok(())
    }

    /// True iff the entry for `path` exists, the formatter set is
    /// unchanged, and the file's current `(size, mtime)` match the stored
    /// values.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn is_unchanged(&self, path: &str, size: u64, mtime_ns: i64) -> Result<bool> {
        if !self.fresh.load(Ordering::Relaxed) {
            return Ok(false);
        }

        let result = self.db.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT size, mtime_ns FROM file_state WHERE path = ?",
                [path],
                |row| {
                    let size: i64 = row.get(0)?;
                    let mtime: i64 = row.get(1)?;
                    Ok((size, mtime))
                },
            );
            match row {
                Ok(stored) => Ok(Some(stored)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(CacheError::Database(e.to_string()).into()),
            }
        })?;

        Ok(result == Some((to_i64(size), mtime_ns)))
    }

    /// Record post-run file state, atomically for the whole batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn record(&self, entries: &[CacheEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.db.with_transaction(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "INSERT OR REPLACE INTO file_state (path, size, mtime_ns) VALUES (?, ?, ?)",
                )
                .map_err(|e| CacheError::Database(e.to_string()))?;
            for entry in entries {
                stmt.execute(rusqlite::params![
                    entry.path,
                    to_i64(entry.size),
                    entry.mtime_ns
                ])
                .map_err(|e| CacheError::Database(e.to_string()))?;
            }
            Ok(())
        })
    }

    /// Remove the entry for a path that no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn forget(&self, path: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM file_state WHERE path = ?", [path])
                .map_err(|e| CacheError::Database(e.to_string()))?;
            Ok(())
        })
    }

    /// Drop all file entries, keeping the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self) -> Result<()> {
        self.db.with_transaction(|conn| {
            conn.execute("DELETE FROM file_state", [])
                .map_err(|e| CacheError::Database(e.to_string()))?;
            conn.execute("DELETE FROM meta", [])
                .map_err(|e| CacheError::Database(e.to_string()))?;
            Ok(())
        })?;
        self.fresh.store(false, Ordering::Relaxed);
        tracing::debug!("cache cleared");
        Ok(())
    }

    /// Remove entries whose files are gone from the tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_missing(&self, tree_root: &Path) -> Result<usize> {
        let paths: Vec<String> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT path FROM file_state ORDER BY path")
                .map_err(|e| CacheError::Database(e.to_string()))?;
            let paths = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| CacheError::Database(e.to_string()))?
                .collect::<std::result::Result<Vec<String>, _>>()
                .map_err(|e| CacheError::Database(e.to_string()))?;
            Ok(paths)
        })?;

        let stale: Vec<String> = paths
            .into_iter()
            .filter(|p| !tree_root.join(p).exists())
            .collect();

        if !stale.is_empty() {
            self.db.with_transaction(|conn| {
                let mut stmt = conn
                    .prepare_cached("DELETE FROM file_state WHERE path = ?")
                    .map_err(|e| CacheError::Database(e.to_string()))?;
                for path in &stale {
                    stmt.execute([path])
                        .map_err(|e| CacheError::Database(e.to_string()))?;
                }
                Ok(())
            })?;
            tracing::debug!(count = stale.len(), "pruned entries for removed files");
        }

        Ok(stale.len())
    }

    /// Persist the global signature and per-formatter signatures after a
    /// fully successful run.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn finish_run(
        &self,
        global_signature: &str,
        formatters: &[(String, String)],
    ) -> Result<()> {
        self.db.with_transaction(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
                rusqlite::params![GLOBAL_SIG_KEY, global_signature],
            )
            .map_err(|e| CacheError::Database(e.to_string()))?;

            conn.execute("DELETE FROM formatters", [])
                .map_err(|e| CacheError::Database(e.to_string()))?;
            let mut stmt = conn
                .prepare_cached("INSERT INTO formatters (name, signature) VALUES (?, ?)")
                .map_err(|e| CacheError::Database(e.to_string()))?;
            for (name, signature) in formatters {
                stmt.execute(rusqlite::params![name, signature])
                    .map_err(|e| CacheError::Database(e.to_string()))?;
            }
            Ok(())
        })?;
        self.fresh.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// The persisted global signature, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn global_signature(&self) -> Result<Option<String>> {
        self.db.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT value FROM meta WHERE key = ?",
                [GLOBAL_SIG_KEY],
                |row| row.get(0),
            );
            match row {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(CacheError::Database(e.to_string()).into()),
            }
        })
    }

    /// Log which formatters differ from the previously persisted set.
    fn log_signature_diff(&self) -> Result<()> {
        let stored: Vec<(String, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT name, signature FROM formatters ORDER BY name")
                .map_err(|e| CacheError::Database(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(|e| CacheError::Database(e.to_string()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| CacheError::Database(e.to_string()))?;
            Ok(rows)
        })?;

        for (name, _) in &stored {
            tracing::debug!(formatter = %name, "was active in the previous run");
        }
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn journal_path(path: &Path) -> PathBuf {
    let mut journal = path.as_os_str().to_os_string();
    journal.push("-journal");
    PathBuf::from(journal)
}

/// Per-user state directory: `$XDG_CACHE_HOME`, falling back to
/// `$HOME/.cache`, falling back to the system temp dir.
fn state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home).join(".cache");
    }
    std::env::temp_dir()
}
