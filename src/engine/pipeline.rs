//! The streaming formatting pipeline.
//!
//! Stages are cooperating tasks connected by bounded channels:
//!
//! 1. A blocking walker task streams [`FileRecord`]s.
//! 2. The route loop drops cache-fresh files and fans the rest out to
//!    per-formatter workers.
//! 3. Each worker accumulates paths and invokes its formatter on batches
//!    of at most `batch_size` paths, one child process at a time, under a
//!    global concurrency cap.
//! 4. A release stage re-stats every file once all of its applicable
//!    formatters finished, counts changes and batches cache writes.
//!
//! Waves from the [`Plan`] are separated by a barrier: a worker in wave
//! `n` only spawns processes once every wave `n-1` worker has drained
//! and exited, so later formatters always observe the earlier ones'
//! output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::formatter::Formatter;
use super::planner::Plan;
use super::router::Router;
use crate::cache::{Cache, CacheEntry};
use crate::error::EngineError;
use crate::glob::PatternSet;
use crate::stats::{Stats, StatsSnapshot};
use crate::walk::{self, mtime_nanos, FileRecord, WalkKind};
use crate::{Error, Result};

/// Default maximum paths per formatter invocation.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Capacity of the walker and release channels.
const CHANNEL_CAP: usize = 1024;

/// Cache writes are flushed in batches of this many entries.
const CACHE_FLUSH_THRESHOLD: usize = 512;

/// How long a child gets between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Bytes of stderr kept in a `FormatterFailed` error.
const STDERR_TAIL: usize = 4096;

/// Operator options consumed by the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Absolute tree root bounding all file operations.
    pub tree_root: PathBuf,
    /// File discovery strategy.
    pub walk: WalkKind,
    /// Maximum paths per formatter invocation.
    pub batch_size: usize,
    /// Concurrent formatter process cap; 0 means the CPU count.
    pub workers: usize,
    /// Remove entries for deleted files after a fully successful run.
    /// Disabled when a `--formatters` restriction is active, since the
    /// walk then only proves a subset of the tree.
    pub prune_cache: bool,
}

impl PipelineOptions {
    /// Options with defaults for a tree root.
    #[must_use]
    pub fn new(tree_root: PathBuf) -> Self {
        Self {
            tree_root,
            walk: WalkKind::Filesystem,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 0,
            prune_cache: true,
        }
    }

    fn worker_cap(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4)
    }
}

/// One run of the formatting pipeline.
pub struct Pipeline {
    options: PipelineOptions,
    plan: Plan,
    router: Arc<Router>,
    global_excludes: PatternSet,
    cache: Option<Arc<Cache>>,
    stats: Arc<Stats>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Wire up a pipeline from its collaborators.
    #[must_use]
    pub fn new(
        options: PipelineOptions,
        plan: Plan,
        global_excludes: PatternSet,
        cache: Option<Arc<Cache>>,
        stats: Arc<Stats>,
        cancel: CancellationToken,
    ) -> Self {
        let router = Arc::new(Router::new(global_excludes.clone(), &plan));
        Self {
            options,
            plan,
            router,
            global_excludes,
            cache,
            stats,
            cancel,
        }
    }

    /// Run the pipeline to completion.
    ///
    /// # Errors
    ///
    /// Returns the walk error, the first formatter failure, or
    /// `Error::Cancelled` when interrupted. Cache writes for files whose
    /// formatters did not complete are suppressed in every error case.
    pub async fn run(self) -> Result<StatsSnapshot> {
        let Self {
            options,
            plan,
            router,
            global_excludes,
            cache,
            stats,
            cancel,
        } = self;

        if plan.is_empty() {
            tracing::warn!("no formatters are active, nothing to do");
            return Ok(stats.snapshot());
        }

        let (file_tx, mut file_rx) = mpsc::channel::<FileRecord>(CHANNEL_CAP);
        let (release_tx, release_rx) = mpsc::channel::<ReleaseMsg>(CHANNEL_CAP);
        let (gate_tx, gate_rx) = watch::channel(0_usize);
        let semaphore = Arc::new(Semaphore::new(options.worker_cap()));

        let release_handle = tokio::spawn(
            ReleaseStage {
                rx: release_rx,
                cache: cache.clone(),
                stats: Arc::clone(&stats),
            }
            .run(),
        );

        // one worker per planned formatter, grouped by wave for the
        // barrier joins below
        let mut worker_txs = Vec::with_capacity(router.routes().len());
        let mut wave_handles: Vec<Vec<(String, JoinHandle<WorkerResult>)>> =
            (0..plan.waves.len()).map(|_| Vec::new()).collect();

        for route in router.routes() {
            let (tx, rx) = mpsc::channel::<PathBuf>(CHANNEL_CAP);
            worker_txs.push(tx);

            let worker = Worker {
                formatter: Arc::clone(&route.formatter),
                wave: route.wave,
                tree_root: options.tree_root.clone(),
                batch_size: options.batch_size,
                rx,
                gate: gate_rx.clone(),
                semaphore: Arc::clone(&semaphore),
                cancel: cancel.clone(),
                release_tx: release_tx.clone(),
            };
            wave_handles[route.wave]
                .push((route.formatter.name.clone(), tokio::spawn(worker.run())));
        }
        drop(gate_rx);

        let walk_start = Instant::now();
        let walker_handle = {
            let root = options.tree_root.clone();
            let kind = options.walk;
            tokio::task::spawn_blocking(move || walk::walk(kind, &root, &global_excludes, &file_tx))
        };

        // route loop: cache filter + fan-out
        let mut stage_lost = false;
        loop {
            let file = tokio::select! {
                () = cancel.cancelled() => break,
                file = file_rx.recv() => match file {
                    Some(file) => file,
                    None => break,
                },
            };

            stats.add_traversed(1);

            let applicable = router.applicable(&file.rel);
            if applicable.is_empty() {
                continue;
            }

            let rel_str = file.rel.to_string_lossy();
            if let Some(cache) = &cache {
                match cache.is_unchanged(&rel_str, file.size, file.mtime_ns) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(path = %rel_str, error = %err, "cache read failed");
                    }
                }
            }

            stats.add_matched(1);

            let register = ReleaseMsg::Register {
                file: file.clone(),
                fanout: applicable.len(),
            };
            if release_tx.send(register).await.is_err() {
                stage_lost = true;
                break;
            }
            for index in applicable {
                let sent = tokio::select! {
                    () = cancel.cancelled() => false,
                    sent = worker_txs[index].send(file.rel.clone()) => sent.is_ok(),
                };
                if !sent {
                    stage_lost = true;
                }
            }
            if stage_lost {
                break;
            }
        }
        drop(file_rx);
        drop(worker_txs);
        drop(release_tx);
        stats.record_walk_time(walk_start.elapsed());

        let walk_error = match walker_handle.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(join_err) => {
                tracing::error!(error = %join_err, "walker task panicked");
                Some(EngineError::StageLost("walker").into())
            }
        };
        if walk_error.is_some() {
            // suppress any batches still queued in the workers
            cancel.cancel();
        }

        // wave barrier: formatters of wave n only flush once every wave
        // n-1 worker has fully drained and exited
        let format_start = Instant::now();
        let mut formatter_errors: Vec<EngineError> = Vec::new();
        let mut gate = Some(gate_tx);

        for (wave, handles) in wave_handles.into_iter().enumerate() {
            if formatter_errors.is_empty() && !cancel.is_cancelled() {
                if let Some(g) = &gate {
                    let _ = g.send(wave);
                }
            } else {
                // an earlier wave failed: closing the gate makes the
                // remaining workers drop their batches unformatted
                gate = None;
            }

            for (name, handle) in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => formatter_errors.push(err),
                    Err(join_err) => {
                        tracing::error!(formatter = %name, error = %join_err, "worker panicked");
                        formatter_errors.push(EngineError::StageLost("formatter worker"));
                    }
                }
            }
        }
        drop(gate);

        let release_result = release_handle.await;
        stats.record_format_time(format_start.elapsed());

        if let Some(err) = walk_error {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if stage_lost {
            return Err(EngineError::StageLost("release").into());
        }
        if let Err(join_err) = release_result {
            tracing::error!(error = %join_err, "release stage panicked");
            return Err(EngineError::StageLost("release").into());
        }
        if let Some(err) = formatter_errors
            .into_iter()
            .find(|e| !matches!(e, EngineError::Interrupted { .. }))
        {
            return Err(err.into());
        }

        if let Some(cache) = &cache {
            cache.finish_run(&plan.global_signature(), &plan.signatures())?;
            if options.prune_cache {
                cache.prune_missing(&options.tree_root)?;
            }
        }

        Ok(stats.snapshot())
    }
}

type WorkerResult = std::result::Result<(), EngineError>;

/// Messages into the release stage.
enum ReleaseMsg {
    /// A file entered the pipeline with `fanout` applicable formatters.
    Register { file: FileRecord, fanout: usize },
    /// A formatter finished (or gave up on) a batch of paths.
    Completed { paths: Vec<PathBuf>, ok: bool },
}

/// Per-formatter batching worker.
///
/// Receives relative paths, accumulates them, and runs the formatter on
/// batches. Runs at most one child process at a time, so within one
/// formatter the walker's path order is preserved.
struct Worker {
    formatter: Arc<Formatter>,
    wave: usize,
    tree_root: PathBuf,
    batch_size: usize,
    rx: mpsc::Receiver<PathBuf>,
    gate: watch::Receiver<usize>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    release_tx: mpsc::Sender<ReleaseMsg>,
}

impl Worker {
    async fn run(mut self) -> WorkerResult {
        let mut pending: Vec<PathBuf> = Vec::new();
        let mut failure: Option<EngineError> = None;

        // accumulate while the route loop streams; only flush early when
        // our wave is already active
        while let Some(rel) = self.rx.recv().await {
            pending.push(rel);
            if pending.len() >= self.batch_size && *self.gate.borrow() >= self.wave {
                self.flush(&mut pending, &mut failure).await;
            }
        }

        // wait for the barrier; a closed gate means an earlier wave
        // failed and our remaining paths must not be formatted
        loop {
            if self.cancel.is_cancelled() {
                self.report(std::mem::take(&mut pending), false).await;
                return Err(EngineError::Interrupted {
                    name: self.formatter.name.clone(),
                });
            }
            if *self.gate.borrow_and_update() >= self.wave {
                break;
            }
            let gate_open = tokio::select! {
                changed = self.gate.changed() => changed.is_ok(),
                () = self.cancel.cancelled() => {
                    continue;
                }
            };
            if !gate_open {
                self.report(std::mem::take(&mut pending), false).await;
                return Err(EngineError::Interrupted {
                    name: self.formatter.name.clone(),
                });
            }
        }

        while !pending.is_empty() {
            self.flush(&mut pending, &mut failure).await;
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run one batch off the front of `pending` and report the result.
    async fn flush(&self, pending: &mut Vec<PathBuf>, failure: &mut Option<EngineError>) {
        let take = pending.len().min(self.batch_size);
        let batch: Vec<PathBuf> = pending.drain(..take).collect();

        if failure.is_some() || self.cancel.is_cancelled() {
            self.report(batch, false).await;
            return;
        }

        match self.run_batch(&batch).await {
            Ok(()) => self.report(batch, true).await,
            Err(err) => {
                if !matches!(err, EngineError::Interrupted { .. }) {
                    tracing::error!(formatter = %self.formatter.name, "{err}");
                }
                *failure = Some(err);
                self.report(batch, false).await;
            }
        }
    }

    async fn report(&self, paths: Vec<PathBuf>, ok: bool) {
        if paths.is_empty() {
            return;
        }
        let _ = self
            .release_tx
            .send(ReleaseMsg::Completed { paths, ok })
            .await;
    }

    /// Spawn the formatter on one batch of paths and wait for it.
    async fn run_batch(&self, batch: &[PathBuf]) -> std::result::Result<(), EngineError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EngineError::StageLost("process semaphore"))?;

        if self.cancel.is_cancelled() {
            return Err(EngineError::Interrupted {
                name: self.formatter.name.clone(),
            });
        }

        tracing::debug!(
            formatter = %self.formatter.name,
            files = batch.len(),
            "spawning formatter"
        );
        let started = Instant::now();

        let mut command = Command::new(&self.formatter.command);
        command
            .args(&self.formatter.options)
            .args(batch.iter().map(|rel| self.tree_root.join(rel)))
            .current_dir(&self.tree_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| EngineError::Spawn {
            name: self.formatter.name.clone(),
            command: self.formatter.command.display().to_string(),
            reason: e.to_string(),
        })?;

        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| EngineError::Spawn {
                name: self.formatter.name.clone(),
                command: self.formatter.command.display().to_string(),
                reason: e.to_string(),
            })?,
            () = self.cancel.cancelled() => {
                terminate(&mut child, &self.formatter.name).await;
                return Err(EngineError::Interrupted {
                    name: self.formatter.name.clone(),
                });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(EngineError::FormatterFailed {
                name: self.formatter.name.clone(),
                code: status.code().unwrap_or(-1),
                stderr: stderr_tail(&stderr),
            });
        }

        if !stderr.is_empty() {
            tracing::debug!(
                formatter = %self.formatter.name,
                stderr = %String::from_utf8_lossy(&stderr).trim(),
                "formatter wrote to stderr"
            );
        }
        tracing::debug!(
            formatter = %self.formatter.name,
            files = batch.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "formatter batch finished"
        );

        Ok(())
    }
}

/// SIGTERM the child, escalating to SIGKILL after a grace period.
async fn terminate(child: &mut Child, name: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
        tracing::warn!(formatter = %name, "no exit after SIGTERM, killing");
    }
    let _ = child.kill().await;
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    match trimmed.char_indices().nth_back(STDERR_TAIL) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

/// State tracked for a file between routing and release.
struct PendingFile {
    abs: PathBuf,
    size: u64,
    mtime_ns: i64,
    remaining: usize,
    failed: bool,
}

/// Final stage: re-stat, change detection and cache writes.
struct ReleaseStage {
    rx: mpsc::Receiver<ReleaseMsg>,
    cache: Option<Arc<Cache>>,
    stats: Arc<Stats>,
}

impl ReleaseStage {
    async fn run(mut self) {
        let mut pending: HashMap<PathBuf, PendingFile> = HashMap::new();
        let mut to_record: Vec<CacheEntry> = Vec::new();

        while let Some(msg) = self.rx.recv().await {
            match msg {
                ReleaseMsg::Register { file, fanout } => {
                    pending.insert(
                        file.rel,
                        PendingFile {
                            abs: file.abs,
                            size: file.size,
                            mtime_ns: file.mtime_ns,
                            remaining: fanout,
                            failed: false,
                        },
                    );
                }
                ReleaseMsg::Completed { paths, ok } => {
                    for rel in paths {
                        let finished = match pending.get_mut(&rel) {
                            Some(entry) => {
                                entry.failed |= !ok;
                                entry.remaining -= 1;
                                entry.remaining == 0
                            }
                            None => {
                                tracing::warn!(path = %rel.display(), "completion for unknown file");
                                false
                            }
                        };
                        if !finished {
                            continue;
                        }

                        let Some(entry) = pending.remove(&rel) else {
                            continue;
                        };
                        if entry.failed {
                            // stays stale in the cache, eligible next run
                            continue;
                        }
                        self.finalize(&rel, &entry, &mut to_record);
                        if to_record.len() >= CACHE_FLUSH_THRESHOLD {
                            self.flush(&mut to_record);
                        }
                    }
                }
            }
        }

        self.flush(&mut to_record);

        // anything left was interrupted before its formatters finished;
        // dropping it keeps those files eligible for the next run
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "files left unfinished");
        }
    }

    /// Re-stat one finished file, count a change, queue the cache write.
    fn finalize(&self, rel: &Path, entry: &PendingFile, to_record: &mut Vec<CacheEntry>) {
        match std::fs::metadata(&entry.abs) {
            Ok(metadata) => {
                self.stats.add_formatted(1);

                let size = metadata.len();
                let mtime_ns = mtime_nanos(&metadata);
                if size != entry.size || mtime_ns != entry.mtime_ns {
                    self.stats.add_changed(1);
                    tracing::debug!(path = %rel.display(), "file changed");
                }

                to_record.push(CacheEntry {
                    path: rel.to_string_lossy().to_string(),
                    size,
                    mtime_ns,
                });
            }
            Err(err) => {
                tracing::warn!(
                    path = %rel.display(),
                    error = %err,
                    "file disappeared during formatting"
                );
                if let Some(cache) = &self.cache {
                    let _ = cache.forget(&rel.to_string_lossy());
                }
            }
        }
    }

    fn flush(&self, to_record: &mut Vec<CacheEntry>) {
        if to_record.is_empty() {
            return;
        }
        if let Some(cache) = &self.cache {
            if let Err(err) = cache.record(to_record) {
                tracing::warn!(error = %err, "cache write failed, dropping batch");
            }
        }
        to_record.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FormatterConfig};
    use crate::engine::formatter::load_formatters;
    use crate::engine::planner::plan;
    use std::fs;
    use tempfile::TempDir;

    /// A formatter that appends a byte to every path it is given, making
    /// changes observable through both size and mtime.
    fn appender(includes: &[&str]) -> FormatterConfig {
        FormatterConfig {
            command: "sh".to_string(),
            options: vec![
                "-c".to_string(),
                r#"for f in "$@"; do printf x >> "$f"; done"#.to_string(),
                "sh".to_string(),
            ],
            includes: includes.iter().map(ToString::to_string).collect(),
            excludes: vec![],
            before: None,
            priority: 0,
        }
    }

    fn noop(includes: &[&str]) -> FormatterConfig {
        FormatterConfig {
            command: "true".to_string(),
            options: vec![],
            includes: includes.iter().map(ToString::to_string).collect(),
            excludes: vec![],
            before: None,
            priority: 0,
        }
    }

    async fn run_pipeline(
        tree_root: &Path,
        config: &Config,
        cache: Option<Arc<Cache>>,
    ) -> Result<StatsSnapshot> {
        let formatters = load_formatters(config, false)?;
        let plan = plan(formatters, None)?;
        if let Some(cache) = &cache {
            cache.begin_run(&plan.global_signature())?;
        }
        let excludes = PatternSet::compile(&config.global.excludes)?;
        let pipeline = Pipeline::new(
            PipelineOptions::new(tree_root.to_path_buf()),
            plan,
            excludes,
            cache,
            Stats::new(),
            CancellationToken::new(),
        );
        pipeline.run().await
    }

    fn tree_with(files: &[&str]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for file in files {
            let path = tmp.path().join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, *file).unwrap();
        }
        tmp
    }

    #[tokio::test]
    async fn test_formats_matching_files() {
        let tmp = tree_with(&["a.rs", "b.rs", "sub/c.rs", "README.md"]);
        let mut config = Config::default();
        config.formatter.insert("rust".to_string(), appender(&["*.rs"]));

        let snapshot = run_pipeline(tmp.path(), &config, None).await.unwrap();

        assert_eq!(snapshot.traversed, 4);
        assert_eq!(snapshot.matched, 3);
        assert_eq!(snapshot.formatted, 3);
        assert_eq!(snapshot.changed, 3);

        // the appender really did write
        assert_eq!(fs::read_to_string(tmp.path().join("a.rs")).unwrap(), "a.rsx");
        assert_eq!(
            fs::read_to_string(tmp.path().join("README.md")).unwrap(),
            "README.md"
        );
    }

    #[tokio::test]
    async fn test_non_mutating_formatter_reports_no_changes() {
        let tmp = tree_with(&["a.rs", "b.rs"]);
        let mut config = Config::default();
        config.formatter.insert("noop".to_string(), noop(&["*.rs"]));

        let snapshot = run_pipeline(tmp.path(), &config, None).await.unwrap();

        assert_eq!(snapshot.formatted, 2);
        assert_eq!(snapshot.changed, 0);
    }

    #[tokio::test]
    async fn test_unmatched_files_are_dropped() {
        let tmp = tree_with(&["a.rs", "b.md"]);
        let mut config = Config::default();
        config
            .formatter
            .insert("none".to_string(), noop(&["*.xyz"]));

        let snapshot = run_pipeline(tmp.path(), &config, None).await.unwrap();

        assert_eq!(snapshot.traversed, 2);
        assert_eq!(snapshot.matched, 0);
        assert_eq!(snapshot.formatted, 0);
    }

    #[tokio::test]
    async fn test_failed_formatter_blocks_dependent_wave() {
        let tmp = tree_with(&["a.txt"]);

        let mut config = Config::default();
        config.formatter.insert(
            "broken".to_string(),
            FormatterConfig {
                command: "false".to_string(),
                before: Some("appender".to_string()),
                ..noop(&["*.txt"])
            },
        );
        config
            .formatter
            .insert("appender".to_string(), appender(&["*.txt"]));

        let err = run_pipeline(tmp.path(), &config, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(EngineError::FormatterFailed { .. })
        ));

        // the dependent formatter never ran
        assert_eq!(fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "a.txt");
    }

    #[tokio::test]
    async fn test_failure_suppresses_cache_writes_for_affected_files() {
        let tmp = tree_with(&["a.txt", "b.md"]);

        let mut config = Config::default();
        config.formatter.insert(
            "broken".to_string(),
            FormatterConfig {
                command: "false".to_string(),
                ..noop(&["*.txt"])
            },
        );
        config.formatter.insert("md".to_string(), appender(&["*.md"]));

        let cache = Arc::new(Cache::in_memory().unwrap());
        let err = run_pipeline(tmp.path(), &config, Some(Arc::clone(&cache)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Engine(EngineError::FormatterFailed { .. })
        ));

        // the failed file must stay stale even after a signature match
        let md = fs::metadata(tmp.path().join("a.txt")).unwrap();
        cache
            .finish_run("sig", &[])
            .and_then(|()| cache.begin_run("sig"))
            .unwrap();
        assert!(!cache
            .is_unchanged("a.txt", md.len(), mtime_nanos(&md))
            .unwrap());
    }

    #[tokio::test]
    async fn test_cache_skips_unchanged_files() {
        let tmp = tree_with(&["a.rs", "b.rs"]);
        let mut config = Config::default();
        config.formatter.insert("rust".to_string(), appender(&["*.rs"]));

        let cache = Arc::new(Cache::in_memory().unwrap());

        let first = run_pipeline(tmp.path(), &config, Some(Arc::clone(&cache)))
            .await
            .unwrap();
        assert_eq!(first.changed, 2);

        let second = run_pipeline(tmp.path(), &config, Some(Arc::clone(&cache)))
            .await
            .unwrap();
        assert_eq!(second.traversed, 2);
        assert_eq!(second.matched, 0);
        assert_eq!(second.changed, 0);

        // touching one file makes exactly that file eligible again
        fs::write(tmp.path().join("a.rs"), "fresh content").unwrap();
        let third = run_pipeline(tmp.path(), &config, Some(Arc::clone(&cache)))
            .await
            .unwrap();
        assert_eq!(third.matched, 1);
        assert_eq!(third.changed, 1);
    }

    #[tokio::test]
    async fn test_before_orders_formatter_output() {
        let tmp = tree_with(&["note.txt"]);

        // `first` appends "1", `second` appends "2"; with first.before =
        // second the suffix must be "12" regardless of scheduling
        let script = |suffix: &str| FormatterConfig {
            command: "sh".to_string(),
            options: vec![
                "-c".to_string(),
                format!(r#"for f in "$@"; do printf {suffix} >> "$f"; done"#),
                "sh".to_string(),
            ],
            includes: vec!["*.txt".to_string()],
            excludes: vec![],
            before: None,
            priority: 0,
        };

        let mut config = Config::default();
        config.formatter.insert(
            "first".to_string(),
            FormatterConfig {
                before: Some("second".to_string()),
                ..script("1")
            },
        );
        config.formatter.insert("second".to_string(), script("2"));

        run_pipeline(tmp.path(), &config, None).await.unwrap();

        assert_eq!(
            fs::read_to_string(tmp.path().join("note.txt")).unwrap(),
            "note.txt12"
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_cancelled() {
        let tmp = tree_with(&["a.rs"]);
        let mut config = Config::default();
        config.formatter.insert("rust".to_string(), noop(&["*.rs"]));

        let formatters = load_formatters(&config, false).unwrap();
        let plan = plan(formatters, None).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let pipeline = Pipeline::new(
            PipelineOptions::new(tmp.path().to_path_buf()),
            plan,
            PatternSet::empty().unwrap(),
            None,
            Stats::new(),
            cancel,
        );

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long = "e".repeat(STDERR_TAIL * 2);
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.len() <= STDERR_TAIL + 1);

        assert_eq!(stderr_tail(b"  short  \n"), "short");
    }

    #[test]
    fn test_worker_cap_defaults_to_parallelism() {
        let options = PipelineOptions::new(PathBuf::from("/tmp"));
        assert!(options.worker_cap() >= 1);

        let explicit = PipelineOptions {
            workers: 3,
            ..PipelineOptions::new(PathBuf::from("/tmp"))
        };
        assert_eq!(explicit.worker_cap(), 3);
    }
}
