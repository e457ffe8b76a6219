//! fmtree - one command to format your repository.
//!
//! Entry point: loads `fmtree.toml`, plans the formatter batches and runs
//! the formatting pipeline over the tree root.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use fmtree::cache::Cache;
use fmtree::config::{self, Config, INIT_TEMPLATE};
use fmtree::engine::{load_formatters, plan, Pipeline, PipelineOptions, DEFAULT_BATCH_SIZE};
use fmtree::glob::PatternSet;
use fmtree::report;
use fmtree::stats::Stats;
use fmtree::walk::WalkKind;
use fmtree::{Error, Result};

/// One command to format your repository
///
/// Formats every file in the tree by dispatching it to the formatters
/// declared in fmtree.toml. Only files that changed since the last run
/// are re-formatted.
#[derive(Parser, Debug)]
#[command(name = "fmtree")]
#[command(version)]
#[command(about = "One command to format your repository")]
struct Cli {
    /// Create an fmtree.toml file in the current directory
    #[arg(short = 'i', long)]
    init: bool,

    /// Load the config file from the given path (defaults to searching
    /// upwards for fmtree.toml or .fmtree.toml)
    #[arg(long, env = "FMTREE_CONFIG", value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Change to this directory before doing anything else
    #[arg(short = 'C', long, value_name = "DIR")]
    working_dir: Option<PathBuf>,

    /// Root of the tree to format (defaults to the config file's directory)
    #[arg(long, env = "FMTREE_TREE_ROOT", value_name = "DIR")]
    tree_root: Option<PathBuf>,

    /// File discovery strategy (filesystem or git)
    #[arg(long, env = "FMTREE_WALK", default_value = "filesystem")]
    walk: String,

    /// Restrict the run to the named formatters (comma-separated)
    #[arg(short = 'f', long, value_delimiter = ',', value_name = "NAME")]
    formatters: Vec<String>,

    /// Warn and skip formatters whose executables are not on PATH
    #[arg(long)]
    allow_missing_formatter: bool,

    /// Exit non-zero when any file changes
    #[arg(long)]
    fail_on_change: bool,

    /// Drop all cached file state before running
    #[arg(short = 'c', long)]
    clear_cache: bool,

    /// Bypass the cache entirely
    #[arg(long)]
    no_cache: bool,

    /// Maximum paths per formatter invocation
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "N")]
    batch_size: usize,

    /// Concurrent formatter process cap (0 = CPU count)
    #[arg(long, env = "FMTREE_WORKERS", default_value = "0", value_name = "N")]
    workers: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FMTREE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "FMTREE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    if let Err(err) = run(cli).await {
        tracing::error!("{err}");
        std::process::exit(report::exit_code(&err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(dir) = &cli.working_dir {
        std::env::set_current_dir(dir)?;
    }

    if cli.init {
        return write_init_config();
    }

    let config_file = match &cli.config_file {
        Some(path) => path.clone(),
        None => config::find_up(&std::env::current_dir()?)?,
    };
    tracing::debug!(config = %config_file.display(), "using config file");

    let config = Config::load(&config_file)?;

    let tree_root = match &cli.tree_root {
        Some(root) => root.clone(),
        None => match config_file.parent() {
            Some(parent) if parent != Path::new("") => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        },
    };
    let tree_root = tree_root.canonicalize()?;
    tracing::debug!(tree_root = %tree_root.display(), "formatting tree");

    let walk: WalkKind = cli.walk.parse()?;

    let formatters = load_formatters(&config, cli.allow_missing_formatter)?;
    let restriction = (!cli.formatters.is_empty()).then_some(cli.formatters.as_slice());
    let plan = plan(formatters, restriction)?;
    tracing::debug!(
        formatters = plan.formatter_count(),
        waves = plan.waves.len(),
        "plan ready"
    );

    let cache = if cli.no_cache {
        None
    } else {
        let cache = Cache::open_for_tree(&tree_root)?;
        if cli.clear_cache {
            cache.clear()?;
        }
        cache.begin_run(&plan.global_signature())?;
        Some(Arc::new(cache))
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let options = PipelineOptions {
        tree_root,
        walk,
        batch_size: cli.batch_size,
        workers: cli.workers,
        prune_cache: restriction.is_none(),
    };
    let global_excludes = PatternSet::compile(&config.global.excludes)?;
    let pipeline = Pipeline::new(options, plan, global_excludes, cache, Stats::new(), cancel);

    let snapshot = pipeline.run().await?;
    report::print_summary(&snapshot);
    report::check_fail_on_change(cli.fail_on_change, &snapshot)
}

/// `--init`: write the starter config, refusing to overwrite.
fn write_init_config() -> Result<()> {
    let path = PathBuf::from("fmtree.toml");
    if path.exists() {
        return Err(Error::config("fmtree.toml already exists"));
    }
    std::fs::write(&path, INIT_TEMPLATE)?;
    println!("Generated fmtree.toml. Now it's your turn to edit it.");
    Ok(())
}

/// Trip the cancellation token on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::warn!("interrupt received, shutting down");
        cancel.cancel();
    });
}

/// Initialize tracing to stderr with the configured level.
///
/// `FMTREE_LOG` overrides the level with a full `EnvFilter` directive.
fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_env("FMTREE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let json_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(false);
        Registry::default().with(env_filter).with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time();
        Registry::default().with(env_filter).with(fmt_layer).init();
    }
}
