//! # codeindex CLI (`cidx`)
//!
//! ## Usage
//!
//! ```bash
//! cidx --config ./config/cidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cidx init` | Create the store and run schema migrations |
//! | `cidx index [PATH]` | Incrementally index a directory |
//! | `cidx search "<query>"` | Similarity search over indexed chunks |
//! | `cidx status` | Show counts, schema version and last run |
//! | `cidx cleanup` | Purge soft-deleted files and replaced chunks |
//! | `cidx backup` | Write a point-in-time backup |
//! | `cidx restore <PATH>` | Restore a backup (snapshotting first) |
//!
//! Logs go to stderr (`RUST_LOG`, default `codeindex=info`); command
//! output goes to stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use codeindex::chunk::LineChunker;
use codeindex::config::{self, Config, StoreBackend};
use codeindex::connector_fs::FileCollector;
use codeindex::embedding::EmbeddingService;
use codeindex::ingest::{IndexOptions, IndexResult, Indexer};
use codeindex::progress::ProgressMode;
use codeindex::search::{self, Searcher};
use codeindex::stats;
use codeindex::store::{self, Store};

/// codeindex: incremental semantic indexing of source trees.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cidx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cidx",
    about = "codeindex: incremental semantic indexing of source trees",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cidx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store and apply pending schema migrations. Idempotent.
    Init,

    /// Index a directory.
    ///
    /// Only files whose content changed since the last run are chunked
    /// and embedded. Files gone from disk are soft-deleted.
    Index {
        /// Directory to index.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Re-index every file, ignoring change detection.
        #[arg(long)]
        full: bool,

        /// Do not soft-delete tracked files that are missing from disk.
        #[arg(long)]
        no_delete: bool,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Search indexed chunks by similarity.
    Search {
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show index counts, schema version and last run.
    Status,

    /// Purge soft-deleted files and replaced chunks.
    Cleanup,

    /// Write a point-in-time backup of the store.
    Backup,

    /// Restore the store from a backup. The current state is backed up first.
    Restore {
        /// Backup file produced by `cidx backup`.
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("codeindex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = open_initialized(&cfg).await?;
            let version = store.schema_version().await?;
            println!("Index initialized (schema v{}).", version);
        }
        Commands::Index {
            path,
            full,
            no_delete,
            progress,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            run_index(&cfg, &path, full, no_delete, mode).await?;
        }
        Commands::Search { query, limit } => {
            let store = open_initialized(&cfg).await?;
            let embeddings = EmbeddingService::from_config(&cfg.embedding)?;
            let searcher = Searcher::new(store, embeddings).await?;
            let hits = searcher.search(&query, limit).await?;
            search::print_hits(&hits);
        }
        Commands::Status => {
            let store = open_initialized(&cfg).await?;
            let status = stats::collect_status(store.as_ref()).await?;
            let (location, size) = store_location(&cfg);
            stats::print_status(&status, &location, size);
        }
        Commands::Cleanup => {
            let store = open_initialized(&cfg).await?;
            let cleaned = store.cleanup_deleted_files().await?;
            println!("Cleaned up {} deleted file(s).", cleaned);
        }
        Commands::Backup => {
            let store = open_initialized(&cfg).await?;
            let path = store.create_backup().await?;
            println!("Backup written to {}", path.display());
        }
        Commands::Restore { path } => {
            let store = open_initialized(&cfg).await?;
            store
                .restore_backup(&path)
                .await
                .with_context(|| format!("Failed to restore {}", path.display()))?;
            println!("Restored from {}", path.display());
        }
    }

    Ok(())
}

async fn open_initialized(cfg: &Config) -> Result<Arc<dyn Store>> {
    let store = store::open_store(&cfg.db)
        .await
        .with_context(|| format!("Failed to open {} store", backend_label(cfg.db.backend)))?;
    store
        .initialize()
        .await
        .context("Failed to initialize store")?;
    Ok(store)
}

async fn run_index(
    cfg: &Config,
    root: &Path,
    full: bool,
    no_delete: bool,
    progress: ProgressMode,
) -> Result<()> {
    let store = open_initialized(cfg).await?;

    let mut collector = FileCollector::new(&cfg.indexing)?;
    if cfg.db.backend == StoreBackend::Sqlite {
        if let Some(dir) = cfg.db.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            collector = collector.skip_path(dir);
        }
    }
    collector = collector.skip_path(cfg.db.backup_dir());

    let indexer = Indexer::new(
        store,
        EmbeddingService::from_config(&cfg.embedding)?,
        Arc::new(LineChunker::new(&cfg.chunking)),
        collector,
        cfg.indexing.store_batch_size,
    )
    .await?
    .with_progress(progress.reporter());

    let mut options = IndexOptions::from_config(&cfg.indexing);
    options.full = full;
    if no_delete {
        options.detect_deleted = false;
    }

    let result = indexer
        .index(root, &options)
        .await
        .with_context(|| format!("Index run over {} failed", root.display()))?;
    print_result(root, &result);
    Ok(())
}

fn print_result(root: &Path, result: &IndexResult) {
    println!("index {}", root.display());
    println!("  files indexed: {}", result.files_indexed);
    println!("  chunks indexed: {}", result.chunks_indexed);
    println!("  unchanged: {}", result.files_unchanged);
    println!("  deleted: {}", result.files_deleted);
    println!("  cleaned up: {}", result.files_cleaned);
    if result.placeholder_embeddings > 0 {
        println!("  placeholder embeddings: {}", result.placeholder_embeddings);
    }
    println!("  failed: {}", result.errors_count);
    for path in &result.failed_files {
        println!("    - {}", path);
    }
    println!("  duration: {}ms", result.duration_ms);
    println!("{}", result.summary);
}

fn store_location(cfg: &Config) -> (String, Option<u64>) {
    match cfg.db.backend {
        StoreBackend::Sqlite => (
            cfg.db.path.display().to_string(),
            std::fs::metadata(&cfg.db.path).map(|m| m.len()).ok(),
        ),
        StoreBackend::Remote => (
            cfg.db
                .remote
                .as_ref()
                .map(|r| r.endpoint.clone())
                .unwrap_or_default(),
            None,
        ),
        StoreBackend::Memory => ("(in-memory)".to_string(), None),
    }
}

fn backend_label(backend: StoreBackend) -> &'static str {
    match backend {
        StoreBackend::Sqlite => "sqlite",
        StoreBackend::Remote => "remote",
        StoreBackend::Memory => "memory",
    }
}
