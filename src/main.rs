//! # Memory Store CLI (`mstore`)
//!
//! ## Usage
//!
//! ```bash
//! mstore --config ./config/mstore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mstore process` | Ingest every markdown file under the docs root |
//! | `mstore process --file <path>` | Ingest a single file |
//! | `mstore watch` | Initial pass, then re-ingest on change (with health server) |
//! | `mstore search "<query>"` | Search from the command line |
//! | `mstore serve api` | Start the search HTTP API |
//! | `mstore serve embeddings` | Start the embedding HTTP service |
//! | `mstore health` | Print the processor health report |
//! | `mstore stats` | Document and chunk counts |
//! | `mstore chunk <file>` | Print a file's chunks as JSON (no database) |
//! | `mstore fetch` | Log in to the remote notes API and print projects |
//!
//! When `--config` is omitted and `./config/mstore.toml` does not exist,
//! built-in defaults plus environment overrides (`DATABASE_URL`,
//! `DOCS_PATH`, ...) are used. A `.env` file in the working directory is
//! loaded first.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use memory_store::chunk::chunk_markdown;
use memory_store::config::{self, Config};
use memory_store::embed_server::{load_embedder, run_embedding_server};
use memory_store::embedding::create_provider;
use memory_store::health::{spawn_health_server, HealthChecker};
use memory_store::ingest::{FileOutcome, Ingestor};
use memory_store::models::SearchHit;
use memory_store::remote::{Credentials, RemoteClient};
use memory_store::scan::Scanner;
use memory_store::search::{SearchMode, SearchService};
use memory_store::server::{run_server, shutdown_signal};
use memory_store::stats::run_stats;
use memory_store::store::postgres::{self, PgStore};
use memory_store::watch::DocsWatcher;

const DEFAULT_CONFIG_PATH: &str = "./config/mstore.toml";

/// Memory Store: markdown chunking, pgvector ingestion and hybrid search.
#[derive(Parser)]
#[command(
    name = "mstore",
    about = "Memory Store: markdown chunking, pgvector ingestion and hybrid search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/mstore.toml` if it exists, otherwise built-in
    /// defaults with environment overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and store markdown documents.
    ///
    /// Unchanged files (same content hash) are skipped. A failure on one
    /// file is logged and the run continues.
    Process {
        /// Process only this file.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Process everything once, then watch the docs root for changes.
    ///
    /// Also serves `/health` and `/metrics` on `processor.health_bind`.
    /// Runs until Ctrl-C.
    Watch,

    /// Search indexed chunks.
    Search {
        /// The search query.
        query: String,

        /// Search mode: `semantic`, `fulltext`, or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results (defaults to `search.default_limit`).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Start an HTTP service.
    Serve {
        #[command(subcommand)]
        service: ServeCommand,
    },

    /// Check database, embedding service and docs root.
    ///
    /// Prints the report as JSON and exits non-zero when unhealthy.
    Health,

    /// Show document and chunk counts.
    Stats,

    /// Print the chunks of a markdown file as JSON.
    Chunk {
        /// Markdown file to chunk.
        file: PathBuf,
    },

    /// Log in to the remote notes API and print projects with their notes.
    ///
    /// Credentials come from `remote.email` / `remote.password` or the
    /// `REMOTE_EMAIL` / `REMOTE_PASSWORD` environment variables.
    Fetch,
}

#[derive(Subcommand)]
enum ServeCommand {
    /// Search API (`/search/{mode}`, `/stats`, `/health`).
    Api,
    /// Embedding service (`/embeddings`, `/health`, `/models`).
    Embeddings,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Process { file } => {
            let ingestor = build_ingestor(&cfg).await?;
            match file {
                Some(path) => match ingestor.process_file(&path).await? {
                    FileOutcome::Processed { chunks } => {
                        println!("Processed {} ({} chunks)", path.display(), chunks)
                    }
                    FileOutcome::Skipped => println!("Unchanged: {}", path.display()),
                },
                None => {
                    let report = ingestor.process_all().await?;
                    println!("Processing complete");
                    println!("  processed: {}", report.processed);
                    println!("  skipped:   {}", report.skipped);
                    println!("  failed:    {}", report.failed);
                    println!("  chunks:    {}", report.chunks_written);
                }
            }
        }
        Commands::Watch => run_watch(&cfg).await?,
        Commands::Search { query, mode, limit } => {
            let mode: SearchMode = mode.parse()?;
            let store = open_store(&cfg).await?;
            let embedder = create_provider(&cfg.embedding)?;
            let service = SearchService::new(&cfg.search, store, embedder);
            let limit = limit.unwrap_or_else(|| service.default_limit());

            let hits = service.search(mode, &query, limit).await?;
            print_hits(&query, mode, &hits);
        }
        Commands::Serve { service } => match service {
            ServeCommand::Api => {
                let store = open_store(&cfg).await?;
                let embedder = create_provider(&cfg.embedding)?;
                let search = Arc::new(SearchService::new(&cfg.search, store, embedder));
                run_server(&cfg.server.bind, search, shutdown_signal()).await?;
            }
            ServeCommand::Embeddings => {
                let embedder = match load_embedder(&cfg.embedding_service).await {
                    Ok(e) => Some(e),
                    Err(e) => {
                        error!(error = %e, "failed to load embedding model; serving 503s");
                        None
                    }
                };
                run_embedding_server(&cfg.embedding_service, embedder, shutdown_signal()).await?;
            }
        },
        Commands::Health => {
            // One attempt: a health probe should answer promptly.
            let mut db = cfg.db.clone();
            db.connect_retries = 1;
            let store = Arc::new(postgres::connect(&db).await?);
            let checker = HealthChecker::new(
                store,
                create_provider(&cfg.embedding)?,
                Scanner::new(&cfg.docs)?,
            );
            let report = checker.check().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_healthy() {
                bail!("unhealthy");
            }
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            run_stats(store.as_ref()).await?;
        }
        Commands::Chunk { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let chunks = chunk_markdown(
                &text,
                cfg.chunking.max_chars,
                cfg.chunking.overlap_lines,
            );
            println!("{}", serde_json::to_string_pretty(&chunks)?);
        }
        Commands::Fetch => {
            let (Some(email), Some(password)) = (cfg.remote.email.clone(), cfg.remote.password.clone())
            else {
                bail!("remote credentials missing: set remote.email/remote.password or REMOTE_EMAIL/REMOTE_PASSWORD");
            };
            let mut client = RemoteClient::new(&cfg.remote)?;
            let user = client.user(&Credentials { email, password }).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "memory_store=debug,mstore=debug,tower_http=debug"
    } else {
        "memory_store=info,mstore=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => config::load_config(path),
        None => {
            let path = Path::new(DEFAULT_CONFIG_PATH);
            if path.exists() {
                config::load_config(path)
            } else {
                config::env_config()
            }
        }
    }
}

async fn open_store(cfg: &Config) -> Result<Arc<PgStore>> {
    let store = postgres::connect(&cfg.db).await?;
    store.verify_schema().await?;
    Ok(Arc::new(store))
}

async fn build_ingestor(cfg: &Config) -> Result<Ingestor> {
    let store = open_store(cfg).await?;
    let embedder = create_provider(&cfg.embedding)?;
    Ingestor::new(cfg, store, embedder)
}

async fn run_watch(cfg: &Config) -> Result<()> {
    let store = open_store(cfg).await?;
    let embedder = create_provider(&cfg.embedding)?;
    let ingestor = Arc::new(Ingestor::new(cfg, store.clone(), embedder.clone())?);

    let report = ingestor.process_all().await?;
    info!(
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failed,
        "initial pass complete"
    );

    let checker = Arc::new(HealthChecker::new(store, embedder, ingestor.scanner().clone()));
    let (health, _) = spawn_health_server(&cfg.processor.health_bind, checker).await?;

    let interval = Duration::from_secs(cfg.processor.poll_interval_secs.max(1));
    let watcher = DocsWatcher::new(ingestor, interval).start();

    shutdown_signal().await;
    info!("shutting down");

    for task in [watcher, health] {
        let name = task.name();
        if let Err(e) = task.stop().await {
            warn!(task = name, error = %e, "task did not stop cleanly");
        }
    }
    Ok(())
}

fn print_hits(query: &str, mode: SearchMode, hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results for \"{}\" ({})", query, mode);
        return;
    }

    println!("Found {} results for \"{}\" ({}):\n", hits.len(), query, mode);
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.similarity, hit.title);
        println!("    file: {}", hit.file_path);
        if !hit.metadata.header.is_empty() {
            println!("    section: {}", hit.metadata.header);
        }
        println!("    {}", preview(&hit.content, 160));
        println!();
    }
}

fn preview(content: &str, max: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}
