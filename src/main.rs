//! # Hearth CLI (`hearth`)
//!
//! ## Usage
//!
//! ```bash
//! hearth --config ./config/hearth.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hearth init` | Create the knowledge index and cache databases |
//! | `hearth reindex` | Rebuild the knowledge index from the configured paths |
//! | `hearth search "<query>"` | Query the knowledge index |
//! | `hearth status` | Show knowledge index status |
//! | `hearth cache stats\|cleanup\|clear` | Inspect or prune the cache |
//! | `hearth profiles` | List voice pipeline profiles |
//! | `hearth serve` | Start the HTTP API |
//!
//! Logs go to stderr and honor `RUST_LOG` (default `hearth=info`); command
//! output goes to stdout.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hearth::cache::CacheManager;
use hearth::config::{self, Config};
use hearth::migrate;
use hearth::pipeline::{find_profile, PROFILES};
use hearth::reindex::ReindexOrchestrator;
use hearth::server;
use hearth::vector_store::{hit_source, VectorStore};

/// Hearth: smart-home companion service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hearth.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "hearth",
    about = "Hearth: device control, a local knowledge base, and voice pipeline profiles",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hearth.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the knowledge index and cache databases. Idempotent.
    Init,

    /// Rebuild the knowledge index from `[knowledge].paths`.
    Reindex,

    /// Search the knowledge index.
    Search {
        query: String,

        /// Number of results, clamped to 1..=10.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Show knowledge index status.
    Status,

    /// Inspect or prune the key/value cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List the voice pipeline profiles.
    Profiles,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry counts.
    Stats,
    /// Remove expired entries.
    Cleanup,
    /// Remove every entry.
    Clear,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hearth=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

fn require_knowledge(cfg: &Config) -> anyhow::Result<()> {
    if !cfg.knowledge.enabled {
        bail!("knowledge base is disabled ([knowledge].enabled = false)");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = cli.config;
    let load = || config::load_config(&config_path);

    match cli.command {
        Commands::Profiles => {
            // Profiles are built in; a missing config only changes which one is marked.
            let cfg = load().unwrap_or_else(|_| Config::minimal());
            let default = find_profile(&cfg.pipeline.default_profile).map(|p| p.name);
            for p in PROFILES {
                let marker = if Some(p.name) == default { "*" } else { " " };
                println!(
                    "{} {:<8} asr={:<9} llm={:<7} tts={:<11} {}",
                    marker,
                    p.name,
                    format!("{:?}", p.asr).to_lowercase(),
                    format!("{:?}", p.llm).to_lowercase(),
                    format!("{:?}", p.tts).to_lowercase(),
                    p.description
                );
            }
        }
        Commands::Init => {
            let cfg = load()?;
            migrate::run_migrations(&cfg).await?;
            println!("Databases initialized.");
            println!("  index: {}", cfg.knowledge.index_path.display());
            println!("  cache: {}", cfg.cache.db_path.display());
        }
        Commands::Reindex => {
            let cfg = load()?;
            require_knowledge(&cfg)?;
            let cfg = Arc::new(cfg);
            let store = Arc::new(VectorStore::new(&cfg));
            let orchestrator = ReindexOrchestrator::new(Arc::clone(&cfg), store);
            let result = orchestrator.reindex_blocking().await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.ok {
                bail!(
                    "reindex failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
        Commands::Search { query, k } => {
            let cfg = load()?;
            require_knowledge(&cfg)?;
            let k = k.unwrap_or(cfg.knowledge.default_k).clamp(1, 10);
            let store = VectorStore::new(&cfg);
            let hits = store.search(&query, k).await;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let heading = match hit.heading() {
                    "" => String::new(),
                    h => format!(" # {}", h),
                };
                println!("{}. [{:.3}] {}{}", i + 1, hit.score, hit_source(hit), heading);
                let preview: String = hit.content.chars().take(200).collect();
                println!("   {}", preview.replace('\n', " "));
            }
        }
        Commands::Status => {
            let cfg = load()?;
            let store = VectorStore::new(&cfg);
            let initialized = cfg.knowledge.enabled && store.initialize().await;
            let status = store.status().await;
            println!("enabled:         {}", cfg.knowledge.enabled);
            println!("initialized:     {}", initialized);
            if initialized {
                println!("document_count:  {}", store.count().await?);
            }
            println!("embedding_model: {}", status.embedding_model);
            println!("index_path:      {}", status.index_path);
            if let Some(err) = status.error {
                println!("error:           {}", err);
            }
        }
        Commands::Cache { action } => {
            let cfg = load()?;
            let cache = CacheManager::open(&cfg.cache)
                .await
                .with_context(|| format!("failed to open cache at {}", cfg.cache.db_path.display()))?;
            match action {
                CacheAction::Stats => {
                    let stats = cache.get_stats().await?;
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                CacheAction::Cleanup => {
                    let removed = cache.cleanup_expired().await?;
                    println!("Removed {} expired entries.", removed);
                }
                CacheAction::Clear => {
                    let removed = cache.clear_all().await?;
                    println!("Removed {} entries.", removed);
                }
            }
        }
        Commands::Serve => {
            server::run_server(load()?).await?;
        }
    }

    Ok(())
}
