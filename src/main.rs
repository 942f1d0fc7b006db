//! # Memory Exchange CLI (`memx`)
//!
//! The `memx` binary drives the knowledge-base index and serves the MCP
//! tool surface.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `memx init` | Create the store schema (idempotent) |
//! | `memx index` | Run one indexing pass (`--full` forces a rebuild) |
//! | `memx search "<query>"` | Search from the command line |
//! | `memx get <path>` | Print a knowledge file by relative path |
//! | `memx status` | Report index health |
//! | `memx serve` | Serve MCP tools over stdio (honors `build_index`/`watch`) |
//!
//! ## Examples
//!
//! ```bash
//! # Index a knowledge base
//! memx --config ./memx.toml index --full
//!
//! # Search with domain-aware boosting
//! memx search "caching strategy" --file src/ResourceProvider/Cache.cs
//!
//! # Serve tools for an MCP client, watching for edits
//! memx --config ./memx.toml serve
//! ```
//!
//! Logs go to stderr (stdout belongs to the stdio RPC transport); control
//! verbosity with `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use memory_exchange::config::{self, Config};
use memory_exchange::service::ServiceContainer;
use memory_exchange::watcher::WatchLoop;
use memory_exchange::{files, mcp, status};

/// Memory Exchange — hybrid search over a Markdown knowledge base,
/// exposed to AI coding assistants over MCP.
#[derive(Parser)]
#[command(
    name = "memx",
    about = "Memory Exchange — hybrid-searchable Markdown knowledge base served as MCP tools",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./memx.toml")]
    config: PathBuf,

    /// Override the configured source root.
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index schema. Idempotent.
    Init,

    /// Run one indexing pass over the knowledge base.
    Index {
        /// Ignore persisted state and rebuild every file.
        #[arg(long)]
        full: bool,
    },

    /// Search the index from the command line.
    Search {
        /// The search query.
        query: String,

        /// Current code file, used for domain-aware boosting.
        #[arg(long)]
        file: Option<String>,

        /// Number of results (clamped to 1-10).
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },

    /// Print a knowledge file by its relative path.
    Get {
        /// Path relative to the source root.
        path: String,
    },

    /// Report index health.
    Status,

    /// Serve MCP tools over stdio. Runs an indexing pass first when
    /// `build_index` is set, and the watch loop when `watch` is set.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the stdio RPC protocol; everything else goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = config::load_or_default(&cli.config)?;
    if let Some(source) = cli.source {
        config.source_path = Some(source);
    }

    match cli.command {
        Commands::Init => {
            let container = ServiceContainer::build(config).await?;
            container.write_index.ensure_index().await?;
            println!("Index schema ready.");
        }
        Commands::Index { full } => {
            let root = config.require_source_path()?.to_path_buf();
            let index_name = config.index_name.clone();
            let container = ServiceContainer::build(config).await?;
            let report = container.pipeline.run(&root, full, &index_name).await?;
            println!(
                "indexed {} files, removed {}, wrote {} chunks",
                report.files_indexed, report.files_deleted, report.chunks_written
            );
        }
        Commands::Search { query, file, top_k } => {
            let container = ServiceContainer::build(config).await?;
            let top_k = top_k.clamp(1, 10);
            let text = container
                .orchestrator
                .search(&query, file.as_deref(), top_k)
                .await?;
            println!("{}", text);
        }
        Commands::Get { path } => {
            let root = config.require_source_path()?;
            match files::read_relative(root, &path) {
                Ok(content) => println!("{}", content),
                Err(message) => {
                    eprintln!("{}", message);
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => {
            let container = ServiceContainer::build(config).await?;
            let text = status::report(
                container.read_index.as_ref(),
                container.config.source_path.as_deref(),
                &container.config.provider,
                &container.config.index_name,
            )
            .await;
            println!("{}", text);
        }
        Commands::Serve => {
            serve(config).await?;
        }
    }

    Ok(())
}

/// Start serving MCP tools, with optional startup indexing and watching.
async fn serve(config: Config) -> Result<()> {
    let container = Arc::new(ServiceContainer::build(config).await?);
    let config = container.config.clone();

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let mut watch_task = None;

    if config.watch {
        // The watch loop runs its own startup pass before observing events.
        let root = config.require_source_path()?.to_path_buf();
        let watch_loop = WatchLoop::new(
            container.pipeline.clone(),
            root,
            config.index_name.clone(),
        );
        watch_task = Some(tokio::spawn(watch_loop.run(stop_rx)));
    } else if config.build_index {
        let root = config.require_source_path()?;
        if let Err(e) = container
            .pipeline
            .run(root, false, &config.index_name)
            .await
        {
            error!(error = %e, "startup indexing failed, serving anyway");
        }
    }

    info!("serving MCP tools over stdio");
    mcp::serve_stdio(container.clone()).await?;

    // Client disconnected: wind the watcher down and let any in-flight
    // pass complete.
    let _ = stop_tx.send(true);
    if let Some(task) = watch_task {
        let _ = task.await;
    }

    Ok(())
}
