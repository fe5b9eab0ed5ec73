//! Fathom CLI - ingest documents and run hybrid search over a local index.
//!
//! # Usage
//!
//! ```bash
//! # Ingest one {"id", "text", "metadata"} object per line
//! fathom ingest docs.jsonl
//!
//! # Search
//! fathom search "rust embeddings" -n 5
//! fathom search "quarterly report" --filter company_id=acme --json
//!
//! # Maintenance
//! fathom delete doc-42
//! fathom rebuild
//! fathom stats
//! ```

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fathom hybrid search CLI.
///
/// Ranks documents with BM25 and embedding similarity and fuses both
/// rankings. Configuration comes from `fathom.toml` (or `--config`) and
/// `FATHOM_*` environment variables.
#[derive(Parser)]
#[command(name = "fathom", version, about)]
struct Cli {
    /// Configuration file (default: ./fathom.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Custom data directory (default: platform standard location)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add or replace documents from a JSON Lines file
    Ingest {
        /// File with one document object per line
        path: PathBuf,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Maximum number of results to return (default: from config)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Restrict results to documents with this metadata pair (key=value)
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a document by id
    Delete {
        /// Document id
        id: String,
    },

    /// Retry pending documents, rebuild the lexical index and compact vectors
    Rebuild,

    /// Show index statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let default_level = if cli.verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let retrieval_config = config::load_config(cli.config.as_deref())?;
    let data_dir = config::get_data_dir(cli.data_dir.as_ref())?;
    let service = commands::open_service(&data_dir, retrieval_config).await?;
    let index_dir = config::index_dir(&data_dir);

    match cli.command {
        Command::Ingest { path } => {
            let summary = commands::ingest(&service, &path).await?;
            service.persist_indices(&index_dir).await?;
            println!("{}", output::format_ingest(&summary));
        }
        Command::Search {
            query,
            limit,
            filters,
            json,
        } => {
            let limit = limit.unwrap_or(service.config().fusion.top_k);
            let response = commands::search(&service, &query, limit, &filters).await?;
            let rendered = if json {
                output::format_json(&query, &response)
            } else {
                output::format_human(&query, &response)
            };
            println!("{}", rendered);
        }
        Command::Delete { id } => {
            let deleted = commands::delete(&service, &id).await?;
            service.persist_indices(&index_dir).await?;
            if deleted {
                println!("Deleted {}", id);
            } else {
                println!("No document with id {}", id);
            }
        }
        Command::Rebuild => {
            let summary = commands::rebuild(&service).await?;
            service.persist_indices(&index_dir).await?;
            println!("{}", output::format_rebuild(&summary));
        }
        Command::Stats { json } => {
            let stats = service.stats().await?;
            let rendered = if json {
                output::format_stats_json(&stats)
            } else {
                output::format_stats_human(&stats)
            };
            println!("{}", rendered);
        }
    }

    Ok(())
}
