//! # askpdf CLI
//!
//! ## Usage
//!
//! ```bash
//! askpdf --config ./config/askpdf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askpdf init` | Create the index database and upload directory |
//! | `askpdf ingest <files…>` | Extract, chunk, embed and index local files |
//! | `askpdf search "<query>"` | Show the passages closest to a query |
//! | `askpdf ask "<question>"` | Answer a question from the index |
//! | `askpdf serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `askpdf=info`). Logs go to
//! stderr; command output goes to stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use askpdf::config;
use askpdf::index::{SqliteIndex, VectorIndex};
use askpdf::qa::QaService;
use askpdf::{ingest, search, server};

/// askpdf: ask questions about your PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/askpdf.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askpdf",
    about = "Upload PDFs and answer questions about them with retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askpdf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index database and the upload directory.
    ///
    /// Idempotent: running it on an existing index changes nothing.
    Init,

    /// Index local files (PDF, .txt, .md).
    Ingest {
        /// Files to ingest. Each is processed independently.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Search the index and print ranked passages.
    Search {
        query: String,

        /// Maximum number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question using retrieved context.
    ///
    /// If the model requests a function call (e.g. sending an email) it is
    /// executed and its outcome printed.
    Ask { query: String },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("askpdf=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let index = SqliteIndex::open(&cfg.index.path, cfg.embedding.batch_size).await?;
            let entries = index.count().await?;
            index.close().await;
            std::fs::create_dir_all(&cfg.storage.upload_dir).with_context(|| {
                format!(
                    "cannot create upload directory {}",
                    cfg.storage.upload_dir.display()
                )
            })?;
            println!(
                "Index initialized at {} ({} entries).",
                cfg.index.db_path().display(),
                entries
            );
        }
        Commands::Ingest { files } => {
            ingest::run_ingest(&cfg, &files).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Ask { query } => {
            let service = QaService::from_config(&cfg).await?;
            let result = service.ask(&query).await?;

            println!("{}", result.answer.trim());
            if !result.hits.is_empty() {
                println!();
                println!("sources:");
                for (source, score) in result.sources() {
                    println!("  [{:.2}] {}", score, source);
                }
            }
            if let Some(outcome) = result.function_outcome {
                println!();
                println!("function {}: {}", outcome.function, outcome.message);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
