//! # docqa CLI
//!
//! The `docqa` binary indexes a folder of PDFs and answers questions about
//! them, citing the document and page each answer came from.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa ingest [PATHS..]` | Extract, chunk, embed, and add PDFs to the index |
//! | `docqa ask "<question>"` | Answer one question |
//! | `docqa chat` | Interactive conversation with follow-up questions |
//! | `docqa serve` | Browser chat UI with PDF upload |
//! | `docqa info` | Summarize the saved index |
//!
//! ## Examples
//!
//! ```bash
//! # Index everything under ./data/raw_pdfs
//! docqa ingest
//!
//! # Start over after changing embedding model
//! docqa ingest --rebuild
//!
//! # One question
//! docqa ask "What was revenue in 2023?"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::config;
use docqa::context::AppContext;
use docqa::progress::ProgressMode;
use docqa::{chat, ingest, server, stats};

/// docqa: ask questions about your PDFs, answered only from the documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa: ask questions about your PDFs, answered only from the documents",
    version,
    long_about = "docqa extracts text from PDF files, splits it into overlapping chunks, embeds \
    them into a local vector index, and answers questions by retrieving the most relevant \
    chunks and asking a language model to answer from them alone, citing document and page."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docqa.toml`. Falls back to built-in defaults if
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Add PDFs to the index.
    ///
    /// Each file is extracted page by page, chunked, and embedded. Files that
    /// fail are skipped and listed in the summary; the rest are still indexed.
    Ingest {
        /// PDF files or directories to ingest. Defaults to `[ingest].dir`.
        paths: Vec<PathBuf>,

        /// Directory to scan (same as passing it as a path).
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Replace the saved index instead of adding to it.
        #[arg(long)]
        rebuild: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Answer a single question.
    Ask {
        /// The question.
        question: String,

        /// Number of chunks to retrieve. Defaults to `[retrieval].top_k`.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Interactive conversation.
    ///
    /// Follow-up questions see the earlier turns. Type `exit` or `quit` to
    /// leave and `/reset` to forget the conversation.
    Chat {
        /// Number of chunks to retrieve. Defaults to `[retrieval].top_k`.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Start the browser chat server on `[server].bind`.
    Serve,

    /// Show what the saved index contains.
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;
    let ctx = AppContext::from_config(cfg)?;

    match cli.command {
        Commands::Ingest {
            mut paths,
            dir,
            rebuild,
            progress,
        } => {
            paths.extend(dir);
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&ctx, paths, rebuild, mode).await?;
        }
        Commands::Ask { question, k } => {
            chat::run_ask(&ctx, &question, k).await?;
        }
        Commands::Chat { k } => {
            chat::run_chat(&ctx, k).await?;
        }
        Commands::Serve => {
            server::run_server(ctx).await?;
        }
        Commands::Info => {
            stats::run_info(&ctx)?;
        }
    }

    Ok(())
}
