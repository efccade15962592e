//! Index statistics and health overview.
//!
//! Summarizes what is indexed: record counts, the embedding model that
//! produced them, and a per-document breakdown. Used by `docqa info` to give
//! confidence that ingestion worked before asking questions.

use anyhow::Result;

use crate::context::AppContext;
use crate::error::DocQaError;
use crate::index::index_path;

/// Run the info command: load the index and print a summary.
pub fn run_info(ctx: &AppContext) -> Result<()> {
    let dir = ctx.store.dir();
    let index = match ctx.load_index() {
        Ok(index) => index,
        Err(DocQaError::IndexNotFound(_)) => {
            println!("No index found at {}.", dir.display());
            println!("Run `docqa ingest` to index your PDFs.");
            return Ok(());
        }
        Err(e @ DocQaError::IndexCorrupt { .. }) => {
            anyhow::bail!("{}\nRun `docqa ingest --rebuild` to replace it.", e);
        }
        Err(e) => return Err(e.into()),
    };

    let size = std::fs::metadata(index_path(dir)).map(|m| m.len()).unwrap_or(0);
    let sources = index.sources();

    println!("docqa index");
    println!("===========");
    println!();
    println!("  Location:    {}", dir.display());
    println!("  Size:        {}", format_bytes(size));
    println!("  Model:       {} ({} dims)", index.embedding_model(), index.dims());
    println!("  Documents:   {}", sources.len());
    println!("  Chunks:      {}", index.len());
    println!("  Updated:     {}", format_ts_relative(index.updated_at().timestamp()));

    if ctx.embedder.model_name() != index.embedding_model() {
        println!();
        println!(
            "  warning: configured embedder is {}, index was built with {}",
            ctx.embedder.model_name(),
            index.embedding_model()
        );
    }

    if !sources.is_empty() {
        println!();
        println!("  {:<48} {:>8}", "DOCUMENT", "CHUNKS");
        println!("  {}", "-".repeat(57));
        for (source, chunks) in &sources {
            println!("  {:<48} {:>8}", source, chunks);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
