//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for a set of PDFs: discovery → extraction →
//! chunking → embedding → locked merge into the saved index. Failures are
//! per document: a file that cannot be read or embedded is skipped and listed
//! in the [`IngestReport`], and the remaining files are still indexed.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::context::AppContext;
use crate::error::{DocQaError, Result};
use crate::extract::{extract_pages, is_pdf};
use crate::index::{self, Index};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress, ProgressMode};

/// A file that was left out of the index, and why.
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files_indexed: usize,
    pub pages: usize,
    pub chunks: usize,
    /// Records in the saved index after the merge.
    pub records_total: usize,
    pub failures: Vec<IngestFailure>,
    /// Nothing was indexed and the saved index was left as it was, even
    /// under `rebuild`.
    pub index_kept: bool,
}

/// Expand `paths` into the PDF files to ingest, sorted and de-duplicated.
///
/// Directories are walked recursively; files are taken as given if they have
/// a `.pdf` extension. Paths that do not exist are reported as failures.
pub fn discover_pdfs(paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<IngestFailure>) {
    let mut files = Vec::new();
    let mut failures = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false) {
                match entry {
                    Ok(e) if e.file_type().is_file() && is_pdf(e.path()) => {
                        files.push(e.into_path());
                    }
                    Ok(_) => {}
                    Err(e) => failures.push(IngestFailure {
                        path: e.path().map(Path::to_path_buf).unwrap_or_else(|| path.clone()),
                        error: e.to_string(),
                    }),
                }
            }
        } else if path.is_file() {
            if is_pdf(path) {
                files.push(path.clone());
            } else {
                failures.push(IngestFailure {
                    path: path.clone(),
                    error: "not a .pdf file".to_string(),
                });
            }
        } else {
            failures.push(IngestFailure {
                path: path.clone(),
                error: "no such file or directory".to_string(),
            });
        }
    }

    files.sort();
    files.dedup();
    (files, failures)
}

/// Index one document: extract, chunk, and embed. All-or-nothing per file.
async fn index_document(ctx: &AppContext, path: &Path) -> Result<(usize, Index)> {
    let owned = path.to_path_buf();
    let pages = tokio::task::spawn_blocking(move || extract_pages(&owned))
        .await
        .map_err(|e| DocQaError::DocumentExtraction {
            path: path.to_path_buf(),
            message: format!("extraction task failed: {}", e),
        })??;

    let chunks = ctx.chunker().split(&pages);
    if chunks.is_empty() {
        tracing::warn!(path = %path.display(), pages = pages.len(), "no extractable text");
    }

    let doc_index = index::build(
        chunks,
        ctx.embedder.as_ref(),
        ctx.config.embedding.batch_size,
    )
    .await?;
    Ok((pages.len(), doc_index))
}

/// Ingest `files` and merge them into the saved index.
///
/// With `rebuild`, the saved index (even a corrupt one) is replaced by the
/// records from this run instead of being extended. If every file failed,
/// the saved index is left untouched and the report says so.
pub async fn ingest_files(
    ctx: &AppContext,
    files: &[PathBuf],
    rebuild: bool,
    reporter: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut incoming = Index::empty(ctx.embedder.model_name(), ctx.embedder.dims());
    let total = files.len() as u64;

    for (i, path) in files.iter().enumerate() {
        reporter.report(IngestProgressEvent::Processing {
            file: path.display().to_string(),
            n: i as u64 + 1,
            total,
        });

        match index_document(ctx, path).await {
            Ok((pages, doc_index)) => {
                tracing::info!(
                    path = %path.display(),
                    pages,
                    chunks = doc_index.len(),
                    "indexed document"
                );
                report.files_indexed += 1;
                report.pages += pages;
                report.chunks += doc_index.len();
                incoming = index::merge(&incoming, &doc_index)?;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping document");
                reporter.report(IngestProgressEvent::Skipped {
                    file: path.display().to_string(),
                    reason: e.to_string(),
                });
                report.failures.push(IngestFailure {
                    path: path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    // A rebuild where every file failed must not replace a good index with
    // an empty one.
    if incoming.is_empty() && (!rebuild || !report.failures.is_empty()) {
        if rebuild {
            tracing::warn!(
                failed = report.failures.len(),
                "no document was indexed; keeping the existing index"
            );
        }
        report.index_kept = true;
        report.records_total = match ctx.store.load() {
            Ok(existing) => existing.len(),
            Err(DocQaError::IndexNotFound(_)) => 0,
            Err(DocQaError::IndexCorrupt { .. }) if rebuild => 0,
            Err(e) => return Err(e),
        };
        return Ok(report);
    }

    reporter.report(IngestProgressEvent::Saving {
        records: incoming.len() as u64,
    });
    let store = ctx.store.clone();
    let merged = tokio::task::spawn_blocking(move || store.update(&incoming, rebuild))
        .await
        .map_err(|e| DocQaError::Config(format!("index update task failed: {}", e)))??;
    report.records_total = merged.len();

    Ok(report)
}

/// Store an uploaded PDF under `ingest.dir` and ingest it.
pub async fn ingest_upload(ctx: &AppContext, filename: &str, bytes: &[u8]) -> Result<IngestReport> {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| is_pdf(Path::new(n)))
        .ok_or_else(|| DocQaError::DocumentExtraction {
            path: PathBuf::from(filename),
            message: "upload must be a .pdf file".to_string(),
        })?;

    let dir = &ctx.config.ingest.dir;
    std::fs::create_dir_all(dir).map_err(|e| DocQaError::io(dir, e))?;
    let dest = dir.join(&name);
    std::fs::write(&dest, bytes).map_err(|e| DocQaError::io(&dest, e))?;
    tracing::info!(path = %dest.display(), bytes = bytes.len(), "stored upload");

    ingest_files(ctx, &[dest], false, &NoProgress).await
}

/// CLI entry point for `docqa ingest`.
pub async fn run_ingest(
    ctx: &AppContext,
    paths: Vec<PathBuf>,
    rebuild: bool,
    progress: ProgressMode,
) -> anyhow::Result<()> {
    let paths = if paths.is_empty() {
        vec![ctx.config.ingest.dir.clone()]
    } else {
        paths
    };
    let reporter = progress.reporter();
    for p in &paths {
        reporter.report(IngestProgressEvent::Discovering {
            location: p.display().to_string(),
        });
    }

    let (files, mut missing) = discover_pdfs(&paths);
    if files.is_empty() {
        println!("ingest");
        println!(
            "  no PDF files found in {}",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        print_failures(&missing);
        return Ok(());
    }

    let mut report = ingest_files(ctx, &files, rebuild, reporter.as_ref())
        .await
        .map_err(|e| match e {
            DocQaError::IndexCorrupt { .. } => anyhow::anyhow!(
                "{}\nRun `docqa ingest --rebuild` to replace it.",
                e
            ),
            DocQaError::EmbeddingModelMismatch { .. } => anyhow::anyhow!(
                "{}\nRun `docqa ingest --rebuild` to re-embed everything with the configured model.",
                e
            ),
            other => anyhow::Error::new(other),
        })?;
    missing.append(&mut report.failures);
    report.failures = missing;

    println!("ingest{}", if rebuild { " (rebuild)" } else { "" });
    println!("  files indexed: {}", report.files_indexed);
    println!("  pages: {}", report.pages);
    println!("  chunks: {}", report.chunks);
    println!("  records in index: {}", report.records_total);
    println!("  failed: {}", report.failures.len());
    print_failures(&report.failures);
    if rebuild && report.index_kept {
        println!("  existing index kept: no document could be indexed");
    }
    println!("ok");
    Ok(())
}

fn print_failures(failures: &[IngestFailure]) {
    for f in failures {
        println!("    - {}: {}", f.path.display(), f.error);
    }
}
