//! Ingestion progress reporting.
//!
//! Reports what `docqa ingest` is doing so users see which file is being
//! read, how many are left, and which ones were skipped. Progress goes to
//! **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event for ingestion.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Scanning for PDFs. Total unknown.
    Discovering { location: String },
    /// Reading, chunking, and embedding file `n` of `total`.
    Processing { file: String, n: u64, total: u64 },
    /// A file could not be indexed and was left out.
    Skipped { file: String, reason: String },
    /// Writing the merged index.
    Saving { records: u64 },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  3 / 12  report.pdf".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Discovering { location } => {
                format!("ingest  scanning {}...\n", location)
            }
            IngestProgressEvent::Processing { file, n, total } => {
                format!("ingest  {} / {}  {}\n", format_number(*n), format_number(*total), file)
            }
            IngestProgressEvent::Skipped { file, reason } => {
                format!("ingest  skipped {}: {}\n", file, reason)
            }
            IngestProgressEvent::Saving { records } => {
                format!("ingest  saving index ({} records)\n", format_number(*records))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Discovering { location } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "location": location
            }),
            IngestProgressEvent::Processing { file, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "file": file,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Skipped { file, reason } => serde_json::json!({
                "event": "skipped",
                "file": file,
                "reason": reason
            }),
            IngestProgressEvent::Saving { records } => serde_json::json!({
                "event": "progress",
                "phase": "saving",
                "records": records
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
