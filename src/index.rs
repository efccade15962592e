//! Persisted vector index: build, load, save, merge.
//!
//! An [`Index`] is the set of embedded chunks plus the identity of the
//! embedding model that produced them. On disk it lives in one directory:
//!
//! ```text
//! <index.dir>/
//!   index.json   manifest + records (embeddings as base64 little-endian f32)
//!   index.lock   advisory lock held by the single writer
//! ```
//!
//! # Consistency
//!
//! - [`save`] writes the full serialized form to a temp file in the same
//!   directory, syncs it, and renames it over `index.json`. Readers see the
//!   old index or the new one, never a partial write.
//! - [`IndexStore::update`] is the only read-modify-write path. It holds an
//!   exclusive `fs2` lock on `index.lock` across load → merge → save, so two
//!   ingestions against the same directory cannot lose each other's records.
//! - The manifest carries a SHA-256 of the record payload; [`load`] reports
//!   any mismatch as [`DocQaError::IndexCorrupt`].

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::embedding::{blob_to_vec, embed_batched, vec_to_blob, EmbeddingProvider};
use crate::error::{DocQaError, Result};
use crate::models::{Chunk, VectorRecord};

pub const INDEX_FILE: &str = "index.json";
pub const LOCK_FILE: &str = "index.lock";
pub const FORMAT_VERSION: u32 = 1;

const LOCK_POLL: Duration = Duration::from_millis(50);

/// In-memory vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    embedding_model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    records: Vec<VectorRecord>,
}

impl Index {
    /// An index with no records, bound to `embedding_model`.
    pub fn empty(embedding_model: impl Into<String>, dims: usize) -> Self {
        let now = Utc::now();
        Self {
            embedding_model: embedding_model.into(),
            dims,
            created_at: now,
            updated_at: now,
            records: Vec::new(),
        }
    }

    /// Wrap already-embedded records. Every embedding must have `dims` values.
    pub fn from_records(
        embedding_model: impl Into<String>,
        dims: usize,
        records: Vec<VectorRecord>,
    ) -> Result<Self> {
        let embedding_model = embedding_model.into();
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dims) {
            return Err(DocQaError::EmbeddingModelMismatch {
                expected: format!("{} ({} dims)", embedding_model, dims),
                found: format!("a {}-dim vector", bad.embedding.len()),
            });
        }
        let mut index = Self::empty(embedding_model, dims);
        index.records = records;
        Ok(index)
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct sources with their chunk counts, in first-seen order.
    pub fn sources(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = Vec::new();
        for r in &self.records {
            match out.iter_mut().find(|(s, _)| *s == r.chunk.source_id) {
                Some((_, n)) => *n += 1,
                None => out.push((r.chunk.source_id.clone(), 1)),
            }
        }
        out
    }

    fn same_space(&self, other: &Index) -> bool {
        self.embedding_model == other.embedding_model && self.dims == other.dims
    }
}

/// Embed every chunk and build a new index. All-or-nothing: any embedding
/// failure aborts the build and no index is returned.
pub async fn build(
    chunks: Vec<Chunk>,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<Index> {
    if chunks.is_empty() {
        return Ok(Index::empty(provider.model_name(), provider.dims()));
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embed_batched(provider, &texts, batch_size).await?;

    let records = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| VectorRecord { chunk, embedding })
        .collect();

    Index::from_records(provider.model_name(), provider.dims(), records)
}

/// Union of both record sets: `base` records first, then `incoming`.
///
/// Records are not de-duplicated; re-ingesting a file adds its chunks again.
/// Fails if the two indexes were embedded with different models, unless one
/// side is empty.
pub fn merge(base: &Index, incoming: &Index) -> Result<Index> {
    if incoming.is_empty() {
        return Ok(base.clone());
    }
    if base.is_empty() {
        let mut merged = incoming.clone();
        merged.created_at = base.created_at.min(incoming.created_at);
        merged.updated_at = Utc::now();
        return Ok(merged);
    }
    if !base.same_space(incoming) {
        return Err(DocQaError::EmbeddingModelMismatch {
            expected: format!("{} ({} dims)", base.embedding_model, base.dims),
            found: format!("{} ({} dims)", incoming.embedding_model, incoming.dims),
        });
    }

    let mut records = Vec::with_capacity(base.len() + incoming.len());
    records.extend(base.records.iter().cloned());
    records.extend(incoming.records.iter().cloned());

    Ok(Index {
        embedding_model: base.embedding_model.clone(),
        dims: base.dims,
        created_at: base.created_at,
        updated_at: Utc::now(),
        records,
    })
}

// ============ On-disk format ============

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    manifest: Manifest,
    records: Vec<StoredRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    embedding_model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    record_count: usize,
    /// Hex SHA-256 of the serialized `records` array.
    checksum: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    chunk: Chunk,
    embedding: String,
}

fn records_checksum(records: &[StoredRecord]) -> Result<String> {
    let payload = serde_json::to_vec(records)
        .map_err(|e| DocQaError::Config(format!("failed to serialize index records: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Path of the index file inside `dir`.
pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

/// Load the index saved in `dir`.
///
/// Returns [`DocQaError::IndexNotFound`] when nothing has been saved there
/// and [`DocQaError::IndexCorrupt`] when the file cannot be trusted.
pub fn load(dir: &Path) -> Result<Index> {
    let path = index_path(dir);
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DocQaError::IndexNotFound(dir.to_path_buf()));
        }
        Err(e) => return Err(DocQaError::io(&path, e)),
    };

    let corrupt = |message: String| DocQaError::IndexCorrupt {
        path: path.clone(),
        message,
    };

    let file: IndexFile =
        serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("unparseable: {}", e)))?;
    let manifest = file.manifest;

    if manifest.format_version > FORMAT_VERSION {
        return Err(corrupt(format!(
            "format version {} is newer than supported version {}",
            manifest.format_version, FORMAT_VERSION
        )));
    }
    if manifest.record_count != file.records.len() {
        return Err(corrupt(format!(
            "manifest lists {} records, file has {}",
            manifest.record_count,
            file.records.len()
        )));
    }
    if records_checksum(&file.records)? != manifest.checksum {
        return Err(corrupt("checksum mismatch".to_string()));
    }

    let mut records = Vec::with_capacity(file.records.len());
    for (i, stored) in file.records.into_iter().enumerate() {
        let blob = BASE64
            .decode(stored.embedding.as_bytes())
            .map_err(|e| corrupt(format!("record {}: bad embedding encoding: {}", i, e)))?;
        if blob.len() != manifest.dims * 4 {
            return Err(corrupt(format!(
                "record {}: embedding has {} bytes, expected {}",
                i,
                blob.len(),
                manifest.dims * 4
            )));
        }
        records.push(VectorRecord {
            chunk: stored.chunk,
            embedding: blob_to_vec(&blob),
        });
    }

    tracing::debug!(path = %path.display(), records = records.len(), "loaded index");

    Ok(Index {
        embedding_model: manifest.embedding_model,
        dims: manifest.dims,
        created_at: manifest.created_at,
        updated_at: manifest.updated_at,
        records,
    })
}

/// Atomically write `index` to `dir`, replacing any existing index.
pub fn save(index: &Index, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| DocQaError::io(dir, e))?;

    let records: Vec<StoredRecord> = index
        .records
        .iter()
        .map(|r| StoredRecord {
            chunk: r.chunk.clone(),
            embedding: BASE64.encode(vec_to_blob(&r.embedding)),
        })
        .collect();
    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        embedding_model: index.embedding_model.clone(),
        dims: index.dims,
        created_at: index.created_at,
        updated_at: index.updated_at,
        record_count: records.len(),
        checksum: records_checksum(&records)?,
    };
    let bytes = serde_json::to_vec(&IndexFile { manifest, records })
        .map_err(|e| DocQaError::Config(format!("failed to serialize index: {}", e)))?;

    let target = index_path(dir);
    let tmp = dir.join(format!(".{}.{}.tmp", INDEX_FILE, Uuid::new_v4()));

    let written = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &target)
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(DocQaError::io(&target, e));
    }

    tracing::debug!(path = %target.display(), records = index.len(), "saved index");
    Ok(())
}

// ============ Store ============

/// Handle on one index directory, with the writer lock.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout,
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(&config.dir, Duration::from_secs(config.lock_timeout_secs))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self) -> Result<Index> {
        load(&self.dir)
    }

    /// Save without taking the writer lock. Prefer [`IndexStore::update`].
    pub fn save(&self, index: &Index) -> Result<()> {
        save(index, &self.dir)
    }

    /// Merge `incoming` into the saved index under the writer lock and
    /// return the merged result.
    ///
    /// A missing index starts from empty. A corrupt one is an error unless
    /// `rebuild` is set, in which case it is discarded and replaced.
    pub fn update(&self, incoming: &Index, rebuild: bool) -> Result<Index> {
        let _lock = self.acquire_lock()?;

        let current = if rebuild {
            None
        } else {
            match self.load() {
                Ok(index) => Some(index),
                Err(DocQaError::IndexNotFound(_)) => None,
                Err(e) => return Err(e),
            }
        };

        let merged = match current {
            Some(base) => merge(&base, incoming)?,
            None => incoming.clone(),
        };
        self.save(&merged)?;

        tracing::info!(
            dir = %self.dir.display(),
            added = incoming.len(),
            total = merged.len(),
            "index updated"
        );
        Ok(merged)
    }

    /// Block until the exclusive writer lock is held or the timeout elapses.
    /// The lock is released when the returned file is dropped.
    fn acquire_lock(&self) -> Result<std::fs::File> {
        std::fs::create_dir_all(&self.dir).map_err(|e| DocQaError::io(&self.dir, e))?;
        let lock_path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| DocQaError::io(&lock_path, e))?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(DocQaError::ConcurrentWriteConflict(self.dir.clone()));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(DocQaError::io(&lock_path, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn record(source: &str, page: u32, seq: u32, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk: Chunk {
                text: format!("{} page {} chunk {}", source, page, seq),
                source_id: source.to_string(),
                page_number: Some(page),
                sequence_index: seq,
            },
            embedding,
        }
    }

    fn sample_index(source: &str, n: u32) -> Index {
        let records = (0..n)
            .map(|i| record(source, i + 1, i, vec![i as f32, 1.0, -0.5]))
            .collect();
        Index::from_records("test-model", 3, records).unwrap()
    }

    struct CountingProvider {
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_on_call {
                return Err(DocQaError::EmbeddingService("boom".to_string()));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn chunks(n: u32) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                text: format!("chunk {}", i),
                source_id: "a.pdf".to_string(),
                page_number: Some(1),
                sequence_index: i,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_build_embeds_every_chunk() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail_on_call: None,
        };
        let index = build(chunks(5), &provider, 2).await.unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!(index.embedding_model(), "counting");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.records()[4].chunk.sequence_index, 4);
    }

    #[tokio::test]
    async fn test_build_is_all_or_nothing() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail_on_call: Some(1),
        };
        let err = build(chunks(5), &provider, 2).await.unwrap_err();
        assert!(matches!(err, DocQaError::EmbeddingService(_)));
    }

    #[tokio::test]
    async fn test_build_empty_skips_provider() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
            fail_on_call: Some(0),
        };
        let index = build(Vec::new(), &provider, 2).await.unwrap();
        assert!(index.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_save_load_roundtrip_is_lossless() {
        let tmp = TempDir::new().unwrap();
        let mut index = sample_index("report.pdf", 4);
        index.records[0].embedding = vec![f32::MIN_POSITIVE, -0.0, 1e-30];
        index.records[1].chunk.page_number = None;
        index.records[2].chunk.text = "Umsatz: fünf Millionen \"€\"\n\nnext".to_string();

        save(&index, tmp.path()).unwrap();
        let loaded = load(tmp.path()).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        save(&sample_index("a.pdf", 2), tmp.path()).unwrap();
        save(&sample_index("b.pdf", 3), tmp.path()).unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![INDEX_FILE.to_string()]);
        assert_eq!(load(tmp.path()).unwrap().len(), 3);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = load(&tmp.path().join("nothing-here")).unwrap_err();
        assert!(matches!(err, DocQaError::IndexNotFound(_)));
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), b"{ not json").unwrap();
        let err = load(tmp.path()).unwrap_err();
        assert!(matches!(err, DocQaError::IndexCorrupt { .. }));
    }

    #[test]
    fn test_load_detects_tampering() {
        let tmp = TempDir::new().unwrap();
        save(&sample_index("report.pdf", 2), tmp.path()).unwrap();

        let path = tmp.path().join(INDEX_FILE);
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("report.pdf page 1", "report.pdf page 9")).unwrap();

        match load(tmp.path()).unwrap_err() {
            DocQaError::IndexCorrupt { message, .. } => assert!(message.contains("checksum")),
            other => panic!("expected corrupt index, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_is_union_without_dedup() {
        let base = sample_index("a.pdf", 2);
        let again = sample_index("a.pdf", 2);
        let merged = merge(&base, &again).unwrap();
        assert_eq!(merged.len(), 4);
        assert_eq!(merged.records()[..2], base.records()[..]);
        assert_eq!(merged.records()[2..], again.records()[..]);
        assert_eq!(merged.created_at(), base.created_at());
    }

    #[test]
    fn test_merge_rejects_other_embedding_model() {
        let base = sample_index("a.pdf", 2);
        let other = Index::from_records("other-model", 3, vec![record("b.pdf", 1, 0, vec![0.0; 3])]).unwrap();
        let err = merge(&base, &other).unwrap_err();
        assert!(matches!(err, DocQaError::EmbeddingModelMismatch { .. }));
    }

    #[test]
    fn test_merge_into_empty_adopts_incoming_model() {
        let empty = Index::empty("disabled", 0);
        let incoming = sample_index("a.pdf", 1);
        let merged = merge(&empty, &incoming).unwrap();
        assert_eq!(merged.embedding_model(), "test-model");
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_roundtrip_then_merge_preserves_records() {
        let tmp = TempDir::new().unwrap();
        let index = sample_index("a.pdf", 3);
        save(&index, tmp.path()).unwrap();
        let reloaded = load(tmp.path()).unwrap();
        let merged = merge(&index, &reloaded).unwrap();
        for r in index.records() {
            assert!(merged.records().contains(r));
        }
    }

    #[test]
    fn test_update_merges_under_lock() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path(), Duration::from_secs(5));
        store.update(&sample_index("a.pdf", 2), false).unwrap();
        let merged = store.update(&sample_index("b.pdf", 3), false).unwrap();
        assert_eq!(merged.len(), 5);
        assert_eq!(store.load().unwrap().sources(), vec![("a.pdf".to_string(), 2), ("b.pdf".to_string(), 3)]);
    }

    #[test]
    fn test_concurrent_updates_lose_nothing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = IndexStore::new(dir.clone(), Duration::from_secs(30));
                std::thread::spawn(move || {
                    store
                        .update(&sample_index(&format!("doc{}.pdf", i), 5), false)
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let index = load(&dir).unwrap();
        assert_eq!(index.len(), 40);
        assert_eq!(index.sources().len(), 8);
    }

    #[test]
    fn test_update_lock_timeout_reports_conflict() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path(), Duration::from_millis(120));
        let held = store.acquire_lock().unwrap();

        let err = store.update(&sample_index("a.pdf", 1), false).unwrap_err();
        assert!(matches!(err, DocQaError::ConcurrentWriteConflict(_)));
        drop(held);
        assert!(store.update(&sample_index("a.pdf", 1), false).is_ok());
    }

    #[test]
    fn test_update_refuses_corrupt_unless_rebuilding() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), b"garbage").unwrap();
        let store = IndexStore::new(tmp.path(), Duration::from_secs(5));

        let err = store.update(&sample_index("a.pdf", 1), false).unwrap_err();
        assert!(matches!(err, DocQaError::IndexCorrupt { .. }));

        let rebuilt = store.update(&sample_index("a.pdf", 1), true).unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(store.load().unwrap().len(), 1);
    }
}
