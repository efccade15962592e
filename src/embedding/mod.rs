//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models in-process via fastembed (feature
//!   `local-embeddings`); no network calls after the model download.
//!
//! Also provides vector utilities used by the index:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding for persistence
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the provider named in the config:
//!
//! ```rust,no_run
//! # use docqa::config::EmbeddingConfig;
//! # use docqa::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{DocQaError, Result};
use crate::http::{client_with_timeout, post_json_with_retry};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Trait for embedding providers.
///
/// Every vector in one index must come from the same `model_name()`; the
/// index records it and refuses to merge vectors from another model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| DocQaError::EmbeddingService("empty embedding response".to_string()))
}

/// Embed `texts` in batches of `batch_size`, checking count and dimension of
/// every returned vector.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        let vectors = provider.embed(batch).await?;
        if vectors.len() != batch.len() {
            return Err(DocQaError::EmbeddingService(format!(
                "{} returned {} vectors for {} inputs",
                provider.model_name(),
                vectors.len(),
                batch.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dims()) {
            return Err(DocQaError::EmbeddingService(format!(
                "{} returned a {}-dim vector, expected {}",
                provider.model_name(),
                bad.len(),
                provider.dims()
            )));
        }
        tracing::debug!(model = provider.model_name(), batch = batch.len(), "embedded batch");
        out.extend(vectors);
    }

    Ok(out)
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(DocQaError::EmbeddingService(
            "embedding provider is disabled; set [embedding].provider in the config".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// Fails if `model` or `dims` is not set, or `OPENAI_API_KEY` is missing.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            DocQaError::Config("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            DocQaError::Config("embedding.dims required for OpenAI provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            DocQaError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let client = client_with_timeout(config.timeout_secs).map_err(DocQaError::Config)?;

        Ok(Self {
            client,
            api_key,
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/embeddings", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .map_err(DocQaError::EmbeddingService)?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            DocQaError::EmbeddingService("invalid OpenAI response: missing data array".to_string())
        })?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                DocQaError::EmbeddingService("invalid OpenAI response: missing embedding".to_string())
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            DocQaError::Config("embedding.model required for Ollama provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            DocQaError::Config("embedding.dims required for Ollama provider".to_string())
        })?;
        let client = client_with_timeout(config.timeout_secs).map_err(DocQaError::Config)?;

        Ok(Self {
            client,
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(DocQaError::EmbeddingService)?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            DocQaError::EmbeddingService(
                "invalid Ollama response: missing embeddings array".to_string(),
            )
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding.as_array().map(|a| to_f32_vec(a)).ok_or_else(|| {
                DocQaError::EmbeddingService(
                    "invalid Ollama response: embedding is not an array".to_string(),
                )
            })
        })
        .collect()
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// Models are downloaded on first use from Hugging Face and cached.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (fastembed_model, default_dims) = config_to_fastembed_model(&model_name)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| {
            DocQaError::EmbeddingService(format!(
                "failed to initialize local embedding model {}: {}",
                model_name, e
            ))
        })?;

        Ok(Self {
            dims: config.dims.unwrap_or(default_dims),
            model_name,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    match name {
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((fastembed::EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384)),
        other => Err(DocQaError::Config(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|_| {
                DocQaError::EmbeddingService("local embedding model lock poisoned".to_string())
            })?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| DocQaError::EmbeddingService(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| DocQaError::EmbeddingService(format!("local embedding task failed: {}", e)))?
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(DocQaError::Config(
            "Local embedding provider requires building with --features local-embeddings"
                .to_string(),
        )),
        other => Err(DocQaError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// ```rust
/// use docqa::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes written by [`vec_to_blob`]. A trailing partial value is ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
