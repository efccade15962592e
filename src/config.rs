use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// How long a writer waits for the index lock before giving up.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/indexes")
}
fn default_lock_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Service base URL. Defaults to the provider's public endpoint
    /// (`https://api.openai.com` or `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Service base URL, as for `[embedding].url`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: default_llm_model(),
            url: None,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Most recent turns kept as conversation memory. 0 disables memory.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Conversations held at once; the least recently used is dropped first.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Conversations untouched for this long are forgotten.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_sessions: default_max_sessions(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}
fn default_max_sessions() -> usize {
    256
}
fn default_session_idle_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Directory scanned for `*.pdf` when `docqa ingest` gets no paths.
    #[serde(default = "default_ingest_dir")]
    pub dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dir: default_ingest_dir(),
        }
    }
}

fn default_ingest_dir() -> PathBuf {
    PathBuf::from("./data/raw_pdfs")
}

impl Config {
    /// All defaults; used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            index: IndexConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            session: SessionConfig::default(),
            server: ServerConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Validate language model
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    // Validate server
    if config.server.max_sessions == 0 {
        anyhow::bail!("server.max_sessions must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.session.max_turns, 10);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.server.max_sessions, 256);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn openai_embedding_requires_model_and_dims() {
        let err = parse("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let config = parse(
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        )
        .unwrap();
        assert_eq!(config.embedding.dims, Some(1536));
    }

    #[test]
    fn unknown_llm_provider_rejected() {
        let err = parse("[llm]\nprovider = \"mystery\"\n").unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn server_needs_room_for_one_session() {
        let err = parse("[server]\nmax_sessions = 0\n").unwrap_err();
        assert!(err.to_string().contains("server.max_sessions"));
    }

    #[test]
    fn missing_file_falls_back_to_minimal() {
        let config = load_or_default(Path::new("/definitely/not/here/docqa.toml")).unwrap();
        assert_eq!(config.index.dir, PathBuf::from("./data/indexes"));
    }
}
