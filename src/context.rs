//! Process-wide application context.
//!
//! Built once from [`Config`] by the CLI or server and passed by reference.
//! Providers sit behind `Arc<dyn Trait>` so tests can substitute fakes with
//! [`AppContext::with_providers`].

use std::sync::Arc;
use std::time::Duration;

use crate::answer::AnswerEngine;
use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::Result;
use crate::http::total_backoff;
use crate::index::{Index, IndexStore};
use crate::llm::{create_model, LanguageModel};
use crate::models::AnswerResult;
use crate::retrieve::retrieve;
use crate::session::Session;

/// Outer bound on one answer: every allowed attempt may use the full
/// per-request timeout, plus the backoff sleeps between them.
fn answer_budget(config: &Config) -> Duration {
    let attempts = config.llm.max_retries.saturating_add(1);
    let requests = Duration::from_secs(config.llm.timeout_secs).saturating_mul(attempts);
    requests
        .saturating_add(total_backoff(config.llm.max_retries))
        .max(Duration::from_secs(1))
}

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub engine: AnswerEngine,
    pub store: IndexStore,
}

impl AppContext {
    /// Create providers named by the configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let llm = create_model(&config.llm)?;
        Ok(Self::with_providers(config, embedder, llm))
    }

    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let store = IndexStore::from_config(&config.index);
        let engine = AnswerEngine::new(llm, answer_budget(&config));
        Self {
            config: Arc::new(config),
            embedder,
            engine,
            store,
        }
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::from_config(&self.config.chunking)
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.config.session.max_turns)
    }

    pub fn load_index(&self) -> Result<Index> {
        self.store.load()
    }

    /// Answer one question against `index`, using and extending `session`.
    ///
    /// Turns are appended only after the model call succeeds; on error the
    /// session is left exactly as it was.
    pub async fn ask(
        &self,
        index: &Index,
        session: &mut Session,
        question: &str,
        k: usize,
    ) -> Result<AnswerResult> {
        let retrieval = retrieve(index, question, k, self.embedder.as_ref()).await?;
        tracing::debug!(question, retrieved = retrieval.len(), "retrieved context");

        let result = self
            .engine
            .answer(question, &retrieval, session.history())
            .await?;

        session.append(crate::models::ConversationTurn::user(question));
        session.append(crate::models::ConversationTurn::assistant(
            result.answer_text.clone(),
        ));
        Ok(result)
    }
}
