//! Grounded answer construction.
//!
//! The engine builds a prompt that restricts the model to the retrieved
//! chunks, calls the model at temperature 0, and classifies the reply:
//! the exact refusal sentence means "not found in the documents" and carries
//! no citations; anything else is treated as grounded and cites every
//! `(source, page)` that was put in front of the model.
//!
//! Grounding is a soft guarantee. Nothing checks that a non-refusal answer
//! actually comes from the context; it rests on the instruction and on the
//! model replying with the refusal sentence verbatim when it cannot answer.
//! A paraphrased refusal is reported as grounded.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{DocQaError, Result};
use crate::llm::LanguageModel;
use crate::models::{AnswerResult, Citation, ConversationTurn, ScoredChunk};

/// The exact reply the model must give when the context has no answer.
pub const REFUSAL: &str = "I don't know based on the documents.";

const INSTRUCTION: &str = "You are a helpful assistant answering questions ONLY using information \
from the provided document context.\n\
If the answer is not in the context, reply exactly with:\n\
I don't know based on the documents.\n\
Do not use outside knowledge.";

/// Render a citation as `"source (page N)"`, or `"source (page ?)"` when the
/// page is unknown.
pub fn format_citation(citation: &Citation) -> String {
    match citation.page_number {
        Some(page) => format!("{} (page {})", citation.source_id, page),
        None => format!("{} (page ?)", citation.source_id),
    }
}

/// Assemble the full prompt for one question.
pub fn build_prompt(question: &str, retrieval: &[ScoredChunk], history: &[ConversationTurn]) -> String {
    let mut prompt = String::with_capacity(
        INSTRUCTION.len() + question.len() + retrieval.iter().map(|s| s.chunk.text.len() + 64).sum::<usize>(),
    );
    prompt.push_str(INSTRUCTION);

    prompt.push_str("\n\nContext:\n");
    if retrieval.is_empty() {
        prompt.push_str("(no relevant passages found)\n");
    }
    for (i, scored) in retrieval.iter().enumerate() {
        let label = format_citation(&Citation {
            source_id: scored.chunk.source_id.clone(),
            page_number: scored.chunk.page_number,
        });
        prompt.push_str(&format!("[{}] {}\n{}\n\n", i + 1, label, scored.chunk.text.trim_end()));
    }

    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for turn in history {
            prompt.push_str(&format!("{}: {}\n", turn.role.label(), turn.content));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("Question: {}\n\n", question));
    prompt.push_str("Answer (use a neutral tone, and cite the documents when possible):");
    prompt
}

/// Classify a raw model reply against the retrieval that produced it.
pub fn classify(answer_text: String, retrieval: &[ScoredChunk]) -> AnswerResult {
    if answer_text.trim() == REFUSAL {
        return AnswerResult {
            answer_text,
            grounded: false,
            citations: Vec::new(),
        };
    }

    let mut citations: Vec<Citation> = Vec::new();
    for scored in retrieval {
        let citation = Citation {
            source_id: scored.chunk.source_id.clone(),
            page_number: scored.chunk.page_number,
        };
        if !citations.contains(&citation) {
            citations.push(citation);
        }
    }

    AnswerResult {
        answer_text,
        grounded: true,
        citations,
    }
}

/// Calls the language model with grounded prompts.
#[derive(Clone)]
pub struct AnswerEngine {
    llm: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl AnswerEngine {
    /// `timeout` bounds the whole model call, retries included.
    pub fn new(llm: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub async fn answer(
        &self,
        question: &str,
        retrieval: &[ScoredChunk],
        history: &[ConversationTurn],
    ) -> Result<AnswerResult> {
        let prompt = build_prompt(question, retrieval, history);
        tracing::debug!(
            model = self.llm.model_name(),
            chunks = retrieval.len(),
            history = history.len(),
            prompt_chars = prompt.len(),
            "calling language model"
        );

        let reply = tokio::time::timeout(self.timeout, self.llm.complete(&prompt, 0.0))
            .await
            .map_err(|_| {
                DocQaError::LanguageModel(format!(
                    "{} timed out after {}s",
                    self.llm.model_name(),
                    self.timeout.as_secs()
                ))
            })??;

        Ok(classify(reply, retrieval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn scored(source: &str, page: Option<u32>, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                text: text.to_string(),
                source_id: source.to_string(),
                page_number: page,
                sequence_index: 0,
            },
            score: 0.9,
        }
    }

    struct Recording {
        reply: String,
        prompts: Mutex<Vec<(String, f32)>>,
    }

    #[async_trait]
    impl LanguageModel for Recording {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
            self.prompts.lock().unwrap().push((prompt.to_string(), temperature));
            Ok(self.reply.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl LanguageModel for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[test]
    fn formats_citations() {
        let known = Citation {
            source_id: "report.pdf".to_string(),
            page_number: Some(2),
        };
        let unknown = Citation {
            source_id: "scan.pdf".to_string(),
            page_number: None,
        };
        assert_eq!(format_citation(&known), "report.pdf (page 2)");
        assert_eq!(format_citation(&unknown), "scan.pdf (page ?)");
    }

    #[test]
    fn prompt_orders_context_history_question() {
        let retrieval = vec![
            scored("report.pdf", Some(2), "Revenue was $5M."),
            scored("memo.pdf", None, "Costs rose."),
        ];
        let history = vec![
            ConversationTurn::user("What was revenue?"),
            ConversationTurn::assistant("Revenue was $5M."),
        ];
        let prompt = build_prompt("And costs?", &retrieval, &history);

        let first = prompt.find("[1] report.pdf (page 2)").unwrap();
        let second = prompt.find("[2] memo.pdf (page ?)").unwrap();
        let user = prompt.find("User: What was revenue?").unwrap();
        let assistant = prompt.find("Assistant: Revenue was $5M.").unwrap();
        let question = prompt.find("Question: And costs?").unwrap();

        assert!(prompt.starts_with(INSTRUCTION));
        assert!(prompt.contains(REFUSAL));
        assert!(first < second && second < user && user < assistant && assistant < question);
        assert!(prompt.trim_end().ends_with(':'));
    }

    #[test]
    fn prompt_without_history_has_no_conversation_block() {
        let prompt = build_prompt("q", &[scored("a.pdf", Some(1), "text")], &[]);
        assert!(!prompt.contains("Conversation so far"));
    }

    #[test]
    fn refusal_is_ungrounded_without_citations() {
        let retrieval = vec![scored("a.pdf", Some(1), "x")];
        let result = classify(format!("  {}\n", REFUSAL), &retrieval);
        assert!(!result.grounded);
        assert!(result.citations.is_empty());
    }

    #[test]
    fn citations_deduplicate_in_first_seen_order() {
        let retrieval = vec![
            scored("b.pdf", Some(3), "x"),
            scored("a.pdf", Some(1), "y"),
            scored("b.pdf", Some(3), "z"),
            scored("a.pdf", Some(2), "w"),
        ];
        let result = classify("An answer.".to_string(), &retrieval);
        assert!(result.grounded);
        let rendered: Vec<String> = result.citations.iter().map(format_citation).collect();
        assert_eq!(rendered, vec!["b.pdf (page 3)", "a.pdf (page 1)", "a.pdf (page 2)"]);
    }

    #[tokio::test]
    async fn engine_calls_model_at_temperature_zero() {
        let model = Arc::new(Recording {
            reply: "Revenue was $5M.".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let engine = AnswerEngine::new(model.clone(), Duration::from_secs(5));
        let retrieval = vec![scored("report.pdf", Some(2), "Revenue was $5M.")];

        let result = engine.answer("What was revenue?", &retrieval, &[]).await.unwrap();
        assert!(result.grounded);
        assert_eq!(result.citations.len(), 1);

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].1, 0.0);
        assert!(prompts[0].0.contains("What was revenue?"));
    }

    #[tokio::test]
    async fn engine_times_out_as_language_model_error() {
        let engine = AnswerEngine::new(Arc::new(Slow), Duration::from_millis(50));
        let err = engine.answer("q", &[], &[]).await.unwrap_err();
        assert!(matches!(err, DocQaError::LanguageModel(_)));
        assert!(err.to_string().contains("timed out"));
    }
}
