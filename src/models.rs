//! Core data models used throughout docqa.
//!
//! These types represent the pages, chunks, vectors, retrieval results, and
//! answers that flow through the ingestion and answering pipeline.

use serde::{Deserialize, Serialize};

/// One page of extracted text, the unit handed to the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// File name of the source document (e.g. `"report.pdf"`).
    pub source_id: String,
    /// 1-based page number, if the extractor knows it.
    pub page_number: Option<u32>,
    pub text: String,
}

impl PageText {
    pub fn new(source_id: impl Into<String>, page_number: Option<u32>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            page_number,
            text: text.into(),
        }
    }
}

/// A chunk of a page's text with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    pub page_number: Option<u32>,
    /// Position of this chunk within its source, in document order.
    pub sequence_index: u32,
}

/// An embedded chunk, as stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A retrieved chunk and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Retrieved chunks, most relevant first.
pub type RetrievalResult = Vec<ScoredChunk>;

/// A `(source, page)` pair cited by a grounded answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Citation {
    pub source_id: String,
    pub page_number: Option<u32>,
}

/// The answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answer_text: String,
    /// `false` exactly when the model replied with the refusal sentence.
    pub grounded: bool,
    /// Empty whenever `grounded` is `false`.
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
