//! # docqa
//!
//! Question answering over a private PDF collection.
//!
//! PDFs are extracted page by page, split into overlapping chunks, embedded,
//! and stored in a local vector index. A question is embedded the same way,
//! the closest chunks are retrieved, and a language model is asked to answer
//! from those chunks alone. Answers cite the document and page they came
//! from, or say plainly that the documents do not contain the answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐
//! │   PDFs   │──▶│ Extract+Chunk│──▶│ Embed+Index │
//! └──────────┘   └──────────────┘   └──────┬──────┘
//!                                          │
//!                  question ──▶ Retrieve ◀─┘
//!                                  │
//!                                  ▼
//!                        Answer (LLM, temp 0) ──▶ Session
//!                                  │
//!                      ┌───────────┴───────────┐
//!                      ▼                       ▼
//!                 ┌──────────┐           ┌──────────┐
//!                 │   CLI    │           │   HTTP   │
//!                 │ (docqa)  │           │ chat UI  │
//!                 └──────────┘           └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | PDF text extraction per page |
//! | [`chunk`] | Recursive overlapping text splitter |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Language model provider abstraction |
//! | [`index`] | Persisted vector index |
//! | [`retrieve`] | Top-k similarity search |
//! | [`answer`] | Grounded prompt and answer classification |
//! | [`session`] | Bounded conversation memory |
//! | [`context`] | Providers and the ask pipeline |
//! | [`ingest`] | Ingestion pipeline |
//! | [`server`] | Browser chat server |

pub mod answer;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod progress;
pub mod retrieve;
pub mod server;
pub mod session;
pub mod stats;
