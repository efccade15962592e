//! Similarity search over an [`Index`].
//!
//! The query is embedded with the same provider that built the index, then
//! every record is scored by cosine similarity. Ties keep insertion order,
//! so repeated queries against an unchanged index return the same chunks.

use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::error::Result;
use crate::index::Index;
use crate::models::{RetrievalResult, ScoredChunk};

/// Return at most `k` chunks from `index`, most similar to `query` first.
///
/// An empty index, `k == 0`, or a blank query yields an empty result
/// without calling the embedding service.
pub async fn retrieve(
    index: &Index,
    query: &str,
    k: usize,
    provider: &dyn EmbeddingProvider,
) -> Result<RetrievalResult> {
    if index.is_empty() || k == 0 || query.trim().is_empty() {
        return Ok(Vec::new());
    }

    if provider.model_name() != index.embedding_model() || provider.dims() != index.dims() {
        tracing::warn!(
            index_model = index.embedding_model(),
            index_dims = index.dims(),
            query_model = provider.model_name(),
            query_dims = provider.dims(),
            "query embedder differs from the one that built the index; scores may be meaningless"
        );
    }

    let query_vec = embed_query(provider, query).await?;
    Ok(rank(index, &query_vec, k))
}

/// Score every record against `query_vec` and keep the best `k`.
pub fn rank(index: &Index, query_vec: &[f32], k: usize) -> RetrievalResult {
    let mut scored: Vec<ScoredChunk> = index
        .records()
        .iter()
        .map(|r| ScoredChunk {
            chunk: r.chunk.clone(),
            score: cosine_similarity(query_vec, &r.embedding),
        })
        .collect();

    // sort_by is stable: equal scores stay in index order.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocQaError;
    use crate::models::{Chunk, VectorRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rec(text: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk: Chunk {
                text: text.to_string(),
                source_id: "doc.pdf".to_string(),
                page_number: Some(1),
                sequence_index: 0,
            },
            embedding,
        }
    }

    fn index() -> Index {
        Index::from_records(
            "axis",
            2,
            vec![
                rec("east", vec![1.0, 0.0]),
                rec("north", vec![0.0, 1.0]),
                rec("north-east", vec![1.0, 1.0]),
                rec("west", vec![-1.0, 0.0]),
            ],
        )
        .unwrap()
    }

    struct AxisProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            texts
                .iter()
                .map(|t| match t.as_str() {
                    "east" => Ok(vec![1.0, 0.0]),
                    "north" => Ok(vec![0.0, 1.0]),
                    other => Err(DocQaError::EmbeddingService(format!("unknown {}", other))),
                })
                .collect()
        }
    }

    fn provider() -> AxisProvider {
        AxisProvider {
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn rank_orders_by_similarity() {
        let result = rank(&index(), &[1.0, 0.0], 4);
        let texts: Vec<&str> = result.iter().map(|s| s.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "north-east", "north", "west"]);
        assert!(result.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn rank_truncates_to_k() {
        assert_eq!(rank(&index(), &[1.0, 0.0], 2).len(), 2);
        assert_eq!(rank(&index(), &[1.0, 0.0], 10).len(), 4);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let idx = Index::from_records(
            "axis",
            2,
            vec![
                rec("first", vec![0.0, 1.0]),
                rec("second", vec![0.0, 2.0]),
                rec("third", vec![0.0, 3.0]),
            ],
        )
        .unwrap();
        for _ in 0..3 {
            let texts: Vec<String> = rank(&idx, &[0.0, 1.0], 3)
                .into_iter()
                .map(|s| s.chunk.text)
                .collect();
            assert_eq!(texts, vec!["first", "second", "third"]);
        }
    }

    #[tokio::test]
    async fn retrieve_embeds_query_once() {
        let p = provider();
        let result = retrieve(&index(), "north", 1, &p).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk.text, "north");
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_inputs_skip_the_embedder() {
        let p = provider();
        let empty = Index::empty("axis", 2);
        assert!(retrieve(&empty, "north", 3, &p).await.unwrap().is_empty());
        assert!(retrieve(&index(), "north", 0, &p).await.unwrap().is_empty());
        assert!(retrieve(&index(), "   ", 3, &p).await.unwrap().is_empty());
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let err = retrieve(&index(), "south", 3, &provider()).await.unwrap_err();
        assert!(matches!(err, DocQaError::EmbeddingService(_)));
    }
}
