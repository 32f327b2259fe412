//! Query pipeline: embed → search → map.
//!
//! [`answer`] runs one question through an [`Embedder`], a
//! [`VectorIndex`], and [`map_hits`]. Each call is independent; nothing is
//! cached between questions.
//!
//! # Result mapping
//!
//! Labels come back from the index in rank order. Each one is looked up in
//! the [`ChunkTable`]; labels with no row (padding markers, or an index that
//! disagrees with its table) are dropped, so the result may be shorter than
//! `k` but never fails on a lookup.

use thiserror::Error;

use crate::embedding::Embedder;
use crate::index::{SearchHits, VectorIndex};
use crate::models::{ChunkTable, RetrievedChunk};

/// Number of chunks shown per question unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 3;

/// Largest `top_k` a caller may configure.
pub const MAX_TOP_K: usize = 1000;

/// Failure scoped to a single question.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to embed question: {0:#}")]
    Embedding(anyhow::Error),
    #[error("query vector has {actual} dimensions but the index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("query vector has a non-finite component at position {0}")]
    NonFiniteQuery(usize),
}

/// Map raw index hits onto chunk text, nearest first.
pub fn map_hits(hits: &SearchHits, chunks: &ChunkTable) -> Vec<RetrievedChunk> {
    let mut results = Vec::with_capacity(hits.len());
    for (distance, label) in hits.iter() {
        match chunks.get(label) {
            Some(chunk) => results.push(RetrievedChunk {
                rank: results.len(),
                label: label as usize,
                distance,
                text: chunk.text.clone(),
            }),
            None => {
                tracing::debug!(label, table_len = chunks.len(), "skipping hit with no chunk");
            }
        }
    }
    results
}

/// Search with an already-embedded query and map the hits.
///
/// # Errors
///
/// Returns [`QueryError::DimensionMismatch`] when the vector does not match
/// the index dimensionality, and [`QueryError::NonFiniteQuery`] when it
/// holds a NaN or infinity.
pub fn search_vector(
    index: &dyn VectorIndex,
    chunks: &ChunkTable,
    query_vec: &[f32],
    top_k: usize,
) -> Result<Vec<RetrievedChunk>, QueryError> {
    if query_vec.len() != index.dims() {
        return Err(QueryError::DimensionMismatch {
            expected: index.dims(),
            actual: query_vec.len(),
        });
    }
    if let Some(pos) = query_vec.iter().position(|v| !v.is_finite()) {
        return Err(QueryError::NonFiniteQuery(pos));
    }
    // Slots past the stored count are padding and would be dropped anyway.
    let hits = index.search(query_vec, top_k.min(index.len()));
    Ok(map_hits(&hits, chunks))
}

/// Answer a free-text question with the `top_k` nearest chunks.
///
/// Blank questions return an empty result without touching the embedder.
pub async fn answer(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    chunks: &ChunkTable,
    question: &str,
    top_k: usize,
) -> Result<Vec<RetrievedChunk>, QueryError> {
    let question = question.trim();
    if question.is_empty() {
        return Ok(Vec::new());
    }

    tracing::debug!(model = embedder.model_name(), "embedding question");
    let query_vec = embedder
        .embed(question)
        .await
        .map_err(QueryError::Embedding)?;

    tracing::debug!(dims = query_vec.len(), top_k, "searching index");
    let results = search_vector(index, chunks, &query_vec, top_k)?;
    tracing::debug!(returned = results.len(), "mapped results");
    Ok(results)
}
