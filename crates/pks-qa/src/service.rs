//! The question-answering service object.
//!
//! [`QaService`] owns the loaded index and the embedder for the life of the
//! process. The CLI prompt and the HTTP server both hold one and call
//! [`QaService::ask`]; nothing is kept in globals.

use anyhow::{bail, Context, Result};
use std::sync::Arc;

use pks_qa_core::embedding::Embedder;
use pks_qa_core::index::VectorIndex;
use pks_qa_core::models::RetrievedChunk;
use pks_qa_core::search::{answer, QueryError};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::loader::{IndexLoader, LoadedIndex};

pub struct QaService {
    index: Arc<LoadedIndex>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl QaService {
    /// Assemble a service from already-loaded parts.
    ///
    /// Fails when the embedder and the index disagree on dimensionality,
    /// since every question would fail the same way.
    pub fn new(index: Arc<LoadedIndex>, embedder: Arc<dyn Embedder>, top_k: usize) -> Result<Self> {
        let index_dims = index.artifact.index.dims();
        if embedder.dims() != index_dims {
            bail!(
                "Embedding model '{}' produces {} dimensions but index '{}' has {}",
                embedder.model_name(),
                embedder.dims(),
                index.file_name,
                index_dims
            );
        }
        Ok(Self {
            index,
            embedder,
            top_k,
        })
    }

    pub fn index(&self) -> &LoadedIndex {
        &self.index
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer one question with up to `top_k` chunks, nearest first.
    pub async fn ask(&self, question: &str) -> Result<Vec<RetrievedChunk>, QueryError> {
        let artifact = &self.index.artifact;
        answer(
            self.embedder.as_ref(),
            &artifact.index,
            &artifact.chunks,
            question,
            self.top_k,
        )
        .await
    }
}

/// Load everything a session needs: index, then embedding model.
///
/// Any failure here is fatal; the caller has nothing to show without the
/// index.
pub async fn start(config: &Config) -> Result<QaService> {
    let loader = IndexLoader::from_config(&config.source)?;
    let embedder = create_embedder(&config.embedding)?;
    start_with(&loader, embedder, config.retrieval.top_k).await
}

/// Like [`start`], but with a caller-supplied loader and embedder.
pub async fn start_with(
    loader: &IndexLoader,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
) -> Result<QaService> {
    println!("Loading index...");
    let index = loader.get().await.context("Failed to load index")?;
    println!("Loaded index from: {}", index.file_name);

    embedder
        .warm_up()
        .await
        .with_context(|| format!("Failed to load embedding model '{}'", embedder.model_name()))?;

    QaService::new(index, embedder, top_k)
}
