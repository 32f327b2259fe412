//! Core data models for the retrieval pipeline.
//!
//! A [`ChunkTable`] is positionally aligned with the vectors of a
//! [`VectorIndex`](crate::index::VectorIndex): row `i` of the table is the
//! text that produced vector `i`. Nothing in this crate ever reorders it.

use serde::{Deserialize, Serialize};

/// A single unit of source text stored alongside its embedding.
///
/// Artifacts may carry extra per-chunk fields; only `text` is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
}

impl ChunkRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Ordered sequence of chunks, indexed by vector label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkTable(Vec<ChunkRecord>);

impl ChunkTable {
    pub fn new(records: Vec<ChunkRecord>) -> Self {
        Self(records)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up the chunk for a search label.
    ///
    /// Returns `None` for negative labels (padding markers) and for labels
    /// past the end of the table.
    pub fn get(&self, label: i64) -> Option<&ChunkRecord> {
        usize::try_from(label).ok().and_then(|i| self.0.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.0.iter()
    }
}

impl From<Vec<ChunkRecord>> for ChunkTable {
    fn from(records: Vec<ChunkRecord>) -> Self {
        Self(records)
    }
}

impl<S: Into<String>> FromIterator<S> for ChunkTable {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(ChunkRecord::new).collect())
    }
}

/// One mapped search hit, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// Zero-based position in the result list (0 = nearest).
    pub rank: usize,
    /// Row in the chunk table / vector label in the index.
    pub label: usize,
    /// Distance under the index metric; smaller is more similar.
    pub distance: f32,
    pub text: String,
}
