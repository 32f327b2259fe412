//! Index artifact codec.
//!
//! The artifact is the single file downloaded at startup. It carries a
//! [`FlatIndex`] and the [`ChunkTable`] aligned with it, wrapped in a
//! versioned JSON envelope:
//!
//! ```json
//! {
//!   "format": "pks-qa-index",
//!   "version": 1,
//!   "index": {
//!     "metric": "l2",
//!     "dims": 384,
//!     "count": 1200,
//!     "vectors": "<base64 of count × dims little-endian f32>"
//!   },
//!   "chunks": [{ "text": "..." }]
//! }
//! ```
//!
//! [`decode`] validates the envelope and the vector/chunk correspondence
//! immediately, so a stale or damaged artifact fails at load time with a
//! distinguishable [`ArtifactError`] instead of surfacing later as a bad
//! lookup.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use thiserror::Error;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::index::{FlatIndex, Metric, VectorIndex};
use crate::models::ChunkTable;

/// Value of the envelope's `format` field.
pub const ARTIFACT_FORMAT: &str = "pks-qa-index";
/// Highest envelope version this build understands.
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The byte stream ended before the artifact was complete.
    #[error("artifact is truncated: {0}")]
    Truncated(String),
    /// The bytes are not an artifact this build can read.
    #[error("artifact format mismatch: {0}")]
    FormatMismatch(String),
    /// Positional correspondence between vectors and chunks is broken.
    #[error("artifact holds {vectors} vectors but {chunks} chunks")]
    CountMismatch { vectors: usize, chunks: usize },
    #[error("artifact declares an invalid vector dimension: {0}")]
    InvalidDimension(usize),
}

impl ArtifactError {
    /// Short machine-readable kind, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactError::Truncated(_) => "truncated",
            ArtifactError::FormatMismatch(_) => "format_mismatch",
            ArtifactError::CountMismatch { .. } => "count_mismatch",
            ArtifactError::InvalidDimension(_) => "invalid_dimension",
        }
    }
}

/// A decoded artifact: the index and its positionally-aligned chunks.
#[derive(Debug, Clone)]
pub struct IndexArtifact {
    pub index: FlatIndex,
    pub chunks: ChunkTable,
}

impl IndexArtifact {
    /// Pair an index with its chunks, checking that they line up.
    pub fn new(index: FlatIndex, chunks: ChunkTable) -> Result<Self, ArtifactError> {
        if index.len() != chunks.len() {
            return Err(ArtifactError::CountMismatch {
                vectors: index.len(),
                chunks: chunks.len(),
            });
        }
        Ok(Self { index, chunks })
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    index: IndexSection,
    chunks: ChunkTable,
}

#[derive(Serialize, Deserialize)]
struct IndexSection {
    metric: Metric,
    dims: usize,
    count: usize,
    vectors: String,
}

/// Decode and validate artifact bytes.
///
/// # Errors
///
/// - [`ArtifactError::Truncated`]: the JSON ends early, or the vector blob
///   is shorter than `count × dims` floats.
/// - [`ArtifactError::FormatMismatch`]: not JSON, wrong `format` tag,
///   unsupported `version`, missing or mistyped fields, bad base64, a
///   vector blob longer than declared, or a NaN / infinite component.
/// - [`ArtifactError::InvalidDimension`]: `dims` is zero.
/// - [`ArtifactError::CountMismatch`]: chunk count differs from `count`.
pub fn decode(bytes: &[u8]) -> Result<IndexArtifact, ArtifactError> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| match e.classify() {
        Category::Eof => ArtifactError::Truncated(e.to_string()),
        _ => ArtifactError::FormatMismatch(format!("not a JSON artifact: {}", e)),
    })?;

    // Check the tag and version before the shape, so that a newer artifact
    // reports its version instead of a confusing missing-field error.
    let format = value.get("format").and_then(|v| v.as_str());
    if format != Some(ARTIFACT_FORMAT) {
        return Err(ArtifactError::FormatMismatch(format!(
            "expected format '{}', found {}",
            ARTIFACT_FORMAT,
            format.map(|f| format!("'{}'", f)).unwrap_or_else(|| "none".to_string())
        )));
    }
    match value.get("version").and_then(|v| v.as_u64()) {
        Some(v) if (1..=ARTIFACT_VERSION as u64).contains(&v) => {}
        Some(v) => {
            return Err(ArtifactError::FormatMismatch(format!(
                "unsupported artifact version {} (this build reads up to {})",
                v, ARTIFACT_VERSION
            )))
        }
        None => {
            return Err(ArtifactError::FormatMismatch(
                "missing artifact version".to_string(),
            ))
        }
    }

    let envelope: Envelope = serde_json::from_value(value)
        .map_err(|e| ArtifactError::FormatMismatch(e.to_string()))?;
    let section = envelope.index;

    if section.dims == 0 {
        return Err(ArtifactError::InvalidDimension(0));
    }

    let blob = STANDARD
        .decode(section.vectors.as_bytes())
        .map_err(|e| ArtifactError::FormatMismatch(format!("vectors are not base64: {}", e)))?;

    let expected_bytes = section
        .count
        .checked_mul(section.dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| {
            ArtifactError::FormatMismatch(format!(
                "declared size {} × {} overflows",
                section.count, section.dims
            ))
        })?;
    if blob.len() < expected_bytes {
        return Err(ArtifactError::Truncated(format!(
            "vector blob has {} bytes, expected {} ({} × {} f32)",
            blob.len(),
            expected_bytes,
            section.count,
            section.dims
        )));
    }
    if blob.len() > expected_bytes {
        return Err(ArtifactError::FormatMismatch(format!(
            "vector blob has {} bytes, expected {} ({} × {} f32)",
            blob.len(),
            expected_bytes,
            section.count,
            section.dims
        )));
    }

    if envelope.chunks.len() != section.count {
        return Err(ArtifactError::CountMismatch {
            vectors: section.count,
            chunks: envelope.chunks.len(),
        });
    }

    let data = blob_to_vec(&blob);
    if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
        return Err(ArtifactError::FormatMismatch(format!(
            "vector {} holds a non-finite value at component {}",
            pos / section.dims,
            pos % section.dims
        )));
    }

    let index = FlatIndex::from_flat(section.metric, section.dims, data)
        .map_err(|e| ArtifactError::FormatMismatch(e.to_string()))?;

    IndexArtifact::new(index, envelope.chunks)
}

/// Encode an artifact in the current envelope version.
pub fn encode(artifact: &IndexArtifact) -> serde_json::Result<Vec<u8>> {
    let envelope = Envelope {
        format: ARTIFACT_FORMAT.to_string(),
        version: ARTIFACT_VERSION,
        index: IndexSection {
            metric: artifact.index.metric(),
            dims: artifact.index.dims(),
            count: artifact.index.len(),
            vectors: STANDARD.encode(vec_to_blob(artifact.index.as_flat())),
        },
        chunks: artifact.chunks.clone(),
    };
    serde_json::to_vec(&envelope)
}
