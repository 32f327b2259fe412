//! Exact nearest-neighbor search over fixed-dimension `f32` vectors.
//!
//! [`FlatIndex`] stores vectors row-major and answers queries by brute
//! force, keeping the `k` best candidates in a bounded max-heap. Distances
//! are always "smaller is more similar", whatever the [`Metric`]:
//!
//! | Metric | Distance |
//! |--------|----------|
//! | `l2` | squared Euclidean |
//! | `inner_product` | `-(a · b)` |
//! | `cosine` | `1 - cos(a, b)` |
//!
//! When the index holds fewer than `k` vectors the remaining slots of
//! [`SearchHits`] are padded with [`INVALID_LABEL`] and `f32::INFINITY`.
//! Callers map labels back to chunks through
//! [`map_hits`](crate::search::map_hits), which drops padding.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::{cosine_similarity, dot_product, squared_l2};

/// Label used for result slots that hold no vector.
pub const INVALID_LABEL: i64 = -1;

/// Distance metric an index was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    L2,
    InnerProduct,
    Cosine,
}

impl Metric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => squared_l2(a, b),
            Metric::InnerProduct => -dot_product(a, b),
            Metric::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::InnerProduct => "inner_product",
            Metric::Cosine => "cosine",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("vector dimension must be > 0")]
    ZeroDimension,
    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
    #[error("buffer of {len} floats is not a whole number of {dims}-dim vectors")]
    RaggedBuffer { len: usize, dims: usize },
}

/// Raw search output: `k` parallel distance/label slots, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHits {
    pub distances: Vec<f32>,
    pub labels: Vec<i64>,
}

impl SearchHits {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterate `(distance, label)` pairs in rank order.
    pub fn iter(&self) -> impl Iterator<Item = (f32, i64)> + '_ {
        self.distances
            .iter()
            .copied()
            .zip(self.labels.iter().copied())
    }
}

/// A searchable, immutable collection of vectors.
///
/// The query must have the index's dimensionality; implementations are not
/// required to check it.
pub trait VectorIndex: Send + Sync {
    fn dims(&self) -> usize;
    /// Number of stored vectors.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn metric(&self) -> Metric;
    /// Return exactly `k` slots ordered by ascending distance.
    fn search(&self, query: &[f32], k: usize) -> SearchHits;
}

/// Brute-force index over row-major vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    metric: Metric,
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(metric: Metric, dims: usize) -> Result<Self, IndexError> {
        Self::from_flat(metric, dims, Vec::new())
    }

    /// Build from an already-flattened `count × dims` buffer.
    pub fn from_flat(metric: Metric, dims: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dims == 0 {
            return Err(IndexError::ZeroDimension);
        }
        if data.len() % dims != 0 {
            return Err(IndexError::RaggedBuffer {
                len: data.len(),
                dims,
            });
        }
        Ok(Self { metric, dims, data })
    }

    /// Append one vector; its label is the previous [`len`](VectorIndex::len).
    pub fn add(&mut self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::InvalidDimension {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn vector(&self, label: usize) -> Option<&[f32]> {
        let start = label.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// The flattened vector buffer.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }
}

/// Heap entry ordered by distance, then label, so the heap top is the
/// current worst candidate.
struct Candidate {
    distance: f32,
    label: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_distance(self.distance, other.distance)
            .then_with(|| self.label.cmp(&other.label))
    }
}

/// Total order on distances with every NaN after every real value,
/// whatever its sign bit.
fn compare_distance(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.total_cmp(&b),
        (true, true) => Ordering::Equal,
        (nan_a, nan_b) => nan_a.cmp(&nan_b),
    }
}

impl VectorIndex for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        self.data.len() / self.dims
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn search(&self, query: &[f32], k: usize) -> SearchHits {
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k.min(self.len()) + 1);

        if k > 0 {
            for (label, row) in self.data.chunks_exact(self.dims).enumerate() {
                let candidate = Candidate {
                    distance: self.metric.distance(query, row),
                    label,
                };
                if heap.len() < k {
                    heap.push(candidate);
                } else if let Some(worst) = heap.peek() {
                    if candidate < *worst {
                        heap.pop();
                        heap.push(candidate);
                    }
                }
            }
        }

        let ranked = heap.into_sorted_vec();
        let mut distances = Vec::with_capacity(k.min(self.len()));
        let mut labels = Vec::with_capacity(k.min(self.len()));
        for c in &ranked {
            distances.push(c.distance);
            labels.push(c.label as i64);
        }
        while labels.len() < k {
            distances.push(f32::INFINITY);
            labels.push(INVALID_LABEL);
        }

        SearchHits { distances, labels }
    }
}
