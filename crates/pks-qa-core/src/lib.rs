//! # PKS Q&A Core
//!
//! Shared, I/O-free logic for PKS Q&A: the chunk table model, vector math,
//! the flat nearest-neighbor index, the index artifact codec, and the
//! retrieval pipeline that ties an [`Embedder`](embedding::Embedder) to a
//! [`VectorIndex`](index::VectorIndex).
//!
//! This crate contains no tokio, HTTP, or filesystem code. Fetching the
//! artifact, loading embedding models, and presenting results live in the
//! `pks-qa` app crate.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ──▶ artifact::decode ──▶ FlatIndex + ChunkTable
//!                                     │
//! question ──▶ Embedder::embed ──▶ VectorIndex::search ──▶ search::map_hits
//! ```

pub mod artifact;
pub mod embedding;
pub mod index;
pub mod models;
pub mod search;
