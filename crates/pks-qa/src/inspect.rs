//! `pks-qa inspect <FILE>`: summarize a local index artifact.
//!
//! Useful for checking a freshly built artifact before uploading it. Does
//! not need a config file, credentials, or an embedding model.

use anyhow::{bail, Context, Result};
use std::path::Path;

use pks_qa_core::artifact::{self, IndexArtifact, ARTIFACT_FORMAT, ARTIFACT_VERSION};
use pks_qa_core::index::VectorIndex;

const PREVIEW_CHARS: usize = 80;

pub fn run_inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read artifact: {}", path.display()))?;

    let artifact = match artifact::decode(&bytes) {
        Ok(a) => a,
        Err(e) => bail!("Invalid artifact ({}): {}", e.kind(), e),
    };

    print!("{}", summarize(&artifact, bytes.len()));
    Ok(())
}

pub fn summarize(artifact: &IndexArtifact, size_bytes: usize) -> String {
    let index = &artifact.index;
    let mut out = String::new();
    out.push_str(&format!("format:   {} v{}\n", ARTIFACT_FORMAT, ARTIFACT_VERSION));
    out.push_str(&format!("size:     {} bytes\n", size_bytes));
    out.push_str(&format!("metric:   {}\n", index.metric()));
    out.push_str(&format!("dims:     {}\n", index.dims()));
    out.push_str(&format!("vectors:  {}\n", index.len()));
    out.push_str(&format!("chunks:   {}\n", artifact.chunks.len()));
    match artifact.chunks.get(0) {
        Some(first) => out.push_str(&format!("first:    {}\n", preview(&first.text))),
        None => out.push_str("first:    (empty)\n"),
    }
    out
}

fn preview(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    }
}
