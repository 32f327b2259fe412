//! Artifact sources.
//!
//! An [`ArtifactSource`] lists the files in a container and downloads one
//! of them into memory. Two implementations exist:
//!
//! | Kind | Type | Container |
//! |------|------|-----------|
//! | `drive` | [`DriveSource`](crate::drive::DriveSource) | Google Drive folder ID |
//! | `directory` | [`DirectorySource`] | Local directory path |
//!
//! Use [`create_source`] to build the one named in `[source].kind`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::config::SourceConfig;
use crate::drive::{DriveSource, ServiceAccountKey};

/// A file entry returned by a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// Credential rejected, or the container is not readable with it.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("no artifact found in '{container}'")]
    NotFound { container: String },
    #[error("artifact '{file}' exceeds the {limit}-byte size limit")]
    TooLarge { file: String, limit: u64 },
    #[error("request failed: {0}")]
    Http(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Http(format!("timed out: {}", e))
        } else {
            SourceError::Http(e.to_string())
        }
    }
}

/// Lists and downloads files from a storage container.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Short label for logs, e.g. `"drive"`.
    fn kind(&self) -> &str;

    /// List up to `page_size` files in `container`.
    async fn list_files(
        &self,
        container: &str,
        page_size: u32,
    ) -> Result<Vec<RemoteFile>, SourceError>;

    /// Download a file's full content, failing with
    /// [`SourceError::TooLarge`] past `max_bytes`.
    async fn download(&self, file_id: &str, max_bytes: u64) -> Result<Vec<u8>, SourceError>;
}

/// Build the source named in `[source].kind`.
///
/// For `drive`, the service-account key is read from
/// `credentials_path` here, once, and handed to the source as a parsed
/// value.
pub fn create_source(config: &SourceConfig) -> Result<Arc<dyn ArtifactSource>> {
    match config.kind.as_str() {
        "drive" => {
            let path = config
                .credentials_path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("source.credentials_path required for drive"))?;
            let key = ServiceAccountKey::from_file(path)?;
            let source = DriveSource::new(key, Duration::from_secs(config.timeout_secs))
                .context("Failed to build Drive client")?;
            Ok(Arc::new(source))
        }
        "directory" => Ok(Arc::new(DirectorySource)),
        other => bail!("Unknown source kind: {}", other),
    }
}

// ============ Directory Source ============

/// Treats a local directory as the container.
///
/// Files are listed in name order so "the first file" is deterministic.
/// Subdirectories and dotfiles are ignored.
pub struct DirectorySource;

#[async_trait]
impl ArtifactSource for DirectorySource {
    fn kind(&self) -> &str {
        "directory"
    }

    async fn list_files(
        &self,
        container: &str,
        page_size: u32,
    ) -> Result<Vec<RemoteFile>, SourceError> {
        let mut entries = tokio::fs::read_dir(container).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            files.push(RemoteFile {
                id: entry.path().to_string_lossy().to_string(),
                name,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files.truncate(page_size as usize);
        Ok(files)
    }

    async fn download(&self, file_id: &str, max_bytes: u64) -> Result<Vec<u8>, SourceError> {
        let path = PathBuf::from(file_id);
        let len = tokio::fs::metadata(&path).await?.len();
        if len > max_bytes {
            return Err(SourceError::TooLarge {
                file: file_id.to_string(),
                limit: max_bytes,
            });
        }

        let mut file = tokio::fs::File::open(&path).await?;
        let mut bytes = Vec::with_capacity(len as usize);
        // Bound the read as well: the file may grow after the metadata call.
        (&mut file)
            .take(max_bytes + 1)
            .read_to_end(&mut bytes)
            .await?;
        if bytes.len() as u64 > max_bytes {
            return Err(SourceError::TooLarge {
                file: file_id.to_string(),
                limit: max_bytes,
            });
        }
        Ok(bytes)
    }
}
