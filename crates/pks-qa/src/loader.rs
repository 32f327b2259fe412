//! Compute-once index loading.
//!
//! [`IndexLoader`] performs fetch + decode the first time [`get`] is called
//! and hands out the same [`LoadedIndex`] afterwards. Concurrent first
//! callers wait on a single in-flight load; a failed load is not cached, so
//! a later call tries again.
//!
//! # Fetch policy
//!
//! The container is expected to hold exactly one artifact. The listing is
//! requested with a page size of 1 and the first entry is used as-is; an
//! empty listing fails with [`SourceError::NotFound`] before any download.
//!
//! [`get`]: IndexLoader::get

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

use pks_qa_core::artifact::{self, ArtifactError, IndexArtifact};
use pks_qa_core::index::VectorIndex;

use crate::config::SourceConfig;
use crate::source::{create_source, ArtifactSource, RemoteFile, SourceError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("failed to decode '{file}': {source}")]
    Artifact {
        file: String,
        #[source]
        source: ArtifactError,
    },
}

/// Raw artifact bytes plus the listing entry they came from.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub file: RemoteFile,
    pub bytes: Vec<u8>,
}

/// The decoded index, held for the life of the process.
#[derive(Debug)]
pub struct LoadedIndex {
    /// Name of the artifact file in the container.
    pub file_name: String,
    pub size_bytes: usize,
    pub artifact: IndexArtifact,
}

/// List `container` and download its first file.
pub async fn fetch_artifact(
    source: &dyn ArtifactSource,
    container: &str,
    max_bytes: u64,
) -> Result<FetchedArtifact, SourceError> {
    let files = source.list_files(container, 1).await?;
    let file = files
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::NotFound {
            container: container.to_string(),
        })?;

    tracing::info!(
        source = source.kind(),
        file = %file.name,
        id = %file.id,
        "downloading index artifact"
    );
    let bytes = source.download(&file.id, max_bytes).await?;
    tracing::info!(file = %file.name, bytes = bytes.len(), "download complete");

    Ok(FetchedArtifact { file, bytes })
}

pub struct IndexLoader {
    source: Arc<dyn ArtifactSource>,
    container: String,
    max_bytes: u64,
    loaded: OnceCell<Arc<LoadedIndex>>,
}

impl IndexLoader {
    pub fn new(source: Arc<dyn ArtifactSource>, container: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            source,
            container: container.into(),
            max_bytes,
            loaded: OnceCell::new(),
        }
    }

    /// Build a loader for the source described in `[source]`.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let source = create_source(config)?;
        Ok(Self::new(
            source,
            config.folder_id.clone(),
            config.max_artifact_bytes,
        ))
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Return the loaded index, fetching and decoding it on first use.
    pub async fn get(&self) -> Result<Arc<LoadedIndex>, LoadError> {
        let loaded = self
            .loaded
            .get_or_try_init(|| async {
                let fetched =
                    fetch_artifact(self.source.as_ref(), &self.container, self.max_bytes).await?;
                let size_bytes = fetched.bytes.len();
                let artifact =
                    artifact::decode(&fetched.bytes).map_err(|source| {
                        tracing::error!(file = %fetched.file.name, kind = source.kind(), "artifact rejected");
                        LoadError::Artifact {
                            file: fetched.file.name.clone(),
                            source,
                        }
                    })?;
                tracing::info!(
                    file = %fetched.file.name,
                    vectors = artifact.index.len(),
                    dims = artifact.index.dims(),
                    metric = %artifact.index.metric(),
                    "index loaded"
                );
                Ok::<_, LoadError>(Arc::new(LoadedIndex {
                    file_name: fetched.file.name,
                    size_bytes,
                    artifact,
                }))
            })
            .await?;
        Ok(loaded.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pks_qa_core::artifact::encode;
    use pks_qa_core::index::{FlatIndex, Metric};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        files: Vec<RemoteFile>,
        body: Vec<u8>,
        lists: AtomicUsize,
        downloads: AtomicUsize,
    }

    impl CountingSource {
        fn new(files: Vec<RemoteFile>, body: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                files,
                body,
                lists: AtomicUsize::new(0),
                downloads: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ArtifactSource for CountingSource {
        fn kind(&self) -> &str {
            "counting"
        }

        async fn list_files(
            &self,
            _container: &str,
            page_size: u32,
        ) -> Result<Vec<RemoteFile>, SourceError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self.files.iter().take(page_size as usize).cloned().collect())
        }

        async fn download(&self, _file_id: &str, _max: u64) -> Result<Vec<u8>, SourceError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.body.clone())
        }
    }

    fn artifact_bytes() -> Vec<u8> {
        let index = FlatIndex::from_flat(Metric::L2, 2, vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let artifact = IndexArtifact::new(index, ["A", "B"].into_iter().collect()).unwrap();
        encode(&artifact).unwrap()
    }

    fn one_file() -> Vec<RemoteFile> {
        vec![RemoteFile {
            id: "f1".into(),
            name: "faiss_index.json".into(),
        }]
    }

    #[tokio::test]
    async fn test_second_get_uses_cache() {
        let source = CountingSource::new(one_file(), artifact_bytes());
        let loader = IndexLoader::new(source.clone(), "folder", 1024);
        assert!(!loader.is_loaded());

        let first = loader.get().await.unwrap();
        let second = loader.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(loader.is_loaded());
        assert_eq!(first.file_name, "faiss_index.json");
        assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(source.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_downloads_once() {
        let source = CountingSource::new(one_file(), artifact_bytes());
        let loader = Arc::new(IndexLoader::new(source.clone(), "folder", 1024));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.get().await.map(|l| l.artifact.chunks.len()) })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 2);
        }
        assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_found_without_download() {
        let source = CountingSource::new(Vec::new(), artifact_bytes());
        let loader = IndexLoader::new(source.clone(), "folder-x", 1024);

        let err = loader.get().await.unwrap_err();
        match err {
            LoadError::Source(SourceError::NotFound { container }) => {
                assert_eq!(container, "folder-x")
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
        assert_eq!(source.downloads.load(Ordering::SeqCst), 0);
        assert!(!loader.is_loaded());
    }

    #[tokio::test]
    async fn test_bad_artifact_reports_file_and_kind() {
        let mut bytes = artifact_bytes();
        bytes.truncate(bytes.len() - 10);
        let source = CountingSource::new(one_file(), bytes);
        let loader = IndexLoader::new(source, "folder", 1024);

        match loader.get().await.unwrap_err() {
            LoadError::Artifact { file, source } => {
                assert_eq!(file, "faiss_index.json");
                assert_eq!(source.kind(), "truncated");
            }
            other => panic!("expected Artifact error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_only_first_listed_file_is_downloaded() {
        let source = CountingSource::new(
            vec![
                RemoteFile {
                    id: "first".into(),
                    name: "a.json".into(),
                },
                RemoteFile {
                    id: "second".into(),
                    name: "b.json".into(),
                },
            ],
            artifact_bytes(),
        );
        let fetched = fetch_artifact(source.as_ref(), "folder", 1024).await.unwrap();
        assert_eq!(fetched.file.id, "first");
    }
}
