//! TOML configuration.
//!
//! ```toml
//! [source]
//! kind = "drive"
//! folder_id = "17nNmE7bRgOgISi5MRdKOB3k1wo7ZRijE"
//! credentials_path = "./config/service_account.json"
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//!
//! [retrieval]
//! top_k = 3
//!
//! [server]
//! bind = "127.0.0.1:8501"
//! ```
//!
//! Only `[source]` is required; every other section has defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use pks_qa_core::search::{DEFAULT_TOP_K, MAX_TOP_K};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Where the index artifact lives.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `"drive"` (Google Drive folder) or `"directory"` (local directory).
    #[serde(default = "default_source_kind")]
    pub kind: String,
    /// Drive folder ID, or a directory path for `kind = "directory"`.
    pub folder_id: String,
    /// Service-account key JSON. Required for `kind = "drive"`.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
    /// Downloads larger than this fail instead of filling memory.
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
}

fn default_source_kind() -> String {
    "drive".to_string()
}
fn default_source_timeout_secs() -> u64 {
    60
}
fn default_max_artifact_bytes() -> u64 {
    512 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.folder_id.trim().is_empty() {
        bail!("source.folder_id must not be empty");
    }

    match config.source.kind.as_str() {
        "drive" => {
            if config.source.credentials_path.is_none() {
                bail!("source.credentials_path must be set when source.kind is 'drive'");
            }
        }
        "directory" => {}
        other => bail!(
            "Unknown source kind: '{}'. Must be drive or directory.",
            other
        ),
    }

    if config.source.max_artifact_bytes == 0 {
        bail!("source.max_artifact_bytes must be > 0");
    }
    if config.source.timeout_secs == 0 {
        bail!("source.timeout_secs must be > 0");
    }

    if config.retrieval.top_k < 1 || config.retrieval.top_k > MAX_TOP_K {
        bail!("retrieval.top_k must be between 1 and {}", MAX_TOP_K);
    }

    match config.embedding.provider.as_str() {
        "local" => {}
        "ollama" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'ollama'");
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is 'ollama'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local or ollama.",
            other
        ),
    }

    Ok(())
}
