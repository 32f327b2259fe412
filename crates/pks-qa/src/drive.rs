//! Google Drive artifact source.
//!
//! Lists a Drive folder and downloads a file using the Drive v3 REST API,
//! authenticated as a service account with the read-only Drive scope.
//!
//! Uses only pure-Rust dependencies (`rsa`, `sha2`, `base64`) to sign the
//! OAuth assertion; no Google SDK or OpenSSL.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! kind = "drive"
//! folder_id = "17nNmE7bRgOgISi5MRdKOB3k1wo7ZRijE"
//! credentials_path = "./config/service_account.json"
//! ```
//!
//! `credentials_path` points at the JSON key file downloaded from the
//! Google Cloud console. The folder must be shared with the key's
//! `client_email`.
//!
//! # Authentication
//!
//! Service accounts use the OAuth 2.0 JWT bearer grant:
//!
//! ```text
//! assertion = base64url(header) "." base64url(claims) "." base64url(RS256 signature)
//! POST token_uri  grant_type=urn:ietf:params:oauth:grant-type:jwt-bearer&assertion=...
//!   → { "access_token": "...", "expires_in": 3600 }
//! ```
//!
//! The access token is cached until shortly before it expires.
//!
//! # Requests
//!
//! | Step | Request |
//! |------|---------|
//! | List | `GET /drive/v3/files?q='<folder>' in parents&fields=files(id, name)&pageSize=N` |
//! | Download | `GET /drive/v3/files/<id>?alt=media` |

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use serde::Deserialize;
use sha2::Sha256;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::source::{ArtifactSource, RemoteFile, SourceError};

/// OAuth scope granting read-only access to Drive files.
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";
/// Token endpoint used when the key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Lifetime requested for the signed assertion (Google's maximum).
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh the access token this long before it expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

// ============ Service Account Key ============

/// The fields of a Google service-account JSON key that signing needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    /// PKCS#8 PEM private key.
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self> {
        let key: ServiceAccountKey =
            serde_json::from_str(json).context("Invalid service account key JSON")?;
        if key.client_email.trim().is_empty() {
            anyhow::bail!("service account key has an empty client_email");
        }
        Ok(key)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read service account key: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to load service account key: {}", path.display()))
    }

    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

/// Build a signed RS256 JWT assertion for the bearer grant.
pub fn build_assertion(
    key: &ServiceAccountKey,
    scope: &str,
    now: DateTime<Utc>,
) -> Result<String, SourceError> {
    let mut header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
    if let Some(ref kid) = key.private_key_id {
        header["kid"] = serde_json::Value::String(kid.clone());
    }
    let iat = now.timestamp();
    let claims = serde_json::json!({
        "iss": key.client_email,
        "scope": scope,
        "aud": key.token_uri(),
        "iat": iat,
        "exp": iat + ASSERTION_LIFETIME_SECS,
    });

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );

    let private_key = RsaPrivateKey::from_pkcs8_pem(&key.private_key)
        .map_err(|e| SourceError::Auth(format!("invalid service account private key: {}", e)))?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature = signing_key
        .try_sign(signing_input.as_bytes())
        .map_err(|e| SourceError::Auth(format!("failed to sign assertion: {}", e)))?;

    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

// ============ Drive Source ============

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

/// [`ArtifactSource`] backed by the Google Drive v3 API.
pub struct DriveSource {
    client: reqwest::Client,
    key: ServiceAccountKey,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl DriveSource {
    /// Create a Drive source. `timeout` bounds every HTTP request,
    /// including the whole artifact download.
    pub fn new(key: ServiceAccountKey, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            key,
            api_base: DRIVE_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Point the source at a different API root (Drive-compatible mocks).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Return a valid access token, exchanging a fresh assertion if needed.
    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(ref t) = *cached {
            if t.expires_at > now {
                return Ok(t.access_token.clone());
            }
        }

        let assertion = build_assertion(&self.key, DRIVE_READONLY_SCOPE, now)?;
        let resp = self
            .client
            .post(self.key.token_uri())
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!(
                "token exchange for {} failed (HTTP {}): {}",
                self.key.client_email,
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Auth(format!("invalid token response: {}", e)))?;
        tracing::debug!(
            client_email = %self.key.client_email,
            expires_in = token.expires_in,
            "obtained Drive access token"
        );

        let lifetime = (token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0);
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: now + ChronoDuration::seconds(lifetime),
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl ArtifactSource for DriveSource {
    fn kind(&self) -> &str {
        "drive"
    }

    async fn list_files(
        &self,
        container: &str,
        page_size: u32,
    ) -> Result<Vec<RemoteFile>, SourceError> {
        let token = self.access_token().await?;
        let query = format!("'{}' in parents", container.replace('\'', "\\'"));
        let page_size = page_size.to_string();

        let resp = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id, name)"),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = body.chars().take(500).collect::<String>();
            return Err(match status.as_u16() {
                401 | 403 | 404 => SourceError::Auth(format!(
                    "folder '{}' is not accessible (HTTP {}): {}",
                    container, status, body
                )),
                _ => SourceError::Http(format!("Drive files.list failed (HTTP {}): {}", status, body)),
            });
        }

        let list: FileList = resp
            .json()
            .await
            .map_err(|e| SourceError::Http(format!("invalid Drive listing: {}", e)))?;
        Ok(list.files)
    }

    async fn download(&self, file_id: &str, max_bytes: u64) -> Result<Vec<u8>, SourceError> {
        let token = self.access_token().await?;
        let mut resp = self
            .client
            .get(format!("{}/files/{}", self.api_base, file_id))
            .bearer_auth(&token)
            .query(&[("alt", "media")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => SourceError::Auth(format!(
                    "file '{}' is not readable (HTTP {})",
                    file_id, status
                )),
                _ => SourceError::Http(format!(
                    "Drive download of '{}' failed (HTTP {})",
                    file_id, status
                )),
            });
        }

        if let Some(len) = resp.content_length() {
            if len > max_bytes {
                return Err(SourceError::TooLarge {
                    file: file_id.to_string(),
                    limit: max_bytes,
                });
            }
        }

        let mut bytes = Vec::with_capacity(resp.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = resp.chunk().await? {
            if (bytes.len() + chunk.len()) as u64 > max_bytes {
                return Err(SourceError::TooLarge {
                    file: file_id.to_string(),
                    limit: max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
            tracing::trace!(received = bytes.len(), "download progress");
        }
        Ok(bytes)
    }
}
