//! DriveSource against a local mock of the OAuth token endpoint and the
//! Drive v3 `files.list` / `files.get?alt=media` endpoints.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pks_qa::drive::{DriveSource, ServiceAccountKey};
use pks_qa::loader::{IndexLoader, LoadError};
use pks_qa::source::{ArtifactSource, SourceError};
use pks_qa_core::artifact::{encode, IndexArtifact};
use pks_qa_core::index::{FlatIndex, Metric, VectorIndex};

const TEST_KEY_PEM: &str = include_str!("fixtures/test_service_account_key.pem");
const ACCESS_TOKEN: &str = "mock-access-token";
const READER_EMAIL: &str = "reader@pks-qa-test.iam.gserviceaccount.com";
const REVOKED_EMAIL: &str = "revoked@pks-qa-test.iam.gserviceaccount.com";

#[derive(Default)]
struct MockDrive {
    artifact: Vec<u8>,
    token_requests: AtomicUsize,
    list_requests: AtomicUsize,
    downloads: AtomicUsize,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", ACCESS_TOKEN))
        .unwrap_or(false)
}

async fn token(
    State(mock): State<Arc<MockDrive>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    mock.token_requests.fetch_add(1, Ordering::SeqCst);
    let grant_ok = form.get("grant_type").map(String::as_str)
        == Some("urn:ietf:params:oauth:grant-type:jwt-bearer");
    let issuer = form.get("assertion").and_then(|a| assertion_issuer(a));
    if !grant_ok || issuer.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "invalid_grant" })),
        );
    }
    if issuer.as_deref() == Some(REVOKED_EMAIL) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "invalid_client",
                "error_description": "The OAuth client was disabled."
            })),
        );
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "access_token": ACCESS_TOKEN,
            "expires_in": 3599,
            "token_type": "Bearer",
        })),
    )
}

/// `iss` claim of a three-part JWT.
fn assertion_issuer(assertion: &str) -> Option<String> {
    let parts: Vec<&str> = assertion.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let claims: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).ok()?).ok()?;
    claims["iss"].as_str().map(str::to_string)
}

async fn list_files(
    State(mock): State<Arc<MockDrive>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    mock.list_requests.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
    }
    let q = params.get("q").cloned().unwrap_or_default();
    assert_eq!(params.get("pageSize").map(String::as_str), Some("1"));

    match q.as_str() {
        "'shared-folder' in parents" => (
            StatusCode::OK,
            Json(serde_json::json!({
                "files": [{ "id": "file-123", "name": "faiss_index.json" }]
            })),
        ),
        "'empty-folder' in parents" => (StatusCode::OK, Json(serde_json::json!({ "files": [] }))),
        _ => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": { "message": "insufficient permissions" } })),
        ),
    }
}

async fn get_file(
    State(mock): State<Arc<MockDrive>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    mock.downloads.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) || params.get("alt").map(String::as_str) != Some("media") {
        return (StatusCode::UNAUTHORIZED, Vec::new());
    }
    if id != "file-123" {
        return (StatusCode::NOT_FOUND, Vec::new());
    }
    (StatusCode::OK, mock.artifact.clone())
}

fn artifact_bytes() -> Vec<u8> {
    let index =
        FlatIndex::from_flat(Metric::L2, 2, vec![1.0, 0.0, 0.0, 1.0, 0.9, 0.1]).unwrap();
    let artifact = IndexArtifact::new(index, ["A", "B", "C"].into_iter().collect()).unwrap();
    encode(&artifact).unwrap()
}

/// Start the mock and return a DriveSource pointed at it.
async fn start_mock() -> (Arc<MockDrive>, DriveSource) {
    start_mock_as(READER_EMAIL).await
}

async fn start_mock_as(client_email: &str) -> (Arc<MockDrive>, DriveSource) {
    let mock = Arc::new(MockDrive {
        artifact: artifact_bytes(),
        ..MockDrive::default()
    });
    let app = Router::new()
        .route("/token", post(token))
        .route("/drive/v3/files", get(list_files))
        .route("/drive/v3/files/{id}", get(get_file))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let key = ServiceAccountKey {
        client_email: client_email.to_string(),
        private_key: TEST_KEY_PEM.to_string(),
        private_key_id: Some("test-key".to_string()),
        token_uri: Some(format!("http://{}/token", addr)),
    };
    let source = DriveSource::new(key, Duration::from_secs(5))
        .unwrap()
        .with_api_base(format!("http://{}/drive/v3", addr));
    (mock, source)
}

#[tokio::test]
async fn test_loader_fetches_and_decodes_from_drive() {
    let (mock, source) = start_mock().await;
    let loader = IndexLoader::new(Arc::new(source), "shared-folder", 1024 * 1024);

    let loaded = loader.get().await.unwrap();
    assert_eq!(loaded.file_name, "faiss_index.json");
    assert_eq!(loaded.artifact.index.len(), 3);
    assert_eq!(loaded.artifact.chunks.get(2).unwrap().text, "C");

    // Cached: no further traffic.
    loader.get().await.unwrap();
    assert_eq!(mock.token_requests.load(Ordering::SeqCst), 1);
    assert_eq!(mock.list_requests.load(Ordering::SeqCst), 1);
    assert_eq!(mock.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_folder_is_not_found() {
    let (mock, source) = start_mock().await;
    let loader = IndexLoader::new(Arc::new(source), "empty-folder", 1024 * 1024);

    match loader.get().await.unwrap_err() {
        LoadError::Source(SourceError::NotFound { container }) => {
            assert_eq!(container, "empty-folder")
        }
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert_eq!(mock.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unshared_folder_is_auth_error() {
    let (_mock, source) = start_mock().await;
    let err = source.list_files("private-folder", 1).await.unwrap_err();
    match err {
        SourceError::Auth(message) => assert!(message.contains("private-folder")),
        other => panic!("expected Auth, got {:?}", other),
    }
}

#[tokio::test]
async fn test_download_over_limit_is_rejected() {
    let (_mock, source) = start_mock().await;
    let err = source.download("file-123", 16).await.unwrap_err();
    assert!(matches!(err, SourceError::TooLarge { limit: 16, .. }));
}

#[tokio::test]
async fn test_rejected_token_exchange_is_auth_error() {
    let (mock, source) = start_mock_as(REVOKED_EMAIL).await;
    let err = source.list_files("shared-folder", 1).await.unwrap_err();
    match err {
        SourceError::Auth(message) => {
            assert!(message.contains(REVOKED_EMAIL), "message: {}", message);
            assert!(message.contains("401"), "message: {}", message);
        }
        other => panic!("expected Auth, got {:?}", other),
    }
    assert_eq!(mock.token_requests.load(Ordering::SeqCst), 1);
    assert_eq!(mock.list_requests.load(Ordering::SeqCst), 0);

    let loader = IndexLoader::new(Arc::new(source), "shared-folder", 1024 * 1024);
    assert!(matches!(
        loader.get().await.unwrap_err(),
        LoadError::Source(SourceError::Auth(_))
    ));
    assert_eq!(mock.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unparsable_private_key_is_auth_error() {
    let (mock, _source) = start_mock().await;
    let key = ServiceAccountKey {
        client_email: READER_EMAIL.to_string(),
        private_key: "not a pem".to_string(),
        private_key_id: None,
        token_uri: None,
    };
    let source = DriveSource::new(key, Duration::from_secs(5)).unwrap();
    let err = source.list_files("shared-folder", 1).await.unwrap_err();
    assert!(matches!(err, SourceError::Auth(_)));
    assert_eq!(mock.token_requests.load(Ordering::SeqCst), 0);
}
