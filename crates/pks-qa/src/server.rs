//! HTTP front end.
//!
//! Serves a single-page question form plus a JSON search endpoint, both
//! backed by one shared [`QaService`]. The index and embedding model are
//! loaded before the listener binds, so every request sees a ready service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Question form; `?q=` renders results below it |
//! | `GET`  | `/api/search?q=` | Results as JSON |
//! | `GET`  | `/health` | Health check (version and loaded artifact) |
//!
//! # Error Contract
//!
//! JSON errors use the shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "q must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `query_failed` (422). On the HTML page
//! a failed question is shown as an inline message instead.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use pks_qa_core::index::VectorIndex;
use pks_qa_core::models::RetrievedChunk;
use pks_qa_core::search::QueryError;

use crate::config::Config;
use crate::service::QaService;

/// Build the router. Split from [`run_server`] so tests can bind their own
/// listener.
pub fn router(service: Arc<QaService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_page))
        .route("/api/search", get(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(service)
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config, service: QaService) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(Arc::new(service));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("PKS Q&A listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn query_failed(err: QueryError) -> AppError {
    AppError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        code: "query_failed".to_string(),
        message: err.to_string(),
    }
}

#[derive(Deserialize)]
struct QuestionParams {
    #[serde(default)]
    q: Option<String>,
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    file: String,
    vectors: usize,
}

async fn handle_health(State(service): State<Arc<QaService>>) -> Json<HealthResponse> {
    let loaded = service.index();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        file: loaded.file_name.clone(),
        vectors: loaded.artifact.index.len(),
    })
}

// ============ GET /api/search ============

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<RetrievedChunk>,
}

async fn handle_search(
    State(service): State<Arc<QaService>>,
    Query(params): Query<QuestionParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let query = params.q.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Err(bad_request("q must not be empty"));
    }

    let results = service.ask(&query).await.map_err(|e| {
        tracing::warn!(error = %e, "search request failed");
        query_failed(e)
    })?;
    Ok(Json(SearchResponse { query, results }))
}

// ============ GET / ============

async fn handle_page(
    State(service): State<Arc<QaService>>,
    Query(params): Query<QuestionParams>,
) -> Html<String> {
    let file_name = service.index().file_name.clone();
    let question = params.q.unwrap_or_default().trim().to_string();
    if question.is_empty() {
        return Html(render_page(&file_name, "", None));
    }

    let outcome = service.ask(&question).await.map_err(|e| {
        tracing::warn!(error = %e, "page question failed");
        e.to_string()
    });
    Html(render_page(&file_name, &question, Some(outcome)))
}

fn render_page(
    file_name: &str,
    question: &str,
    outcome: Option<Result<Vec<RetrievedChunk>, String>>,
) -> String {
    let mut body = String::new();
    match outcome {
        None => {}
        Some(Ok(results)) if results.is_empty() => {
            body.push_str("<p class=\"empty\">No results.</p>\n");
        }
        Some(Ok(results)) => {
            body.push_str("<h2>Relevant Info</h2>\n<ul class=\"results\">\n");
            for r in &results {
                body.push_str(&format!("  <li>{}</li>\n", html_escape(&r.text)));
            }
            body.push_str("</ul>\n");
        }
        Some(Err(message)) => {
            body.push_str(&format!(
                "<p class=\"error\">Could not answer that question: {}</p>\n",
                html_escape(&message)
            ));
        }
    }

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>PKS Q&amp;A</title>
<style>
body {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }}
input[type=text] {{ width: 70%; padding: 0.4rem; }}
.error {{ color: #a40000; }}
.loaded {{ color: #555; font-size: 0.9rem; }}
.results li {{ margin-bottom: 0.75rem; white-space: pre-wrap; }}
</style>
</head>
<body>
<h1>PKS Q&amp;A</h1>
<p class="loaded">Loaded index from: {}</p>
<p class="caption">Ask me anything about the house.</p>
<form method="get" action="/">
<input type="text" name="q" value="{}" placeholder="Your question" autofocus>
<button type="submit">Ask</button>
</form>
{}</body>
</html>
"#,
        html_escape(file_name),
        html_escape(question),
        body
    )
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
