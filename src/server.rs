//! Browser chat server.
//!
//! Serves a single-page chat UI plus the JSON API behind it. Each browser
//! tab holds a `session_id`; the server keeps one [`Session`] per id so
//! follow-up questions see the earlier turns. At most `[server].max_sessions`
//! conversations are held; idle ones expire after
//! `[server].session_idle_secs`, and the least recently used one makes room
//! for a new one. `/api/reset` forgets a conversation entirely.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Chat page |
//! | `POST` | `/api/ask` | `{question, session_id?}` → answer with citations |
//! | `POST` | `/api/reset` | `{session_id}` → clear that conversation |
//! | `POST` | `/api/upload?filename=x.pdf` | Raw PDF body → ingest report |
//! | `GET`  | `/health` | Status, version, and record count |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_index", "message": "no index found at ./data/indexes" } }
//! ```
//!
//! Error codes: `bad_request` (400), `embeddings_disabled` (400),
//! `no_index` (404), `index_locked` (409), `model_mismatch` (409),
//! `extraction_failed` (422), `index_corrupt` (500), `internal` (500),
//! `upstream_error` (502), `timeout` (504).
//!
//! # Concurrency
//!
//! Questions within one session are serialized by that session's mutex.
//! The loaded index is shared read-only behind an `RwLock<Arc<Index>>` and
//! swapped for the merged index after an upload.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::answer::format_citation;
use crate::context::AppContext;
use crate::error::DocQaError;
use crate::index::Index;
use crate::ingest::{ingest_upload, IngestReport};
use crate::models::Citation;
use crate::session::Session;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    ctx: AppContext,
    index: Arc<RwLock<Arc<Index>>>,
    sessions: Arc<Mutex<SessionMap>>,
}

struct SessionEntry {
    session: Arc<Mutex<Session>>,
    last_used: Instant,
}

/// Live conversations by id, bounded in count and idle time.
struct SessionMap {
    entries: HashMap<String, SessionEntry>,
    max_sessions: usize,
    idle: Duration,
}

impl SessionMap {
    fn new(max_sessions: usize, idle: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_sessions: max_sessions.max(1),
            idle,
        }
    }

    fn get_or_create(
        &mut self,
        id: &str,
        create: impl FnOnce() -> Session,
    ) -> Arc<Mutex<Session>> {
        let now = Instant::now();
        let idle = self.idle;
        self.entries.retain(|_, e| now.duration_since(e.last_used) < idle);

        if let Some(entry) = self.entries.get_mut(id) {
            entry.last_used = now;
            return entry.session.clone();
        }

        while self.entries.len() >= self.max_sessions {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    tracing::debug!(session_id = %k, "evicting least recently used session");
                    self.entries.remove(&k);
                }
                None => break,
            }
        }

        let session = Arc::new(Mutex::new(create()));
        self.entries.insert(
            id.to_string(),
            SessionEntry {
                session: session.clone(),
                last_used: now,
            },
        );
        session
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Mutex<Session>>> {
        self.entries.remove(id).map(|e| e.session)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl AppState {
    /// Load the saved index, or start empty if none has been written yet.
    pub fn new(ctx: AppContext) -> Result<Self, DocQaError> {
        let index = match ctx.load_index() {
            Ok(index) => index,
            Err(DocQaError::IndexNotFound(dir)) => {
                tracing::warn!(dir = %dir.display(), "no index yet; upload a PDF or run `docqa ingest`");
                Index::empty(ctx.embedder.model_name(), ctx.embedder.dims())
            }
            Err(e) => return Err(e),
        };
        let sessions = SessionMap::new(
            ctx.config.server.max_sessions,
            Duration::from_secs(ctx.config.server.session_idle_secs),
        );
        Ok(Self {
            ctx,
            index: Arc::new(RwLock::new(Arc::new(index))),
            sessions: Arc::new(Mutex::new(sessions)),
        })
    }

    async fn session(&self, id: &str) -> Arc<Mutex<Session>> {
        self.sessions
            .lock()
            .await
            .get_or_create(id, || self.ctx.new_session())
    }
}

/// Build the router. Split from [`run_server`] so tests can drive it.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index_page))
        .route("/api/ask", post(handle_ask))
        .route("/api/reset", post(handle_reset))
        .route(
            "/api/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the chat server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let state = AppState::new(ctx).map_err(|e| match e {
        DocQaError::IndexCorrupt { .. } => {
            anyhow::anyhow!("{}\nRun `docqa ingest --rebuild` to replace it.", e)
        }
        other => anyhow::Error::new(other),
    })?;
    let app = router(state);

    println!("docqa chat listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<DocQaError> for AppError {
    fn from(err: DocQaError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            DocQaError::IndexNotFound(_) => (StatusCode::NOT_FOUND, "no_index"),
            DocQaError::IndexCorrupt { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "index_corrupt"),
            DocQaError::DocumentExtraction { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed")
            }
            DocQaError::EmbeddingModelMismatch { .. } => (StatusCode::CONFLICT, "model_mismatch"),
            DocQaError::ConcurrentWriteConflict(_) => (StatusCode::CONFLICT, "index_locked"),
            DocQaError::EmbeddingService(m) if m.contains("disabled") => {
                (StatusCode::BAD_REQUEST, "embeddings_disabled")
            }
            DocQaError::EmbeddingService(m) | DocQaError::LanguageModel(m)
                if m.contains("timed out") =>
            {
                (StatusCode::GATEWAY_TIMEOUT, "timeout")
            }
            DocQaError::EmbeddingService(_) | DocQaError::LanguageModel(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            DocQaError::Config(_) | DocQaError::Io { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }
        AppError {
            status,
            code,
            message,
        }
    }
}

// ============ GET / ============

async fn handle_index_page() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

// ============ POST /api/ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    grounded: bool,
    citations: Vec<Citation>,
    /// Citations rendered as `"source (page N)"`.
    sources: Vec<String>,
    session_id: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let index = state.index.read().await.clone();
    if index.is_empty() {
        return Err(DocQaError::IndexNotFound(state.ctx.store.dir().to_path_buf()).into());
    }

    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session = state.session(&session_id).await;
    let mut session = session.lock().await;

    let result = state
        .ctx
        .ask(&index, &mut session, question, state.ctx.config.retrieval.top_k)
        .await?;

    Ok(Json(AskResponse {
        sources: result.citations.iter().map(format_citation).collect(),
        answer: result.answer_text,
        grounded: result.grounded,
        citations: result.citations,
        session_id,
    }))
}

// ============ POST /api/reset ============

#[derive(Deserialize)]
struct ResetRequest {
    session_id: String,
}

async fn handle_reset(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Json<serde_json::Value> {
    // A request still holding the session sees it cleared as well.
    let existing = state.sessions.lock().await.remove(&req.session_id);
    if let Some(session) = existing {
        session.lock().await.reset();
    }
    Json(serde_json::json!({ "session_id": req.session_id, "reset": true }))
}

// ============ POST /api/upload ============

#[derive(Deserialize)]
struct UploadParams {
    filename: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<IngestReport>, AppError> {
    if body.is_empty() {
        return Err(bad_request("upload body is empty"));
    }

    let report = ingest_upload(&state.ctx, &params.filename, &body).await?;
    if report.files_indexed > 0 {
        let fresh = state.ctx.load_index()?;
        *state.index.write().await = Arc::new(fresh);
    }
    Ok(Json(report))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    records: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        records: state.index.read().await.len(),
    })
}

const CHAT_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>docqa</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 760px; margin: 2rem auto; padding: 0 1rem; }
  #log { border: 1px solid #ddd; border-radius: 6px; padding: 1rem; min-height: 300px; }
  .q { font-weight: 600; margin-top: 1rem; }
  .a { white-space: pre-wrap; }
  .src { color: #555; font-size: 0.9em; }
  form { display: flex; gap: 0.5rem; margin-top: 1rem; }
  input[type=text] { flex: 1; padding: 0.5rem; }
</style>
</head>
<body>
<h1>Ask your documents</h1>
<p>
  <input type="file" id="file" accept="application/pdf">
  <button id="upload">Upload &amp; index</button>
  <button id="reset">Reset conversation</button>
  <span id="status"></span>
</p>
<div id="log"></div>
<form id="ask">
  <input type="text" id="question" placeholder="Ask a question about your documents" autocomplete="off">
  <button type="submit">Ask</button>
</form>
<script>
let sessionId = null;
const log = document.getElementById('log');
const status = document.getElementById('status');

function add(cls, text) {
  const div = document.createElement('div');
  div.className = cls;
  div.textContent = text;
  log.appendChild(div);
  return div;
}

document.getElementById('ask').addEventListener('submit', async (ev) => {
  ev.preventDefault();
  const input = document.getElementById('question');
  const question = input.value.trim();
  if (!question) return;
  input.value = '';
  add('q', question);
  const res = await fetch('/api/ask', {
    method: 'POST',
    headers: { 'Content-Type': 'application/json' },
    body: JSON.stringify({ question, session_id: sessionId }),
  });
  const body = await res.json();
  if (!res.ok) { add('a', 'Error: ' + body.error.message); return; }
  sessionId = body.session_id;
  add('a', body.answer);
  if (body.grounded) {
    add('src', 'Sources:\n' + body.sources.map(s => ' - ' + s).join('\n'));
  } else {
    add('src', 'No sources because the answer was not found in the documents.');
  }
});

document.getElementById('reset').addEventListener('click', async () => {
  if (sessionId) {
    await fetch('/api/reset', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ session_id: sessionId }),
    });
  }
  log.textContent = '';
});

document.getElementById('upload').addEventListener('click', async () => {
  const file = document.getElementById('file').files[0];
  if (!file) return;
  status.textContent = 'Indexing ' + file.name + '...';
  const res = await fetch('/api/upload?filename=' + encodeURIComponent(file.name), {
    method: 'POST',
    headers: { 'Content-Type': 'application/pdf' },
    body: file,
  });
  const body = await res.json();
  if (!res.ok) { status.textContent = 'Error: ' + body.error.message; return; }
  status.textContent = body.failures.length
    ? 'Failed: ' + body.failures.map(f => f.error).join('; ')
    : 'Indexed ' + body.chunks + ' chunks (' + body.records_total + ' total)';
});
</script>
</body>
</html>
"#;
