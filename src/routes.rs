use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use include_dir::{include_dir, Dir};
use parking_lot::RwLock;
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{BackendRequest, ChartKind, DocumentRequest},
    pipeline::{self, Services},
    workflow::{SessionView, WorkflowState},
};

static STATIC_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/static");

type Session = Arc<Mutex<WorkflowState>>;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    pub services: Arc<Services>,
    idle_ttl: Duration,
}

impl AppState {
    pub fn new(services: Services, idle_ttl: Duration) -> Self {
        Self { sessions: Arc::default(), services: Arc::new(services), idle_ttl }
    }

    fn session(&self, id: Uuid) -> Result<Session, ApiError> {
        self.sessions.read().get(&id).cloned().ok_or(ApiError::NotFound)
    }

    /// Drops sessions idle for longer than the TTL and deletes their scratch
    /// runs. A session that is mid-action is never idle.
    async fn evict_idle(&self) {
        let now = Utc::now();
        let evicted: Vec<(Uuid, Session)> = {
            let mut sessions = self.sessions.write();
            let stale: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, session)| {
                    session.try_lock().is_ok_and(|state| {
                        now.signed_duration_since(state.updated_at).to_std().is_ok_and(|idle| idle > self.idle_ttl)
                    })
                })
                .map(|(id, _)| *id)
                .collect();
            stale.into_iter().filter_map(|id| sessions.remove(&id).map(|s| (id, s))).collect()
        };
        for (id, session) in evicted {
            pipeline::reset(&mut *session.lock().await).await;
            tracing::info!("🧹 Session {} evicted after inactivity", id);
        }
    }

    async fn remove(&self, id: Uuid) -> Result<(), ApiError> {
        let session = self.sessions.write().remove(&id).ok_or(ApiError::NotFound)?;
        pipeline::reset(&mut *session.lock().await).await;
        tracing::info!("🗑️ Session {} deleted", id);
        Ok(())
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/backends", get(list_backends))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/photo", post(upload_photo))
        .route("/api/sessions/:id/analyze", post(analyze))
        .route("/api/sessions/:id/document", post(build_document))
        .route("/api/sessions/:id/document.pdf", get(download_document))
        .route("/api/sessions/:id/charts/:chart", get(get_chart))
        .route("/api/sessions/:id/backend", put(select_backend))
        .route("/api/sessions/:id/reset", post(reset_session))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Error response that also carries the session as it stands after the refusal.
pub struct Refused {
    error: ApiError,
    session: Option<SessionView>,
}

impl Refused {
    fn new(error: ApiError, state: &WorkflowState) -> Self { Self { error, session: Some(state.view()) } }
}

impl From<ApiError> for Refused {
    fn from(error: ApiError) -> Self { Self { error, session: None } }
}

impl IntoResponse for Refused {
    fn into_response(self) -> Response {
        tracing::warn!("⚠️ Request refused ({}): {}", self.error.status(), self.error);
        self.error.respond(self.session)
    }
}

type ViewResult = Result<Json<SessionView>, Refused>;

pub async fn index() -> Response {
    match STATIC_DIR.get_file("index.html").and_then(|f| f.contents_utf8()) {
        Some(page) => Html(page).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn list_backends(State(state): State<AppState>) -> Json<serde_json::Value> {
    let backends: Vec<_> = state
        .services
        .vision
        .configured()
        .into_iter()
        .map(|k| json!({ "slug": k.slug(), "name": k.display_name(), "model": k.model() }))
        .collect();
    Json(json!({ "backends": backends, "default": "all" }))
}

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    state.evict_idle().await;
    let id = Uuid::new_v4();
    let session = WorkflowState::new(id);
    let view = session.view();
    state.sessions.write().insert(id, Arc::new(Mutex::new(session)));
    tracing::info!("🎯 Session {} created", id);
    (StatusCode::CREATED, Json(view))
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> ViewResult {
    let session = state.session(id)?;
    let guard = session.lock().await;
    Ok(Json(guard.view()))
}

pub async fn delete_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, Refused> {
    state.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upload_photo(Path(id): Path<Uuid>, State(state): State<AppState>, mut multipart: Multipart) -> ViewResult {
    let session = state.session(id)?;
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
        if field.name() != Some("photo") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        upload = Some((filename, bytes));
        break;
    }
    let mut guard = session.lock().await;
    let Some((filename, bytes)) = upload else {
        let err = guard.fail(ApiError::BadRequest("multipart field \"photo\" is missing".into()));
        return Err(Refused::new(err, &guard));
    };
    pipeline::upload(&state.services, &mut guard, bytes, &filename).await.map_err(|e| Refused::new(e, &guard))?;
    Ok(Json(guard.view()))
}

pub async fn analyze(Path(id): Path<Uuid>, State(state): State<AppState>) -> ViewResult {
    let session = state.session(id)?;
    let mut guard = session.lock().await;
    tracing::info!("🚀 Analyzing session {}", id);
    pipeline::analyze(&state.services, &mut guard).await.map_err(|e| Refused::new(e, &guard))?;
    Ok(Json(guard.view()))
}

pub async fn build_document(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<DocumentRequest>,
) -> ViewResult {
    let session = state.session(id)?;
    let mut guard = session.lock().await;
    pipeline::build_document(&state.services, &mut guard, body.tier).await.map_err(|e| Refused::new(e, &guard))?;
    Ok(Json(guard.view()))
}

pub async fn download_document(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, Refused> {
    let session = state.session(id)?;
    let mut guard = session.lock().await;
    let document = pipeline::download(&mut guard).map_err(|e| Refused::new(e, &guard))?;

    let filename = format!("attachment; filename=\"assessment_{}.pdf\"", id.simple());
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    if let Ok(value) = HeaderValue::from_str(&filename) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok((StatusCode::OK, headers, document.bytes).into_response())
}

pub async fn get_chart(Path((id, chart)): Path<(Uuid, String)>, State(state): State<AppState>) -> Result<Response, Refused> {
    let kind = ChartKind::from_slug(&chart).ok_or_else(|| ApiError::BadRequest(format!("unknown chart {:?}", chart)))?;
    let session = state.session(id)?;
    let path = pipeline::chart_path(&*session.lock().await, kind);
    let Some(path) = path else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response()),
        Err(e) => {
            tracing::error!("Failed to read chart {}: {}", path.display(), e);
            Ok(StatusCode::NOT_FOUND.into_response())
        }
    }
}

pub async fn select_backend(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<BackendRequest>,
) -> ViewResult {
    let session = state.session(id)?;
    let mut guard = session.lock().await;
    pipeline::select_backend(&state.services, &mut guard, &body.backend).map_err(|e| Refused::new(e, &guard))?;
    Ok(Json(guard.view()))
}

pub async fn reset_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> ViewResult {
    let session = state.session(id)?;
    let mut guard = session.lock().await;
    pipeline::reset(&mut guard).await;
    Ok(Json(guard.view()))
}
