//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness and version |
//! | `GET`  | `/api/knowledge/search?q=&k=` | Nearest knowledge chunks |
//! | `POST` | `/api/knowledge/reindex?blocking=` | Rebuild the knowledge index |
//! | `GET`  | `/api/knowledge/status` | Index and reindex status |
//! | `GET`  | `/api/pipeline` | Current voice pipeline profile and catalog |
//! | `POST` | `/api/pipeline` | Select a profile: `{"profile": "cloud"}` |
//! | `GET`  | `/api/devices` | List devices from the SDM API |
//! | `POST` | `/api/devices/command` | `{"device_id", "action", "params"}` |
//! | `GET`  | `/auth/login` | Redirect to the provider's consent page |
//! | `GET`  | `/auth/callback` | PKCE code exchange |
//! | `GET`  | `/api/cache/stats` | Cache statistics |
//! | `POST` | `/api/cache/cleanup` | Remove expired cache entries |
//!
//! # Error Contract
//!
//! Every failure is rendered from a [`HearthError`]:
//!
//! ```json
//! { "error": { "code": "conflict", "message": "a reindex is already running" } }
//! ```
//!
//! Knowledge endpoints other than status answer `knowledge_disabled` (400)
//! when `[knowledge].enabled = false`.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::cache::CacheManager;
use crate::config::Config;
use crate::devices::{map_command, validate_id, DeviceClient};
use crate::error::HearthError;
use crate::oauth::OAuthService;
use crate::pipeline::{PipelineState, PROFILES};
use crate::reindex::ReindexOrchestrator;
use crate::vector_store::{hit_source, VectorStore};

const MAX_QUERY_CHARS: usize = 1000;
const MAX_K: i64 = 10;

/// Everything a handler can reach, built once per process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<VectorStore>,
    pub reindex: ReindexOrchestrator,
    pub cache: Arc<CacheManager>,
    pub pipeline: Arc<PipelineState>,
    pub devices: Arc<DeviceClient>,
    pub oauth: Arc<OAuthService>,
}

/// Build the shared state from `config`, using the configured embedder.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let store = Arc::new(VectorStore::new(&config));
    build_state_with_store(config, store).await
}

/// Build the shared state around an existing vector store.
pub async fn build_state_with_store(
    config: Config,
    store: Arc<VectorStore>,
) -> anyhow::Result<AppState> {
    let config = Arc::new(config);
    let cache = CacheManager::open(&config.cache).await?;
    let pipeline = PipelineState::new(&config.pipeline.default_profile)?;
    let devices = DeviceClient::new(&config.devices)?;
    let oauth = OAuthService::new(&config.oauth, &config.devices)?;

    Ok(AppState {
        reindex: ReindexOrchestrator::new(Arc::clone(&config), Arc::clone(&store)),
        config,
        store,
        cache: Arc::new(cache),
        pipeline: Arc::new(pipeline),
        devices: Arc::new(devices),
        oauth: Arc::new(oauth),
    })
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/knowledge/search", get(handle_search))
        .route("/api/knowledge/reindex", post(handle_reindex))
        .route("/api/knowledge/status", get(handle_knowledge_status))
        .route("/api/pipeline", get(handle_get_pipeline).post(handle_set_pipeline))
        .route("/api/devices", get(handle_list_devices))
        .route("/api/devices/command", post(handle_device_command))
        .route("/auth/login", get(handle_login))
        .route("/auth/callback", get(handle_callback))
        .route("/api/cache/stats", get(handle_cache_stats))
        .route("/api/cache/cleanup", post(handle_cache_cleanup))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process is stopped.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = build_state(config).await?;

    if state.config.knowledge.enabled {
        if state.store.initialize().await {
            info!("knowledge base ready");
        } else {
            warn!("knowledge base unavailable; search will return no results");
        }
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "hearth listening");
    axum::serve(listener, router(state)).await?;
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

/// Handler error; renders a [`HearthError`] as the JSON error body.
pub struct AppError(HearthError);

impl From<HearthError> for AppError {
    fn from(err: HearthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        } else {
            debug!(code = self.0.code(), error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| HearthError::BadRequest(e.body_text()).into())
}

fn require_knowledge(state: &AppState) -> ApiResult<()> {
    if state.config.knowledge.enabled {
        Ok(())
    } else {
        Err(HearthError::KnowledgeDisabled.into())
    }
}

// ============ Handlers ============

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    k: Option<String>,
}

#[derive(Serialize)]
struct SearchResultItem {
    content: String,
    source: String,
    heading: String,
    score: f32,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchResultItem>,
}

/// Resolve `k`: absent means the configured default, anything else is
/// clamped to `[1, 10]`.
fn resolve_k(raw: Option<&str>, default_k: usize) -> Result<usize, HearthError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default_k.clamp(1, MAX_K as usize)),
        Some(s) => s
            .parse::<i64>()
            .map(|k| k.clamp(1, MAX_K) as usize)
            .map_err(|_| HearthError::BadRequest(format!("k must be an integer, got '{}'", s))),
    }
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    require_knowledge(&state)?;

    let query = params
        .q
        .ok_or_else(|| HearthError::BadRequest("q is required".to_string()))?;
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(HearthError::BadRequest(format!(
            "q must be at most {} characters",
            MAX_QUERY_CHARS
        ))
        .into());
    }
    let k = resolve_k(params.k.as_deref(), state.config.knowledge.default_k)?;

    let hits = state.store.search(&query, k).await;
    let results = hits
        .iter()
        .map(|hit| SearchResultItem {
            content: hit.content.clone(),
            source: hit_source(hit).to_string(),
            heading: hit.heading().to_string(),
            score: hit.score,
        })
        .collect();

    Ok(Json(SearchResponse { query, results }))
}

#[derive(Deserialize)]
struct ReindexParams {
    #[serde(default)]
    blocking: Option<String>,
}

fn truthy(flag: Option<&str>) -> bool {
    matches!(
        flag.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

async fn handle_reindex(
    State(state): State<AppState>,
    Query(params): Query<ReindexParams>,
) -> ApiResult<Response> {
    require_knowledge(&state)?;

    if truthy(params.blocking.as_deref()) {
        let result = state.reindex.reindex_blocking().await?;
        Ok(Json(result).into_response())
    } else {
        state.reindex.reindex_background()?;
        Ok((StatusCode::ACCEPTED, Json(json!({ "started": true }))).into_response())
    }
}

#[derive(Serialize)]
struct KnowledgeStatus {
    enabled: bool,
    initialized: bool,
    document_count: i64,
    embedding_model: String,
    index_path: String,
    reindex_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_knowledge_status(State(state): State<AppState>) -> Json<KnowledgeStatus> {
    let store_status = state.store.status().await;
    let mut status_error = store_status.error;
    let document_count = if store_status.initialized {
        match state.store.count().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to count indexed chunks");
                status_error = Some(e.to_string());
                -1
            }
        }
    } else {
        0
    };

    Json(KnowledgeStatus {
        enabled: state.config.knowledge.enabled,
        initialized: store_status.initialized,
        document_count,
        embedding_model: store_status.embedding_model,
        index_path: store_status.index_path,
        reindex_running: state.reindex.is_running(),
        error: status_error,
    })
}

async fn handle_get_pipeline(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "current": state.pipeline.current(),
        "profiles": PROFILES,
    }))
}

#[derive(Deserialize)]
struct SelectProfile {
    profile: String,
}

async fn handle_set_pipeline(
    State(state): State<AppState>,
    payload: Result<Json<SelectProfile>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = json_body(payload)?;
    let profile = state.pipeline.select(&req.profile)?;
    Ok(Json(json!({ "current": profile })))
}

async fn handle_list_devices(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let token = state.oauth.access_token().await?;
    let devices = state.devices.list_devices(&token).await?;
    Ok(Json(devices))
}

#[derive(Deserialize)]
struct DeviceCommand {
    device_id: String,
    action: String,
    #[serde(default)]
    params: Option<Value>,
}

async fn handle_device_command(
    State(state): State<AppState>,
    payload: Result<Json<DeviceCommand>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let req = json_body(payload)?;
    validate_id("device_id", &req.device_id)?;
    // reject unknown actions before asking for a token
    if map_command(&req.action).is_none() {
        return Err(HearthError::UnsupportedCommand(req.action).into());
    }

    let token = state.oauth.access_token().await?;
    let result = state
        .devices
        .execute(
            &token,
            &req.device_id,
            &req.action,
            req.params.unwrap_or_else(|| json!({})),
        )
        .await?;
    Ok(Json(json!({ "ok": true, "result": result })))
}

async fn handle_login(State(state): State<AppState>) -> ApiResult<Redirect> {
    let request = state.oauth.begin_authorization().await?;
    Ok(Redirect::to(&request.authorization_url))
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn handle_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Json<Value>> {
    if let Some(provider_error) = params.error {
        return Err(HearthError::BadRequest(format!(
            "authorization denied: {}",
            provider_error
        ))
        .into());
    }
    let (Some(code), Some(auth_state)) = (params.code, params.state) else {
        return Err(HearthError::BadRequest("code and state are required".to_string()).into());
    };

    let summary = state.oauth.complete(&auth_state, &code).await?;
    Ok(Json(json!({
        "ok": true,
        "expires_in": summary.expires_in,
        "has_refresh_token": summary.has_refresh_token,
    })))
}

async fn handle_cache_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state.cache.get_stats().await?;
    Ok(Json(json!(stats)))
}

async fn handle_cache_cleanup(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let removed = state.cache.cleanup_expired().await?;
    Ok(Json(json!({ "removed": removed })))
}
