// Racing Registry - Web Server
// REST API with Axum over the shared Registry

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use racing_registry::{
    ChangeLog, Dog, DogTitle, EditContext, Eligibility, MeetResult, RaceChange, RaceResult,
    ReconciliationReport, RefreshOutcome, Registry, RegistryConfig, RegistryError, ResultChange,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

const EDITOR_HEADER: &str = "x-editor-id";
const API_SOURCE: &str = "api";

/// Shared application state
#[derive(Clone)]
struct AppState {
    registry: Arc<Mutex<Registry>>,
}

impl AppState {
    fn registry(&self) -> Result<MutexGuard<'_, Registry>, ApiError> {
        self.registry
            .lock()
            .map_err(|_| ApiError::internal("registry lock poisoned"))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: &str) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::AlreadyExists { .. } | RegistryError::ConcurrencyConflict { .. } => {
                StatusCode::CONFLICT
            }
            RegistryError::Storage(_) | RegistryError::Serialization(_) | RegistryError::Import(_) => {
                tracing::error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::failure(self.message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

/// The acting editor for a mutating request.
fn editor(headers: &HeaderMap) -> Result<EditContext, ApiError> {
    let actor = headers
        .get(EDITOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError {
            status: StatusCode::UNAUTHORIZED,
            message: format!("missing {} header", EDITOR_HEADER),
        })?;
    Ok(EditContext::now(actor, API_SOURCE))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/dogs
async fn list_dogs(State(state): State<AppState>) -> ApiResult<Vec<Dog>> {
    let registry = state.registry()?;
    ok(registry.list_dogs()?)
}

/// GET /api/dogs/:cwa
async fn get_dog(State(state): State<AppState>, Path(cwa): Path<String>) -> ApiResult<Dog> {
    let registry = state.registry()?;
    ok(registry.get_dog(&cwa)?)
}

/// GET /api/dogs/:cwa/titles
async fn dog_titles(State(state): State<AppState>, Path(cwa): Path<String>) -> ApiResult<Vec<DogTitle>> {
    let registry = state.registry()?;
    ok(registry.list_dog_titles(&cwa)?)
}

/// GET /api/dogs/:cwa/evaluation - grade and titles as of today, no writes
async fn evaluate_dog(State(state): State<AppState>, Path(cwa): Path<String>) -> ApiResult<Eligibility> {
    let registry = state.registry()?;
    let today = chrono::Utc::now().date_naive();
    ok(registry.evaluate_dog(&cwa, today)?)
}

/// POST /api/dogs/:cwa/refresh
async fn refresh_dog(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(cwa): Path<String>,
) -> ApiResult<RefreshOutcome> {
    let ctx = editor(&headers)?;
    let mut registry = state.registry()?;
    ok(registry.refresh_dog(&cwa, &ctx)?)
}

/// POST /api/dogs/:cwa/reconcile
async fn reconcile_dog(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(cwa): Path<String>,
) -> ApiResult<ReconciliationReport> {
    let ctx = editor(&headers)?;
    let mut registry = state.registry()?;
    ok(registry.reconcile_dog_titles(&cwa, &ctx)?)
}

/// POST /api/meet_results
async fn record_meet_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(result): Json<MeetResult>,
) -> Result<(StatusCode, Json<ApiResponse<ResultChange>>), ApiError> {
    let ctx = editor(&headers)?;
    let mut registry = state.registry()?;
    let change = registry.record_meet_result(result, &ctx)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(change))))
}

/// GET /api/meets/:meet/race_results
async fn meet_race_results(
    State(state): State<AppState>,
    Path(meet): Path<String>,
) -> ApiResult<Vec<RaceResult>> {
    let registry = state.registry()?;
    ok(registry.list_race_results_for_meet(&meet)?)
}

/// POST /api/race_results - records the race and rolls its meet up
async fn record_race_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(result): Json<RaceResult>,
) -> Result<(StatusCode, Json<ApiResponse<RaceChange>>), ApiError> {
    let ctx = editor(&headers)?;
    let mut registry = state.registry()?;
    let change = registry.record_race_result(result, &ctx)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(change))))
}

#[derive(Deserialize)]
struct ChangeLogQuery {
    table: Option<String>,
    key: Option<String>,
    actor: Option<String>,
}

/// GET /api/change_log?table=&key= | ?actor=
async fn change_log(
    State(state): State<AppState>,
    Query(query): Query<ChangeLogQuery>,
) -> ApiResult<Vec<ChangeLog>> {
    let registry = state.registry()?;
    let entries = match query {
        ChangeLogQuery { table: Some(table), key: Some(key), .. } => {
            registry.change_log_for_record(&table, &key)?
        }
        ChangeLogQuery { actor: Some(actor), .. } => registry.change_log_for_actor(&actor)?,
        _ => registry.change_log()?,
    };
    ok(entries)
}

/// GET /api/change_log/:id
async fn change_log_entry(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<ChangeLog> {
    let registry = state.registry()?;
    ok(registry.find_change_log(id)?)
}

// ============================================================================
// Main Server
// ============================================================================

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/dogs", get(list_dogs))
        .route("/dogs/:cwa", get(get_dog))
        .route("/dogs/:cwa/titles", get(dog_titles))
        .route("/dogs/:cwa/evaluation", get(evaluate_dog))
        .route("/dogs/:cwa/refresh", post(refresh_dog))
        .route("/dogs/:cwa/reconcile", post(reconcile_dog))
        .route("/meet_results", post(record_meet_result))
        .route("/meets/:meet/race_results", get(meet_race_results))
        .route("/race_results", post(record_race_result))
        .route("/change_log", get(change_log))
        .route("/change_log/:id", get(change_log_entry))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = RegistryConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let registry = Registry::open(&config)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
    let state = AppState {
        registry: Arc::new(Mutex::new(registry)),
    };

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server_addr))?;

    tracing::info!(addr = %config.server_addr, "registry server listening");

    axum::serve(listener, router(state))
        .await
        .context("Server stopped")?;
    Ok(())
}
