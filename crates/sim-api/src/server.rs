//! HTTP surface over [`GameService`]: JSON bodies, the shared `ApiError`
//! envelope, and one mutex-guarded service behind the router. Turn runs
//! call the model over blocking HTTP, so they go through `spawn_blocking`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use contracts::{ApiError, EnvNode, ErrorCode, GameConfig, LogEntry, ModelCallFailure, SCHEMA_VERSION_V1};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::model::HttpModelClient;
use crate::{run_events_shared, GameService, GameStatus, ServiceError};

const DEFAULT_LOG_PAGE: usize = 50;
const MAX_LOG_PAGE: usize = 500;
const DEFAULT_RUN_EVENTS: usize = 1;

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Where and how the server reaches the model endpoint.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: Option<u64>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5".to_string(),
            temperature: GameConfig::default().model_temperature,
            timeout_secs: None,
        }
    }
}

pub struct AppState {
    service: Mutex<GameService>,
    model: ModelSettings,
}

impl AppState {
    pub fn new(service: GameService, model: ModelSettings) -> Self {
        Self {
            service: Mutex::new(service),
            model,
        }
    }
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn invalid_query(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidQuery, message, details),
        }
    }

    fn internal(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ApiError::new(ErrorCode::InternalError, message, details),
        }
    }

    fn from_service(err: ServiceError) -> Self {
        match err {
            ServiceError::GameNotFound(id) => Self {
                status: StatusCode::NOT_FOUND,
                error: ApiError::new(
                    ErrorCode::GameNotFound,
                    "game id does not match a stored game",
                    Some(format!("game_id={id}")),
                ),
            },
            ServiceError::Schema(e) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                error: ApiError::new(
                    ErrorCode::SchemaViolation,
                    "world snapshot failed validation",
                    Some(e.to_string()),
                ),
            },
            ServiceError::Persistence(e) => {
                Self::internal("persistence operation failed", Some(e.to_string()))
            }
            ServiceError::LockPoisoned => Self::lock_poisoned(),
        }
    }

    fn from_model(failure: ModelCallFailure) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            error: ApiError::new(
                ErrorCode::ModelUnavailable,
                "model endpoint is unreachable",
                Some(failure.to_string()),
            ),
        }
    }

    fn lock_poisoned() -> Self {
        Self::internal("service lock poisoned", None)
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<(), ServerError> {
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/games", post(create_game).get(list_games))
        .route("/api/games/{id}", get(get_game))
        .route("/api/games/{id}/run", post(run_game))
        .route("/api/games/{id}/save", post(save_game))
        .route("/api/games/{id}/logs", get(get_logs))
        .route("/api/games/{id}/status", get(get_status))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct CreateGameRequest {
    id: Option<String>,
    data: EnvNode,
}

#[derive(Debug, Serialize)]
struct CreateGameResponse {
    schema_version: String,
    game_id: String,
    status: GameStatus,
}

async fn create_game(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateGameRequest>,
) -> Result<Json<CreateGameResponse>, HttpApiError> {
    let game_id = request
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("game-{}", Utc::now().timestamp_millis()));

    let mut service = state.service.lock().map_err(|_| HttpApiError::lock_poisoned())?;
    service
        .create_game(&game_id, &request.data)
        .map_err(HttpApiError::from_service)?;
    let status = service.status(&game_id).map_err(HttpApiError::from_service)?;

    Ok(Json(CreateGameResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        game_id,
        status,
    }))
}

#[derive(Debug, Serialize)]
struct ListGamesResponse {
    schema_version: String,
    games: Vec<String>,
}

async fn list_games(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListGamesResponse>, HttpApiError> {
    let service = state.service.lock().map_err(|_| HttpApiError::lock_poisoned())?;
    let games = service.list_games().map_err(HttpApiError::from_service)?;
    Ok(Json(ListGamesResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        games,
    }))
}

async fn get_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EnvNode>, HttpApiError> {
    let mut service = state.service.lock().map_err(|_| HttpApiError::lock_poisoned())?;
    let node = service.snapshot(&id).map_err(HttpApiError::from_service)?;
    Ok(Json(node))
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    events: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    schema_version: String,
    game_id: String,
    dispatched: usize,
    status: GameStatus,
}

async fn run_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RunRequest>,
) -> Result<Json<RunResponse>, HttpApiError> {
    let events = request.events.unwrap_or(DEFAULT_RUN_EVENTS);
    if events == 0 {
        return Err(HttpApiError::invalid_query(
            "events must be >= 1",
            Some("events=0".to_string()),
        ));
    }

    let task_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || -> Result<(usize, GameStatus), HttpApiError> {
        let mut client = HttpModelClient::new(
            &task_state.model.base_url,
            &task_state.model.model,
            task_state.model.temperature,
            task_state.model.timeout_secs,
        )
        .map_err(HttpApiError::from_model)?;
        // The service lock is dropped while each model call is in flight;
        // snapshot, logs, and status stay readable during a run.
        let dispatched = run_events_shared(&task_state.service, &id, events, &mut client)
            .map_err(HttpApiError::from_service)?;
        let mut service = task_state
            .service
            .lock()
            .map_err(|_| HttpApiError::lock_poisoned())?;
        let status = service.status(&id).map_err(HttpApiError::from_service)?;
        Ok((dispatched, status))
    })
    .await
    .map_err(|e| HttpApiError::internal("run task failed", Some(e.to_string())))?;

    let (dispatched, status) = outcome?;
    Ok(Json(RunResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        game_id: status.game_id.clone(),
        dispatched,
        status,
    }))
}

#[derive(Debug, Serialize)]
struct SaveResponse {
    schema_version: String,
    game_id: String,
}

async fn save_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SaveResponse>, HttpApiError> {
    let mut service = state.service.lock().map_err(|_| HttpApiError::lock_poisoned())?;
    service.save_game(&id).map_err(HttpApiError::from_service)?;
    Ok(Json(SaveResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        game_id: id,
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    target: Option<String>,
    limit: Option<usize>,
    cursor: Option<u64>,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    schema_version: String,
    game_id: String,
    entries: Vec<LogEntry>,
    /// Pass back as `cursor` to continue paging; absent on the last page.
    next_cursor: Option<u64>,
}

async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, HttpApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_PAGE).clamp(1, MAX_LOG_PAGE);
    let service = state.service.lock().map_err(|_| HttpApiError::lock_poisoned())?;
    let entries = service
        .query_logs(&id, query.target.as_deref(), limit, query.cursor)
        .map_err(HttpApiError::from_service)?;
    let next_cursor = if entries.len() == limit {
        entries.last().map(|e| e.id)
    } else {
        None
    };
    Ok(Json(LogsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        game_id: id,
        entries,
        next_cursor,
    }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    schema_version: String,
    status: GameStatus,
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, HttpApiError> {
    let mut service = state.service.lock().map_err(|_| HttpApiError::lock_poisoned())?;
    let status = service.status(&id).map_err(HttpApiError::from_service)?;
    Ok(Json(StatusResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqliteGameStore;

    #[test]
    fn service_errors_map_to_the_expected_statuses() {
        let not_found = HttpApiError::from_service(ServiceError::GameNotFound("g1".into()));
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.error.error_code, ErrorCode::GameNotFound);

        let schema = HttpApiError::from_service(ServiceError::Schema(
            sim_core::error::SchemaError::new(vec![], "bad root"),
        ));
        assert_eq!(schema.status, StatusCode::UNPROCESSABLE_ENTITY);

        let model = HttpApiError::from_model(ModelCallFailure::timeout("deadline"));
        assert_eq!(model.status, StatusCode::BAD_GATEWAY);
        assert_eq!(model.error.error_code, ErrorCode::ModelUnavailable);

        let poisoned = HttpApiError::from_service(ServiceError::LockPoisoned);
        assert_eq!(poisoned.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(poisoned.error.error_code, ErrorCode::InternalError);
    }

    #[test]
    fn router_builds_with_a_fresh_service() {
        let service = GameService::new(SqliteGameStore::open_in_memory().unwrap());
        let state = Arc::new(AppState::new(service, ModelSettings::default()));
        let _router = router(state);
    }
}
