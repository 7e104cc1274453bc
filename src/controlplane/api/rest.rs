//! REST API Handlers
//!
//! Implements the `/api/v1` endpoints for drive adoption and pool
//! management. Successful responses are wrapped as
//! `{"status": "success", "data": ...}`, failures as `{"error": "..."}`.

use crate::controlplane::{CreatePoolRequest, Orchestrator};
use crate::error::{Error, ErrorKind};
use crate::pool::PoolPatch;
use axum::{
    extract::{rejection::JsonRejection, Json, Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Success envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSuccess<T> {
    pub status: String,
    pub data: T,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DrivesQuery {
    /// Rescan the host before answering
    scan: bool,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
    cors_origins: Vec<HeaderValue>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            cors_origins: Vec::new(),
        }
    }

    /// Restrict CORS to these origins; any origin is allowed when empty
    pub fn with_cors_origins(mut self, origins: Vec<HeaderValue>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        let api = Router::new()
            // Drive endpoints
            .route("/drives", get(list_drives))
            .route("/drives/adopted", get(list_adopted_drives))
            .route("/drives/adopt/:key", post(adopt_drive))
            .route("/drives/adopted/:uuid", delete(unadopt_drive))
            // Pool endpoints
            .route("/pools", get(list_pools))
            .route("/pool", post(create_pool))
            .route(
                "/pool/:uuid",
                get(get_pool).patch(patch_pool).delete(delete_pool),
            )
            .route("/pool/:uuid/build", post(build_pool))
            // Health endpoint
            .route("/health", get(health_check));

        Router::new()
            .nest("/api/v1", api)
            .layer(cors_layer(self.cors_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

// =============================================================================
// Response Helpers
// =============================================================================

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Infrastructure | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn success<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(ApiSuccess {
            status: "success".into(),
            data,
        }),
    )
        .into_response()
}

fn failure(err: Error) -> Response {
    let status = status_for(err.kind());
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    (
        status,
        Json(ApiErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: crate::error::Result<T>) -> Response {
    match result {
        Ok(data) => success(data),
        Err(e) => failure(e),
    }
}

fn parse_uuid(raw: &str) -> crate::error::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::InvalidUuid(raw.to_string()))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> crate::error::Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::InvalidRequestBody(rejection.body_text()))
}

// =============================================================================
// Drive Handlers
// =============================================================================

/// List system drives, optionally rescanning first
async fn list_drives(State(state): State<AppState>, Query(query): Query<DrivesQuery>) -> Response {
    if query.scan {
        debug!("Rescanning drives");
        respond(state.orchestrator.rescan().await)
    } else {
        success(state.orchestrator.system_drives())
    }
}

/// List free adopted drives
async fn list_adopted_drives(State(state): State<AppState>) -> Response {
    success(state.orchestrator.free_drives())
}

/// Adopt a drive by key
async fn adopt_drive(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    info!("Adopting drive {}", key);
    respond(state.orchestrator.adopt(&key))
}

/// Forget a free adoption
async fn unadopt_drive(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    respond(parse_uuid(&uuid).and_then(|uuid| state.orchestrator.unadopt(uuid)))
}

// =============================================================================
// Pool Handlers
// =============================================================================

async fn list_pools(State(state): State<AppState>) -> Response {
    success(state.orchestrator.pools())
}

async fn get_pool(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    respond(parse_uuid(&uuid).and_then(|uuid| state.orchestrator.pool(uuid)))
}

async fn create_pool(
    State(state): State<AppState>,
    payload: Result<Json<CreatePoolRequest>, JsonRejection>,
) -> Response {
    let request = match body(payload) {
        Ok(request) => request,
        Err(e) => return failure(e),
    };
    info!("Creating pool {}", request.name);
    respond(state.orchestrator.create_pool(request).await)
}

async fn patch_pool(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    payload: Result<Json<PoolPatch>, JsonRejection>,
) -> Response {
    respond(
        parse_uuid(&uuid)
            .and_then(|uuid| Ok((uuid, body(payload)?)))
            .and_then(|(uuid, patch)| state.orchestrator.patch_pool(uuid, &patch)),
    )
}

async fn build_pool(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    let uuid = match parse_uuid(&uuid) {
        Ok(uuid) => uuid,
        Err(e) => return failure(e),
    };
    info!("Building pool {}", uuid);
    respond(state.orchestrator.build_pool(uuid).await)
}

async fn delete_pool(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    let uuid = match parse_uuid(&uuid) {
        Ok(uuid) => uuid,
        Err(e) => return failure(e),
    };
    info!("Deleting pool {}", uuid);
    respond(state.orchestrator.delete_pool(uuid).await)
}

// =============================================================================
// Health
// =============================================================================

async fn health_check(State(state): State<AppState>) -> Response {
    success(state.orchestrator.status())
}
