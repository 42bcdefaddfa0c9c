//! Operator HTTP surface: manual re-sync, exceptions list, course picker.

use crate::config::ApiConfig;
use crate::error::{RosterSyncError, RosterSyncResult};
use crate::sync::RosterSyncService;
use crate::types::InstanceId;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post}
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct AppState {
    bearer_token: Option<String>,
    sync_service: Arc<RosterSyncService>
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str
}

impl IntoResponse for RosterSyncError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::InstanceNotFound(_) => (StatusCode::NOT_FOUND, "INSTANCE_NOT_FOUND"),
            Self::InvalidSelectionKey(_) => (StatusCode::BAD_REQUEST, "INVALID_SELECTION_KEY"),
            Self::DatabaseError(e) => {
                error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code
        };
        (status, Json(body)).into_response()
    }
}

pub fn create_router(sync_service: Arc<RosterSyncService>, bearer_token: Option<String>) -> Router {
    let state = AppState {
        bearer_token: bearer_token.filter(|t| !t.is_empty()),
        sync_service
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/instances/{id}/resync", post(resync))
        .route("/instances/{id}/exceptions", get(exceptions))
        .route("/courses", get(courses))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: ApiConfig,
    sync_service: Arc<RosterSyncService>
}

impl ApiServer {
    pub fn new(config: ApiConfig, sync_service: Arc<RosterSyncService>) -> Self {
        Self {
            config,
            sync_service
        }
    }

    pub async fn run(&self) -> RosterSyncResult<()> {
        let app = create_router(self.sync_service.clone(), self.config.bearer_token.clone());

        let addr = format!("0.0.0.0:{}", self.config.port);
        info!(addr = %addr, "Starting operator API");

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RosterSyncError::ServerError(format!("Failed to bind: {e}")))?;

        axum::serve(listener, app)
            .await
            .map_err(|e| RosterSyncError::ServerError(format!("Server error: {e}")))?;

        Ok(())
    }
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.bearer_token else {
        return true;
    };

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn unauthorized() -> Response {
    warn!("Rejected operator request without valid bearer token");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthorized", "code": "UNAUTHORIZED"}))
    )
        .into_response()
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

async fn resync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<InstanceId>
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }

    match state.sync_service.sync_instance(id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => e.into_response()
    }
}

async fn exceptions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<InstanceId>
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }

    match state.sync_service.exceptions(id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => e.into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CoursesQuery {
    account: String
}

async fn courses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CoursesQuery>
) -> Response {
    if !authorized(&state, &headers) {
        return unauthorized();
    }

    Json(state.sync_service.available_courses(&query.account).await).into_response()
}
