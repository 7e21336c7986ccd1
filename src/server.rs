//! HTTP surface of the relay.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::frame::STREAM_CONTENT_TYPE;
use crate::relay::{Relay, RelayError, StreamRequest, StreamVariant};
use crate::session::{ChatMessage, NewSession, Session, SessionStore};

const DEFAULT_MESSAGE_PAGE: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }

    fn store(&self) -> &Arc<dyn SessionStore> {
        self.relay.store()
    }
}

/// Errors returned before any stream is opened, rendered as `{"detail": ...}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::SessionNotFound(_) => ApiError::NotFound("Session not found".to_string()),
            RelayError::InvalidRequest(message) => ApiError::BadRequest(message),
            RelayError::Store(e) => {
                error!("Session store failure: {}", e);
                ApiError::Internal("Session store unavailable".to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct Health {
    status: String,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

// POST /chat/stream
async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<StreamRequest>,
) -> Result<Response, ApiError> {
    stream_turn(state, request, StreamVariant::Standard).await
}

// POST /chat/premium/stream
async fn premium_chat_stream(
    State(state): State<AppState>,
    Json(request): Json<StreamRequest>,
) -> Result<Response, ApiError> {
    stream_turn(state, request, StreamVariant::Premium).await
}

async fn stream_turn(
    state: AppState,
    request: StreamRequest,
    variant: StreamVariant,
) -> Result<Response, ApiError> {
    let frames = state.relay.open(request, variant).await?;
    let body = Body::from_stream(frames.map(Ok::<_, Infallible>));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                header::HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        body,
    )
        .into_response())
}

// POST /sessions
async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<NewSession>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }
    let session = state
        .store()
        .create_session(request)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to create session: {}", e)))?;
    info!("Created session {} for user {}", session.id, session.user_id);
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    limit: Option<usize>,
}

// GET /sessions/{id}/messages
async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let store = state.store();
    let exists = store
        .get_session(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .is_some();
    if !exists {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }

    let messages = store
        .recent_messages(&id, query.limit.unwrap_or(DEFAULT_MESSAGE_PAGE))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(messages))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health))
        .route(StreamVariant::Standard.path(), post(chat_stream))
        .route(StreamVariant::Premium.path(), post(premium_chat_stream))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}/messages", get(list_messages))
        .layer(cors)
        .with_state(state)
}
