//! HTTP surface: `axum`. Every handler closes over one shared `Core` as
//! `axum` state; `tokio-stream` bridges the broadcast channels that back
//! `/events` and `/chat`'s progress narration into
//! `axum::response::sse::Sse`.

pub mod chat;
pub mod tasks;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::Stream;
use hearth_core::error::HearthError;
use hearth_core::store::UserFact;
use serde::Serialize;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::context::Core;

/// Uniform JSON error body. The core never surfaces a raw exception; every
/// `HearthError` is mapped to a status code plus the error's own
/// user-facing message (see `HearthError::user_message`).
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl From<HearthError> for AppError {
    fn from(err: HearthError) -> Self {
        let status = match &err {
            HearthError::TaskNotFound(_) | HearthError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            HearthError::InvalidInput { .. }
            | HearthError::InvalidTransition { .. }
            | HearthError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            HearthError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: err.user_message() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: format!("{err:#}") }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub fn build_router(core: Arc<Core>) -> Router {
    Router::new()
        .route("/chat", post(chat::chat_handler))
        .route("/events", get(events_handler))
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/summary", get(tasks::summary))
        .route("/tasks/{id}", delete(tasks::cancel_task))
        .route("/profile", get(profile_handler))
        .route("/proactive", get(proactive_handler))
        .route("/proactive/push", get(proactive_push_handler))
        .route("/personality", get(get_personality).post(set_personality))
        .route("/healthz", get(healthz_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    uptime_secs: u64,
}

async fn healthz_handler(State(core): State<Arc<Core>>) -> Json<HealthBody> {
    Json(HealthBody { status: "ok", uptime_secs: core.started_at.elapsed().as_secs() })
}

#[derive(Serialize)]
struct ProfileBody {
    facts: Vec<UserFact>,
    preferences: std::collections::HashMap<String, String>,
}

async fn profile_handler(State(core): State<Arc<Core>>) -> Result<Json<ProfileBody>, AppError> {
    let facts = core.store.list_user_facts(50).await?;
    let preferences = core.store.list_preferences().await?;
    Ok(Json(ProfileBody { facts, preferences }))
}

async fn proactive_handler(State(core): State<Arc<Core>>) -> Json<Vec<String>> {
    Json(core.proactive.peek())
}

async fn proactive_push_handler(State(core): State<Arc<Core>>) -> Json<Vec<String>> {
    Json(core.proactive.drain())
}

/// Personality is opaque to the core: whatever JSON the caller posts is
/// written verbatim to `$AGENT_HOME/personality.json` and handed back
/// unparsed on read.
async fn get_personality(State(core): State<Arc<Core>>) -> Result<Json<serde_json::Value>, AppError> {
    match tokio::fs::read_to_string(&core.personality_path).await {
        Ok(text) => {
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| AppError::bad_request(format!("stored personality blob is not valid JSON: {e}")))?;
            Ok(Json(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Json(serde_json::json!({}))),
        Err(e) => Err(anyhow::Error::from(e).into()),
    }
}

async fn set_personality(
    State(core): State<Arc<Core>>,
    Json(value): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| AppError::bad_request(format!("could not serialize personality blob: {e}")))?;
    if let Some(parent) = core.personality_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(anyhow::Error::from)?;
    }
    tokio::fs::write(&core.personality_path, text).await.map_err(anyhow::Error::from)?;
    Ok(Json(value))
}

#[derive(Serialize)]
struct ConnectedBody {
    summary: hearth_core::store::TaskSummary,
    assistant_name: String,
}

/// Global heartbeat event feed. Opens with a `connected` event (queue
/// summary + assistant name), then relays every `HeartbeatEvent` as its own
/// SSE event named after the (snake_case) variant, and pings every 30s so
/// idle proxies don't time the connection out.
async fn events_handler(
    State(core): State<Arc<Core>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let summary = core.store.summary().await.unwrap_or_default();
    let connected = ConnectedBody { summary, assistant_name: core.assistant_name.clone() };
    let connected_event = Event::default()
        .event("connected")
        .data(serde_json::to_string(&connected).unwrap_or_default());

    let receiver = core.heartbeat.subscribe();
    let heartbeat_stream = tokio_stream::wrappers::BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => {
                let name = serde_json::to_value(event.event_type)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "event".to_string());
                let data = serde_json::to_string(&event).unwrap_or_default();
                Some(Ok(Event::default().event(name).data(data)))
            }
            Err(_lagged) => None,
        }
    });

    let stream = tokio_stream::once(Ok(connected_event)).chain(heartbeat_stream);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("ping"))
}
