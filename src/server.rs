//! Collector HTTP server.
//!
//! Receives captured pages from the browser-side collector and exposes the
//! local store.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/collect` | Ingest a collection envelope |
//! | `POST` | `/api/assess` | Classify a page without storing anything |
//! | `GET`  | `/api/tickets?project=KEY` | Stored tickets |
//! | `DELETE` | `/api/tickets` | Clear all tickets |
//! | `GET`  | `/api/projects` | Stored projects |
//! | `DELETE` | `/api/projects` | Clear all projects |
//! | `GET`  | `/api/events` | Server-Sent Events stream of collection events |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "parse_error", "message": "document is empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `parse_error` (422), `storage_error` (500),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted: the collector posts
//! from inside Jira pages on arbitrary hosts.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use jira_harvest_core::models::{PageAssessment, StoredProject, StoredTicket};
use jira_harvest_core::store::Storage;

use crate::config::Config;
use crate::db;
use crate::events::EventHub;
use crate::ingest::{CollectEnvelope, CollectError, CollectResponse, Collector};
use crate::sqlite_store::SqliteStorage;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub hub: EventHub,
}

/// Starts the collector server on `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::apply(&pool).await?;

    let hub = EventHub::new(config.events.capacity);
    let collector = Collector::new(
        Arc::new(SqliteStorage::new(pool)),
        &config.extraction,
        Arc::new(hub.clone()),
    );
    let state = AppState {
        collector: Arc::new(collector),
        hub,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "collector listening");
    println!("Collector listening on http://{}", config.server.bind);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/collect", post(handle_collect))
        .route("/api/assess", post(handle_assess))
        .route("/api/tickets", get(handle_tickets).delete(handle_clear_tickets))
        .route("/api/projects", get(handle_projects).delete(handle_clear_projects))
        .route("/api/events", get(handle_events))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
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

fn storage_error(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "storage_error",
        message: format!("{:#}", err),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<CollectError> for AppError {
    fn from(err: CollectError) -> Self {
        let message = err.to_string();
        match err {
            CollectError::EmptyEnvelope => bad_request(message),
            CollectError::Parse(_) => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "parse_error",
                message,
            },
            CollectError::Storage(e) => storage_error(e),
            CollectError::Task(_) => internal(message),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/collect ============

async fn handle_collect(
    State(state): State<AppState>,
    Json(envelope): Json<CollectEnvelope>,
) -> Result<Json<CollectResponse>, AppError> {
    let response = state.collector.collect(envelope).await?;
    Ok(Json(response))
}

// ============ POST /api/assess ============

#[derive(Deserialize)]
struct AssessRequest {
    #[serde(default)]
    url: String,
    html: String,
}

/// Classification walks the whole document, so it runs off the async
/// worker threads.
async fn handle_assess(
    State(state): State<AppState>,
    Json(req): Json<AssessRequest>,
) -> Result<Json<PageAssessment>, AppError> {
    let collector = state.collector.clone();
    let verdict = tokio::task::spawn_blocking(move || collector.assess(&req.html, &req.url))
        .await
        .map_err(|e| internal(format!("assessment task failed: {}", e)))?;
    Ok(Json(verdict))
}

// ============ /api/tickets ============

#[derive(Deserialize)]
struct TicketsQuery {
    project: Option<String>,
}

async fn handle_tickets(
    State(state): State<AppState>,
    Query(query): Query<TicketsQuery>,
) -> Result<Json<Vec<StoredTicket>>, AppError> {
    let storage = state.collector.storage();
    let tickets = match query.project.as_deref().map(str::trim) {
        Some("") => return Err(bad_request("project must not be empty")),
        Some(project) => storage.load_tickets(&project.to_ascii_uppercase()).await,
        None => storage.load_all_tickets().await,
    }
    .map_err(storage_error)?;
    Ok(Json(tickets.into_values().collect()))
}

#[derive(Serialize)]
struct ClearResponse {
    cleared: usize,
}

async fn handle_clear_tickets(
    State(state): State<AppState>,
) -> Result<Json<ClearResponse>, AppError> {
    let storage = state.collector.storage();
    let cleared = storage.ticket_count().await.map_err(storage_error)?;
    storage.clear_all_tickets().await.map_err(storage_error)?;
    info!(cleared, "tickets cleared");
    Ok(Json(ClearResponse { cleared }))
}

// ============ /api/projects ============

async fn handle_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredProject>>, AppError> {
    let projects = state
        .collector
        .storage()
        .load_projects()
        .await
        .map_err(storage_error)?;
    Ok(Json(projects))
}

async fn handle_clear_projects(
    State(state): State<AppState>,
) -> Result<Json<ClearResponse>, AppError> {
    let storage = state.collector.storage();
    let cleared = storage.project_count().await.map_err(storage_error)?;
    storage.clear_all_projects().await.map_err(storage_error)?;
    info!(cleared, "projects cleared");
    Ok(Json(ClearResponse { cleared }))
}

// ============ GET /api/events ============

async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = state
        .hub
        .stream()
        .map(|event| Event::default().event(event.kind.as_str()).json_data(&event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
