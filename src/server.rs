//! Operator HTTP API.
//!
//! Read-only views over stored tickets plus on-demand similarity search.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tickets/{id}` | Stored record (embedding reported by dimension only) |
//! | `GET`  | `/tickets/{id}/similar?k=&candidates=` | Similar tickets and the serving tier |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "ticket not found: 1234" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use helpdesk_triage_core::models::TicketRecord;
use helpdesk_triage_core::similarity::{
    SimilarityEngine, SimilarityError, SimilarityReport, SimilarityRequest,
};
use helpdesk_triage_core::store::TicketStore;

use crate::config::{Config, SimilarityConfig};
use crate::embedding::create_provider;
use crate::similar::{resolve_limits, similarity_params};
use crate::sqlite_store::SqliteStore;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TicketStore>,
    pub engine: Arc<SimilarityEngine>,
    /// Defaults for `k` and `candidates`.
    pub similarity: Arc<SimilarityConfig>,
}

/// Build the router. Split out so tests can drive it without a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tickets/{id}", get(handle_get_ticket))
        .route("/tickets/{id}/similar", get(handle_similar))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the operator API on `[server].bind`. Runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::new(
        &config.db.path,
        config.similarity.index_enabled,
    ));
    store.ensure_ready().await?;
    let embedder = create_provider(&config.embedding)?;
    let engine = SimilarityEngine::new(
        store.clone(),
        embedder,
        similarity_params(&config.similarity),
    );

    let state = AppState {
        store: store.clone(),
        engine: Arc::new(engine),
        similarity: Arc::new(config.similarity.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "operator API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    store.close().await;
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

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<SimilarityError> for AppError {
    fn from(err: SimilarityError) -> Self {
        match err {
            SimilarityError::NotFound(_) => not_found(err.to_string()),
            other => {
                tracing::error!(error = %other, "similarity query failed");
                internal(other.to_string())
            }
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

// ============ GET /tickets/{id} ============

/// A stored record without the raw vector.
#[derive(Serialize)]
struct TicketView {
    ticket_id: String,
    site: String,
    isp: String,
    category: String,
    subject: String,
    description: String,
    status: String,
    priority: String,
    signature: String,
    embedding_model: String,
    embedding_dim: usize,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    recurrence_group: Option<String>,
    group_similarity: Option<f64>,
}

impl From<TicketRecord> for TicketView {
    fn from(r: TicketRecord) -> Self {
        Self {
            ticket_id: r.ticket_id,
            site: r.site,
            isp: r.isp,
            category: r.category,
            subject: r.subject,
            description: r.description,
            status: r.status,
            priority: r.priority,
            signature: r.signature,
            embedding_model: r.embedding_model,
            embedding_dim: r.embedding_dim,
            first_seen_at: r.first_seen_at,
            last_seen_at: r.last_seen_at,
            recurrence_group: r.recurrence_group,
            group_similarity: r.group_similarity,
        }
    }
}

async fn handle_get_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TicketView>, AppError> {
    let record = state
        .store
        .get_record(&id)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?
        .ok_or_else(|| not_found(format!("ticket not found: {}", id)))?;
    Ok(Json(TicketView::from(record)))
}

// ============ GET /tickets/{id}/similar ============

#[derive(Debug, Deserialize)]
struct SimilarParams {
    k: Option<usize>,
    candidates: Option<usize>,
}

async fn handle_similar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<SimilarityReport>, AppError> {
    let (top_k, num_candidates) = resolve_limits(&state.similarity, params.k, params.candidates)
        .map_err(|e| bad_request(e.to_string()))?;

    let report = state
        .engine
        .find_similar_report(&SimilarityRequest {
            ticket_id: &id,
            top_k,
            num_candidates,
            now: Utc::now(),
        })
        .await?;
    Ok(Json(report))
}
