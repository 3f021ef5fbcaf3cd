//! Axum REST API handlers for the sync gateway.
//!
//! The browser app reads through these instead of hitting the RPC node
//! itself, and reports the transactions its wallet broadcast so the shared
//! cache is reconciled when they confirm.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::contract::WriteCall;
use crate::errors::SyncError;
use crate::facade::{FilterQuery, ProjectFilter, ReadFacade};
use crate::review::{ReviewRequest, ReviewService};
use crate::storage::FileStore;
use crate::tracker::{Tracker, TxId};
use crate::types::{Address, ProjectId, TxHash};

pub struct AppState {
    pub facade: ReadFacade,
    pub tracker: Tracker,
    pub review: Arc<dyn ReviewService>,
    pub storage: Arc<dyn FileStore>,
    pub min_review_score: u8,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id/votes", get(get_votes))
        .route("/accounts/:address/roles", get(get_roles))
        .route("/citizenship/requests", get(citizenship_requests))
        .route("/transactions", post(track_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/reviews", post(review_draft))
        .route("/files/:cid", get(resolve_file))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub cached_entries: usize,
    pub pending_transactions: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
pub struct VotesQuery {
    pub account: Option<Address>,
}

/// A transaction the browser wallet signed and broadcast.
#[derive(Deserialize)]
pub struct TrackRequest {
    pub from: Address,
    pub hash: TxHash,
    pub call: WriteCall,
}

fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::DuplicatePending { .. } | SyncError::AlreadyVoted { .. } => StatusCode::CONFLICT,
        SyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SyncError::NotAuthorized(_) => StatusCode::FORBIDDEN,
        SyncError::Revert { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SyncError::Rpc(_)
        | SyncError::Http(_)
        | SyncError::Decode(_)
        | SyncError::StaleRead { .. }
        | SyncError::Review(_)
        | SyncError::Storage(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: SyncError) -> Response {
    (
        status_for(&err),
        Json(json!(ErrorResponse {
            error: err.user_message()
        })),
    )
        .into_response()
}

fn ok<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(json!(body))).into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        cached_entries: state.facade.cache().resident(),
        pending_transactions: state.tracker.pending().len(),
    })
}

/// `GET /projects?filter=approved|pending|funding|all&creator=0x…`
///
/// Projects that failed to load are listed under `failed`; the rest of the
/// page is still returned.
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilterQuery>,
) -> Response {
    let filter = match ProjectFilter::try_from(query) {
        Ok(filter) => filter,
        Err(e) => return error_response(e),
    };
    match state.facade.list_projects(&filter).await {
        Ok(page) => ok(json!({
            "count": page.projects.len(),
            "partial": page.is_partial(),
            "projects": page.projects,
            "failed": page.failed,
        })),
        Err(e) => error_response(e),
    }
}

/// `GET /projects/:id`
pub async fn get_project(State(state): State<Arc<AppState>>, Path(id): Path<ProjectId>) -> Response {
    match state.facade.get_project(id).await {
        Ok(project) => ok(project),
        Err(e) => error_response(e),
    }
}

/// `GET /projects/:id/votes?account=0x…`
///
/// Without `account` only the tally is returned.
pub async fn get_votes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProjectId>,
    Query(query): Query<VotesQuery>,
) -> Response {
    let result = match &query.account {
        Some(account) => state
            .facade
            .vote_status(id, account)
            .await
            .map(|status| json!(status)),
        None => state
            .facade
            .screening_votes(id)
            .await
            .map(|tally| json!({ "tally": tally })),
    };
    match result {
        Ok(body) => ok(body),
        Err(e) => error_response(e),
    }
}

/// `GET /accounts/:address/roles`
pub async fn get_roles(State(state): State<Arc<AppState>>, Path(address): Path<String>) -> Response {
    let account = match Address::parse(&address) {
        Ok(account) => account,
        Err(e) => return error_response(e),
    };
    match state.facade.roles(&account).await {
        Ok(roles) => ok(roles),
        Err(e) => error_response(e),
    }
}

/// `GET /citizenship/requests`
pub async fn citizenship_requests(State(state): State<Arc<AppState>>) -> Response {
    match state.facade.citizenship_requests().await {
        Ok(requests) => ok(json!({ "count": requests.len(), "requests": requests })),
        Err(e) => error_response(e),
    }
}

/// `POST /transactions`
///
/// Starts watching a transaction signed elsewhere. `409` when a write of the
/// same kind against the same entity is still pending.
pub async fn track_transaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrackRequest>,
) -> Response {
    match state.tracker.track(&req.from, req.call, req.hash) {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({ "id": id }))).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /transactions/:id`
pub async fn get_transaction(State(state): State<Arc<AppState>>, Path(id): Path<TxId>) -> Response {
    match state.tracker.status(id) {
        Some(tx) => ok(tx),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!(ErrorResponse {
                error: format!("transaction {id} is unknown or expired")
            })),
        )
            .into_response(),
    }
}

/// `POST /reviews`
///
/// Runs the AI review server-side so the provider key never reaches the
/// browser. `meetsThreshold` tells the form whether it may proceed.
pub async fn review_draft(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReviewRequest>,
) -> Response {
    match state.review.review(&req).await {
        Ok(verdict) => {
            let meets_threshold = verdict.require(state.min_review_score).is_ok();
            ok(json!({
                "verdict": verdict,
                "meetsThreshold": meets_threshold,
                "minimumScore": state.min_review_score,
            }))
        }
        Err(e) => error_response(e),
    }
}

/// `GET /files/:cid`
pub async fn resolve_file(State(state): State<Arc<AppState>>, Path(cid): Path<String>) -> Response {
    match state.storage.resolve(&cid) {
        Ok(url) => ok(json!({ "url": url })),
        Err(e) => error_response(e),
    }
}
