// HTTP API routes (matches, prompts, auth, health, metrics).

pub mod admin;

use axum::{
    extract::{FromRef, Json, Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::auth::{self, AuthUser};
use crate::db::Database;
use crate::matches::results::DEFAULT_HISTORY_LIMIT;
use crate::matches::{JoinOutcome, MatchService};
use crate::metrics;
use crate::prompts;
use crate::rate_limit::{RateLimitType, RateLimiter};

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateMatchRequest {
    #[serde(alias = "sourceSessionId")]
    pub source_session_id: String,
    #[serde(default, alias = "forceNew")]
    pub force_new: bool,
}

#[derive(Deserialize)]
pub struct LinkSessionRequest {
    #[serde(alias = "sessionId")]
    pub session_id: String,
}

#[derive(Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub matches: MatchService,
    pub rate_limiter: RateLimiter,
    /// SHA-256 hex digest of the admin token; `None` disables admin routes.
    pub admin_token_hash: Option<String>,
}

impl AppState {
    pub fn new(db: Arc<Database>, rate_limiter: RateLimiter, admin_token: Option<&str>) -> Self {
        Self {
            matches: MatchService::new(db.clone()),
            db,
            rate_limiter,
            admin_token_hash: admin_token.map(admin::hash_token),
        }
    }
}

impl FromRef<AppState> for Arc<Database> {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Auth
        .route("/api/auth/guest", post(auth::guest))
        .route("/api/auth/me", get(auth::me))
        // Prompts
        .route("/api/prompts", get(list_prompts))
        .route("/api/prompts/{id}", get(get_prompt))
        // Matches. `{id}` is the match code for fetch and join, the match id otherwise.
        .route("/api/matches", post(create_match))
        .route("/api/matches/history", get(match_history))
        .route("/api/matches/{id}", get(get_match))
        .route("/api/matches/{id}/join", post(join_match))
        .route("/api/matches/{id}/link", post(link_session))
        .route("/api/matches/{id}/results", get(match_results))
        // Admin
        .route("/api/admin/matches/stats", get(admin::match_stats))
        .route("/api/admin/matches/expire", post(admin::expire_matches))
        .layer(middleware::from_fn(metrics::track_requests))
        .with_state(state)
}

// ── Service endpoints ─────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "itt-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

// ── Prompt handlers ───────────────────────────────────────────────────

async fn list_prompts() -> impl IntoResponse {
    Json(json!(prompts::all()))
}

async fn get_prompt(Path(id): Path<String>) -> Response {
    match prompts::find(&id) {
        Some(prompt) => Json(json!(prompt)).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Prompt not found"),
    }
}

// ── Match handlers ────────────────────────────────────────────────────

async fn create_match(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(req): Json<CreateMatchRequest>,
) -> Response {
    if req.source_session_id.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "source_session_id is required");
    }
    if let Err(e) = state
        .rate_limiter
        .check_limit(&claims.sub, RateLimitType::MatchCreate)
    {
        return json_error(StatusCode::TOO_MANY_REQUESTS, &e.to_string());
    }

    match state
        .matches
        .create_match(&claims.sub, &req.source_session_id, req.force_new)
        .await
    {
        Ok(created) => {
            let status = if created.existing_match {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, Json(json!(created))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn get_match(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    match state.matches.get_match_view(&code).await {
        Ok(view) => Json(json!(view)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn join_match(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(code): Path<String>,
) -> Response {
    if let Err(e) = state
        .rate_limiter
        .check_limit(&claims.sub, RateLimitType::MatchJoin)
    {
        return json_error(StatusCode::TOO_MANY_REQUESTS, &e.to_string());
    }

    match state.matches.join_match(&code, &claims.sub).await {
        Ok(JoinOutcome::Joined(joined)) => Json(json!(joined)).into_response(),
        Ok(JoinOutcome::AlreadyAccepted {
            match_id,
            match_code,
        }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "This challenge has already been accepted by another player",
                "code": "challenge_already_accepted",
                "match_id": match_id,
                "match_code": match_code,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn link_session(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(match_id): Path<String>,
    Json(req): Json<LinkSessionRequest>,
) -> Response {
    match state
        .matches
        .link_session(&req.session_id, &match_id, &claims.sub)
        .await
    {
        Ok(linked) => Json(json!(linked)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn match_results(State(state): State<AppState>, Path(match_id): Path<String>) -> Response {
    match state.matches.get_match_results(&match_id).await {
        Ok(results) => Json(json!(results)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn match_history(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(params): Query<PaginationParams>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let offset = params.offset.unwrap_or(0);
    match state
        .matches
        .get_match_history(&claims.sub, limit, offset)
        .await
    {
        Ok(history) => Json(json!(history)).into_response(),
        Err(e) => e.into_response(),
    }
}
