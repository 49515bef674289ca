// Admin endpoints guarded by a shared secret in `X-Admin-Token`.

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::{json_error, AppState};
use crate::sweeper;

pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// SHA-256 hex digest of a token. Tokens are only ever compared as digests.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Marker extractor: present only when the request carries the admin token.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token_hash.as_deref() else {
            return Err(json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Admin API is not configured",
            ));
        };

        let presented = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "Missing X-Admin-Token header"))?;

        if hash_token(presented) != expected {
            tracing::warn!("Rejected admin request with invalid token");
            return Err(json_error(StatusCode::UNAUTHORIZED, "Invalid admin token"));
        }
        Ok(AdminAuth)
    }
}

/// Match counts per status, after expiring stale matches.
pub async fn match_stats(_admin: AdminAuth, State(state): State<AppState>) -> Response {
    if let Err(e) = sweeper::sweep_once(&state.db).await {
        tracing::error!("Database error: {e}");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
    }

    let counts = match state.db.count_matches_by_status().await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Database error: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    let count = |status: &str| {
        counts
            .iter()
            .find(|(s, _)| s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    };
    let total: i64 = counts.iter().map(|(_, n)| n).sum();

    Json(json!({
        "pending": count("pending"),
        "completed": count("completed"),
        "expired": count("expired"),
        "total": total,
        "generated_at": crate::db::timestamp(Utc::now()),
    }))
    .into_response()
}

/// Run the expiry sweep now.
pub async fn expire_matches(_admin: AdminAuth, State(state): State<AppState>) -> Response {
    match sweeper::sweep_once(&state.db).await {
        Ok(expired) => {
            tracing::info!(expired, "Admin-triggered expiry sweep");
            Json(json!({ "expired": expired })).into_response()
        }
        Err(e) => {
            tracing::error!("Database error: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}
