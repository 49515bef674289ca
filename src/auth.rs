// Authentication: guest users identified by signed JWT tokens.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::{Database, User};

/// Longest accepted display name, in characters.
const MAX_DISPLAY_NAME: usize = 40;

// ── JWT ──────────────────────────────────────────────────────────────

/// JWT secret – in production this should come from an env var.
fn jwt_secret() -> Vec<u8> {
    std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "itt-dev-secret-change-in-production".to_string())
        .into_bytes()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user id
    pub name: String,
    pub exp: usize, // expiry (unix timestamp)
}

pub fn create_token(user_id: &str, display_name: &str) -> Result<String, String> {
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        name: display_name.to_string(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&jwt_secret()),
    )
    .map_err(|e| format!("Failed to create token: {e}"))
}

pub fn verify_token(token: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(&jwt_secret()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {e}"))
}

// ── Axum extractor: AuthUser ─────────────────────────────────────────

/// Extracts the authenticated user from the Authorization header.
/// Usage: `AuthUser(claims)` in handler parameters.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({"error": "Missing Authorization header"})),
                )
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Invalid Authorization header format"})),
            )
        })?;

        verify_token(token).map(AuthUser).map_err(|e| {
            tracing::debug!("Rejected bearer token: {e}");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Invalid token"})),
            )
        })
    }
}

// ── Auth API handlers ────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct GuestRequest {
    pub display_name: Option<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPublic,
}

#[derive(Serialize)]
pub struct UserPublic {
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}

impl From<User> for UserPublic {
    fn from(user: User) -> Self {
        UserPublic {
            id: user.id,
            display_name: user.display_name,
            created_at: user.created_at,
        }
    }
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "Internal error"})),
    )
        .into_response()
}

/// Create a guest user and hand back a token for it.
pub async fn guest(
    State(db): State<Arc<Database>>,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    // The body is optional; an empty request gets the default name.
    let req: GuestRequest = if body.is_empty() {
        GuestRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": format!("Invalid request body: {e}")})),
                )
                    .into_response();
            }
        }
    };
    let display_name = req
        .display_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Guest".to_string());

    if display_name.chars().count() > MAX_DISPLAY_NAME {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("display_name must be at most {MAX_DISPLAY_NAME} characters")
            })),
        )
            .into_response();
    }

    let user = match db.create_user(&display_name).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("DB error in guest signup: {e}");
            return internal_error();
        }
    };

    let token = match create_token(&user.id, &user.display_name) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Token creation error: {e}");
            return internal_error();
        }
    };

    tracing::info!(user = %user.id, "Guest user created");
    (
        StatusCode::CREATED,
        Json(serde_json::json!(AuthResponse {
            token,
            user: user.into(),
        })),
    )
        .into_response()
}

pub async fn me(AuthUser(claims): AuthUser, State(db): State<Arc<Database>>) -> impl IntoResponse {
    match db.get_user(&claims.sub).await {
        Ok(Some(user)) => (StatusCode::OK, Json(serde_json::json!(UserPublic::from(user)))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "User not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("DB error: {e}");
            internal_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_create_and_verify() {
        let token = create_token("user-1", "Alice").unwrap();
        let claims = verify_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.name, "Alice");
        assert!(claims.exp > chrono::Utc::now().timestamp() as usize);
    }

    #[test]
    fn test_jwt_invalid_token() {
        assert!(verify_token("invalid.token.here").is_err());
    }

    #[test]
    fn test_jwt_expired_token_rejected() {
        let claims = Claims {
            sub: "user-1".to_string(),
            name: "Alice".to_string(),
            exp: (chrono::Utc::now() - chrono::Duration::hours(2)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&jwt_secret()),
        )
        .unwrap();
        assert!(verify_token(&token).is_err());
    }
}
