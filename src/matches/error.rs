// Error taxonomy for match operations and its HTTP mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Coarse classification of a [`MatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Gone,
    Conflict,
    Validation,
    Internal,
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Match not found")]
    MatchNotFound,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Session belongs to another user")]
    SessionNotOwned,
    #[error("You cannot accept your own challenge")]
    SelfJoin,
    #[error("You are not a participant in this match")]
    NotParticipant,
    #[error("This challenge has expired")]
    Expired,
    #[error("This challenge has already been completed")]
    AlreadyCompleted,
    #[error("Session is already linked to a match")]
    SessionAlreadyLinked,
    #[error("A session is already linked for this participant")]
    ParticipantAlreadyLinked,
    #[error("Could not allocate a unique match code after {attempts} attempts")]
    CodeExhausted { attempts: usize },
    #[error("Match is not completed yet")]
    NotCompleted,
    #[error("{0}")]
    Validation(String),
    #[error("Internal error")]
    Internal(#[from] sqlx::Error),
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MatchError::MatchNotFound | MatchError::SessionNotFound => ErrorKind::NotFound,
            MatchError::SessionNotOwned | MatchError::SelfJoin => ErrorKind::Forbidden,
            MatchError::Expired | MatchError::AlreadyCompleted => ErrorKind::Gone,
            MatchError::SessionAlreadyLinked
            | MatchError::ParticipantAlreadyLinked
            | MatchError::CodeExhausted { .. } => ErrorKind::Conflict,
            MatchError::NotParticipant | MatchError::NotCompleted | MatchError::Validation(_) => {
                ErrorKind::Validation
            }
            MatchError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable identifier clients can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::MatchNotFound => "match_not_found",
            MatchError::SessionNotFound => "session_not_found",
            MatchError::SessionNotOwned => "session_not_owned",
            MatchError::SelfJoin => "cannot_join_own_match",
            MatchError::NotParticipant => "not_a_participant",
            MatchError::Expired => "match_expired",
            MatchError::AlreadyCompleted => "match_completed",
            MatchError::SessionAlreadyLinked => "session_already_linked",
            MatchError::ParticipantAlreadyLinked => "participant_already_linked",
            MatchError::CodeExhausted { .. } => "match_code_exhausted",
            MatchError::NotCompleted => "match_not_completed",
            MatchError::Validation(_) => "invalid_request",
            MatchError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Gone => StatusCode::GONE,
            // Linkage conflicts are client errors; running out of codes is ours.
            ErrorKind::Conflict => match self {
                MatchError::CodeExhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MatchError {
    fn into_response(self) -> axum::response::Response {
        match &self {
            MatchError::Internal(e) => tracing::error!("Database error: {e}"),
            MatchError::CodeExhausted { .. } => tracing::error!("{self}"),
            _ => {}
        }
        let status = self.status();
        (
            status,
            Json(json!({ "error": self.to_string(), "code": self.code() })),
        )
            .into_response()
    }
}

/// Whether a sqlx error is a unique-constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
