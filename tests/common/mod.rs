// Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use itt_backend::db::{Database, GameSession, NewSession};
use serde_json::json;

pub async fn memory_db() -> Arc<Database> {
    Arc::new(Database::new("sqlite::memory:").await.unwrap())
}

/// A session the grader has already scored.
pub fn graded(user_id: &str, prompt_id: &str, position: &str, score: i64) -> NewSession {
    NewSession {
        user_id: user_id.to_string(),
        prompt_id: prompt_id.to_string(),
        position: position.to_string(),
        response_text: format!("{position} on {prompt_id}, worth {score}"),
        score: Some(score),
        detected: Some(score < 50),
        rubric: json!({ "authenticity": score / 10, "steelmanning": score / 20 }),
        feedback: Some("Reads like a real supporter.".to_string()),
        ai_comparison: Some("The model leaned on statistics.".to_string()),
    }
}

/// Create a user with one graded minimum-wage/support session.
pub async fn player(db: &Database, name: &str, score: i64) -> (String, GameSession) {
    let user = db.create_user(name).await.unwrap();
    let session = db
        .record_session(&graded(&user.id, "minimum-wage", "support", score))
        .await
        .unwrap();
    (user.id, session)
}
