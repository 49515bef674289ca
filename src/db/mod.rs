// Database access layer (SQLite via sqlx).

pub mod matches;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

pub use matches::{HistoryRow, Match, MatchParticipant, MatchStatus, ParticipantSession, Role};

/// Render a timestamp the way it is stored: RFC 3339, millisecond precision, `Z` suffix.
/// The fixed width keeps stored timestamps ordered under plain string comparison.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}

/// One single-player attempt at a prompt, written by the grading service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameSession {
    pub id: String,
    pub user_id: String,
    pub prompt_id: String,
    pub position: String,
    pub response_text: String,
    pub score: Option<i64>,
    pub detected: Option<bool>,
    pub rubric: String,
    pub feedback: Option<String>,
    pub ai_comparison: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl GameSession {
    /// A session is complete once the grader has scored it.
    pub fn is_completed(&self) -> bool {
        self.score.is_some()
    }
}

/// Input for [`Database::record_session`].
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub user_id: String,
    pub prompt_id: String,
    pub position: String,
    pub response_text: String,
    pub score: Option<i64>,
    pub detected: Option<bool>,
    pub rubric: serde_json::Value,
    pub feedback: Option<String>,
    pub ai_comparison: Option<String>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                prompt_id TEXT NOT NULL,
                position TEXT NOT NULL,
                response_text TEXT NOT NULL DEFAULT '',
                score INTEGER,
                detected INTEGER,
                rubric TEXT NOT NULL DEFAULT '{}',
                feedback TEXT,
                ai_comparison TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                prompt_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'completed', 'expired')),
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                completed_at TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_matches_status_expires ON matches(status, expires_at)",
        )
        .execute(&self.pool)
        .await?;

        // One row per (match, role) and per (match, user): a single creator, at most
        // one opponent, and nobody on both sides.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS match_participants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id TEXT NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id),
                role TEXT NOT NULL CHECK (role IN ('creator', 'opponent')),
                session_id TEXT REFERENCES sessions(id),
                joined_at TEXT NOT NULL,
                UNIQUE(match_id, role),
                UNIQUE(match_id, user_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_match_participants_user ON match_participants(user_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_match_participants_session ON match_participants(session_id)",
        )
        .execute(&self.pool)
        .await?;

        // A session played in answer to a challenge belongs to that match only.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_match_participants_opponent_session
            ON match_participants(session_id)
            WHERE role = 'opponent' AND session_id IS NOT NULL
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub async fn create_user(&self, display_name: &str) -> Result<User, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let row = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, display_name, created_at) VALUES (?, ?, ?) RETURNING id, display_name, created_at",
        )
        .bind(&id)
        .bind(display_name)
        .bind(timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, display_name, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub async fn record_session(&self, session: &NewSession) -> Result<GameSession, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());
        let completed_at = session.score.map(|_| now.clone());
        let rubric = if session.rubric.is_null() {
            "{}".to_string()
        } else {
            session.rubric.to_string()
        };

        let row = sqlx::query_as::<_, GameSession>(
            r#"
            INSERT INTO sessions (id, user_id, prompt_id, position, response_text, score, detected,
                                  rubric, feedback, ai_comparison, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, prompt_id, position, response_text, score, detected,
                      rubric, feedback, ai_comparison, created_at, completed_at
        "#,
        )
        .bind(&id)
        .bind(&session.user_id)
        .bind(&session.prompt_id)
        .bind(&session.position)
        .bind(&session.response_text)
        .bind(session.score)
        .bind(session.detected)
        .bind(rubric)
        .bind(&session.feedback)
        .bind(&session.ai_comparison)
        .bind(&now)
        .bind(completed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<GameSession>, sqlx::Error> {
        let row = sqlx::query_as::<_, GameSession>(
            r#"
            SELECT id, user_id, prompt_id, position, response_text, score, detected,
                   rubric, feedback, ai_comparison, created_at, completed_at
            FROM sessions WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
