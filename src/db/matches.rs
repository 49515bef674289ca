// Match repository: persistence primitives behind the match state machine.
//
// Every status change happens here, as a single conditional statement or a short
// write-first transaction, so concurrent requests against the same match cannot
// interleave a read and a write.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{timestamp, Database};
use crate::matches::error::{is_unique_violation, MatchError};

/// How long a challenge stays open.
pub const MATCH_TTL_HOURS: i64 = 24;

/// Attempts at finding an unused match code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Completed,
    Expired,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Completed => "completed",
            MatchStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, MatchStatus::Pending)
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MatchStatus::Pending),
            "completed" => Ok(MatchStatus::Completed),
            "expired" => Ok(MatchStatus::Expired),
            _ => Err(format!("Invalid match status: {s}")),
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Creator,
    Opponent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Creator => "creator",
            Role::Opponent => "opponent",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator" => Ok(Role::Creator),
            "opponent" => Ok(Role::Opponent),
            _ => Err(format!("Invalid participant role: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Match {
    pub id: String,
    pub code: String,
    pub prompt_id: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
    pub completed_at: Option<String>,
}

impl Match {
    /// Stored status. The CHECK constraint keeps the column to known values.
    pub fn status(&self) -> MatchStatus {
        self.status.parse().unwrap_or(MatchStatus::Expired)
    }

    /// Whether the match is still pending but past its deadline.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        !self.status().is_terminal() && self.expires_at < timestamp(now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchParticipant {
    pub id: i64,
    pub match_id: String,
    pub user_id: String,
    pub role: String,
    pub session_id: Option<String>,
    pub joined_at: String,
}

impl MatchParticipant {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

/// A participant joined with their linked session and display name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParticipantSession {
    pub role: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub session_id: String,
    pub position: String,
    pub response_text: String,
    pub score: Option<i64>,
    pub detected: Option<bool>,
    pub rubric: String,
    pub feedback: Option<String>,
    pub ai_comparison: Option<String>,
}

/// One line of a user's match history.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    pub match_id: String,
    pub match_code: String,
    pub prompt_id: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
    pub completed_at: Option<String>,
    pub role: String,
    pub opponent_user_id: Option<String>,
    pub creator_score: Option<i64>,
    pub opponent_score: Option<i64>,
}

const MATCH_COLUMNS: &str = "id, code, prompt_id, status, created_at, expires_at, completed_at";
const PARTICIPANT_COLUMNS: &str = "id, match_id, user_id, role, session_id, joined_at";

impl Database {
    // ── Creation ──────────────────────────────────────────────────────

    /// Insert a pending match and its creator participant in one transaction.
    ///
    /// `next_code` is asked for a fresh code each time the previous one collides
    /// with an existing match; after [`MAX_CODE_ATTEMPTS`] collisions the call fails.
    pub async fn create_match(
        &self,
        creator_user_id: &str,
        source_session_id: &str,
        prompt_id: &str,
        created_at: DateTime<Utc>,
        mut next_code: impl FnMut() -> String,
    ) -> Result<Match, MatchError> {
        let expires_at = created_at + Duration::hours(MATCH_TTL_HOURS);

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = next_code();
            let mut tx = self.pool.begin().await?;

            let inserted = sqlx::query_as::<_, Match>(&format!(
                "INSERT INTO matches (id, code, prompt_id, status, created_at, expires_at) \
                 VALUES (?, ?, ?, 'pending', ?, ?) RETURNING {MATCH_COLUMNS}"
            ))
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&code)
            .bind(prompt_id)
            .bind(timestamp(created_at))
            .bind(timestamp(expires_at))
            .fetch_one(&mut *tx)
            .await;

            let m = match inserted {
                Ok(m) => m,
                Err(e) if is_unique_violation(&e) => {
                    tracing::warn!(attempt, code = %code, "Match code collision, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // A session answered as an opponent cannot seed a challenge of its own.
            let seated = sqlx::query(
                r#"
                INSERT INTO match_participants (match_id, user_id, role, session_id, joined_at)
                SELECT ?, ?, 'creator', ?, ?
                WHERE NOT EXISTS (
                    SELECT 1 FROM match_participants WHERE session_id = ? AND role = 'opponent'
                )
            "#,
            )
            .bind(&m.id)
            .bind(creator_user_id)
            .bind(source_session_id)
            .bind(timestamp(created_at))
            .bind(source_session_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if seated == 0 {
                tx.rollback().await?;
                return Err(MatchError::SessionAlreadyLinked);
            }

            tx.commit().await?;
            return Ok(m);
        }

        Err(MatchError::CodeExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    // ── Lookups ───────────────────────────────────────────────────────

    pub async fn get_match(&self, id: &str) -> Result<Option<Match>, sqlx::Error> {
        let row = sqlx::query_as::<_, Match>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_match_by_code(&self, code: &str) -> Result<Option<Match>, sqlx::Error> {
        let row = sqlx::query_as::<_, Match>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Most recent pending match created from `session_id`, if any.
    pub async fn find_pending_match_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<Match>, sqlx::Error> {
        let row = sqlx::query_as::<_, Match>(
            r#"
            SELECT m.id, m.code, m.prompt_id, m.status, m.created_at, m.expires_at, m.completed_at
            FROM matches m
            JOIN match_participants p ON p.match_id = m.id
            WHERE p.session_id = ? AND p.role = 'creator' AND m.status = 'pending'
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT 1
        "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_match_participants(
        &self,
        match_id: &str,
    ) -> Result<Vec<MatchParticipant>, sqlx::Error> {
        let rows = sqlx::query_as::<_, MatchParticipant>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM match_participants WHERE match_id = ? ORDER BY id"
        ))
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_participant(
        &self,
        match_id: &str,
        role: Role,
    ) -> Result<Option<MatchParticipant>, sqlx::Error> {
        let row = sqlx::query_as::<_, MatchParticipant>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM match_participants WHERE match_id = ? AND role = ?"
        ))
        .bind(match_id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_participant_for_user(
        &self,
        match_id: &str,
        user_id: &str,
    ) -> Result<Option<MatchParticipant>, sqlx::Error> {
        let row = sqlx::query_as::<_, MatchParticipant>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM match_participants WHERE match_id = ? AND user_id = ?"
        ))
        .bind(match_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Expiry ────────────────────────────────────────────────────────

    /// Flip a single match from pending to expired if its deadline has passed.
    /// Returns true only for the call that performed the transition.
    pub async fn expire_match_if_stale(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE matches SET status = 'expired' \
             WHERE id = ? AND status = 'pending' AND expires_at < ?",
        )
        .bind(match_id)
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Expire every stale pending match. Used by the background sweep.
    pub async fn expire_stale_matches(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE matches SET status = 'expired' WHERE status = 'pending' AND expires_at < ?",
        )
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Expire the stale pending matches a user takes part in.
    pub async fn expire_stale_matches_for_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE matches SET status = 'expired'
            WHERE status = 'pending' AND expires_at < ?
              AND id IN (SELECT match_id FROM match_participants WHERE user_id = ?)
        "#,
        )
        .bind(timestamp(now))
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ── Join ──────────────────────────────────────────────────────────

    /// Admit `user_id` as the opponent unless the seat is taken or the match is no
    /// longer open. One statement: the `(match_id, role)` uniqueness constraint
    /// decides between concurrent joiners. Returns whether a row was inserted.
    pub async fn insert_opponent_if_absent(
        &self,
        match_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let now = timestamp(now);
        let result = sqlx::query(
            r#"
            INSERT INTO match_participants (match_id, user_id, role, session_id, joined_at)
            SELECT ?, ?, 'opponent', NULL, ?
            WHERE EXISTS (
                SELECT 1 FROM matches WHERE id = ? AND status = 'pending' AND expires_at >= ?
            )
            ON CONFLICT DO NOTHING
        "#,
        )
        .bind(match_id)
        .bind(user_id)
        .bind(&now)
        .bind(match_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Link ──────────────────────────────────────────────────────────

    /// Attach `session_id` to the caller's empty participant slot and, in the same
    /// transaction, complete the match if both slots are now filled.
    ///
    /// Returns `None` when no slot was updated (already linked, match closed or past
    /// its deadline), otherwise the match status after the completion check.
    pub async fn link_participant_session(
        &self,
        match_id: &str,
        user_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchStatus>, MatchError> {
        let now = timestamp(now);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE match_participants SET session_id = ?
            WHERE match_id = ? AND user_id = ? AND session_id IS NULL
              AND EXISTS (
                  SELECT 1 FROM matches WHERE id = ? AND status = 'pending' AND expires_at >= ?
              )
              AND NOT EXISTS (
                  SELECT 1 FROM match_participants WHERE session_id = ? AND match_id != ?
              )
        "#,
        )
        .bind(session_id)
        .bind(match_id)
        .bind(user_id)
        .bind(match_id)
        .bind(&now)
        .bind(session_id)
        .bind(match_id)
        .execute(&mut *tx)
        .await;

        let updated = match updated {
            Ok(result) => result.rows_affected(),
            Err(e) if is_unique_violation(&e) => return Err(MatchError::SessionAlreadyLinked),
            Err(e) => return Err(e.into()),
        };
        if updated == 0 {
            // The write lock is held, so this read sees what blocked the update.
            let elsewhere: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM match_participants WHERE session_id = ? AND match_id != ?",
            )
            .bind(session_id)
            .bind(match_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            if elsewhere > 0 {
                return Err(MatchError::SessionAlreadyLinked);
            }
            return Ok(None);
        }

        complete_if_both_linked(&mut tx, match_id, &now).await?;

        let status: String = sqlx::query_scalar("SELECT status FROM matches WHERE id = ?")
            .bind(match_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(status.parse().unwrap_or(MatchStatus::Pending)))
    }

    /// Re-run the completion check without linking anything. Used when a
    /// participant repeats a link that already landed.
    pub async fn refresh_completion(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MatchStatus, sqlx::Error> {
        let now = timestamp(now);
        let mut tx = self.pool.begin().await?;
        complete_if_both_linked(&mut tx, match_id, &now).await?;
        let status: String = sqlx::query_scalar("SELECT status FROM matches WHERE id = ?")
            .bind(match_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(status.parse().unwrap_or(MatchStatus::Pending))
    }

    // ── Results & history ─────────────────────────────────────────────

    /// Participants that have a linked session, creator first.
    pub async fn get_participant_sessions(
        &self,
        match_id: &str,
    ) -> Result<Vec<ParticipantSession>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ParticipantSession>(
            r#"
            SELECT p.role, p.user_id, u.display_name, s.id AS session_id, s.position,
                   s.response_text, s.score, s.detected, s.rubric, s.feedback, s.ai_comparison
            FROM match_participants p
            JOIN sessions s ON s.id = p.session_id
            LEFT JOIN users u ON u.id = p.user_id
            WHERE p.match_id = ?
            ORDER BY CASE p.role WHEN 'creator' THEN 0 ELSE 1 END
        "#,
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Page through the matches a user takes part in, newest first.
    /// Returns the page and the total number of matches for the user.
    pub async fn list_matches_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<HistoryRow>, i64), sqlx::Error> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM match_participants WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT m.id AS match_id, m.code AS match_code, m.prompt_id, m.status,
                   m.created_at, m.expires_at, m.completed_at,
                   me.role AS role,
                   op.user_id AS opponent_user_id,
                   cs.score AS creator_score,
                   os.score AS opponent_score
            FROM match_participants me
            JOIN matches m ON m.id = me.match_id
            LEFT JOIN match_participants cp ON cp.match_id = m.id AND cp.role = 'creator'
            LEFT JOIN sessions cs ON cs.id = cp.session_id
            LEFT JOIN match_participants op ON op.match_id = m.id AND op.role = 'opponent'
            LEFT JOIN sessions os ON os.id = op.session_id
            WHERE me.user_id = ?
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT ? OFFSET ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }

    /// Number of matches per status.
    pub async fn count_matches_by_status(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM matches GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn complete_if_both_linked(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    match_id: &str,
    now: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE matches SET status = 'completed', completed_at = ?
        WHERE id = ? AND status = 'pending'
          AND (SELECT COUNT(*) FROM match_participants
               WHERE match_id = ? AND session_id IS NOT NULL) = 2
    "#,
    )
    .bind(now)
    .bind(match_id)
    .bind(match_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
