// Side-by-side results and per-user history.

use std::cmp::Ordering;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use super::{MatchError, MatchService};
use crate::db::{HistoryRow, MatchStatus, ParticipantSession, Role};
use crate::prompts::{self, Prompt};

/// Largest page size accepted by [`MatchService::get_match_history`].
pub const MAX_HISTORY_LIMIT: i64 = 100;
pub const DEFAULT_HISTORY_LIMIT: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Creator,
    Opponent,
    Tie,
}

/// Higher score wins; equal scores tie.
pub fn decide_winner(creator_score: i64, opponent_score: i64) -> Winner {
    match creator_score.cmp(&opponent_score) {
        Ordering::Greater => Winner::Creator,
        Ordering::Less => Winner::Opponent,
        Ordering::Equal => Winner::Tie,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub session_id: String,
    pub position: String,
    pub response_text: String,
    pub score: i64,
    pub detected: bool,
    pub rubric: Value,
    pub feedback: Option<String>,
    pub ai_comparison: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantResult {
    pub role: Role,
    pub user_id: String,
    pub display_name: Option<String>,
    pub session: SessionResult,
}

impl From<ParticipantSession> for ParticipantResult {
    fn from(row: ParticipantSession) -> Self {
        let role = row.role.parse().unwrap_or(Role::Opponent);
        let rubric = serde_json::from_str(&row.rubric).unwrap_or(Value::Null);
        ParticipantResult {
            role,
            user_id: row.user_id,
            display_name: row.display_name,
            session: SessionResult {
                session_id: row.session_id,
                position: row.position,
                response_text: row.response_text,
                score: row.score.unwrap_or(0),
                detected: row.detected.unwrap_or(false),
                rubric,
                feedback: row.feedback,
                ai_comparison: row.ai_comparison,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResults {
    pub match_id: String,
    pub match_code: String,
    pub prompt_id: String,
    pub prompt: Option<Prompt>,
    pub position: String,
    pub creator: ParticipantResult,
    pub opponent: ParticipantResult,
    pub winner: Winner,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub match_id: String,
    pub match_code: String,
    pub prompt_id: String,
    pub prompt_title: Option<&'static str>,
    pub status: MatchStatus,
    pub role: Role,
    pub has_opponent: bool,
    pub created_at: String,
    pub expires_at: String,
    pub completed_at: Option<String>,
    /// Scores and winner are filled in for completed matches only.
    pub creator_score: Option<i64>,
    pub opponent_score: Option<i64>,
    pub winner: Option<Winner>,
}

impl From<HistoryRow> for HistoryEntry {
    fn from(row: HistoryRow) -> Self {
        let status: MatchStatus = row.status.parse().unwrap_or(MatchStatus::Expired);
        let (creator_score, opponent_score) = match status {
            MatchStatus::Completed => (row.creator_score, row.opponent_score),
            _ => (None, None),
        };
        let winner = match (creator_score, opponent_score) {
            (Some(c), Some(o)) => Some(decide_winner(c, o)),
            _ => None,
        };
        HistoryEntry {
            prompt_title: prompts::find(&row.prompt_id).map(|p| p.title),
            role: row.role.parse().unwrap_or(Role::Opponent),
            has_opponent: row.opponent_user_id.is_some(),
            match_id: row.match_id,
            match_code: row.match_code,
            prompt_id: row.prompt_id,
            status,
            created_at: row.created_at,
            expires_at: row.expires_at,
            completed_at: row.completed_at,
            creator_score,
            opponent_score,
            winner,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchHistory {
    pub matches: Vec<HistoryEntry>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

impl MatchService {
    /// Both participants' graded sessions and the winner. Completed matches only.
    pub async fn get_match_results(&self, match_id: &str) -> Result<MatchResults, MatchError> {
        let m = self
            .db()
            .get_match(match_id)
            .await?
            .ok_or(MatchError::MatchNotFound)?;
        if m.status() != MatchStatus::Completed {
            return Err(MatchError::NotCompleted);
        }

        let mut creator = None;
        let mut opponent = None;
        for row in self.db().get_participant_sessions(&m.id).await? {
            let result = ParticipantResult::from(row);
            match result.role {
                Role::Creator => creator = Some(result),
                Role::Opponent => opponent = Some(result),
            }
        }
        let (Some(creator), Some(opponent)) = (creator, opponent) else {
            tracing::warn!(match_id = %m.id, "Completed match is missing a linked session");
            return Err(MatchError::NotCompleted);
        };

        Ok(MatchResults {
            winner: decide_winner(creator.session.score, opponent.session.score),
            prompt: prompts::find(&m.prompt_id).copied(),
            position: creator.session.position.clone(),
            match_id: m.id,
            match_code: m.code,
            prompt_id: m.prompt_id,
            creator,
            opponent,
            created_at: m.created_at,
            completed_at: m.completed_at,
        })
    }

    /// A page of the user's matches, newest first. Stale pending matches are
    /// expired before listing so the page never shows them as open.
    pub async fn get_match_history(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<MatchHistory, MatchError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.max(0);

        let expired = self
            .db()
            .expire_stale_matches_for_user(user_id, Utc::now())
            .await?;
        if expired > 0 {
            crate::metrics::MATCHES_EXPIRED_TOTAL.inc_by(expired);
            tracing::info!(user = user_id, expired, "Expired stale matches before history");
        }

        let (rows, total) = self
            .db()
            .list_matches_for_user(user_id, limit, offset)
            .await?;
        let matches: Vec<HistoryEntry> = rows.into_iter().map(HistoryEntry::from).collect();
        let has_more = offset + (matches.len() as i64) < total;

        Ok(MatchHistory {
            matches,
            total,
            limit,
            offset,
            has_more,
        })
    }
}
