// Match state machine: create, join, link and lazy expiry.
//
// pending ──join/link──▶ completed
//    │
//    └──deadline passed──▶ expired
//
// Both terminal states are final. Status is never set by callers; it is derived
// by the repository from participant slots or from the stored deadline.

pub mod code;
pub mod error;
pub mod results;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{Database, Match, MatchStatus, Role};
use crate::metrics;
use crate::prompts::{self, Prompt};

pub use error::{ErrorKind, MatchError};
pub use results::{MatchHistory, MatchResults, Winner};

/// Result of a create request.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedMatch {
    pub match_id: String,
    pub match_code: String,
    pub expires_at: String,
    /// True when an open match for the same session was handed back instead.
    pub existing_match: bool,
}

/// A successful admission (or re-admission) as opponent.
#[derive(Debug, Clone, Serialize)]
pub struct JoinedMatch {
    pub match_id: String,
    pub match_code: String,
    pub prompt_id: String,
    pub position: String,
    pub already_joined: bool,
    pub expires_at: String,
}

#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Joined(JoinedMatch),
    /// Someone else holds the opponent seat.
    AlreadyAccepted { match_id: String, match_code: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkedSession {
    pub match_id: String,
    pub match_code: String,
    pub match_completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSummary {
    pub role: Role,
    pub user_id: String,
    pub has_played: bool,
    pub joined_at: String,
}

/// Everything a client needs to render a match page.
#[derive(Debug, Clone, Serialize)]
pub struct MatchView {
    #[serde(rename = "match")]
    pub match_info: Match,
    pub prompt: Option<Prompt>,
    pub position: Option<String>,
    pub participants: Vec<ParticipantSummary>,
    pub is_completed: bool,
    pub results: Option<MatchResults>,
}

#[derive(Clone)]
pub struct MatchService {
    db: Arc<Database>,
}

impl MatchService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Open a challenge from one of the creator's graded sessions.
    ///
    /// Unless `force_new` is set, a still-pending match created from the same
    /// session is returned instead of a new one.
    pub async fn create_match(
        &self,
        creator_user_id: &str,
        source_session_id: &str,
        force_new: bool,
    ) -> Result<CreatedMatch, MatchError> {
        let session = self
            .db
            .get_session(source_session_id)
            .await?
            .ok_or(MatchError::SessionNotFound)?;
        if session.user_id != creator_user_id {
            return Err(MatchError::SessionNotOwned);
        }
        if !session.is_completed() {
            return Err(MatchError::Validation(
                "Session has not been graded yet".to_string(),
            ));
        }
        let prompt = prompts::find(&session.prompt_id)
            .ok_or_else(|| MatchError::Validation("Session answers an unknown prompt".to_string()))?;
        if !prompt.has_position(&session.position) {
            return Err(MatchError::Validation(format!(
                "Position '{}' is not offered by prompt '{}'",
                session.position, prompt.id
            )));
        }

        let now = Utc::now();

        if !force_new {
            if let Some(existing) = self.db.find_pending_match_for_session(&session.id).await? {
                if !self.expire_if_stale(&existing, now).await? {
                    tracing::info!(match_id = %existing.id, code = %existing.code, "Reusing pending match");
                    return Ok(CreatedMatch {
                        match_id: existing.id,
                        match_code: existing.code,
                        expires_at: existing.expires_at,
                        existing_match: true,
                    });
                }
            }
        }

        let m = self
            .db
            .create_match(
                creator_user_id,
                &session.id,
                &session.prompt_id,
                now,
                code::generate,
            )
            .await?;

        metrics::MATCHES_CREATED_TOTAL.inc();
        tracing::info!(match_id = %m.id, code = %m.code, creator = creator_user_id, "Match created");

        Ok(CreatedMatch {
            match_id: m.id,
            match_code: m.code,
            expires_at: m.expires_at,
            existing_match: false,
        })
    }

    /// Plain lookup by code. Does not apply expiry.
    pub async fn get_match_by_code(&self, code: &str) -> Result<Match, MatchError> {
        self.db
            .get_match_by_code(&code::normalize(code))
            .await?
            .ok_or(MatchError::MatchNotFound)
    }

    /// Move a pending match past its deadline to expired.
    /// Returns true if this call performed the transition.
    pub async fn check_and_update_expiry(&self, match_id: &str) -> Result<bool, MatchError> {
        let expired = self.db.expire_match_if_stale(match_id, Utc::now()).await?;
        if expired {
            metrics::MATCHES_EXPIRED_TOTAL.inc();
            tracing::info!(match_id, "Match expired");
        }
        Ok(expired)
    }

    /// Take the opponent seat of the match behind `code`.
    pub async fn join_match(&self, code: &str, user_id: &str) -> Result<JoinOutcome, MatchError> {
        let outcome = self.try_join(code, user_id).await;
        let label = match &outcome {
            Ok(JoinOutcome::Joined(j)) if j.already_joined => "rejoined",
            Ok(JoinOutcome::Joined(_)) => "joined",
            Ok(JoinOutcome::AlreadyAccepted { .. }) => "already_accepted",
            Err(_) => "rejected",
        };
        metrics::MATCH_JOINS_TOTAL.with_label_values(&[label]).inc();
        outcome
    }

    async fn try_join(&self, code: &str, user_id: &str) -> Result<JoinOutcome, MatchError> {
        let m = self.get_match_by_code(code).await?;
        let now = Utc::now();

        if self.expire_if_stale(&m, now).await? {
            return Err(MatchError::Expired);
        }
        match m.status() {
            MatchStatus::Expired => return Err(MatchError::Expired),
            MatchStatus::Completed => return Err(MatchError::AlreadyCompleted),
            MatchStatus::Pending => {}
        }

        let creator = self
            .db
            .get_participant(&m.id, Role::Creator)
            .await?
            .ok_or_else(|| MatchError::Validation("Match has no creator".to_string()))?;
        if creator.user_id == user_id {
            return Err(MatchError::SelfJoin);
        }
        let position = self.creator_position(&m).await?;

        let joined = |already_joined: bool| {
            JoinOutcome::Joined(JoinedMatch {
                match_id: m.id.clone(),
                match_code: m.code.clone(),
                prompt_id: m.prompt_id.clone(),
                position: position.clone(),
                already_joined,
                expires_at: m.expires_at.clone(),
            })
        };

        if self.db.insert_opponent_if_absent(&m.id, user_id, now).await? {
            tracing::info!(match_id = %m.id, opponent = user_id, "Opponent joined match");
            return Ok(joined(false));
        }

        match self.db.get_participant(&m.id, Role::Opponent).await? {
            Some(opponent) if opponent.user_id == user_id => Ok(joined(true)),
            Some(_) => {
                tracing::info!(match_id = %m.id, user = user_id, "Join rejected, challenge already accepted");
                Ok(JoinOutcome::AlreadyAccepted {
                    match_id: m.id.clone(),
                    match_code: m.code.clone(),
                })
            }
            // The match closed between the status check and the insert.
            None => Err(self.closed_error(&m.id, now).await?),
        }
    }

    /// Attach a finished session to the caller's slot; completes the match once
    /// both sides have played.
    pub async fn link_session(
        &self,
        session_id: &str,
        match_id: &str,
        user_id: &str,
    ) -> Result<LinkedSession, MatchError> {
        let m = self
            .db
            .get_match(match_id)
            .await?
            .ok_or(MatchError::MatchNotFound)?;
        let now = Utc::now();

        if self.expire_if_stale(&m, now).await? || m.status() == MatchStatus::Expired {
            return Err(MatchError::Expired);
        }

        let participant = self
            .db
            .get_participant_for_user(&m.id, user_id)
            .await?
            .ok_or(MatchError::NotParticipant)?;

        let linked = |match_completed: bool| LinkedSession {
            match_id: m.id.clone(),
            match_code: m.code.clone(),
            match_completed,
        };

        if let Some(existing) = participant.session_id.as_deref() {
            if existing != session_id {
                return Err(MatchError::ParticipantAlreadyLinked);
            }
            // Repeat of a link that already landed, e.g. the creator's own session.
            let status = match m.status() {
                MatchStatus::Pending => self.db.refresh_completion(&m.id, now).await?,
                status => status,
            };
            return Ok(linked(status == MatchStatus::Completed));
        }
        if m.status() == MatchStatus::Completed {
            return Err(MatchError::AlreadyCompleted);
        }

        let session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or(MatchError::SessionNotFound)?;
        if session.user_id != user_id {
            return Err(MatchError::SessionNotOwned);
        }
        if !session.is_completed() {
            return Err(MatchError::Validation(
                "Session has not been graded yet".to_string(),
            ));
        }
        if session.prompt_id != m.prompt_id {
            return Err(MatchError::Validation(
                "Session answers a different prompt than the match".to_string(),
            ));
        }
        if session.position != self.creator_position(&m).await? {
            return Err(MatchError::Validation(
                "Session argues a different position than the match".to_string(),
            ));
        }

        match self
            .db
            .link_participant_session(&m.id, user_id, session_id, now)
            .await?
        {
            Some(status) => {
                let completed = status == MatchStatus::Completed;
                tracing::info!(match_id = %m.id, user = user_id, session = session_id, "Session linked to match");
                if completed {
                    metrics::MATCHES_COMPLETED_TOTAL.inc();
                    tracing::info!(match_id = %m.id, "Match completed");
                }
                Ok(linked(completed))
            }
            None => {
                // Lost a race: either our own retry landed first or the match closed.
                let current = self
                    .db
                    .get_participant_for_user(&m.id, user_id)
                    .await?
                    .and_then(|p| p.session_id);
                let status = self.current_status(&m.id, now).await?;
                if status == MatchStatus::Expired {
                    return Err(MatchError::Expired);
                }
                match current.as_deref() {
                    Some(s) if s == session_id => Ok(linked(status == MatchStatus::Completed)),
                    Some(_) => Err(MatchError::ParticipantAlreadyLinked),
                    None if status == MatchStatus::Completed => Err(MatchError::AlreadyCompleted),
                    None => Err(MatchError::Expired),
                }
            }
        }
    }

    /// Fetch-by-code view: applies expiry, then returns either the full results
    /// (completed) or the match with its participants.
    pub async fn get_match_view(&self, code: &str) -> Result<MatchView, MatchError> {
        let mut m = self.get_match_by_code(code).await?;
        if self.expire_if_stale(&m, Utc::now()).await? {
            m = self
                .db
                .get_match(&m.id)
                .await?
                .ok_or(MatchError::MatchNotFound)?;
        }

        let participants = self
            .db
            .get_match_participants(&m.id)
            .await?
            .into_iter()
            .filter_map(|p| {
                Some(ParticipantSummary {
                    role: p.role()?,
                    has_played: p.session_id.is_some(),
                    user_id: p.user_id,
                    joined_at: p.joined_at,
                })
            })
            .collect();

        let is_completed = m.status() == MatchStatus::Completed;
        let results = if is_completed {
            Some(self.get_match_results(&m.id).await?)
        } else {
            None
        };
        let position = self.find_creator_position(&m).await?;

        Ok(MatchView {
            prompt: prompts::find(&m.prompt_id).copied(),
            position,
            participants,
            is_completed,
            results,
            match_info: m,
        })
    }

    /// Expire `m` if it is past its deadline. True when the match is expired now,
    /// whether this call or a concurrent one flipped it.
    async fn expire_if_stale(&self, m: &Match, now: DateTime<Utc>) -> Result<bool, MatchError> {
        if !m.is_stale(now) {
            return Ok(false);
        }
        if self.db.expire_match_if_stale(&m.id, now).await? {
            metrics::MATCHES_EXPIRED_TOTAL.inc();
            tracing::info!(match_id = %m.id, code = %m.code, "Match expired");
        }
        Ok(true)
    }

    /// Status after applying expiry.
    async fn current_status(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MatchStatus, MatchError> {
        let m = self
            .db
            .get_match(match_id)
            .await?
            .ok_or(MatchError::MatchNotFound)?;
        if self.expire_if_stale(&m, now).await? {
            return Ok(MatchStatus::Expired);
        }
        Ok(m.status())
    }

    /// Error for a match that stopped accepting joins under our feet.
    async fn closed_error(
        &self,
        match_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MatchError, MatchError> {
        Ok(match self.current_status(match_id, now).await? {
            MatchStatus::Completed => MatchError::AlreadyCompleted,
            _ => MatchError::Expired,
        })
    }

    /// Position argued in the creator's session; the opponent argues the same one.
    async fn creator_position(&self, m: &Match) -> Result<String, MatchError> {
        self.find_creator_position(m)
            .await?
            .ok_or_else(|| MatchError::Validation("Match has no creator session".to_string()))
    }

    async fn find_creator_position(&self, m: &Match) -> Result<Option<String>, MatchError> {
        let Some(session_id) = self
            .db
            .get_participant(&m.id, Role::Creator)
            .await?
            .and_then(|p| p.session_id)
        else {
            return Ok(None);
        };
        Ok(self.db.get_session(&session_id).await?.map(|s| s.position))
    }
}
