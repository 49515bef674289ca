// In-memory rate limiter for match endpoints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Different rate limit types with their constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitType {
    /// Matches created per hour.
    MatchCreate,
    /// Join attempts per hour.
    MatchJoin,
}

impl RateLimitType {
    /// Maximum number of events allowed in the window.
    pub fn max_count(&self) -> usize {
        match self {
            RateLimitType::MatchCreate => 20,
            RateLimitType::MatchJoin => 60,
        }
    }

    /// Time window for the rate limit.
    pub fn window(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

impl std::fmt::Display for RateLimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitType::MatchCreate => write!(f, "match creations per hour"),
            RateLimitType::MatchJoin => write!(f, "match joins per hour"),
        }
    }
}

/// Error returned when a rate limit is exceeded.
#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub limit_type: RateLimitType,
    pub max: usize,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rate limit exceeded: max {} {}",
            self.max, self.limit_type
        )
    }
}

/// Key for the rate limit map: (user_id, limit_type).
type LimitKey = (String, RateLimitType);

/// Thread-safe in-memory sliding-window rate limiter.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<LimitKey, Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<LimitKey, Vec<Instant>>> {
        // A panic while holding the lock leaves only timestamps behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check if the user is within the rate limit for the given type.
    /// If within limits, records the event and returns Ok(()).
    /// In local mode, rate limiting is always bypassed.
    pub fn check_limit(&self, user_id: &str, limit_type: RateLimitType) -> Result<(), RateLimitError> {
        if crate::config::is_local_mode() {
            return Ok(());
        }
        let window = limit_type.window();
        let max = limit_type.max_count();
        let now = Instant::now();

        let mut map = self.entries();
        let entries = map
            .entry((user_id.to_string(), limit_type))
            .or_default();

        // Remove expired entries
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            return Err(RateLimitError { limit_type, max });
        }

        entries.push(now);
        Ok(())
    }

    /// Get the current count for a user and limit type (for testing/diagnostics).
    pub fn current_count(&self, user_id: &str, limit_type: RateLimitType) -> usize {
        let window = limit_type.window();
        let now = Instant::now();

        let mut map = self.entries();
        match map.get_mut(&(user_id.to_string(), limit_type)) {
            Some(entries) => {
                entries.retain(|t| now.duration_since(*t) < window);
                entries.len()
            }
            None => 0,
        }
    }
}
