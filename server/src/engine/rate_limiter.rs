use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::LimitsSection;

/// Sliding-window rate limiter keyed by string (user ID, IP, etc.).
///
/// Each key keeps the instants of its accepted actions inside the window.
/// A rejected action records nothing.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    max_actions: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_actions: u32, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_actions: max_actions as usize,
            window,
        }
    }

    /// `max_actions` per rolling 60 seconds.
    pub fn per_minute(max_actions: u32) -> Self {
        Self::new(max_actions, Duration::from_secs(60))
    }

    /// Record an action for `key` if the window has room. On rejection
    /// returns how long until the oldest counted action leaves the window.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let hits = windows.entry(key.to_string()).or_default();

        while let Some(oldest) = hits.front()
            && now.duration_since(*oldest) >= self.window
        {
            hits.pop_front();
        }

        if hits.len() >= self.max_actions {
            let retry_after = hits
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        hits.push_back(now);
        Ok(())
    }

    /// Remove keys with no action newer than `older_than`.
    pub fn cleanup(&self, older_than: Duration) {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        windows.retain(|_, hits| {
            hits.back()
                .is_some_and(|newest| now.duration_since(*newest) < older_than)
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.lock().unwrap().len()
    }
}

/// The per-actor limiters consulted by room actions.
pub struct ActionLimiters {
    /// Chat messages. The room creator is exempt.
    pub message: RateLimiter,
    pub moderation: RateLimiter,
    /// Session start/end/pause/resume.
    pub session: RateLimiter,
}

impl ActionLimiters {
    pub fn from_config(limits: &LimitsSection) -> Self {
        Self {
            message: RateLimiter::per_minute(limits.messages_per_minute),
            moderation: RateLimiter::per_minute(limits.moderation_actions_per_minute),
            session: RateLimiter::per_minute(limits.session_actions_per_minute),
        }
    }

    pub fn cleanup(&self, older_than: Duration) {
        self.message.cleanup(older_than);
        self.moderation.cleanup(older_than);
        self.session.cleanup(older_than);
    }
}
