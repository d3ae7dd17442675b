//! # Login Rate Limiting
//!
//! Sliding-window counter keyed by client identity.
//!
//! - Each client keeps the instants of its accepted attempts inside the window.
//! - Instants older than the window are pruned lazily on every call.
//! - A client with `max_attempts` instants left in the window is refused, and
//!   the refused attempt is **not** recorded, so the block lifts one window
//!   after the oldest accepted attempt.
//! - State is in-memory only and resets on restart.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

pub struct RateLimiter {
    window: Duration,
    max_attempts: usize,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_attempts: usize) -> Self {
        Self {
            window,
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt for `client` if it is under the limit.
    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        let history = attempts.entry(client.to_string()).or_default();
        prune(history, now, self.window);

        if history.len() >= self.max_attempts {
            warn!("Login rate limit hit for {client}");
            return false;
        }
        history.push_back(now);
        true
    }

    /// How long `client` must wait before `allow` can succeed again, or
    /// `None` if it is not currently blocked.
    pub fn retry_after(&self, client: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        let history = attempts.get_mut(client)?;
        prune(history, now, self.window);

        if history.len() < self.max_attempts {
            return None;
        }
        history
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
    }

    /// Drop clients with no attempts left in the window; returns how many.
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let mut attempts = self.attempts.lock();
        let before = attempts.len();
        attempts.retain(|_, history| {
            prune(history, now, self.window);
            !history.is_empty()
        });
        before - attempts.len()
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.attempts.lock().len()
    }
}

fn prune(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = history.front() {
        if now.saturating_duration_since(*oldest) >= window {
            history.pop_front();
        } else {
            break;
        }
    }
}
