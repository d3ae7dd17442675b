//! Admin sessions: issue, verify, expire.
//!
//! A session lives from login until it is destroyed or its age reaches the
//! configured timeout:
//!
//! ```text
//! Active ──(age >= timeout)──► Expired ──(verify / sweep)──► removed
//!    └──────────(logout)──────────────────────────────────────►┘
//! ```
//!
//! Expiry is measured on `tokio::time::Instant` by both `verify` and the
//! sweeper, so the two always agree on which sessions are dead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::rate_limit::RateLimiter;

/// Random bytes per token (256 bits).
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct Session {
    pub created_at: Instant,
    /// Wall-clock login time, for diagnostics only.
    pub created_wall: DateTime<Utc>,
    pub client: String,
}

pub struct SessionManager {
    timeout: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start a session for `client` and return its token.
    pub fn create_session(&self, client: &str) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.sessions.write().insert(
            token.clone(),
            Session {
                created_at: Instant::now(),
                created_wall: Utc::now(),
                client: client.to_string(),
            },
        );
        token
    }

    /// Whether `token` names a live session. Expired sessions are evicted.
    pub fn verify(&self, token: &str) -> bool {
        let now = Instant::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(token) {
                None => return false,
                Some(session) if !self.is_expired(session, now) => return true,
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent destroy may have won.
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get(token) {
            if self.is_expired(session, now) {
                debug!(
                    "Session for {} (since {}) expired",
                    session.client, session.created_wall
                );
                sessions.remove(token);
            }
        }
        false
    }

    /// End a session. Unknown tokens are ignored.
    pub fn destroy(&self, token: &str) {
        self.sessions.write().remove(token);
    }

    /// Evict every expired session; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        before - sessions.len()
    }

    /// Sessions still inside their timeout. Expired ones awaiting the sweep
    /// are not counted.
    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .read()
            .values()
            .filter(|session| !self.is_expired(session, now))
            .count()
    }

    #[cfg(test)]
    fn stored_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.created_at) >= self.timeout
    }
}

/// Periodically evict expired sessions and stale rate-limit records until
/// `shutdown` is cancelled.
pub async fn run_sweeper(
    sessions: Arc<SessionManager>,
    limiter: Arc<RateLimiter>,
    every: Duration,
    shutdown: CancellationToken,
) {
    info!("Session sweeper running every {}s", every.as_secs());

    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Session sweeper stopped");
                return;
            }
            _ = ticker.tick() => {
                let expired = sessions.sweep();
                let purged = limiter.purge();
                if expired > 0 || purged > 0 {
                    info!("Swept {expired} expired sessions, {purged} idle rate-limit records");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30 * 60);

    #[tokio::test(start_paused = true)]
    async fn fresh_token_verifies() {
        let manager = SessionManager::new(TIMEOUT);
        let token = manager.create_session("10.0.0.1");
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(manager.verify(&token));
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tokens_never_verify() {
        let manager = SessionManager::new(TIMEOUT);
        manager.create_session("10.0.0.1");
        assert!(!manager.verify(""));
        assert!(!manager.verify("deadbeef"));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_are_unique_and_independent() {
        let manager = SessionManager::new(TIMEOUT);
        let a = manager.create_session("10.0.0.1");
        let b = manager.create_session("10.0.0.1");
        assert_ne!(a, b);
        assert!(manager.verify(&a));
        assert!(manager.verify(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn valid_until_just_before_timeout() {
        let manager = SessionManager::new(TIMEOUT);
        let token = manager.create_session("10.0.0.1");

        tokio::time::advance(TIMEOUT - Duration::from_millis(1)).await;
        assert!(manager.verify(&token));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!manager.verify(&token));
        // Evicted on detection.
        assert_eq!(manager.stored_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_revokes_immediately_and_is_idempotent() {
        let manager = SessionManager::new(TIMEOUT);
        let token = manager.create_session("10.0.0.1");
        manager.destroy(&token);
        assert!(!manager.verify(&token));
        manager.destroy(&token);
        manager.destroy("never-issued");
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_sessions() {
        let manager = SessionManager::new(TIMEOUT);
        let old = manager.create_session("10.0.0.1");
        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        let young = manager.create_session("10.0.0.2");
        tokio::time::advance(Duration::from_secs(10 * 60)).await;

        assert_eq!(manager.sweep(), 1);
        assert_eq!(manager.active_count(), 1);
        assert!(!manager.verify(&old));
        assert!(manager.verify(&young));
    }

    #[tokio::test(start_paused = true)]
    async fn active_count_skips_expired_sessions_before_the_sweep() {
        let manager = SessionManager::new(TIMEOUT);
        manager.create_session("10.0.0.1");
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        manager.create_session("10.0.0.2");
        tokio::time::advance(Duration::from_secs(20 * 60)).await;

        assert_eq!(manager.stored_count(), 2);
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_evicts_on_its_interval() {
        let manager = Arc::new(SessionManager::new(Duration::from_secs(60)));
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), 5));
        let shutdown = CancellationToken::new();
        manager.create_session("10.0.0.1");

        let task = tokio::spawn(run_sweeper(
            manager.clone(),
            limiter,
            Duration::from_secs(300),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(manager.stored_count(), 0);

        shutdown.cancel();
        task.await.unwrap();
    }
}
