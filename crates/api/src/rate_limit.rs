//! Per-user sliding-window rate limiting.
//!
//! State lives in process memory and is advisory: quotas enforce the real
//! billing limits, so precision here would buy nothing. The window is the
//! user's last 60 seconds of admissions; the critical section is a map
//! lookup plus a deque rotation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tessera_core::types::DbId;

/// Length of the rate-limit window.
const WINDOW: Duration = Duration::from_secs(60);

/// A successful check's view of the caller's window, used for the
/// `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the oldest counted request ages out.
    pub reset_epoch: u64,
}

struct UserWindow {
    hits: VecDeque<Instant>,
    /// The per-minute limit seen on the most recent check (the user's plan
    /// may change between requests).
    limit: u32,
}

/// Sliding-window limiter keyed by user id.
pub struct RateLimiter {
    windows: Mutex<HashMap<DbId, UserWindow>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `user` and check it against `limit` per minute.
    ///
    /// On success the hit is counted and the post-hit window status is
    /// returned. On rejection nothing is recorded and the error carries the
    /// seconds until the oldest hit ages out.
    pub fn check(&self, user: DbId, limit: u32) -> Result<RateLimitStatus, u64> {
        self.check_at(user, limit, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock, for tests.
    pub fn check_at(&self, user: DbId, limit: u32, now: Instant) -> Result<RateLimitStatus, u64> {
        let mut windows = self.windows.lock().expect("rate limiter poisoned");
        let window = windows.entry(user).or_insert_with(|| UserWindow {
            hits: VecDeque::new(),
            limit,
        });
        window.limit = limit;

        // Age out hits older than the window.
        while window
            .hits
            .front()
            .is_some_and(|hit| now.duration_since(*hit) >= WINDOW)
        {
            window.hits.pop_front();
        }

        if window.hits.len() >= limit as usize {
            // A zero-limit plan has no hits to age out; report a full window.
            let retry_after = window
                .hits
                .front()
                .map(|oldest| {
                    WINDOW
                        .saturating_sub(now.duration_since(*oldest))
                        .as_secs()
                        .max(1)
                })
                .unwrap_or_else(|| WINDOW.as_secs());
            return Err(retry_after);
        }

        window.hits.push_back(now);
        Ok(status_of(window, now))
    }

    /// Un-count the most recent hit for `user`.
    ///
    /// Called when an admission fails after its rate-limit check, so a
    /// rejected request does not consume window budget.
    pub fn forgive(&self, user: DbId) {
        let mut windows = self.windows.lock().expect("rate limiter poisoned");
        if let Some(window) = windows.get_mut(&user) {
            window.hits.pop_back();
        }
    }

    /// The current window status for `user`, if they have made any requests.
    pub fn status(&self, user: DbId) -> Option<RateLimitStatus> {
        self.status_at(user, Instant::now())
    }

    /// [`status`](Self::status) with an explicit clock, for tests.
    pub fn status_at(&self, user: DbId, now: Instant) -> Option<RateLimitStatus> {
        let mut windows = self.windows.lock().expect("rate limiter poisoned");
        let window = windows.get_mut(&user)?;
        while window
            .hits
            .front()
            .is_some_and(|hit| now.duration_since(*hit) >= WINDOW)
        {
            window.hits.pop_front();
        }
        Some(status_of(window, now))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn status_of(window: &UserWindow, now: Instant) -> RateLimitStatus {
    let used = window.hits.len() as u32;
    let reset_in = window
        .hits
        .front()
        .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
        .unwrap_or(Duration::ZERO);
    let epoch_now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    RateLimitStatus {
        limit: window.limit,
        remaining: window.limit.saturating_sub(used),
        reset_epoch: epoch_now + reset_in.as_secs(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_under_the_limit_pass() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(1, 3, now).is_ok());
        }
    }

    #[test]
    fn request_over_the_limit_is_rejected_with_retry_after() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..3 {
            limiter.check_at(1, 3, now).unwrap();
        }
        let retry_after = limiter.check_at(1, 3, now).unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
    }

    #[test]
    fn hits_age_out_after_the_window() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.check_at(1, 3, start).unwrap();
        }
        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at(1, 3, later).is_ok());
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        let first = limiter.check_at(1, 3, now).unwrap();
        assert_eq!(first.remaining, 2);
        let second = limiter.check_at(1, 3, now).unwrap();
        assert_eq!(second.remaining, 1);
    }

    #[test]
    fn forgive_returns_window_budget() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..3 {
            limiter.check_at(1, 3, now).unwrap();
        }
        limiter.forgive(1);
        assert!(limiter.check_at(1, 3, now).is_ok());
    }

    #[test]
    fn users_have_independent_windows() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for _ in 0..3 {
            limiter.check_at(1, 3, now).unwrap();
        }
        assert!(limiter.check_at(2, 3, now).is_ok());
    }

    #[test]
    fn status_is_none_for_unseen_user() {
        assert!(RateLimiter::new().status(99).is_none());
    }
}
