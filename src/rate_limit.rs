//! Per-identity rate limiting for balance checks.
//!
//! A user may re-check their balance 60 seconds after a successful check or
//! 10 seconds after a failed one. The limiter only guards the explicit
//! balance-check action; code registration is exempt so a user can retry a
//! mistyped code without waiting.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Outcome of the most recent balance-check attempt for one identity.
#[derive(Debug, Clone, Copy)]
struct Attempt {
    at: DateTime<Utc>,
    success: bool,
}

/// Tracks the last balance-check attempt per identity.
///
/// State is in-memory only; it resets on restart, which merely lets every
/// user check once immediately.
pub struct RateLimiter {
    cooldown_after_success: Duration,
    cooldown_after_failure: Duration,
    attempts: Mutex<HashMap<String, Attempt>>,
}

impl RateLimiter {
    pub fn new(cooldown_after_success: Duration, cooldown_after_failure: Duration) -> Self {
        Self {
            cooldown_after_success,
            cooldown_after_failure,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether an identity may run a balance check at `now`.
    ///
    /// Returns `None` if the attempt is allowed, or `Some(seconds)` with the
    /// remaining wait rounded up to whole seconds if it is blocked. Does not
    /// record anything; call [`record`](Self::record) with the outcome.
    pub async fn check(&self, identity: &str, now: DateTime<Utc>) -> Option<u64> {
        let attempts = self.attempts.lock().await;
        let last = attempts.get(identity)?;

        let required = if last.success {
            self.cooldown_after_success
        } else {
            self.cooldown_after_failure
        };
        let elapsed_ms = (now - last.at).num_milliseconds().max(0);
        let remaining_ms = required.as_millis() as i64 - elapsed_ms;

        if remaining_ms > 0 {
            Some((remaining_ms as u64).div_ceil(1000))
        } else {
            None
        }
    }

    /// Record the outcome of a balance-check attempt.
    pub async fn record(&self, identity: &str, success: bool, now: DateTime<Utc>) {
        let mut attempts = self.attempts.lock().await;
        attempts.insert(identity.to_string(), Attempt { at: now, success });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_secs(60), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn first_attempt_is_allowed() {
        let rl = limiter();
        assert_eq!(rl.check("u1", Utc::now()).await, None);
    }

    #[tokio::test]
    async fn blocked_until_success_cooldown_elapses() {
        let rl = limiter();
        let t0 = Utc::now();
        rl.record("u1", true, t0).await;

        let wait = rl.check("u1", t0 + TimeDelta::seconds(59)).await;
        assert!(wait.is_some_and(|s| s >= 1), "expected a wait, got {wait:?}");

        assert_eq!(rl.check("u1", t0 + TimeDelta::seconds(60)).await, None);
        assert_eq!(rl.check("u1", t0 + TimeDelta::seconds(120)).await, None);
    }

    #[tokio::test]
    async fn failed_attempt_uses_short_cooldown() {
        let rl = limiter();
        let t0 = Utc::now();
        rl.record("u1", false, t0).await;

        assert!(rl.check("u1", t0 + TimeDelta::seconds(9)).await.is_some());
        assert_eq!(rl.check("u1", t0 + TimeDelta::seconds(10)).await, None);
    }

    #[tokio::test]
    async fn remaining_wait_is_whole_second_ceiling() {
        let rl = limiter();
        let t0 = Utc::now();
        rl.record("u1", true, t0).await;

        // 59.5s elapsed → 0.5s remaining → reported as 1
        let wait = rl.check("u1", t0 + TimeDelta::milliseconds(59_500)).await;
        assert_eq!(wait, Some(1));

        let wait = rl.check("u1", t0 + TimeDelta::seconds(1)).await;
        assert_eq!(wait, Some(59));
    }

    #[tokio::test]
    async fn identities_are_independent() {
        let rl = limiter();
        let t0 = Utc::now();
        rl.record("u1", true, t0).await;

        assert!(rl.check("u1", t0).await.is_some());
        assert_eq!(rl.check("u2", t0).await, None);
    }

    #[tokio::test]
    async fn new_record_replaces_old_one() {
        let rl = limiter();
        let t0 = Utc::now();
        rl.record("u1", true, t0).await;
        // A later failed attempt shortens the window.
        rl.record("u1", false, t0 + TimeDelta::seconds(60)).await;

        assert!(rl.check("u1", t0 + TimeDelta::seconds(65)).await.is_some());
        assert_eq!(rl.check("u1", t0 + TimeDelta::seconds(70)).await, None);
    }
}
