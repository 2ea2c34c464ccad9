//! Per-identity conversation state.
//!
//! Session state models the conversation position, not account data. It
//! lives only in process memory and resets on restart; the user simply
//! re-enters their code.

use std::collections::HashMap;

use tokio::sync::Mutex;

/// What the bot currently expects from one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No pending interaction; commands and buttons are handled, stray
    /// input is ignored.
    #[default]
    Idle,
    /// The next text or photo message is treated as a card-code submission.
    AwaitingCode,
}

/// Concurrent map of identity → session state. An identity with no entry
/// is `Idle`.
#[derive(Default)]
pub struct SessionMap {
    inner: Mutex<HashMap<String, SessionState>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, identity: &str) -> SessionState {
        self.inner
            .lock()
            .await
            .get(identity)
            .copied()
            .unwrap_or_default()
    }

    pub async fn set(&self, identity: &str, state: SessionState) {
        let mut inner = self.inner.lock().await;
        match state {
            SessionState::Idle => {
                inner.remove(identity);
            }
            other => {
                inner.insert(identity.to_string(), other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_identity_is_idle() {
        let map = SessionMap::new();
        assert_eq!(map.get("u1").await, SessionState::Idle);
    }

    #[tokio::test]
    async fn set_and_clear() {
        let map = SessionMap::new();
        map.set("u1", SessionState::AwaitingCode).await;
        assert_eq!(map.get("u1").await, SessionState::AwaitingCode);
        assert_eq!(map.get("u2").await, SessionState::Idle);

        map.set("u1", SessionState::Idle).await;
        assert_eq!(map.get("u1").await, SessionState::Idle);
    }
}
