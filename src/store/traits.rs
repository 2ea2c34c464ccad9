//! `UserStore` trait — async interface for user-profile persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// A persisted user profile, keyed by the stable Telegram identity.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub telegram_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// The saved card code. Only ever set through the code-acquisition flow,
    /// after validation and a confirming gateway lookup.
    pub card_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic store for user profiles.
///
/// The store is the sole writer of the persisted card code. Concurrent
/// create-or-update for a brand-new identity must not corrupt; last write
/// wins for the code itself.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a profile by identity.
    async fn find_by_identity(&self, id: &str) -> Result<Option<UserProfile>, DatabaseError>;

    /// Create a profile if one does not exist yet, then return it.
    /// Atomic find-or-create; an existing profile is left untouched.
    async fn create_user(
        &self,
        id: &str,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<UserProfile, DatabaseError>;

    /// Set the saved card code, creating the profile if absent.
    async fn set_card_code(&self, id: &str, code: &str) -> Result<UserProfile, DatabaseError>;

    /// Fetch just the saved card code for an identity.
    async fn card_code(&self, id: &str) -> Result<Option<String>, DatabaseError>;
}
