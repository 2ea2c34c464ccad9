//! libSQL backend — async `UserStore` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::traits::{UserProfile, UserStore};

const USER_COLUMNS: &str =
    "telegram_id, username, first_name, last_name, card_code, created_at, updated_at";

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS users (
                    telegram_id TEXT PRIMARY KEY,
                    username    TEXT,
                    first_name  TEXT,
                    last_name   TEXT,
                    card_code   TEXT,
                    created_at  TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                )",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("init_schema: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn get_profile(&self, id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let profile = row_to_profile(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_profile row parse: {e}")))?;
                Ok(Some(profile))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_profile: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string written by us.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a UserProfile. Column order matches USER_COLUMNS.
fn row_to_profile(row: &libsql::Row) -> Result<UserProfile, libsql::Error> {
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(UserProfile {
        telegram_id: row.get(0)?,
        username: row.get(1).ok(),
        first_name: row.get(2).ok(),
        last_name: row.get(3).ok(),
        card_code: row.get(4).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── UserStore implementation ────────────────────────────────────────

#[async_trait]
impl UserStore for LibSqlBackend {
    async fn find_by_identity(&self, id: &str) -> Result<Option<UserProfile>, DatabaseError> {
        self.get_profile(id).await
    }

    async fn create_user(
        &self,
        id: &str,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<UserProfile, DatabaseError> {
        let now = Utc::now().to_rfc3339();

        // Atomic find-or-create: a concurrent insert for the same identity
        // leaves the existing row untouched.
        self.conn()
            .execute(
                "INSERT INTO users (telegram_id, username, first_name, last_name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(telegram_id) DO NOTHING",
                params![
                    id,
                    opt_text(username),
                    opt_text(first_name),
                    opt_text(last_name),
                    now
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_user: {e}")))?;

        debug!(telegram_id = id, "User ensured in DB");

        self.get_profile(id).await?.ok_or_else(|| {
            DatabaseError::Query(format!("create_user: row missing after insert for {id}"))
        })
    }

    async fn set_card_code(&self, id: &str, code: &str) -> Result<UserProfile, DatabaseError> {
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO users (telegram_id, card_code, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(telegram_id) DO UPDATE SET
                     card_code = excluded.card_code,
                     updated_at = excluded.updated_at",
                params![id, code, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_card_code: {e}")))?;

        debug!(telegram_id = id, "Card code saved");

        self.get_profile(id).await?.ok_or_else(|| {
            DatabaseError::Query(format!("set_card_code: row missing after upsert for {id}"))
        })
    }

    async fn card_code(&self, id: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.get_profile(id).await?.and_then(|p| p.card_code))
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn find_missing_user_is_none() {
        let db = test_db().await;
        assert!(db.find_by_identity("42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_and_find_user() {
        let db = test_db().await;
        let user = db
            .create_user("42", Some("alice"), Some("Alice"), None)
            .await
            .unwrap();
        assert_eq!(user.telegram_id, "42");
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert_eq!(user.first_name.as_deref(), Some("Alice"));
        assert!(user.last_name.is_none());
        assert!(user.card_code.is_none());

        let found = db.find_by_identity("42").await.unwrap().unwrap();
        assert_eq!(found.telegram_id, "42");
    }

    #[tokio::test]
    async fn create_user_is_idempotent() {
        let db = test_db().await;
        db.create_user("42", Some("alice"), Some("Alice"), None)
            .await
            .unwrap();
        // A second create must not clobber the original fields.
        let again = db
            .create_user("42", Some("other"), Some("Other"), Some("Name"))
            .await
            .unwrap();
        assert_eq!(again.username.as_deref(), Some("alice"));
        assert_eq!(again.first_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn set_card_code_on_existing_user() {
        let db = test_db().await;
        db.create_user("42", Some("alice"), None, None).await.unwrap();

        let updated = db.set_card_code("42", "2001123456789").await.unwrap();
        assert_eq!(updated.card_code.as_deref(), Some("2001123456789"));
        assert_eq!(updated.username.as_deref(), Some("alice"));

        assert_eq!(
            db.card_code("42").await.unwrap().as_deref(),
            Some("2001123456789")
        );
    }

    #[tokio::test]
    async fn set_card_code_creates_missing_profile() {
        let db = test_db().await;
        let user = db.set_card_code("7", "2001000000001").await.unwrap();
        assert_eq!(user.telegram_id, "7");
        assert_eq!(user.card_code.as_deref(), Some("2001000000001"));
        assert!(user.username.is_none());
    }

    #[tokio::test]
    async fn set_card_code_overwrites_previous() {
        let db = test_db().await;
        db.set_card_code("7", "2001000000001").await.unwrap();
        db.set_card_code("7", "2001000000002").await.unwrap();
        assert_eq!(
            db.card_code("7").await.unwrap().as_deref(),
            Some("2001000000002")
        );
    }

    #[tokio::test]
    async fn card_code_for_missing_user_is_none() {
        let db = test_db().await;
        assert!(db.card_code("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.set_card_code("42", "2001123456789").await.unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(
            db.card_code("42").await.unwrap().as_deref(),
            Some("2001123456789")
        );
    }
}
