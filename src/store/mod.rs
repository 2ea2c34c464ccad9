//! Persistence layer — SQLite-backed storage for user profiles.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{UserProfile, UserStore};
