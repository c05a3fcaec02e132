//! Durable account store interface — the small key/value-like collaborator
//! the core consumes for user rows and offline messages. Storage engine
//! concerns beyond this interface are out of scope (spec.md §1).

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use sqlite::SqliteStore;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Required by the core: durable users + offline messages. The account
/// store is internally synchronized (it is an external collaborator, not
/// part of this crate's concurrency model — see spec.md §5).
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Adds a new user with an already-hashed password. Returns the new
    /// user's id, or `Ok(None)` iff `email_normalized` already exists
    /// (unique-constraint violation — not an error).
    async fn add_user(
        &self,
        id: &str,
        full_name: &str,
        email_normalized: &str,
        password_hash: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn get_user_by_email(&self, email_normalized: &str) -> Result<Option<UserRow>, StoreError>;

    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>, StoreError>;

    /// Persists an offline chat message. Returns the new message's id.
    async fn store_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        payload: &str,
    ) -> Result<i64, StoreError>;
}
