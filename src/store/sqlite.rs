use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use super::{AccountStore, StoreError, UserRow};

/// `sqlx`-backed implementation of [`AccountStore`] over SQLite in WAL mode.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `path` and runs the
    /// schema migration.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(StoreError::Database)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true)
            // The router persists chat messages against whatever
            // recipient_id a client sends without checking it names a
            // real user (router.rs) — matching the aiosqlite default the
            // original server relies on. sqlx enables FK enforcement by
            // default, which would turn that into a constraint failure.
            .foreign_keys(false);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        info!(path = %path.display(), "account store connected");
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        for stmt in include_str!("migrations/001_init.sql").split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn add_user(
        &self,
        id: &str,
        full_name: &str,
        email_normalized: &str,
        password_hash: &str,
    ) -> Result<Option<String>, StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (id, full_name, email, password) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(full_name)
        .bind(email_normalized)
        .bind(password_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Some(id.to_string())),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_user_by_email(&self, email_normalized: &str) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
            .bind(email_normalized)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn store_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        payload: &str,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO messages (sender_id, recipient_id, payload_blob) VALUES (?, ?, ?)",
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(payload.as_bytes())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}
