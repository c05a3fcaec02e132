//! Password verification against the stored bcrypt hash (§4.4).

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::store::{AccountStore, StoreError, UserRow};

/// A syntactically valid bcrypt hash with no corresponding known
/// plaintext, used only to pay bcrypt's cost when the user doesn't exist
/// so "no such user" and "wrong password" take about the same time.
const DUMMY_HASH: &str = "$2b$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lowercases and trims an email. `user_id` is a pure function of this
/// output — never of the raw input — so callers must normalize before
/// deriving an id or looking a user up.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Deterministic user id: UUIDv5 over the DNS namespace of the normalized
/// email. This is a design commitment (spec.md §9), not an implementation
/// detail — clients address recipients by reproducing this derivation.
pub fn derive_user_id(email_normalized: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, email_normalized.as_bytes()).to_string()
}

pub struct Authenticator<S> {
    store: Arc<S>,
}

impl<S: AccountStore> Authenticator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Authenticates by email + password. Returns `Ok(None)` both for "no
    /// such user" and "wrong password" — there is no oracle that lets a
    /// caller distinguish the two.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<UserRow>, AuthError> {
        let normalized = normalize_email(email);
        match self.store.get_user_by_email(&normalized).await? {
            Some(user) => {
                if bcrypt::verify(password, &user.password)? {
                    Ok(Some(user))
                } else {
                    Ok(None)
                }
            }
            None => {
                // Dummy verify so an absent user doesn't short-circuit
                // faster than a wrong password would.
                let _ = bcrypt::verify(password, DUMMY_HASH);
                Ok(None)
            }
        }
    }

    /// Creates a new user with a freshly salted bcrypt hash. Returns
    /// `Ok(None)` iff the normalized email already exists. Never
    /// authenticates the session — the caller must still log in.
    pub async fn sign_up(
        &self,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<String>, AuthError> {
        let normalized_email = normalize_email(email);
        let id = derive_user_id(&normalized_email);
        let hashed = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
        Ok(self
            .store
            .add_user(&id, full_name, &normalized_email, &hashed)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn authenticator() -> Authenticator<SqliteStore> {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(&dir.path().join("auth.db")).await.unwrap();
        std::mem::forget(dir);
        Authenticator::new(Arc::new(store))
    }

    #[test]
    fn user_id_is_pure_function_of_normalized_email() {
        let a = derive_user_id(&normalize_email("  Alice@Example.com "));
        let b = derive_user_id(&normalize_email("alice@example.com"));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn signup_then_login_round_trips() {
        let auth = authenticator().await;
        let id = auth
            .sign_up("Alice", "Alice@Example.com", "p1")
            .await
            .unwrap()
            .expect("first signup succeeds");
        assert_eq!(id, derive_user_id("alice@example.com"));

        let user = auth
            .authenticate("alice@example.com", "p1")
            .await
            .unwrap()
            .expect("login succeeds with correct credentials");
        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let auth = authenticator().await;
        auth.sign_up("Alice", "a@x.com", "correct").await.unwrap();
        assert!(auth.authenticate("a@x.com", "wrong").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_user_fails() {
        let auth = authenticator().await;
        assert!(auth.authenticate("nobody@x.com", "pw").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_signup_fails_regardless_of_casing() {
        let auth = authenticator().await;
        auth.sign_up("Alice", "a@x.com", "p1").await.unwrap();
        let dup = auth.sign_up("Alice2", "  A@X.com ", "p2").await.unwrap();
        assert_eq!(dup, None);
    }
}
