//! Chat-message routing: online deliver vs. persist (§4.7).

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::Envelope;
use crate::registry::Registry;
use crate::store::{AccountStore, StoreError};

#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered live through the recipient's secure channel.
    Delivered,
    /// No online recipient; persisted for later pickup.
    Stored,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Malformed chat envelope.")]
    Malformed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Router<S> {
    registry: Arc<Registry>,
    store: Arc<S>,
}

impl<S: AccountStore> Router<S> {
    pub fn new(registry: Arc<Registry>, store: Arc<S>) -> Self {
        Self { registry, store }
    }

    /// `sender_id`/`sender_name` come from the authenticated session, never
    /// from the envelope payload — this is what makes sender spoofing
    /// impossible regardless of what a client puts in `payload`.
    ///
    /// The router does not check that `recipient_id` names a real user
    /// before persisting an offline message; this matches
    /// `original_source/server/router.py`, which stores unconditionally,
    /// and is preserved rather than silently gated on `get_user_by_id`
    /// (spec.md §9, open question).
    pub async fn route_chat(
        &self,
        sender_id: &str,
        sender_name: &str,
        payload: &Value,
    ) -> Result<RouteOutcome, RouteError> {
        let recipient_id = payload
            .get("recipient_id")
            .and_then(Value::as_str)
            .ok_or(RouteError::Malformed)?;
        let text = payload
            .get("text")
            .and_then(Value::as_str)
            .ok_or(RouteError::Malformed)?;

        if let Some(recipient) = self.registry.get(recipient_id).await {
            let delivery = Envelope::new(
                "new_message",
                json!({
                    "sender_id": sender_id,
                    "sender_name": sender_name,
                    "text": text,
                }),
            );
            // Best-effort: if the recipient just disconnected, its writer
            // task is gone and the frame is dropped rather than queued.
            let _ = recipient.send(delivery);
            Ok(RouteOutcome::Delivered)
        } else {
            self.store.store_message(sender_id, recipient_id, text).await?;
            Ok(RouteOutcome::Stored)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionHandle;
    use crate::store::SqliteStore;
    use tokio::sync::mpsc;

    async fn router() -> (Router<SqliteStore>, Arc<Registry>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::connect(&dir.path().join("router.db")).await.unwrap());
        std::mem::forget(dir);
        store.add_user("alice", "Alice", "a@x.com", "h").await.unwrap();
        store.add_user("bob", "Bob", "b@x.com", "h").await.unwrap();
        let registry = Arc::new(Registry::new());
        (Router::new(Arc::clone(&registry), store), registry)
    }

    #[tokio::test]
    async fn delivers_to_online_recipient_without_persisting() {
        let (router, registry) = router().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .register("bob".into(), Arc::new(SessionHandle::new("bob".into(), "Bob".into(), tx)))
            .await;

        let outcome = router
            .route_chat("alice", "Alice", &json!({"recipient_id": "bob", "text": "hi"}))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Delivered);

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.kind, "new_message");
        assert_eq!(delivered.payload["sender_id"], "alice");
        assert_eq!(delivered.payload["text"], "hi");
    }

    #[tokio::test]
    async fn stores_for_offline_recipient() {
        let (router, _registry) = router().await;
        let outcome = router
            .route_chat("alice", "Alice", &json!({"recipient_id": "bob", "text": "later"}))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::Stored);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let (router, _registry) = router().await;
        let err = router
            .route_chat("alice", "Alice", &json!({"text": "missing recipient"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Malformed));
    }

    #[tokio::test]
    async fn sender_identity_comes_from_session_not_payload() {
        let (router, registry) = router().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .register("bob".into(), Arc::new(SessionHandle::new("bob".into(), "Bob".into(), tx)))
            .await;

        // Even if a malicious payload tried to smuggle a spoofed sender_id
        // field, the router never reads one from `payload` — it always
        // uses the caller-supplied `sender_id` argument.
        router
            .route_chat(
                "alice",
                "Alice",
                &json!({"recipient_id": "bob", "text": "hi", "sender_id": "bob"}),
            )
            .await
            .unwrap();

        let delivered = rx.try_recv().unwrap();
        assert_eq!(delivered.payload["sender_id"], "alice");
    }
}
