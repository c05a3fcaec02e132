//! In-memory map of online user-id → session handle (§4.5).
//!
//! Guarded by a single async mutex; every operation is atomic with
//! respect to the others, and `list_online` takes its snapshot under the
//! same lock. The critical sections never await I/O — only map mutation
//! and snapshot construction, per spec.md §5.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::protocol::Envelope;

#[derive(Debug, thiserror::Error)]
#[error("session's outbound channel is closed")]
pub struct SendError;

/// A registry entry: enough to address a live session's outbound writer
/// task and to describe it in a `whoisonline` listing.
pub struct SessionHandle {
    pub user_id: String,
    pub full_name: String,
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl SessionHandle {
    pub fn new(user_id: String, full_name: String, outbox: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            user_id,
            full_name,
            outbox,
        }
    }

    /// Queues `envelope` for this session's dedicated writer task, which
    /// serializes it through the session's `SecureChannel` — this keeps
    /// two tasks from ever interleaving encrypted frames on one socket.
    pub fn send(&self, envelope: Envelope) -> Result<(), SendError> {
        self.outbox.send(envelope).map_err(|_| SendError)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OnlineUser {
    pub id: String,
    pub full_name: String,
}

#[derive(Default)]
pub struct Registry {
    online: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle`, silently overwriting and evicting any prior
    /// entry for the same user id. The evicted session is not notified or
    /// forcibly closed here — it simply becomes unreachable via the
    /// registry (spec.md §9, open question preserved as-is).
    pub async fn register(&self, user_id: String, handle: Arc<SessionHandle>) {
        let mut guard = self.online.lock().await;
        if guard.insert(user_id.clone(), handle).is_some() {
            warn!(user_id, "registry entry overwritten by a new login");
        }
    }

    pub async fn unregister(&self, user_id: &str) {
        self.online.lock().await.remove(user_id);
    }

    pub async fn get(&self, user_id: &str) -> Option<Arc<SessionHandle>> {
        self.online.lock().await.get(user_id).cloned()
    }

    pub async fn list_online(&self) -> Vec<OnlineUser> {
        self.online
            .lock()
            .await
            .values()
            .map(|h| OnlineUser {
                id: h.user_id.clone(),
                full_name: h.full_name.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str, name: &str) -> (Arc<SessionHandle>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(SessionHandle::new(id.into(), name.into(), tx)), rx)
    }

    #[tokio::test]
    async fn register_then_get_then_unregister() {
        let registry = Registry::new();
        let (h, _rx) = handle("u1", "Alice");
        registry.register("u1".into(), h).await;
        assert!(registry.get("u1").await.is_some());
        registry.unregister("u1").await;
        assert!(registry.get("u1").await.is_none());
    }

    #[tokio::test]
    async fn second_login_overwrites_and_lists_once() {
        let registry = Registry::new();
        let (h1, _rx1) = handle("u1", "Alice");
        let (h2, _rx2) = handle("u1", "Alice");
        registry.register("u1".into(), h1).await;
        registry.register("u1".into(), h2).await;

        let online = registry.list_online().await;
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, "u1");
    }

    #[tokio::test]
    async fn unregister_unknown_user_is_a_no_op() {
        let registry = Registry::new();
        registry.unregister("ghost").await;
    }
}
