//! The small context bundle passed into every session at construction
//! (spec.md §9): immutable references to the registry, authenticator,
//! router, account store, and RSA private key. This resolves the
//! server/session cyclic reference without the server tracking sessions
//! itself — the accept loop hands each connection a clone of this bundle
//! and walks away.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::crypto::RsaIdentity;
use crate::registry::Registry;
use crate::router::Router;
use crate::store::AccountStore;

pub struct ServerContext<S> {
    pub identity: Arc<RsaIdentity>,
    pub registry: Arc<Registry>,
    pub authenticator: Arc<Authenticator<S>>,
    pub router: Arc<Router<S>>,
    pub store: Arc<S>,
}

impl<S: AccountStore> ServerContext<S> {
    pub fn new(identity: Arc<RsaIdentity>, store: Arc<S>) -> Self {
        let registry = Arc::new(Registry::new());
        let authenticator = Arc::new(Authenticator::new(Arc::clone(&store)));
        let router = Arc::new(Router::new(Arc::clone(&registry), Arc::clone(&store)));
        Self {
            identity,
            registry,
            authenticator,
            router,
            store,
        }
    }
}

impl<S> Clone for ServerContext<S> {
    fn clone(&self) -> Self {
        Self {
            identity: Arc::clone(&self.identity),
            registry: Arc::clone(&self.registry),
            authenticator: Arc::clone(&self.authenticator),
            router: Arc::clone(&self.router),
            store: Arc::clone(&self.store),
        }
    }
}
