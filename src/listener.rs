//! TCP accept loop (§4.8): bind once, spawn one independent [`Session`]
//! task per accepted connection, and keep going. A single bad accept
//! doesn't bring the server down.

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::context::ServerContext;
use crate::session::Session;
use crate::store::AccountStore;

pub struct Listener<S> {
    listener: TcpListener,
    ctx: ServerContext<S>,
}

impl<S: AccountStore + 'static> Listener<S> {
    pub async fn bind(addr: &str, ctx: ServerContext<S>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs forever, accepting connections and handing each to its own
    /// task. Returns only if the listening socket itself fails.
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, "listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "accept error");
                    continue;
                }
            };
            debug!(peer = %peer, "accepted connection");

            let session = Session::new(peer, self.ctx.clone());
            tokio::spawn(async move {
                session.run(stream).await;
            });
        }
    }
}

/// Convenience used by `main`: binds and serves in one call, logging
/// accept-loop exit as a warning rather than propagating, since the
/// listener only returns on an unrecoverable socket error.
pub async fn run<S: AccountStore + 'static>(addr: &str, ctx: ServerContext<S>) -> Result<()> {
    let listener = Listener::bind(addr, ctx).await?;
    if let Err(e) = listener.serve().await {
        warn!(error = %e, "accept loop exited");
        return Err(e);
    }
    Ok(())
}
