//! Per-connection state machine: handshake → auth → dispatch (§4.6).
//!
//! States: `HANDSHAKE`, `UNAUTH`, `AUTH`, `CLOSED`. Every inbound line is
//! processed strictly in receive order (TCP order). Writes — whether the
//! session's own responses or a `new_message` pushed by another session's
//! router call — are serialized through a single dedicated writer task so
//! two tasks never interleave an encrypted frame on the wire (§4.6, §4.9
//! / §5).

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::context::ServerContext;
use crate::crypto::{ChannelError, HandshakeError, SecureChannel};
use crate::protocol::envelope::{self, Envelope, FramingError};
use crate::registry::SessionHandle;
use crate::router::RouteError;
use crate::router::RouteOutcome;
use crate::store::AccountStore;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("unexpected envelope type {0:?}, expected {1:?}")]
    UnexpectedType(String, &'static str),
}

/// Inner envelopes queued for this session's dedicated writer task. The
/// same sender is both kept by the session for its own responses and
/// handed to the [`Registry`](crate::registry::Registry) (wrapped in a
/// [`SessionHandle`]) once authenticated, so both sources serialize
/// through one writer.
type Outbox = mpsc::UnboundedSender<Envelope>;

enum DispatchOutcome {
    Continue,
    Close,
}

pub struct Session<S> {
    addr: SocketAddr,
    ctx: ServerContext<S>,
    user_id: Option<String>,
    full_name: Option<String>,
    #[allow(dead_code)]
    email: Option<String>,
}

impl<S: AccountStore + 'static> Session<S> {
    pub fn new(addr: SocketAddr, ctx: ServerContext<S>) -> Self {
        Self {
            addr,
            ctx,
            user_id: None,
            full_name: None,
            email: None,
        }
    }

    #[instrument(skip_all, fields(addr = %self.addr, user_id = tracing::field::Empty))]
    pub async fn run(mut self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let (channel, write_half) = match self.handshake(&mut reader, write_half).await {
            Ok(established) => established,
            Err(e) => {
                info!(error = %e, "handshake failed, closing connection");
                return;
            }
        };
        let channel = Arc::new(channel);

        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(run_writer(write_half, Arc::clone(&channel), rx));

        self.dispatch_loop(&mut reader, &channel, &tx).await;

        if let Some(user_id) = self.user_id.clone() {
            self.ctx.registry.unregister(&user_id).await;
        }
        drop(tx);
        let _ = writer_task.await;
        info!("connection closed");
    }

    /// Runs the RSA-OAEP→AES-256-GCM handshake directly on the raw stream
    /// halves. No other task can be writing to this connection yet (the
    /// session isn't registered until authenticated), so this phase needs
    /// no serialization beyond sequential `await`s.
    async fn handshake(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        mut write_half: OwnedWriteHalf,
    ) -> Result<(SecureChannel, OwnedWriteHalf), SessionError> {
        let start = Envelope::new(
            "handshake_start",
            json!({ "public_key": self.ctx.identity.public_key_pem() }),
        );
        envelope::write_envelope(&mut write_half, &start).await?;

        let request = envelope::read_envelope(reader).await?;
        if request.kind != "key_exchange" {
            return Err(SessionError::UnexpectedType(request.kind, "key_exchange"));
        }
        let key_b64 = request
            .payload
            .get("key")
            .and_then(Value::as_str)
            .ok_or(HandshakeError::InvalidBase64)?;

        let channel = self.ctx.identity.unwrap_session_key(key_b64)?;

        let complete = Envelope::new("handshake_complete", json!({ "message": "Secure channel established." }));
        let plaintext = serde_json::to_string(&complete).map_err(FramingError::from)?;
        let blob = channel.encrypt(&plaintext)?;
        let wrapper = Envelope::new("encrypted_payload", json!(blob));
        envelope::write_envelope(&mut write_half, &wrapper).await?;

        Ok((channel, write_half))
    }

    async fn dispatch_loop(&mut self, reader: &mut BufReader<OwnedReadHalf>, channel: &SecureChannel, tx: &Outbox) {
        loop {
            let inner = match read_inner_envelope(reader, channel).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(e) => {
                    info!(error = %e, "closing session");
                    break;
                }
            };

            let outcome = if self.user_id.is_none() {
                self.dispatch_unauth(inner, tx).await
            } else {
                self.dispatch_auth(inner, tx).await
            };

            if matches!(outcome, DispatchOutcome::Close) {
                break;
            }
        }
    }

    async fn dispatch_unauth(&mut self, envelope: Envelope, tx: &Outbox) -> DispatchOutcome {
        match envelope.kind.as_str() {
            "login" => self.handle_login(envelope.payload, tx).await,
            "signup" => self.handle_signup(envelope.payload, tx).await,
            _ => {
                send_response(tx, "error", "Not authenticated. Send 'login' or 'signup'.");
                DispatchOutcome::Continue
            }
        }
    }

    async fn handle_login(&mut self, payload: Value, tx: &Outbox) -> DispatchOutcome {
        let email = payload.get("email").and_then(Value::as_str);
        let password = payload.get("password").and_then(Value::as_str);
        let (email, password) = match (email, password) {
            (Some(e), Some(p)) => (e, p),
            _ => {
                send_response(tx, "error", "Malformed login envelope.");
                return DispatchOutcome::Continue;
            }
        };

        match self.ctx.authenticator.authenticate(email, password).await {
            Ok(Some(user)) => {
                self.user_id = Some(user.id.clone());
                self.full_name = Some(user.full_name.clone());
                self.email = Some(user.email.clone());
                tracing::Span::current().record("user_id", tracing::field::display(&user.id));

                let handle = Arc::new(SessionHandle::new(user.id.clone(), user.full_name.clone(), tx.clone()));
                self.ctx.registry.register(user.id.clone(), handle).await;

                let response = Envelope::new(
                    "response",
                    json!({
                        "status": "ok",
                        "message": format!("Login successful. Welcome, {}!", user.full_name),
                        "user_info": {
                            "id": user.id,
                            "full_name": user.full_name,
                            "email": user.email,
                        },
                    }),
                );
                let _ = tx.send(response);
            }
            Ok(None) => send_response(tx, "error", "Login failed. Invalid credentials."),
            Err(e) => {
                warn!(error = %e, "authentication backend error");
                send_response(tx, "error", "Login failed. Invalid credentials.");
            }
        }
        DispatchOutcome::Continue
    }

    async fn handle_signup(&mut self, payload: Value, tx: &Outbox) -> DispatchOutcome {
        let full_name = payload.get("full_name").and_then(Value::as_str);
        let email = payload.get("email").and_then(Value::as_str);
        let password = payload.get("password").and_then(Value::as_str);
        let (full_name, email, password) = match (full_name, email, password) {
            (Some(n), Some(e), Some(p)) => (n, e, p),
            _ => {
                send_response(tx, "error", "Malformed sign-up envelope.");
                return DispatchOutcome::Continue;
            }
        };

        match self.ctx.authenticator.sign_up(full_name, email, password).await {
            Ok(Some(_id)) => send_response(tx, "ok", "Sign-up successful. Please login to authenticate."),
            Ok(None) => send_response(tx, "error", "Sign-up failed. Email already exists."),
            Err(e) => {
                warn!(error = %e, "sign-up backend error");
                send_response(tx, "error", "Sign-up failed. Email already exists.");
            }
        }
        DispatchOutcome::Continue
    }

    async fn dispatch_auth(&mut self, envelope: Envelope, tx: &Outbox) -> DispatchOutcome {
        let Some(sender_id) = self.user_id.clone() else {
            // Unreachable by construction — dispatch_auth only runs once
            // user_id is Some. Fail closed rather than panic.
            return DispatchOutcome::Close;
        };
        let sender_name = self.full_name.clone().unwrap_or_default();

        match envelope.kind.as_str() {
            "chat" => {
                match self.ctx.router.route_chat(&sender_id, &sender_name, &envelope.payload).await {
                    Ok(RouteOutcome::Delivered) => {}
                    Ok(RouteOutcome::Stored) => send_response(tx, "info", "Recipient is offline. Message stored."),
                    Err(RouteError::Malformed) => send_response(tx, "error", "Malformed chat envelope."),
                    Err(RouteError::Store(e)) => warn!(error = %e, "failed to persist offline message"),
                }
                DispatchOutcome::Continue
            }
            "whoisonline" => {
                let users = self.ctx.registry.list_online().await;
                let response = Envelope::new("response", json!({ "status": "ok", "users": users }));
                let _ = tx.send(response);
                DispatchOutcome::Continue
            }
            "logout" => DispatchOutcome::Close,
            other => {
                send_response(tx, "error", &format!("Unknown command type: {other}"));
                DispatchOutcome::Continue
            }
        }
    }
}

fn send_response(tx: &Outbox, status: &str, message: &str) {
    let response = Envelope::new("response", json!({ "status": status, "message": message }));
    let _ = tx.send(response);
}

/// Reads one outer `encrypted_payload` frame and returns the decoded inner
/// envelope, or `None` on clean EOF. Any framing or decrypt failure is
/// fatal: a reply would itself need encryption that just failed, so none
/// is attempted (spec.md §7, category 3).
async fn read_inner_envelope(
    reader: &mut BufReader<OwnedReadHalf>,
    channel: &SecureChannel,
) -> Result<Option<Envelope>, SessionError> {
    let outer = match envelope::read_envelope(reader).await {
        Ok(envelope) => envelope,
        Err(FramingError::Eof) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if outer.kind != "encrypted_payload" {
        return Err(SessionError::UnexpectedType(outer.kind, "encrypted_payload"));
    }
    let blob = outer.payload.as_str().ok_or(ChannelError::Decrypt)?;
    let plaintext = channel.decrypt(blob)?;
    let inner: Envelope = serde_json::from_str(&plaintext).map_err(FramingError::from)?;
    Ok(Some(inner))
}

/// Owns the write half and the channel for this connection's lifetime;
/// the only task allowed to write to the socket, so an encrypted frame is
/// never interleaved with another.
async fn run_writer(mut write_half: OwnedWriteHalf, channel: Arc<SecureChannel>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(inner) = rx.recv().await {
        let plaintext = match serde_json::to_string(&inner) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound envelope");
                continue;
            }
        };
        let blob = match channel.encrypt(&plaintext) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encrypt outbound envelope");
                continue;
            }
        };
        let wrapper = Envelope::new("encrypted_payload", json!(blob));
        if envelope::write_envelope(&mut write_half, &wrapper).await.is_err() {
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
