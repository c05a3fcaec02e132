//! Client-side counterpart of the handshake and framing protocol, used by
//! `clawd-chat-client` and by integration tests that need a real peer to
//! drive the server with. Mirrors the server's
//! [`Session::handshake`](crate::session::Session) step for step: the
//! client (not the server) generates the AES-256 session key and wraps it
//! under the server's RSA-2048 public key.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::{OsRng, RngCore};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::crypto::{SecureChannel, AES_KEY_LEN};
use crate::protocol::envelope::{self, Envelope, FramingError};

/// A connected, post-handshake client session. Holds both stream halves
/// until [`Self::split`] hands them off to independent read/write tasks.
pub struct ChatClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    channel: Arc<SecureChannel>,
}

impl ChatClient {
    /// Connects to `addr` and performs the RSA-OAEP(SHA-256) key exchange
    /// that establishes the per-connection `SecureChannel`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let start = envelope::read_envelope(&mut reader)
            .await
            .context("reading handshake_start")?;
        if start.kind != "handshake_start" {
            bail!("server did not start the handshake correctly (got {:?})", start.kind);
        }
        let server_pubkey_pem = start
            .payload
            .get("public_key")
            .and_then(Value::as_str)
            .context("handshake_start missing public_key")?;
        let server_public_key =
            RsaPublicKey::from_public_key_pem(server_pubkey_pem).context("invalid server public key")?;

        let mut aes_key = [0u8; AES_KEY_LEN];
        OsRng.fill_bytes(&mut aes_key);

        let padding = Oaep::new::<Sha256>();
        let encrypted_key = server_public_key
            .encrypt(&mut OsRng, padding, &aes_key)
            .context("failed to wrap session key")?;
        let key_exchange = Envelope::new("key_exchange", json!({ "key": STANDARD.encode(encrypted_key) }));
        envelope::write_envelope(&mut writer, &key_exchange).await?;

        let channel = SecureChannel::new(&aes_key)?;

        let confirm_outer = envelope::read_envelope(&mut reader)
            .await
            .context("reading handshake_complete")?;
        if confirm_outer.kind != "encrypted_payload" {
            bail!("expected an encrypted handshake confirmation");
        }
        let confirm_blob = confirm_outer
            .payload
            .as_str()
            .context("handshake confirmation payload was not a string")?;
        let confirm_plaintext = channel.decrypt(confirm_blob)?;
        let confirm: Envelope = serde_json::from_str(&confirm_plaintext)?;
        if confirm.kind != "handshake_complete" {
            bail!("server did not confirm the secure channel (got {:?})", confirm.kind);
        }

        Ok(Self {
            reader,
            writer,
            channel: Arc::new(channel),
        })
    }

    /// Splits into independent read and write halves sharing the same
    /// channel, so a caller can run `recv` and `send` concurrently without
    /// the serialization a single `&mut ChatClient` would force.
    pub fn split(self) -> (ClientReader, ClientWriter) {
        (
            ClientReader {
                reader: self.reader,
                channel: Arc::clone(&self.channel),
            },
            ClientWriter {
                writer: self.writer,
                channel: self.channel,
            },
        )
    }

    pub async fn send(&mut self, inner: &Envelope) -> Result<()> {
        send_on(&mut self.writer, &self.channel, inner).await
    }

    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        recv_on(&mut self.reader, &self.channel).await
    }

    pub async fn signup(&mut self, full_name: &str, email: &str, password: &str) -> Result<Envelope> {
        self.send(&Envelope::new(
            "signup",
            json!({ "full_name": full_name, "email": email, "password": password }),
        ))
        .await?;
        self.recv().await?.context("connection closed before a sign-up response")
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<Envelope> {
        self.send(&Envelope::new("login", json!({ "email": email, "password": password })))
            .await?;
        self.recv().await?.context("connection closed before a login response")
    }

    pub async fn chat(&mut self, recipient_id: &str, text: &str) -> Result<()> {
        self.send(&Envelope::new("chat", json!({ "recipient_id": recipient_id, "text": text })))
            .await
    }

    pub async fn whoisonline(&mut self) -> Result<Envelope> {
        self.send(&Envelope::new("whoisonline", Value::Null)).await?;
        self.recv().await?.context("connection closed before a whoisonline response")
    }
}

pub struct ClientReader {
    reader: BufReader<OwnedReadHalf>,
    channel: Arc<SecureChannel>,
}

impl ClientReader {
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        recv_on(&mut self.reader, &self.channel).await
    }
}

pub struct ClientWriter {
    writer: OwnedWriteHalf,
    channel: Arc<SecureChannel>,
}

impl ClientWriter {
    pub async fn send(&mut self, inner: &Envelope) -> Result<()> {
        send_on(&mut self.writer, &self.channel, inner).await
    }
}

async fn send_on(writer: &mut OwnedWriteHalf, channel: &SecureChannel, inner: &Envelope) -> Result<()> {
    let plaintext = serde_json::to_string(inner)?;
    let blob = channel.encrypt(&plaintext)?;
    let wrapper = Envelope::new("encrypted_payload", json!(blob));
    envelope::write_envelope(writer, &wrapper).await?;
    Ok(())
}

async fn recv_on(reader: &mut BufReader<OwnedReadHalf>, channel: &SecureChannel) -> Result<Option<Envelope>> {
    let outer = match envelope::read_envelope(reader).await {
        Ok(e) => e,
        Err(FramingError::Eof) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if outer.kind != "encrypted_payload" {
        bail!("unexpected frame type {:?}", outer.kind);
    }
    let blob = outer.payload.as_str().context("payload was not a string")?;
    let plaintext = channel.decrypt(blob)?;
    Ok(Some(serde_json::from_str(&plaintext)?))
}
