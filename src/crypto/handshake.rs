//! RSA-OAEP key-exchange half of the handshake engine (server side).
//!
//! State machine (driven by [`crate::session::Session`]):
//!
//! ```text
//! INIT ──send(handshake_start)──▶ AWAIT_KEY
//! AWAIT_KEY ──recv(key_exchange, decrypt OK)──▶ CONFIRMING
//! CONFIRMING ──send(handshake_complete via new channel)──▶ ESTABLISHED
//! any state ──error / timeout / EOF──▶ CLOSED
//! ```
//!
//! This module owns only the RSA half: generating the server's long-lived
//! keypair and unwrapping a client's RSA-OAEP(SHA-256)-encrypted AES key
//! into a [`SecureChannel`]. The envelope choreography around it lives in
//! the session state machine.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

use super::channel::{ChannelError, SecureChannel, AES_KEY_LEN};

const RSA_KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("failed to generate RSA keypair: {0}")]
    KeyGen(String),
    #[error("failed to encode public key: {0}")]
    Encode(String),
    #[error("invalid base64 in key_exchange payload")]
    InvalidBase64,
    #[error("RSA-OAEP decryption failed")]
    Decrypt,
    #[error("decrypted key length {0} != {AES_KEY_LEN}")]
    InvalidKeyLength(usize),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// The server's long-lived RSA-2048 keypair, generated once at startup and
/// shared across every session for the server's lifetime. There is no
/// per-session keypair.
pub struct RsaIdentity {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl RsaIdentity {
    pub fn generate() -> Result<Self, HandshakeError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| HandshakeError::KeyGen(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| HandshakeError::Encode(e.to_string()))?;
        Ok(Self {
            private_key,
            public_key_pem,
        })
    }

    /// PEM-encoded RSA-2048 SubjectPublicKeyInfo, sent in `handshake_start`.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Decrypts a base64-encoded RSA-OAEP(SHA-256) blob into the 32-byte
    /// AES key and constructs the session's [`SecureChannel`] from it.
    /// Fails closed on bad base64, RSA decrypt failure, or a decrypted key
    /// whose length isn't exactly [`AES_KEY_LEN`].
    pub fn unwrap_session_key(&self, encrypted_key_b64: &str) -> Result<SecureChannel, HandshakeError> {
        let encrypted_key = STANDARD
            .decode(encrypted_key_b64)
            .map_err(|_| HandshakeError::InvalidBase64)?;

        let padding = Oaep::new::<Sha256>();
        let key = self
            .private_key
            .decrypt(padding, &encrypted_key)
            .map_err(|_| HandshakeError::Decrypt)?;

        if key.len() != AES_KEY_LEN {
            return Err(HandshakeError::InvalidKeyLength(key.len()));
        }

        Ok(SecureChannel::new(&key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::DecodePublicKey;

    fn client_wrap(identity: &RsaIdentity, aes_key: &[u8]) -> String {
        let public_key =
            RsaPublicKey::from_public_key_pem(identity.public_key_pem()).expect("valid PEM");
        let padding = Oaep::new::<Sha256>();
        let encrypted = public_key
            .encrypt(&mut OsRng, padding, aes_key)
            .expect("encrypt under freshly generated key never fails");
        STANDARD.encode(encrypted)
    }

    #[test]
    fn unwraps_a_valid_key() {
        let identity = RsaIdentity::generate().unwrap();
        let aes_key = [9u8; AES_KEY_LEN];
        let wrapped = client_wrap(&identity, &aes_key);
        let channel = identity.unwrap_session_key(&wrapped).unwrap();
        let blob = channel.encrypt("ping").unwrap();
        assert_eq!(channel.decrypt(&blob).unwrap(), "ping");
    }

    #[test]
    fn rejects_wrong_length_key() {
        let identity = RsaIdentity::generate().unwrap();
        let wrapped = client_wrap(&identity, &[1u8; 16]);
        assert!(matches!(
            identity.unwrap_session_key(&wrapped),
            Err(HandshakeError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn rejects_garbage_base64() {
        let identity = RsaIdentity::generate().unwrap();
        assert!(matches!(
            identity.unwrap_session_key("not-base64!!"),
            Err(HandshakeError::InvalidBase64)
        ));
    }

    #[test]
    fn rejects_key_encrypted_under_a_different_keypair() {
        let identity = RsaIdentity::generate().unwrap();
        let other = RsaIdentity::generate().unwrap();
        let wrapped = client_wrap(&other, &[1u8; AES_KEY_LEN]);
        assert!(matches!(
            identity.unwrap_session_key(&wrapped),
            Err(HandshakeError::Decrypt)
        ));
    }
}
