//! AES-256-GCM AEAD channel with a fresh random 12-byte nonce per message.
//!
//! The nonce is prepended to the ciphertext+tag and the whole blob is
//! base64-encoded for transport. No associated data is bound. GCM provides
//! confidentiality and integrity in one primitive; random nonces are safe
//! given far fewer than 2^32 encryptions per key, which a chat session
//! will never approach. There is no replay-protection counter — each
//! connection gets a fresh key and relies on TCP's in-order delivery
//! within the session.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Required symmetric key length for AES-256.
pub const AES_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("AES-256 key must be {AES_KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    /// Single opaque failure covering wrong key, truncated blob, tag
    /// mismatch, and non-UTF-8 plaintext alike — the spec deliberately
    /// does not distinguish these to a caller.
    #[error("failed to decrypt or authenticate message")]
    Decrypt,
    #[error("failed to encrypt message")]
    Encrypt,
}

pub struct SecureChannel {
    cipher: Aes256Gcm,
}

impl SecureChannel {
    pub fn new(key: &[u8]) -> Result<Self, ChannelError> {
        if key.len() != AES_KEY_LEN {
            return Err(ChannelError::InvalidKeyLength(key.len()));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` under a fresh random nonce and returns
    /// base64( nonce(12B) || ciphertext_with_tag ).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ChannelError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| ChannelError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Decodes and decrypts a base64 blob produced by [`Self::encrypt`].
    pub fn decrypt(&self, blob_b64: &str) -> Result<String, ChannelError> {
        let blob = STANDARD.decode(blob_b64).map_err(|_| ChannelError::Decrypt)?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(ChannelError::Decrypt);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ChannelError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| ChannelError::Decrypt)
    }
}
