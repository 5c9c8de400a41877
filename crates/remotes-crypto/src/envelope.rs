//! Symmetric envelope for bulk text.
//!
//! Tokens are URL-safe base64 of `[version (1)] [nonce (12)] [ciphertext + tag]`
//! sealed with ChaCha20-Poly1305. Every token gets a fresh random nonce, so a
//! single key can seal any number of messages.
//!
//! Two kinds of key feed the envelope:
//! - an ephemeral key generated per command fetch and sent RSA-wrapped;
//! - a key derived from the host UUID, used for uploading results. Both
//!   sides already know the UUID after enrollment, so this key is only as
//!   secret as the UUID itself.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Leading byte of every envelope token.
pub const ENVELOPE_VERSION: u8 = 0x01;

/// Symmetric key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

const TAG_SIZE: usize = 16;

/// A 256-bit envelope key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey([u8; KEY_SIZE]);

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EnvelopeKey([REDACTED])")
    }
}

impl EnvelopeKey {
    /// Fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Deterministic key for the result channel of host `uuid`.
    ///
    /// The key bytes are the 32 lowercase hex characters of the UUID.
    pub fn from_identity(uuid: &Uuid) -> Self {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(uuid.simple().to_string().as_bytes());
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(key))
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// URL-safe base64 text form.
    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = URL_SAFE
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }
}

/// Seals and opens envelope tokens under one key.
pub struct SymmetricEnvelope {
    cipher: ChaCha20Poly1305,
}

impl SymmetricEnvelope {
    pub fn new(key: &EnvelopeKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    /// Seal raw bytes into a token.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut token = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        token.push(ENVELOPE_VERSION);
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(token))
    }

    /// Open a token. Bad encoding, wrong version, wrong key and tampering
    /// all fail the same way.
    pub fn open(&self, token: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = URL_SAFE
            .decode(token.trim())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if raw.len() < 1 + NONCE_SIZE + TAG_SIZE || raw[0] != ENVELOPE_VERSION {
            return Err(CryptoError::DecryptionFailed);
        }
        let (nonce, ciphertext) = raw[1..].split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.seal(plaintext.as_bytes())
    }

    /// Open a token holding UTF-8 text.
    pub fn decrypt_str(&self, token: &str) -> Result<String, CryptoError> {
        String::from_utf8(self.open(token)?).map_err(|_| CryptoError::DecryptionFailed)
    }
}
