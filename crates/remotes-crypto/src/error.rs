//! Crypto error types.

/// Errors from cryptographic operations.
///
/// Decryption failures carry no detail: a padding error, a wrong key and a
/// tampered token all surface as the same [`CryptoError::DecryptionFailed`].
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid PEM key")]
    InvalidPem,

    #[error("Message too long: {len} bytes, this key accepts at most {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
