//! `Remotes` crypto library
//!
//! Primitives used by the host enrollment handshake and the command
//! exchange between the server and its hosts.
//!
//! ## Crypto primitives
//!
//! - **Keyring**: RSA keypairs, OAEP (SHA-256 + MGF1-SHA-256) for small
//!   payloads, PSS (SHA-256, maximum salt) for signatures, PEM import/export
//! - **Envelope**: ChaCha20-Poly1305 AEAD tokens for bulk text, keyed either
//!   by a fresh ephemeral key or by a key derived from the host UUID

pub mod envelope;
pub mod error;
pub mod keyring;

pub use envelope::{ENVELOPE_VERSION, EnvelopeKey, KEY_SIZE, NONCE_SIZE, SymmetricEnvelope};
pub use error::CryptoError;
pub use keyring::{
    DEFAULT_KEY_BITS, HostKeyPair, PublicKey, decode_base64, encode_base64,
};
