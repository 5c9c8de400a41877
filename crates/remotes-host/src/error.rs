//! Host agent errors.

use remotes_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A setting the action depends on is absent or unreadable.
    #[error("Missing setting: {0}")]
    MissingSetting(&'static str),

    #[error("Invalid settings file: {0}")]
    Settings(String),

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
