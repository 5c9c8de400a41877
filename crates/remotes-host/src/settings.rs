//! Host settings store.
//!
//! A TOML file with three sections:
//!
//! ```toml
//! [server]
//! url = "https://remotes.example.com"
//! discover = "/api/v1/discover"
//!
//! [endpoints]
//! host_register = "/api/v1/host/register"
//! # ...
//!
//! [host]
//! private_key = "/etc/remotes/host.pem"
//! public_key = "/etc/remotes/host.pub"
//! uuid = "<base64 RSA ciphertext>"
//! token = "<base64 RSA ciphertext>"
//! ```
//!
//! `uuid` and `token` are kept exactly as the server sent them, encrypted
//! to the host key. Every read decrypts them and an undecryptable value
//! reads as unset, so a host whose key was replaced can register again.

use std::path::{Path, PathBuf};

use remotes_crypto::{CryptoError, HostKeyPair};
use remotes_proto::Endpoints;
use remotes_proto::endpoints::join_url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AgentError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Path of the discover endpoint under `url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discover: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PathBuf>,
    /// Host UUID, RSA-encrypted to the host key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Bearer token, RSA-encrypted to the host key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,
    #[serde(default)]
    pub host: HostSection,
}

/// Decrypt an at-rest value. Any failure reads as unset.
fn decrypt_option(keys: Option<&HostKeyPair>, value: Option<&str>) -> Option<String> {
    let (keys, value) = (keys?, value?);
    match keys.decrypt_base64_string(value) {
        Ok(plain) => Some(plain.to_string()),
        Err(e) => {
            debug!(error = %e, "Stored value cannot be decrypted, treating as unset");
            None
        }
    }
}

impl HostSettings {
    /// Load settings. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| AgentError::Settings(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| AgentError::Settings(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn server_url(&self) -> Result<&str, AgentError> {
        self.server
            .url
            .as_deref()
            .ok_or(AgentError::MissingSetting("server.url"))
    }

    /// Absolute URL for a path under the server URL.
    pub fn url_for(&self, path: &str) -> Result<String, AgentError> {
        Ok(join_url(self.server_url()?, path))
    }

    pub fn discover_url(&self) -> Result<String, AgentError> {
        let path = self
            .server
            .discover
            .as_deref()
            .ok_or(AgentError::MissingSetting("server.discover"))?;
        self.url_for(path)
    }

    /// Discovered endpoints. Actions that need them fail until `discover` ran.
    pub fn endpoints(&self) -> Result<&Endpoints, AgentError> {
        self.endpoints
            .as_ref()
            .ok_or(AgentError::MissingSetting("endpoints"))
    }

    /// Load the host keypair named in `[host]`, if any.
    ///
    /// A corrupt or world-readable key file reads as no key, so that
    /// `generate-keys` and `new-host` can still replace it.
    pub fn load_keys(&self) -> Result<Option<HostKeyPair>, AgentError> {
        let Some(path) = &self.host.private_key else {
            return Ok(None);
        };
        if !path.exists() {
            debug!(path = %path.display(), "Private key file missing");
            return Ok(None);
        }
        match HostKeyPair::load_from_file(path) {
            Ok(keys) => Ok(Some(keys)),
            Err(CryptoError::InvalidPem) => {
                warn!(path = %path.display(), "Private key file is not a valid key, ignoring it");
                Ok(None)
            }
            Err(CryptoError::IoError(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                warn!(path = %path.display(), error = %e, "Private key file unusable, ignoring it");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn host_uuid(&self, keys: Option<&HostKeyPair>) -> Option<String> {
        decrypt_option(keys, self.host.uuid.as_deref())
    }

    pub fn host_token(&self, keys: Option<&HostKeyPair>) -> Option<String> {
        decrypt_option(keys, self.host.token.as_deref())
    }
}
