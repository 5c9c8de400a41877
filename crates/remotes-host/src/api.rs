//! HTTP client for the Remotes server API.
//!
//! Uses reqwest with rustls. Bearer tokens are passed per request because
//! enrollment calls carry the registration token while later calls carry
//! the host's own token.

use remotes_proto::v1::ErrorBody;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AgentError;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new() -> Result<Self, AgentError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        // reqwest is built with rustls-no-provider; Err means a provider is
        // already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("remotes-host/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<T, AgentError> {
        debug!(%url, "GET");
        let mut request = self.http.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Self::decode(request.send().await?).await
    }

    pub async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<T, AgentError> {
        debug!(%url, "POST");
        let mut request = self.http.post(url).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Self::decode(request.send().await?).await
    }

    /// Parse a success body, or turn an error body into [`AgentError::Rejected`]
    /// carrying the server's message.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, AgentError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(|body| {
                body.message.or_else(|| {
                    (!body.fields.is_empty()).then(|| format!("{:?}", body.fields))
                })
            })
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
        Err(AgentError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
