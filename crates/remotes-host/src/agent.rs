//! Host-side orchestrator.
//!
//! Each action mirrors one CLI subcommand and yields an [`ActionOutcome`]:
//! the process exit code plus the JSON printed on stdout. Settings are
//! mutated in memory and persisted by the caller.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use remotes_crypto::{EnvelopeKey, HostKeyPair, SymmetricEnvelope};
use remotes_proto::VERIFY_CHALLENGE;
use remotes_proto::endpoints::{API_STATUS, DISCOVER, join_url};
use remotes_proto::v1::{
    CommandPayload, CommandPostRequest, CommandPostResponse, CommandsListResponse,
    DiscoverResponse, EncryptedResponse, HostStatusResponse, RegisterRequest, ServerStatus,
    Status, VerifyRequest, fields,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::error::AgentError;
use crate::executor::{CommandRunner, Execution};
use crate::settings::HostSettings;

pub const EXIT_OK: i32 = 0;
/// A precondition for the action is not met.
pub const EXIT_PRECONDITION: i32 = 1;
/// The server refused the registration.
pub const EXIT_REJECTED: i32 = 2;
/// Exit status reported for a command killed on timeout.
pub const EXIT_TIMEOUT: i32 = -1;

/// Exit code and JSON result of one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub exit_code: i32,
    pub result: Option<Value>,
}

impl ActionOutcome {
    fn ok(result: impl Serialize) -> Result<Self, AgentError> {
        Ok(Self {
            exit_code: EXIT_OK,
            result: Some(serde_json::to_value(result)?),
        })
    }

    fn error(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            result: Some(json!({"status": Status::Error, "message": message.into()})),
        }
    }
}

pub struct HostAgent {
    settings: HostSettings,
    api: ApiClient,
    runner: CommandRunner,
    keys: Option<HostKeyPair>,
}

impl HostAgent {
    /// Build an agent over loaded settings, loading the host key they name.
    pub fn new(settings: HostSettings, runner: CommandRunner) -> Result<Self, AgentError> {
        let keys = settings.load_keys()?;
        Ok(Self {
            settings,
            api: ApiClient::new()?,
            runner,
            keys,
        })
    }

    pub const fn settings(&self) -> &HostSettings {
        &self.settings
    }

    fn keys(&self) -> Result<&HostKeyPair, AgentError> {
        self.keys
            .as_ref()
            .ok_or(AgentError::MissingSetting("host.private_key"))
    }

    fn host_token(&self) -> Result<String, AgentError> {
        self.settings
            .host_token(self.keys.as_ref())
            .ok_or(AgentError::MissingSetting("host.token"))
    }

    fn identity_envelope(&self) -> Result<SymmetricEnvelope, AgentError> {
        let uuid = self
            .settings
            .host_uuid(self.keys.as_ref())
            .ok_or(AgentError::MissingSetting("host.uuid"))?;
        let uuid = Uuid::parse_str(&uuid)
            .map_err(|e| AgentError::InvalidResponse(format!("stored host UUID: {e}")))?;
        Ok(SymmetricEnvelope::new(&EnvelopeKey::from_identity(&uuid)))
    }

    // =========================================================================
    // Server and key setup
    // =========================================================================

    /// Fetch the public status of the server at `url` and remember it.
    #[instrument(skip(self))]
    pub async fn status(&mut self, url: &str) -> Result<ActionOutcome, AgentError> {
        let status: ServerStatus = self.api.get(&join_url(url, API_STATUS), None).await?;
        self.settings.server.url = Some(status.server_url.clone());
        self.settings.server.discover = Some(DISCOVER.to_string());
        info!(server_url = %status.server_url, version = %status.version, "Server reachable");
        ActionOutcome::ok(status)
    }

    /// Fetch and remember the endpoint map.
    #[instrument(skip(self))]
    pub async fn discover(&mut self) -> Result<ActionOutcome, AgentError> {
        let discovered: DiscoverResponse =
            self.api.get(&self.settings.discover_url()?, None).await?;
        self.settings.endpoints = Some(discovered.endpoints.clone());
        ActionOutcome::ok(discovered)
    }

    /// Generate a keypair, write both halves and point the settings at them.
    #[instrument(skip(self))]
    pub fn generate_keys(
        &mut self,
        private_key: &Path,
        public_key: &Path,
        bits: usize,
    ) -> Result<ActionOutcome, AgentError> {
        let keys = HostKeyPair::generate(bits)?;
        keys.save_to_file(private_key)?;
        keys.save_public_to_file(public_key)?;
        self.settings.host.private_key = Some(std::path::absolute(private_key)?);
        self.settings.host.public_key = Some(std::path::absolute(public_key)?);
        self.keys = Some(keys);
        info!(bits, "Host keys generated");
        Ok(ActionOutcome {
            exit_code: EXIT_OK,
            result: None,
        })
    }

    // =========================================================================
    // Enrollment
    // =========================================================================

    /// Register the public key with the server using a registration token.
    #[instrument(skip_all)]
    pub async fn host_register(&mut self, token: &str) -> Result<ActionOutcome, AgentError> {
        if self.settings.host_uuid(self.keys.as_ref()).is_some() {
            return Ok(ActionOutcome::error(EXIT_PRECONDITION, "Host UUID already set"));
        }
        let request = RegisterRequest {
            public_key: Some(self.keys()?.public_key().to_pem()?),
            uuid: None,
        };
        let url = self.settings.url_for(&self.settings.endpoints()?.host_register)?;
        match self.api.post::<_, EncryptedResponse>(&url, Some(token), &request).await {
            Ok(response) => {
                // Prove the answer is readable before keeping it.
                self.keys()?.decrypt_base64(&response.encrypted)?;
                self.settings.host.uuid = Some(response.encrypted.clone());
                self.settings.host.token = None;
                info!("Host registered");
                ActionOutcome::ok(response)
            }
            Err(AgentError::Rejected { status, message }) => {
                warn!(status, %message, "Registration rejected");
                Ok(ActionOutcome::error(EXIT_REJECTED, message))
            }
            Err(e) => Err(e),
        }
    }

    /// Prove key possession and obtain the host bearer token.
    #[instrument(skip_all)]
    pub async fn host_verify(&mut self, token: &str) -> Result<ActionOutcome, AgentError> {
        let Some(host_uuid) = self.settings.host_uuid(self.keys.as_ref()) else {
            return Ok(ActionOutcome::error(EXIT_PRECONDITION, "Host UUID not set"));
        };
        let request = VerifyRequest {
            uuid: Some(host_uuid),
            encrypted: Some(self.keys()?.sign_to_base64(VERIFY_CHALLENGE.as_bytes())?),
        };
        let url = self.settings.url_for(&self.settings.endpoints()?.host_verify)?;
        match self.api.post::<_, EncryptedResponse>(&url, Some(token), &request).await {
            Ok(response) => {
                self.keys()?.decrypt_base64(&response.encrypted)?;
                self.settings.host.token = Some(response.encrypted.clone());
                info!("Host verified");
                ActionOutcome::ok(response)
            }
            Err(AgentError::Rejected { status, message }) => {
                warn!(status, %message, "Verification rejected");
                Ok(ActionOutcome::error(EXIT_REJECTED, message))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn host_status(&self) -> Result<ActionOutcome, AgentError> {
        let url = self.settings.url_for(&self.settings.endpoints()?.host_status)?;
        let status: HostStatusResponse = self.api.get(&url, Some(&self.host_token()?)).await?;
        ActionOutcome::ok(status)
    }

    /// Generate keys, then status, discover, register and verify in one go.
    #[instrument(skip(self, token))]
    pub async fn new_host(
        &mut self,
        url: &str,
        token: &str,
        private_key: &Path,
        public_key: &Path,
        bits: usize,
    ) -> Result<ActionOutcome, AgentError> {
        self.generate_keys(private_key, public_key, bits)?;
        self.status(url).await?;
        self.discover().await?;
        let registered = self.host_register(token).await?;
        if registered.exit_code != EXIT_OK {
            return Ok(registered);
        }
        self.host_verify(token).await
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn commands_list(&self) -> Result<ActionOutcome, AgentError> {
        ActionOutcome::ok(self.list_pending().await?)
    }

    async fn list_pending(&self) -> Result<CommandsListResponse, AgentError> {
        let url = self.settings.url_for(&self.settings.endpoints()?.commands_list)?;
        self.api.get(&url, Some(&self.host_token()?)).await
    }

    /// Fetch, decrypt and run one command, then post its result.
    ///
    /// The exit code is the command's own status. A timed out command is
    /// reported locally and nothing is posted.
    #[instrument(skip(self))]
    pub async fn command_get(&self, command_id: i64) -> Result<ActionOutcome, AgentError> {
        let token = self.host_token()?;
        let endpoints = self.settings.endpoints()?;
        let url = self
            .settings
            .url_for(&format!("{}/{command_id}", endpoints.command_get))?;
        let payload: CommandPayload = self.api.get(&url, Some(&token)).await?;
        if payload.id != command_id {
            return Ok(ActionOutcome::error(EXIT_PRECONDITION, "Invalid command"));
        }

        let wrapped = self.keys()?.decrypt_base64_string(&payload.encryption_key)?;
        let envelope = SymmetricEnvelope::new(&EnvelopeKey::decode(&wrapped)?);
        let sealed = |name: &str| payload.encrypted.iter().any(|f| f == name);

        let body = if sealed(fields::COMMAND) {
            envelope.decrypt_str(&payload.command)?
        } else {
            payload.command.clone()
        };
        let settings = open_map(&envelope, &payload.settings, sealed(fields::SETTINGS))?;
        let variables = open_map(&envelope, &payload.variables, sealed(fields::VARIABLES))?;

        let timeout = Duration::from_secs(payload.timeout);
        let execution = self.runner.run(&body, &settings, &variables, timeout).await?;
        let mut result = json!({
            "id": payload.id,
            "name": payload.name,
            "timeout": payload.timeout,
        });

        match execution {
            Execution::TimedOut => {
                warn!(command_id, "Command timed out, result not posted");
                result["output"] = json!({"status": Status::Error, "message": "timeout"});
                Ok(ActionOutcome {
                    exit_code: EXIT_TIMEOUT,
                    result: Some(result),
                })
            }
            Execution::Completed {
                status,
                stdout,
                stderr,
            } => {
                let identity = self.identity_envelope()?;
                let request = CommandPostRequest {
                    output: Some(identity.encrypt_str(&stdout)?),
                    result: Some(identity.encrypt_str(&stderr)?),
                };
                let post_url = self
                    .settings
                    .url_for(&format!("{}/{command_id}", endpoints.command_post))?;
                let posted: CommandPostResponse =
                    self.api.post(&post_url, Some(&token), &request).await?;
                info!(command_id, status, "Command result posted");

                result["stdout"] = json!(stdout);
                result["stderr"] = json!(stderr);
                result["output"] = serde_json::to_value(posted)?;
                Ok(ActionOutcome {
                    exit_code: status,
                    result: Some(result),
                })
            }
        }
    }

    /// Run every pending command in order.
    ///
    /// A failing command is recorded in the results and does not stop the
    /// remaining ones.
    #[instrument(skip(self))]
    pub async fn commands_process(&self) -> Result<ActionOutcome, AgentError> {
        let pending = self.list_pending().await?;
        let mut commands_results = serde_json::Map::new();
        for command in &pending.results {
            let entry = match self.command_get(command.command).await {
                Ok(outcome) => outcome.result.unwrap_or(Value::Null),
                Err(e) => {
                    warn!(command_id = command.command, error = %e, "Command failed");
                    json!({"status": Status::Error, "message": e.to_string()})
                }
            };
            commands_results.insert(command.command.to_string(), entry);
        }
        let mut result = serde_json::to_value(&pending)?;
        result["commands_results"] = Value::Object(commands_results);
        Ok(ActionOutcome {
            exit_code: EXIT_OK,
            result: Some(result),
        })
    }
}

fn open_map(
    envelope: &SymmetricEnvelope,
    values: &BTreeMap<String, Option<String>>,
    sealed: bool,
) -> Result<BTreeMap<String, Option<String>>, AgentError> {
    values
        .iter()
        .map(|(name, value)| -> Result<_, AgentError> {
            let opened = match value {
                Some(v) if sealed => Some(envelope.decrypt_str(v)?),
                other => other.clone(),
            };
            Ok((name.clone(), opened))
        })
        .collect()
}
