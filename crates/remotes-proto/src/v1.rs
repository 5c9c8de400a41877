//! Request and response bodies for the v1 API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Endpoints;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

/// Error body. `fields` carries per-field validation messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl ErrorBody {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            fields: BTreeMap::new(),
        }
    }
}

/// Public server description, `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub status: Status,
    pub app_name: String,
    pub version: String,
    pub server_url: String,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub status: Status,
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: Status,
}

/// `POST /host/register`. Fields are optional so that a missing one is
/// reported as a validation error rather than a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub public_key: Option<String>,
    /// Pre-shared host UUID. The server picks one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// `POST /host/verify`. `encrypted` holds the base64 PSS signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub encrypted: Option<String>,
}

/// Register and verify answer with one base64 RSA ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedResponse {
    pub status: Status,
    pub encrypted: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsGroupRef {
    pub id: i64,
    pub name: String,
}

/// `GET /host/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatusResponse {
    pub status: Status,
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub hosts_groups: Vec<HostsGroupRef>,
}

/// One pending command in `GET /commands/list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub id: i64,
    pub group: i64,
    pub command: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsListResponse {
    pub status: Status,
    pub results: Vec<PendingCommand>,
}

/// `GET /commands/get/<id>`.
///
/// The fields named in `encrypted` hold envelope tokens sealed with the key
/// in `encryption_key`, itself RSA-OAEP wrapped to the host key. For map
/// fields each non-null value is sealed separately; nulls stay null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub status: Status,
    pub id: i64,
    pub name: String,
    pub command: String,
    pub settings: BTreeMap<String, Option<String>>,
    pub variables: BTreeMap<String, Option<String>>,
    pub timeout: u64,
    pub encrypted: Vec<String>,
    pub encryption_key: String,
}

/// `POST /commands/post/<id>`; both values are envelope tokens sealed with
/// the UUID-derived key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPostRequest {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPostResult {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPostResponse {
    pub status: Status,
    pub results: CommandPostResult,
}

/// Field names that `CommandPayload::encrypted` may list.
pub mod fields {
    pub const COMMAND: &str = "command";
    pub const SETTINGS: &str = "settings";
    pub const VARIABLES: &str = "variables";
    pub const OUTPUT: &str = "output";
    pub const RESULT: &str = "result";
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_uses_uppercase_literals() {
        assert_eq!(serde_json::to_value(Status::Ok).unwrap(), json!("OK"));
        assert_eq!(serde_json::to_value(Status::Error).unwrap(), json!("ERROR"));
    }

    #[test]
    fn error_body_omits_empty_parts() {
        let body = serde_json::to_value(ErrorBody::message("Invalid signature")).unwrap();
        assert_eq!(body, json!({"status": "ERROR", "message": "Invalid signature"}));

        let parsed: ErrorBody = serde_json::from_value(json!({"status": "ERROR"})).unwrap();
        assert!(parsed.message.is_none());
        assert!(parsed.fields.is_empty());
    }

    #[test]
    fn missing_request_fields_deserialize_as_none() {
        let req: RegisterRequest = serde_json::from_value(json!({})).unwrap();
        assert!(req.public_key.is_none() && req.uuid.is_none());

        let req: CommandPostRequest = serde_json::from_value(json!({"output": ""})).unwrap();
        assert_eq!(req.output.as_deref(), Some(""));
        assert!(req.result.is_none());
    }

    #[test]
    fn command_payload_keeps_null_values() {
        let payload = CommandPayload {
            status: Status::Ok,
            id: 5,
            name: "uptime".into(),
            command: "tok".into(),
            settings: BTreeMap::from([("a".into(), None)]),
            variables: BTreeMap::new(),
            timeout: 15,
            encrypted: vec![fields::COMMAND.into()],
            encryption_key: "wrapped".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["settings"], json!({"a": null}));
        let back: CommandPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }
}
