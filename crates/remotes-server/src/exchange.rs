//! Command exchange: pending-command listing, encrypted fetch and result
//! posting for enrolled hosts.

use std::collections::BTreeMap;

use remotes_crypto::{CryptoError, EnvelopeKey, PublicKey, SymmetricEnvelope};
use remotes_proto::v1::{
    CommandPayload, CommandPostRequest, PendingCommand, Status, fields,
};
use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::catalog::DEFAULT_TIMEOUT_SECS;
use crate::error::ApiError;
use crate::storage::{CommandOutput, Host, ServerDatabase};

const FIELD_REQUIRED: &str = "This field is required.";

/// Commands visible to `host` at `now` that it has not answered yet.
#[instrument(skip(db, host), fields(host_id = host.id))]
pub async fn list_pending(
    db: &ServerDatabase,
    host: &Host,
    now: i64,
) -> Result<Vec<PendingCommand>, ApiError> {
    let rows = db.list_pending_commands(host.id, now).await?;
    debug!(count = rows.len(), "Listed pending commands");
    Ok(rows
        .into_iter()
        .map(|row| PendingCommand {
            id: row.command_id,
            group: row.group_id,
            command: row.command_id,
        })
        .collect())
}

/// Timeout sent to the host. Rows with a non-positive timeout get the
/// catalog default instead of killing the command at once.
fn payload_timeout(timeout_secs: i64) -> u64 {
    u64::try_from(timeout_secs)
        .ok()
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS.unsigned_abs())
}

fn seal_map(
    envelope: &SymmetricEnvelope,
    values: Vec<(String, Option<String>)>,
) -> Result<BTreeMap<String, Option<String>>, ApiError> {
    values
        .into_iter()
        .map(|(name, value)| -> Result<_, ApiError> {
            let sealed = value.map(|v| envelope.encrypt_str(&v)).transpose()?;
            Ok((name, sealed))
        })
        .collect()
}

/// Build the encrypted payload of one command for `host`.
///
/// Body, settings and variables are sealed under a fresh envelope key,
/// which travels RSA-wrapped to the host key. Commands outside the host's
/// scope, window or active flags are indistinguishable from missing ones.
#[instrument(skip(db, host), fields(host_id = host.id))]
pub async fn fetch_command(
    db: &ServerDatabase,
    host: &Host,
    command_id: i64,
    now: i64,
) -> Result<CommandPayload, ApiError> {
    let command = db
        .get_visible_command(host.id, command_id, now)
        .await?
        .ok_or_else(|| ApiError::Authorization("Command not available".into()))?;

    let settings = db.list_command_settings(command.id).await?;
    let variables = db.list_command_variables(host.id, command.id).await?;

    let public_key = PublicKey::from_pem(&host.pubkey)
        .map_err(|e| ApiError::Internal(format!("stored key for host {}: {e}", host.id)))?;
    let key = EnvelopeKey::generate();
    let envelope = SymmetricEnvelope::new(&key);

    let payload = CommandPayload {
        status: Status::Ok,
        id: command.id,
        name: command.name,
        command: envelope.encrypt_str(&command.body)?,
        settings: seal_map(&envelope, settings)?,
        variables: seal_map(&envelope, variables)?,
        timeout: payload_timeout(command.timeout_secs),
        encrypted: vec![
            fields::COMMAND.to_string(),
            fields::SETTINGS.to_string(),
            fields::VARIABLES.to_string(),
        ],
        encryption_key: public_key.encrypt_to_base64(key.encode().as_bytes())?,
    };
    debug!(command_id = payload.id, "Command sealed for host");
    Ok(payload)
}

/// Split a command result into values for `count` output variables.
///
/// A JSON array maps element by element: strings as-is, `null` as empty,
/// anything else as its JSON text. Any other result is a single value.
/// Missing positions are empty and surplus elements are dropped.
pub fn output_variable_values(result: &str, count: usize) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }
    let mut values: Vec<String> = match serde_json::from_str::<Value>(result) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect(),
        _ => vec![result.to_string()],
    };
    values.resize(count, String::new());
    values
}

fn required_fields(request: &CommandPostRequest) -> Result<(&str, &str), ApiError> {
    let mut missing = BTreeMap::new();
    if request.output.is_none() {
        missing.insert(fields::OUTPUT.to_string(), vec![FIELD_REQUIRED.to_string()]);
    }
    if request.result.is_none() {
        missing.insert(fields::RESULT.to_string(), vec![FIELD_REQUIRED.to_string()]);
    }
    match (request.output.as_deref(), request.result.as_deref()) {
        (Some(output), Some(result)) => Ok((output, result)),
        _ => Err(ApiError::InvalidFields(missing)),
    }
}

/// Store a host's result for one command.
///
/// `output` and `result` arrive sealed with the key derived from the host
/// UUID. Declared output variables take the result's values by position.
#[instrument(skip(db, host, request), fields(host_id = host.id))]
pub async fn post_result(
    db: &ServerDatabase,
    host: &Host,
    command_id: i64,
    request: &CommandPostRequest,
) -> Result<CommandOutput, ApiError> {
    if db.get_command_for_host(host.id, command_id).await?.is_none() {
        return Err(ApiError::Authorization("Command not available".into()));
    }
    let (sealed_output, sealed_result) = required_fields(request)?;

    let host_uuid = Uuid::parse_str(&host.uuid)
        .map_err(|e| ApiError::Internal(format!("stored uuid for host {}: {e}", host.id)))?;
    let envelope = SymmetricEnvelope::new(&EnvelopeKey::from_identity(&host_uuid));
    let invalid = |_: CryptoError| ApiError::Validation("Invalid encrypted data".into());
    let output = envelope.decrypt_str(sealed_output).map_err(invalid)?;
    let result = envelope.decrypt_str(sealed_result).map_err(invalid)?;

    let names = db.list_output_variables(command_id).await?;
    let values = output_variable_values(&result, names.len());
    let assignments: Vec<(String, String)> = names.into_iter().zip(values).collect();

    let stored = db
        .record_command_output(command_id, host.id, &output, &result, &assignments)
        .await?;
    info!(
        command_id,
        output_id = stored.id,
        variables = assignments.len(),
        "Command result stored"
    );
    Ok(stored)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use crate::auth::hash_token;
    use crate::storage::{NewCommand, NewCommandsGroup};
    use crate::test_support::{enroll, host_keys};

    use super::*;

    const NOW: i64 = 1_800_000_000;

    async fn enrolled_host(db: &ServerDatabase) -> Host {
        let (_, token) = enroll(db, host_keys()).await;
        let user = db.get_user_by_token_hash(&hash_token(&token)).await.unwrap().unwrap();
        db.get_active_host_for_user(user.id).await.unwrap().unwrap()
    }

    async fn command_in_window(db: &ServerDatabase, after: i64, before: i64) -> i64 {
        let hosts_group = db.get_hosts_group_by_name("All hosts").await.unwrap().unwrap();
        let group_id = db
            .upsert_commands_group(&NewCommandsGroup {
                name: "inventory",
                hosts_group_id: hosts_group.id,
                sort_order: 1,
                after_ts: after,
                before_ts: before,
                is_active: true,
            })
            .await
            .unwrap();
        let command_id = db
            .upsert_command(&NewCommand {
                group_id,
                name: "disks",
                description: "",
                body: "print('sda')",
                timeout_secs: 30,
                sort_order: 1,
                is_active: true,
            })
            .await
            .unwrap();
        let setting = db
            .upsert_setting("backup_target", Some("nas-01"), "", true)
            .await
            .unwrap();
        db.upsert_setting("unset", None, "", true).await.unwrap();
        let unset = db.get_setting_by_name("unset").await.unwrap().unwrap();
        db.set_command_settings(command_id, &[setting.id, unset.id]).await.unwrap();
        db.set_command_input_variables(command_id, &["disk_count".to_string()])
            .await
            .unwrap();
        db.set_command_output_variables(
            command_id,
            &["disk_count".to_string(), "largest".to_string()],
        )
        .await
        .unwrap();
        command_id
    }

    fn host_envelope(host: &Host) -> SymmetricEnvelope {
        SymmetricEnvelope::new(&EnvelopeKey::from_identity(&Uuid::parse_str(&host.uuid).unwrap()))
    }

    #[test]
    fn output_values_follow_declared_arity() {
        assert_eq!(output_variable_values(r#"["a", "b", "c"]"#, 2), vec!["a", "b"]);
        assert_eq!(output_variable_values(r#"["a"]"#, 3), vec!["a", "", ""]);
        assert_eq!(output_variable_values(r#"[1, null, true]"#, 3), vec!["1", "", "true"]);
        assert_eq!(output_variable_values("plain text", 2), vec!["plain text", ""]);
        assert_eq!(output_variable_values(r#"{"k": 1}"#, 1), vec![r#"{"k": 1}"#]);
        assert!(output_variable_values(r#"["a"]"#, 0).is_empty());
    }

    #[tokio::test]
    async fn fetch_seals_payload_for_the_host_key() {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let host = enrolled_host(&db).await;
        let command_id = command_in_window(&db, NOW - 60, NOW + 60).await;

        let listed = list_pending(&db, &host, NOW).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, command_id);

        let payload = fetch_command(&db, &host, command_id, NOW).await.unwrap();
        assert_eq!(payload.timeout, 30);
        assert_eq!(payload.name, "disks");
        assert_ne!(payload.command, "print('sda')");

        let wrapped = host_keys().decrypt_base64_string(&payload.encryption_key).unwrap();
        let envelope = SymmetricEnvelope::new(&EnvelopeKey::decode(&wrapped).unwrap());
        assert_eq!(envelope.decrypt_str(&payload.command).unwrap(), "print('sda')");
        let target = payload.settings["backup_target"].as_deref().unwrap();
        assert_eq!(envelope.decrypt_str(target).unwrap(), "nas-01");
        assert_eq!(payload.settings["unset"], None);
        assert_eq!(payload.variables["disk_count"], None);
    }

    #[test]
    fn non_positive_timeout_falls_back_to_default() {
        assert_eq!(payload_timeout(30), 30);
        assert_eq!(payload_timeout(0), 15);
        assert_eq!(payload_timeout(-5), 15);
    }

    #[tokio::test]
    async fn fetch_replaces_zero_timeout() {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let host = enrolled_host(&db).await;
        let command_id = command_in_window(&db, NOW - 60, NOW + 60).await;
        let group_id = db
            .get_visible_command(host.id, command_id, NOW)
            .await
            .unwrap()
            .unwrap()
            .group_id;
        db.upsert_command(&NewCommand {
            group_id,
            name: "disks",
            description: "",
            body: "print('sda')",
            timeout_secs: 0,
            sort_order: 1,
            is_active: true,
        })
        .await
        .unwrap();

        let payload = fetch_command(&db, &host, command_id, NOW).await.unwrap();
        assert_eq!(payload.timeout, 15);
    }

    #[tokio::test]
    async fn fetch_outside_window_is_forbidden() {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let host = enrolled_host(&db).await;
        let command_id = command_in_window(&db, NOW + 60, NOW + 120).await;

        assert!(list_pending(&db, &host, NOW).await.unwrap().is_empty());
        let err = fetch_command(&db, &host, command_id, NOW).await.unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
    }

    #[tokio::test]
    async fn post_stores_result_and_variables() {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let host = enrolled_host(&db).await;
        let command_id = command_in_window(&db, NOW - 60, NOW + 60).await;
        let envelope = host_envelope(&host);

        let request = CommandPostRequest {
            output: Some(envelope.encrypt_str("sda\nsdb").unwrap()),
            result: Some(envelope.encrypt_str(r#"["2"]"#).unwrap()),
        };
        let stored = post_result(&db, &host, command_id, &request).await.unwrap();
        assert_eq!(stored.output, "sda\nsdb");

        let variables = db.list_variable_values(host.id).await.unwrap();
        let pairs: Vec<(&str, &str)> = variables
            .iter()
            .map(|v| (v.name.as_str(), v.raw_value.as_str()))
            .collect();
        assert_eq!(pairs, vec![("disk_count", "2"), ("largest", "")]);
        assert!(list_pending(&db, &host, NOW).await.unwrap().is_empty());

        // The stored value feeds the input variable on the next fetch.
        let payload = fetch_command(&db, &host, command_id, NOW).await.unwrap();
        let wrapped = host_keys().decrypt_base64_string(&payload.encryption_key).unwrap();
        let envelope = SymmetricEnvelope::new(&EnvelopeKey::decode(&wrapped).unwrap());
        let sealed = payload.variables["disk_count"].as_deref().unwrap();
        assert_eq!(envelope.decrypt_str(sealed).unwrap(), "2");
    }

    #[tokio::test]
    async fn post_reports_missing_fields() {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let host = enrolled_host(&db).await;
        let command_id = command_in_window(&db, NOW - 60, NOW + 60).await;

        let err = post_result(&db, &host, command_id, &CommandPostRequest::default())
            .await
            .unwrap_err();
        let ApiError::InvalidFields(missing) = err else {
            panic!("expected field errors, got {err:?}");
        };
        assert_eq!(missing[fields::OUTPUT], vec![FIELD_REQUIRED]);
        assert_eq!(missing[fields::RESULT], vec![FIELD_REQUIRED]);
    }

    #[tokio::test]
    async fn post_with_wrong_key_is_invalid() {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let host = enrolled_host(&db).await;
        let command_id = command_in_window(&db, NOW - 60, NOW + 60).await;
        let stranger = SymmetricEnvelope::new(&EnvelopeKey::generate());

        let request = CommandPostRequest {
            output: Some(stranger.encrypt_str("x").unwrap()),
            result: Some(stranger.encrypt_str("y").unwrap()),
        };
        let err = post_result(&db, &host, command_id, &request).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref m) if m == "Invalid encrypted data"));
        assert!(db.list_command_outputs(host.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_for_foreign_command_is_forbidden() {
        let db = ServerDatabase::open_in_memory().await.unwrap();
        let host = enrolled_host(&db).await;
        let err = post_result(&db, &host, 999, &CommandPostRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
    }
}
