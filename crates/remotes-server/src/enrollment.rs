//! Host enrollment: the register/verify handshake.
//!
//! A host submits its public key and receives a UUID encrypted to that key.
//! It then proves possession of the private key by signing the fixed
//! challenge, and receives its bearer token, again encrypted to its key.

use remotes_crypto::{CryptoError, PublicKey};
use remotes_proto::VERIFY_CHALLENGE;
use remotes_proto::v1::{RegisterRequest, VerifyRequest};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::{generate_token, hash_token};
use crate::error::ApiError;
use crate::storage::{DatabaseError, ServerDatabase};

/// A freshly registered, still pending host.
#[derive(Debug, Clone)]
pub struct Registration {
    pub host_uuid: String,
    /// Base64 RSA-OAEP ciphertext of `host_uuid`.
    pub encrypted_uuid: String,
}

/// A verified host and its issued credential.
#[derive(Debug, Clone)]
pub struct Verification {
    pub host_uuid: String,
    /// Base64 RSA-OAEP ciphertext of the bearer token.
    pub encrypted_token: String,
    pub auto_group: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn wrap_for_host(public_key: &PublicKey, plaintext: &str) -> Result<String, ApiError> {
    public_key
        .encrypt_to_base64(plaintext.as_bytes())
        .map_err(|e| match e {
            CryptoError::MessageTooLong { .. } => {
                ApiError::Validation("Public key is too small".into())
            }
            other => ApiError::Crypto(other),
        })
}

/// Register a host public key, creating a pending host.
#[instrument(skip_all)]
pub async fn register(
    db: &ServerDatabase,
    request: &RegisterRequest,
) -> Result<Registration, ApiError> {
    let pem = non_empty(request.public_key.as_deref())
        .ok_or_else(|| ApiError::Validation("Missing host public key".into()))?;
    let public_key =
        PublicKey::from_pem(pem).map_err(|_| ApiError::Validation("Invalid PEM key".into()))?;

    let host_uuid = match non_empty(request.uuid.as_deref()) {
        Some(requested) => {
            let parsed = Uuid::parse_str(requested)
                .map_err(|_| ApiError::Validation("Invalid host UUID".into()))?;
            let host_uuid = parsed.hyphenated().to_string();
            if db.get_host_by_uuid(&host_uuid).await?.is_some() {
                return Err(ApiError::Conflict("Existing host".into()));
            }
            host_uuid
        }
        None => Uuid::new_v4().hyphenated().to_string(),
    };

    let encrypted_uuid = wrap_for_host(&public_key, &host_uuid)?;

    db.create_host(&host_uuid, pem).await.map_err(|e| match e {
        DatabaseError::Conflict(_) => ApiError::Conflict("Existing host".into()),
        other => other.into(),
    })?;

    info!(host_uuid = %host_uuid, key_bits = public_key.bits(), "Host registered");
    Ok(Registration {
        host_uuid,
        encrypted_uuid,
    })
}

/// Verify a pending host's signature over the challenge and activate it.
#[instrument(skip_all)]
pub async fn verify(
    db: &ServerDatabase,
    request: &VerifyRequest,
) -> Result<Verification, ApiError> {
    let raw_uuid = non_empty(request.uuid.as_deref())
        .ok_or_else(|| ApiError::Validation("Missing host UUID".into()))?;
    let signature = non_empty(request.encrypted.as_deref())
        .ok_or_else(|| ApiError::Validation("Missing encrypted text".into()))?;

    let host_uuid = Uuid::parse_str(raw_uuid)
        .map_err(|_| ApiError::NotFound("Host not found".into()))?
        .hyphenated()
        .to_string();

    if db.get_user_by_username(&host_uuid).await?.is_some() {
        return Err(ApiError::Conflict("User already existing".into()));
    }
    let host = db
        .get_host_by_uuid(&host_uuid)
        .await?
        .ok_or_else(|| ApiError::NotFound("Host not found".into()))?;
    if host.user_id.is_some() {
        return Err(ApiError::Conflict("User already existing".into()));
    }

    let public_key = PublicKey::from_pem(&host.pubkey)
        .map_err(|e| ApiError::Internal(format!("stored key for host {}: {e}", host.id)))?;
    if !public_key.verify_base64(VERIFY_CHALLENGE.as_bytes(), signature) {
        warn!(host_uuid = %host_uuid, "Rejected verification with invalid signature");
        return Err(ApiError::Authentication("Invalid signature".into()));
    }

    let token = generate_token();
    let encrypted_token = wrap_for_host(&public_key, &token)?;

    let activated = db
        .activate_host(host.id, &host_uuid, &hash_token(&token))
        .await
        .map_err(|e| match e {
            DatabaseError::Conflict(_) => ApiError::Conflict("User already existing".into()),
            other => other.into(),
        })?;

    info!(
        host_uuid = %host_uuid,
        user_id = activated.user.id,
        auto_group = activated.auto_group.as_deref().unwrap_or("-"),
        "Host verified"
    );
    Ok(Verification {
        host_uuid,
        encrypted_token,
        auto_group: activated.auto_group,
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use remotes_crypto::HostKeyPair;

    use super::*;
    use crate::test_support::{enroll, host_keys, other_keys, public_pem};

    async fn test_db() -> ServerDatabase {
        ServerDatabase::open_in_memory().await.unwrap()
    }

    fn register_request(keys: &HostKeyPair) -> RegisterRequest {
        RegisterRequest {
            public_key: Some(public_pem(keys)),
            uuid: None,
        }
    }

    #[tokio::test]
    async fn register_returns_uuid_only_the_key_owner_can_read() {
        let db = test_db().await;
        let registration = register(&db, &register_request(host_keys())).await.unwrap();

        let recovered = host_keys()
            .decrypt_base64_string(&registration.encrypted_uuid)
            .unwrap();
        assert_eq!(recovered.as_str(), registration.host_uuid);
        assert!(other_keys().decrypt_base64(&registration.encrypted_uuid).is_err());

        let host = db.get_host_by_uuid(&registration.host_uuid).await.unwrap().unwrap();
        assert!(!host.is_active);
        assert!(host.user_id.is_none());
    }

    #[tokio::test]
    async fn register_rejects_missing_or_invalid_key() {
        let db = test_db().await;
        let err = register(&db, &RegisterRequest::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref m) if m == "Missing host public key"));

        let err = register(
            &db,
            &RegisterRequest {
                public_key: Some("-----BEGIN PUBLIC KEY-----\nnope\n".into()),
                uuid: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref m) if m == "Invalid PEM key"));
        assert_eq!(db.count_active_hosts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn register_with_preshared_uuid_conflicts_on_reuse() {
        let db = test_db().await;
        let fixed = Uuid::new_v4().to_string();
        let request = RegisterRequest {
            public_key: Some(public_pem(host_keys())),
            uuid: Some(fixed.clone()),
        };
        let registration = register(&db, &request).await.unwrap();
        assert_eq!(registration.host_uuid, fixed);

        let err = register(&db, &request).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(ref m) if m == "Existing host"));
    }

    #[tokio::test]
    async fn verify_activates_host_and_issues_token() {
        let db = test_db().await;
        let (host_uuid, token) = enroll(&db, host_keys()).await;

        let user = db.get_user_by_token_hash(&hash_token(&token)).await.unwrap().unwrap();
        assert_eq!(user.username, host_uuid);
        assert!(!user.can_register_hosts);
        let host = db.get_active_host_for_user(user.id).await.unwrap().unwrap();
        assert_eq!(host.uuid, host_uuid);
    }

    #[tokio::test]
    async fn second_verify_is_conflict() {
        let db = test_db().await;
        let registration = register(&db, &register_request(host_keys())).await.unwrap();
        let request = VerifyRequest {
            uuid: Some(registration.host_uuid.clone()),
            encrypted: Some(host_keys().sign_to_base64(VERIFY_CHALLENGE.as_bytes()).unwrap()),
        };

        let first = verify(&db, &request).await.unwrap();
        assert_eq!(first.auto_group.as_deref(), Some("All hosts"));
        let err = verify(&db, &request).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(db.count_tokens().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_verify_has_a_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let db = ServerDatabase::open(&dir.path().join("server.db")).await.unwrap();
        let registration = register(&db, &register_request(host_keys())).await.unwrap();
        let request = VerifyRequest {
            uuid: Some(registration.host_uuid.clone()),
            encrypted: Some(host_keys().sign_to_base64(VERIFY_CHALLENGE.as_bytes()).unwrap()),
        };

        let attempts: Vec<_> = (0..6)
            .map(|_| {
                let db = db.clone();
                let request = request.clone();
                tokio::spawn(async move { verify(&db, &request).await })
            })
            .collect();

        let mut verified = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => verified += 1,
                Err(ApiError::Conflict(_)) => {}
                Err(e) => panic!("unexpected verify error: {e}"),
            }
        }
        assert_eq!(verified, 1);
        assert_eq!(db.count_tokens().await.unwrap(), 1);
        let user = db
            .get_user_by_username(&registration.host_uuid)
            .await
            .unwrap()
            .unwrap();
        let host = db.get_active_host_for_user(user.id).await.unwrap().unwrap();
        assert_eq!(host.uuid, registration.host_uuid);
    }

    #[tokio::test]
    async fn verify_rejects_signature_from_another_key() {
        let db = test_db().await;
        let registration = register(&db, &register_request(host_keys())).await.unwrap();
        let request = VerifyRequest {
            uuid: Some(registration.host_uuid.clone()),
            encrypted: Some(other_keys().sign_to_base64(VERIFY_CHALLENGE.as_bytes()).unwrap()),
        };

        let err = verify(&db, &request).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(ref m) if m == "Invalid signature"));
        let host = db.get_host_by_uuid(&registration.host_uuid).await.unwrap().unwrap();
        assert!(!host.is_active);
    }

    #[tokio::test]
    async fn verify_rejects_garbage_signature() {
        let db = test_db().await;
        let registration = register(&db, &register_request(host_keys())).await.unwrap();
        let request = VerifyRequest {
            uuid: Some(registration.host_uuid),
            encrypted: Some("not base64 at all!".into()),
        };
        let err = verify(&db, &request).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[tokio::test]
    async fn verify_unknown_or_malformed_uuid_is_not_found() {
        let db = test_db().await;
        let signature = host_keys().sign_to_base64(VERIFY_CHALLENGE.as_bytes()).unwrap();
        for uuid in [Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
            let err = verify(
                &db,
                &VerifyRequest {
                    uuid: Some(uuid),
                    encrypted: Some(signature.clone()),
                },
            )
            .await
            .unwrap_err();
            assert!(matches!(err, ApiError::NotFound(_)));
        }
    }

    #[tokio::test]
    async fn verify_reports_missing_fields() {
        let db = test_db().await;
        let err = verify(&db, &VerifyRequest::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref m) if m == "Missing host UUID"));

        let err = verify(
            &db,
            &VerifyRequest {
                uuid: Some(Uuid::new_v4().to_string()),
                encrypted: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(ref m) if m == "Missing encrypted text"));
    }
}
