//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::OnceLock;

use remotes_crypto::HostKeyPair;
use remotes_proto::VERIFY_CHALLENGE;
use remotes_proto::v1::{RegisterRequest, VerifyRequest};

use crate::enrollment;
use crate::storage::ServerDatabase;

const TEST_KEY_BITS: usize = 2048;

pub fn host_keys() -> &'static HostKeyPair {
    static KEYS: OnceLock<HostKeyPair> = OnceLock::new();
    KEYS.get_or_init(|| HostKeyPair::generate(TEST_KEY_BITS).unwrap())
}

pub fn other_keys() -> &'static HostKeyPair {
    static KEYS: OnceLock<HostKeyPair> = OnceLock::new();
    KEYS.get_or_init(|| HostKeyPair::generate(TEST_KEY_BITS).unwrap())
}

pub fn public_pem(keys: &HostKeyPair) -> String {
    keys.public_key().to_pem().unwrap()
}

/// Run the full handshake for `keys`, returning the host UUID and the
/// decrypted bearer token.
pub async fn enroll(db: &ServerDatabase, keys: &HostKeyPair) -> (String, String) {
    let registration = enrollment::register(
        db,
        &RegisterRequest {
            public_key: Some(public_pem(keys)),
            uuid: None,
        },
    )
    .await
    .unwrap();
    let host_uuid = keys
        .decrypt_base64_string(&registration.encrypted_uuid)
        .unwrap()
        .to_string();

    let verification = enrollment::verify(
        db,
        &VerifyRequest {
            uuid: Some(host_uuid.clone()),
            encrypted: Some(keys.sign_to_base64(VERIFY_CHALLENGE.as_bytes()).unwrap()),
        },
    )
    .await
    .unwrap();
    let token = keys
        .decrypt_base64_string(&verification.encrypted_token)
        .unwrap()
        .to_string();
    (host_uuid, token)
}
