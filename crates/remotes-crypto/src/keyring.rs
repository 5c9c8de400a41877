//! RSA keyring.
//!
//! Each host owns a long-lived RSA keypair. The server only ever holds the
//! public half: it encrypts small secrets (the assigned UUID, the bearer
//! token, ephemeral envelope keys) to it with OAEP and checks the host's
//! PSS signatures against it.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Key size used by the host tooling when none is requested.
pub const DEFAULT_KEY_BITS: usize = 4096;

/// Smallest modulus accepted by [`HostKeyPair::generate`].
const MIN_KEY_BITS: usize = 1024;

/// SHA-256 output length, used by both OAEP and PSS size arithmetic.
const HASH_LEN: usize = 32;

/// Public half of a host keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.bits())
            .finish()
    }
}

impl PublicKey {
    /// Parse a PEM public key. Accepts `SubjectPublicKeyInfo` and PKCS#1 forms.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let pem = pem.trim();
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map(Self)
            .map_err(|_| CryptoError::InvalidPem)
    }

    /// Export as an unencrypted `SubjectPublicKeyInfo` PEM.
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.0.n().bits()
    }

    /// Largest plaintext OAEP-SHA-256 can carry under this key: `k - 2*hLen - 2`.
    pub fn max_message_len(&self) -> usize {
        self.0.size().saturating_sub(2 * HASH_LEN + 2)
    }

    /// OAEP-encrypt `plaintext`. Oversized input is rejected, never truncated.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let max = self.max_message_len();
        if plaintext.len() > max {
            return Err(CryptoError::MessageTooLong {
                len: plaintext.len(),
                max,
            });
        }
        self.0
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
    }

    /// [`Self::encrypt`] followed by standard base64, the form used on the wire.
    pub fn encrypt_to_base64(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        self.encrypt(plaintext).map(|ct| encode_base64(&ct))
    }

    /// Check a PSS-SHA-256 signature over `message`.
    ///
    /// Any failure, including a malformed signature, is reported as `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let digest = Sha256::digest(message);
        let scheme = Pss::new_with_salt::<Sha256>(max_pss_salt_len(self.bits()));
        self.0.verify(scheme, digest.as_slice(), signature).is_ok()
    }

    /// [`Self::verify`] for a base64 signature. Undecodable input is `false`.
    pub fn verify_base64(&self, message: &[u8], signature_b64: &str) -> bool {
        decode_base64(signature_b64).is_ok_and(|sig| self.verify(message, &sig))
    }
}

/// An RSA keypair owned by a host.
pub struct HostKeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
}

impl std::fmt::Debug for HostKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKeyPair")
            .field("public", &self.public)
            .field("private", &"[REDACTED]")
            .finish()
    }
}

impl HostKeyPair {
    /// Generate a new keypair with exponent 65537 from the OS RNG.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        if bits < MIN_KEY_BITS {
            return Err(CryptoError::KeyGeneration(format!(
                "{bits}-bit keys are too small (minimum {MIN_KEY_BITS})"
            )));
        }
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(Self::from_private(private))
    }

    fn from_private(private: RsaPrivateKey) -> Self {
        let public = PublicKey(private.to_public_key());
        Self { private, public }
    }

    /// Parse an unencrypted PEM private key (PKCS#8 or PKCS#1).
    pub fn from_private_pem(pem: &str) -> Result<Self, CryptoError> {
        let pem = pem.trim();
        RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map(Self::from_private)
            .map_err(|_| CryptoError::InvalidPem)
    }

    /// Parse a passphrase-protected PKCS#8 PEM private key.
    pub fn from_encrypted_private_pem(pem: &str, passphrase: &[u8]) -> Result<Self, CryptoError> {
        RsaPrivateKey::from_pkcs8_encrypted_pem(pem.trim(), passphrase)
            .map(Self::from_private)
            .map_err(|_| CryptoError::InvalidPem)
    }

    /// Export the private key as unencrypted PKCS#8 PEM.
    pub fn private_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
    }

    /// Export the private key as encrypted PKCS#8 PEM.
    pub fn encrypted_private_pem(&self, passphrase: &[u8]) -> Result<Zeroizing<String>, CryptoError> {
        self.private
            .to_pkcs8_encrypted_pem(&mut OsRng, passphrase, LineEnding::LF)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
    }

    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// OAEP-decrypt a ciphertext produced for this key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Decode base64 then decrypt. A bad encoding is reported as a failed decrypt.
    pub fn decrypt_base64(&self, ciphertext_b64: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let ciphertext = decode_base64(ciphertext_b64).map_err(|_| CryptoError::DecryptionFailed)?;
        self.decrypt(&ciphertext)
    }

    /// Decrypt to a UTF-8 string (UUIDs and tokens travel this way).
    pub fn decrypt_base64_string(&self, ciphertext_b64: &str) -> Result<Zeroizing<String>, CryptoError> {
        let plain = self.decrypt_base64(ciphertext_b64)?;
        String::from_utf8(plain.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// PSS-SHA-256 signature over `message` with the maximum salt length.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let digest = Sha256::digest(message);
        let scheme = Pss::new_with_salt::<Sha256>(max_pss_salt_len(self.public.bits()));
        self.private
            .sign_with_rng(&mut OsRng, scheme, digest.as_slice())
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }

    /// [`Self::sign`] followed by standard base64.
    pub fn sign_to_base64(&self, message: &[u8]) -> Result<String, CryptoError> {
        self.sign(message).map(|sig| encode_base64(&sig))
    }

    /// Save the private key PEM with owner-only permissions.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        let pem = self.private_pem()?;
        write_file(path, pem.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Save the public key PEM next to the private one.
    pub fn save_public_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        write_file(path, self.public.to_pem()?.as_bytes())
    }

    /// Load a private key PEM.
    ///
    /// On Unix, refuses files readable by anyone but the owner.
    pub fn load_from_file(path: &Path) -> Result<Self, CryptoError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                return Err(CryptoError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("Private key file has insecure permissions: {mode:o} (expected 600)"),
                )));
            }
        }

        let pem = Zeroizing::new(std::fs::read_to_string(path)?);
        Self::from_private_pem(&pem)
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), CryptoError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// PSS maximum salt: `emLen - hLen - 2` with `emLen = ceil((modBits - 1) / 8)`.
const fn max_pss_salt_len(mod_bits: usize) -> usize {
    let em_len = mod_bits.saturating_sub(1).div_ceil(8);
    em_len.saturating_sub(HASH_LEN + 2)
}

/// Standard base64 with padding.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}
