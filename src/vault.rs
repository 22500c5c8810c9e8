//! Credential vault: per-account encryption of stored signing secrets.
//!
//! Each secret is sealed with AES-256-GCM under a key derived from the
//! operator master key, a random salt, and the owning account id via
//! PBKDF2-HMAC-SHA256. Binding the account id into the KDF input is the
//! core invariant: a blob produced for account A cannot be opened with
//! account B's id.
//!
//! Stored blob layout, base64-encoded:
//! `salt(16) ‖ nonce(12) ‖ ciphertext ‖ tag(16)`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::logging::targets;

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Minimum acceptable master key length in bytes.
pub const MIN_MASTER_KEY_LEN: usize = 32;

/// Default PBKDF2 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Minimum acceptable PBKDF2 iteration count.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Derives per-account keys and seals/opens secret blobs.
///
/// Pure besides the randomness consumed by [`CredentialVault::encrypt`];
/// holds no I/O handles and is cheap to clone.
#[derive(Clone)]
pub struct CredentialVault {
    master_key: Vec<u8>,
    iterations: u32,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug output.
        f.debug_struct("CredentialVault")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Create a vault from the operator master key.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the master key is shorter than
    /// [`MIN_MASTER_KEY_LEN`] bytes or the iteration count is below
    /// [`MIN_KDF_ITERATIONS`].
    pub fn new(master_key: impl Into<Vec<u8>>, iterations: u32) -> Result<Self> {
        let master_key = master_key.into();
        if master_key.len() < MIN_MASTER_KEY_LEN {
            return Err(Error::config(format!(
                "master key must be at least {MIN_MASTER_KEY_LEN} bytes"
            )));
        }
        if iterations < MIN_KDF_ITERATIONS {
            return Err(Error::config(format!(
                "KDF iterations must be at least {MIN_KDF_ITERATIONS}"
            )));
        }
        Ok(Self {
            master_key,
            iterations,
        })
    }

    /// Encrypt `secret` for the given account.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for an empty secret.
    pub fn encrypt(&self, secret: &str, account_id: u64) -> Result<String> {
        if secret.is_empty() {
            return Err(Error::InvalidInput("secret must not be empty".into()));
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(account_id, &salt);
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| Error::config("bad derived key length"))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
            .map_err(|_| Error::InvalidInput("encryption failed".into()))?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        debug!(target: targets::VAULT, account_id, "secret sealed");
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored blob for the given account.
    ///
    /// # Errors
    /// Every failure mode — bad base64, truncated blob, authentication tag
    /// mismatch, non-UTF-8 plaintext — returns the same
    /// [`Error::CorruptOrTampered`] so callers cannot distinguish a
    /// wrong-account attempt from corruption.
    pub fn decrypt(&self, blob: &str, account_id: u64) -> Result<String> {
        let data = BASE64.decode(blob).map_err(|_| Error::CorruptOrTampered)?;
        if data.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(Error::CorruptOrTampered);
        }

        let salt = &data[..SALT_LEN];
        let nonce = &data[SALT_LEN..SALT_LEN + NONCE_LEN];
        let ciphertext = &data[SALT_LEN + NONCE_LEN..];

        let key = self.derive_key(account_id, salt);
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| Error::CorruptOrTampered)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::CorruptOrTampered)?;

        String::from_utf8(plaintext).map_err(|_| Error::CorruptOrTampered)
    }

    /// PBKDF2-HMAC-SHA256 over `master_key ‖ ":account:" ‖ id_be64`.
    fn derive_key(&self, account_id: u64, salt: &[u8]) -> [u8; KEY_LEN] {
        let mut material =
            Vec::with_capacity(self.master_key.len() + b":account:".len() + 8);
        material.extend_from_slice(&self.master_key);
        material.extend_from_slice(b":account:");
        material.extend_from_slice(&account_id.to_be_bytes());

        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(&material, salt, self.iterations, &mut key);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low iteration counts would make the tests fast, but the constructor
    // enforces the production floor, so use it as-is.
    fn vault() -> CredentialVault {
        CredentialVault::new(*b"0123456789abcdef0123456789abcdef", MIN_KDF_ITERATIONS).unwrap()
    }

    #[test]
    fn round_trip() {
        let vault = vault();
        let blob = vault.encrypt("hunter2-wallet-passphrase", 42).unwrap();
        assert_eq!(vault.decrypt(&blob, 42).unwrap(), "hunter2-wallet-passphrase");
    }

    #[test]
    fn blob_binds_to_account_id() {
        let vault = vault();
        let blob = vault.encrypt("hunter2", 1).unwrap();
        assert!(matches!(
            vault.decrypt(&blob, 2),
            Err(Error::CorruptOrTampered)
        ));
    }

    #[test]
    fn encrypt_is_salted() {
        let vault = vault();
        let a = vault.encrypt("same secret", 9).unwrap();
        let b = vault.encrypt("same secret", 9).unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a, 9).unwrap(), vault.decrypt(&b, 9).unwrap());
    }

    #[test]
    fn empty_secret_rejected() {
        assert!(matches!(
            vault().encrypt("", 1),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn short_master_key_rejected() {
        assert!(matches!(
            CredentialVault::new(b"too short".to_vec(), MIN_KDF_ITERATIONS),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn weak_iteration_count_rejected() {
        assert!(matches!(
            CredentialVault::new(*b"0123456789abcdef0123456789abcdef", 1_000),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn garbage_blobs_fail_uniformly() {
        let vault = vault();
        // Not base64.
        assert!(matches!(
            vault.decrypt("!!!", 1),
            Err(Error::CorruptOrTampered)
        ));
        // Valid base64, too short to hold salt + nonce + tag.
        assert!(matches!(
            vault.decrypt(&BASE64.encode([0u8; 20]), 1),
            Err(Error::CorruptOrTampered)
        ));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let vault = vault();
        let blob = vault.encrypt("hunter2", 5).unwrap();
        let mut raw = BASE64.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(matches!(
            vault.decrypt(&BASE64.encode(raw), 5),
            Err(Error::CorruptOrTampered)
        ));
    }
}
