//! Credential sealing for secrets at rest.
//!
//! Sealed form is base64(nonce || ciphertext) under AES-256-GCM. There is
//! no plaintext path: a value that cannot be sealed is not stored, and a
//! stored value that cannot be opened is an error.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::SecretsConfig;
use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

const KEYCHAIN_SERVICE: &str = "skydock";
const KEYCHAIN_ENTRY: &str = "credential-encryption-key";

pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    pub fn from_key(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::config_invalid_value(
                "secrets.encryption_key",
                None,
                format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
            ));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::config_invalid_value("secrets.encryption_key", None, e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Resolve the key from config (inline, else keychain). Absence is fatal.
    pub fn from_config(config: &SecretsConfig) -> Result<Self> {
        let encoded = match (&config.encryption_key, config.keychain) {
            (Some(key), _) => key.trim().to_string(),
            (None, true) => read_keychain_key()?,
            (None, false) => {
                return Err(Error::config_missing_key("secrets.encryption_key", None)
                    .with_hint("Generate one with: head -c 32 /dev/urandom | base64")
                    .with_hint("Or set secrets.keychain = true and store it in the OS keychain"));
            }
        };

        let key = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            Error::config_invalid_value("secrets.encryption_key", None, e.to_string())
        })?;
        Self::from_key(&key)
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::vault_encrypt_failed(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(&combined))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let combined = STANDARD
            .decode(sealed)
            .map_err(|e| Error::vault_decrypt_failed(format!("base64: {}", e)))?;

        if combined.len() <= NONCE_LEN {
            return Err(Error::vault_decrypt_failed("sealed value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::vault_decrypt_failed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| Error::vault_decrypt_failed(e.to_string()))
    }
}

fn read_keychain_key() -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ENTRY).map_err(keyring_error)?;
    match entry.get_password() {
        Ok(key) => Ok(key),
        Err(keyring::Error::NoEntry) => Err(Error::config_missing_key(
            "secrets.encryption_key",
            Some(format!("keychain {}/{}", KEYCHAIN_SERVICE, KEYCHAIN_ENTRY)),
        )),
        Err(e) => Err(keyring_error(e)),
    }
}

fn keyring_error(err: keyring::Error) -> Error {
    Error::internal_unexpected(format!("Keychain error: {}", err))
}
