//! Encryption collaborator
//!
//! AEAD sealing of stored payloads. Keys are derived from a passphrase with
//! PBKDF2-SHA256 or Argon2 under a per-instance random salt; the salt, nonce
//! and authentication tag travel with the ciphertext in an [`Envelope`] so any
//! instance configured with the same passphrase can open it.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{self, AeadInPlace, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::core::error::{CacheError, Result};
use crate::core::types::Envelope;

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// Derived keys kept for foreign salts before the cache is flushed
const MAX_CACHED_KEYS: usize = 64;

/// AEAD cipher selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionAlgorithm {
    #[default]
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// Passphrase key-derivation scheme
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyDerivation {
    #[default]
    Pbkdf2,
    Argon2,
}

/// Encryption configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub algorithm: EncryptionAlgorithm,
    pub key_derivation: KeyDerivation,
    pub pbkdf2_iterations: u32,
    pub passphrase: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: EncryptionAlgorithm::Aes256Gcm,
            key_derivation: KeyDerivation::Pbkdf2,
            pbkdf2_iterations: 100_000,
            passphrase: String::new(),
        }
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("enabled", &self.enabled)
            .field("algorithm", &self.algorithm)
            .field("key_derivation", &self.key_derivation)
            .field("pbkdf2_iterations", &self.pbkdf2_iterations)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Ciphertext plus the parameters needed to open it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub envelope: Envelope,
}

/// Encryptor for stored payloads
pub struct Encryptor {
    config: EncryptionConfig,
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
    foreign_keys: Mutex<HashMap<Vec<u8>, [u8; KEY_LEN]>>,
}

impl Encryptor {
    /// Build an encryptor, deriving the instance key up front
    pub fn new(config: EncryptionConfig) -> Result<Self> {
        if config.passphrase.is_empty() {
            return Err(CacheError::InvalidConfig(
                "encryption passphrase must not be empty".to_string(),
            ));
        }
        if config.key_derivation == KeyDerivation::Pbkdf2 && config.pbkdf2_iterations == 0 {
            return Err(CacheError::InvalidConfig(
                "pbkdf2_iterations must be greater than 0".to_string(),
            ));
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(&config, &salt)?;

        debug!(
            "Encryptor ready: algorithm={:?}, kdf={:?}",
            config.algorithm, config.key_derivation
        );

        Ok(Self {
            config,
            salt,
            key,
            foreign_keys: Mutex::new(HashMap::new()),
        })
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.config.algorithm
    }

    /// Seal `plaintext` under a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let auth_tag = match self.config.algorithm {
            EncryptionAlgorithm::Aes256Gcm => seal::<Aes256Gcm>(&self.key, &iv, &mut buffer)?,
            EncryptionAlgorithm::ChaCha20Poly1305 => {
                seal::<ChaCha20Poly1305>(&self.key, &iv, &mut buffer)?
            }
        };

        Ok(Sealed {
            ciphertext: buffer,
            envelope: Envelope {
                iv: iv.to_vec(),
                salt: self.salt.to_vec(),
                auth_tag,
            },
        })
    }

    /// Open a sealed payload; any tampering fails authentication
    pub fn decrypt(&self, ciphertext: &[u8], envelope: &Envelope) -> Result<Vec<u8>> {
        if envelope.iv.len() != IV_LEN {
            return Err(CacheError::Decryption(format!(
                "invalid iv length {}",
                envelope.iv.len()
            )));
        }
        if envelope.auth_tag.len() != TAG_LEN {
            return Err(CacheError::Decryption(format!(
                "invalid auth tag length {}",
                envelope.auth_tag.len()
            )));
        }

        let key = self.key_for(&envelope.salt)?;
        let mut buffer = ciphertext.to_vec();
        match self.config.algorithm {
            EncryptionAlgorithm::Aes256Gcm => open::<Aes256Gcm>(&key, envelope, &mut buffer)?,
            EncryptionAlgorithm::ChaCha20Poly1305 => {
                open::<ChaCha20Poly1305>(&key, envelope, &mut buffer)?
            }
        }
        Ok(buffer)
    }

    fn key_for(&self, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
        if salt == self.salt.as_slice() {
            return Ok(self.key);
        }
        if salt.len() != SALT_LEN {
            return Err(CacheError::Decryption(format!(
                "invalid salt length {}",
                salt.len()
            )));
        }

        if let Some(key) = self.foreign_keys.lock().get(salt) {
            return Ok(*key);
        }

        let key = derive_key(&self.config, salt).map_err(|e| CacheError::Decryption(e.to_string()))?;
        let mut keys = self.foreign_keys.lock();
        if keys.len() >= MAX_CACHED_KEYS {
            keys.clear();
        }
        keys.insert(salt.to_vec(), key);
        Ok(key)
    }
}

fn derive_key(config: &EncryptionConfig, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    match config.key_derivation {
        KeyDerivation::Pbkdf2 => pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
            config.passphrase.as_bytes(),
            salt,
            config.pbkdf2_iterations,
            &mut key,
        ),
        KeyDerivation::Argon2 => argon2::Argon2::default()
            .hash_password_into(config.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CacheError::Encryption(format!("key derivation failed: {}", e)))?,
    }
    Ok(key)
}

fn seal<A: AeadInPlace + KeyInit>(key: &[u8], iv: &[u8], buffer: &mut Vec<u8>) -> Result<Vec<u8>> {
    let cipher = A::new_from_slice(key).map_err(|e| CacheError::Encryption(e.to_string()))?;
    let tag = cipher
        .encrypt_in_place_detached(aead::Nonce::<A>::from_slice(iv), b"", buffer)
        .map_err(|e| CacheError::Encryption(e.to_string()))?;
    Ok(tag.to_vec())
}

fn open<A: AeadInPlace + KeyInit>(key: &[u8], envelope: &Envelope, buffer: &mut Vec<u8>) -> Result<()> {
    let cipher = A::new_from_slice(key).map_err(|e| CacheError::Decryption(e.to_string()))?;
    cipher
        .decrypt_in_place_detached(
            aead::Nonce::<A>::from_slice(&envelope.iv),
            b"",
            buffer,
            aead::Tag::<A>::from_slice(&envelope.auth_tag),
        )
        .map_err(|_| CacheError::Decryption("authentication failed".to_string()))
}
