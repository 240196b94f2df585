//! Value path between application values and stored payloads
//!
//! encode: MessagePack → compress above threshold → seal (if enabled)
//! decode: open → decompress → MessagePack

use tracing::debug;

use crate::compression::{CompressionConfig, Compressor};
use crate::core::error::{CacheError, Result};
use crate::core::types::{CacheValue, Payload};
use crate::crypto::{EncryptionConfig, Encryptor};

/// Codec applied uniformly to every value written through the coordinator
pub struct ValueCodec {
    compressor: Compressor,
    encryptor: Option<Encryptor>,
}

impl ValueCodec {
    pub fn new(compression: CompressionConfig, encryption: EncryptionConfig) -> Result<Self> {
        let encryptor = if encryption.enabled {
            Some(Encryptor::new(encryption)?)
        } else {
            None
        };

        Ok(Self {
            compressor: Compressor::new(compression),
            encryptor,
        })
    }

    /// Codec that stores plain MessagePack, for tests and tooling
    pub fn passthrough() -> Self {
        Self {
            compressor: Compressor::new(CompressionConfig {
                enabled: false,
                ..Default::default()
            }),
            encryptor: None,
        }
    }

    pub fn encrypts(&self) -> bool {
        self.encryptor.is_some()
    }

    pub fn encode(&self, value: &CacheValue) -> Result<Payload> {
        let serialized =
            rmp_serde::to_vec_named(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let (data, compression) = self.compressor.compress(&serialized)?;

        let payload = match &self.encryptor {
            Some(encryptor) => {
                let sealed = encryptor.encrypt(&data)?;
                Payload {
                    data: sealed.ciphertext,
                    compression,
                    envelope: Some(sealed.envelope),
                }
            }
            None => Payload {
                data,
                compression,
                envelope: None,
            },
        };

        debug!(
            "Encoded {} value: {} → {} bytes (compression={:?}, encrypted={})",
            value.kind(),
            serialized.len(),
            payload.size_bytes(),
            payload.compression,
            payload.is_encrypted()
        );
        Ok(payload)
    }

    /// Decode a stored payload; corrupted or tampered data is an error,
    /// never a partial value
    pub fn decode(&self, payload: &Payload) -> Result<CacheValue> {
        let opened = match (&payload.envelope, &self.encryptor) {
            (Some(envelope), Some(encryptor)) => encryptor.decrypt(&payload.data, envelope)?,
            (Some(_), None) => {
                return Err(CacheError::Decryption(
                    "payload is encrypted but encryption is disabled".to_string(),
                ));
            }
            (None, _) => payload.data.clone(),
        };

        let serialized = self.compressor.decompress(&opened, payload.compression)?;
        rmp_serde::from_slice(&serialized).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}
