use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

use crate::core::error::{CacheError, Result};

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Stored as-is
    #[default]
    None,
    /// LZ4 - Fast compression/decompression
    Lz4,
    /// Zstandard - Better compression ratio
    Zstd,
}

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Enable compression of stored values
    pub enabled: bool,
    /// Minimum serialized size to compress (bytes)
    pub min_payload_size: usize,
    /// Algorithm used for new values
    pub default_algorithm: CompressionAlgorithm,
    /// Zstd compression level (1-22)
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_payload_size: 1024, // Don't compress < 1KB
            default_algorithm: CompressionAlgorithm::Lz4,
            zstd_level: 3, // Balanced compression
        }
    }
}

/// Compressor collaborator for the value path
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    /// Create new compressor with configuration
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress when the payload is large enough
    ///
    /// Returns the bytes to store and the algorithm that was applied
    /// (`None` when the input was passed through).
    pub fn compress(&self, data: &[u8]) -> Result<(Vec<u8>, CompressionAlgorithm)> {
        if !self.should_compress(data) {
            debug!("Skipping compression: size={} bytes", data.len());
            return Ok((data.to_vec(), CompressionAlgorithm::None));
        }

        let algo = self.config.default_algorithm;
        let compressed = match algo {
            CompressionAlgorithm::None => return Ok((data.to_vec(), algo)),
            CompressionAlgorithm::Lz4 => self.compress_lz4(data),
            CompressionAlgorithm::Zstd => self.compress_zstd(data),
        }
        .map_err(|e| CacheError::Compression(e.to_string()))?;

        debug!(
            "{:?} compressed: {} → {} bytes (ratio: {:.2}x)",
            algo,
            data.len(),
            compressed.len(),
            self.compression_ratio(data.len(), compressed.len())
        );

        Ok((compressed, algo))
    }

    /// Decompress data produced by `algorithm`
    pub fn decompress(&self, data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
        let result = match algorithm {
            CompressionAlgorithm::None => return Ok(data.to_vec()),
            CompressionAlgorithm::Lz4 => Self::decompress_lz4(data),
            CompressionAlgorithm::Zstd => zstd::decode_all(data),
        };

        let decompressed = result.map_err(|e| CacheError::Decompression(e.to_string()))?;
        debug!(
            "{:?} decompressed: {} → {} bytes",
            algorithm,
            data.len(),
            decompressed.len()
        );
        Ok(decompressed)
    }

    fn compress_lz4(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(4) // Fast compression
            .build(Vec::new())?;

        encoder.write_all(data)?;
        let (compressed, result) = encoder.finish();
        result?;
        Ok(compressed)
    }

    fn decompress_lz4(data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoder = lz4::Decoder::new(data)?;
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(decompressed)
    }

    fn compress_zstd(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        zstd::encode_all(data, self.config.zstd_level)
    }

    /// Calculate compression ratio
    pub fn compression_ratio(&self, original: usize, compressed: usize) -> f64 {
        if compressed == 0 {
            return 1.0;
        }
        original as f64 / compressed as f64
    }

    /// Whether a payload of this size crosses the compression threshold
    pub fn should_compress(&self, data: &[u8]) -> bool {
        self.config.enabled
            && self.config.default_algorithm != CompressionAlgorithm::None
            && data.len() >= self.config.min_payload_size
    }
}
