use std::time::Duration;
use thiserror::Error;

/// Broad failure class of a [`CacheError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Backend transport, IO or timeout failure
    Backend,
    /// Serialization, compression or encryption failure
    Codec,
    /// Invalid configuration rejected at construction time
    Config,
    /// A subscriber callback failed during fan-out
    Listener,
    /// Broken internal invariant
    Internal,
}

/// Main error type for Stratum operations
///
/// Absence is never an error: a key that is missing or expired in every tier
/// comes back as an absent [`CacheResult`](super::CacheResult).
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend call timed out after {0:?}")]
    BackendTimeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Listener failed: {0}")]
    Listener(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(_) | Self::BackendTimeout(_) => ErrorKind::Backend,
            Self::Serialization(_)
            | Self::Compression(_)
            | Self::Decompression(_)
            | Self::Encryption(_)
            | Self::Decryption(_) => ErrorKind::Codec,
            Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Listener(_) => ErrorKind::Listener,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the durable tier could not be checked or written
    pub fn is_backend(&self) -> bool {
        self.kind() == ErrorKind::Backend
    }

    /// True when a stored value is corrupted or could not be encoded
    pub fn is_codec(&self) -> bool {
        self.kind() == ErrorKind::Codec
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Result type alias for Stratum operations
pub type Result<T> = std::result::Result<T, CacheError>;
