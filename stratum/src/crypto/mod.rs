pub mod encryptor;

pub use encryptor::{EncryptionAlgorithm, EncryptionConfig, Encryptor, KeyDerivation, Sealed};
