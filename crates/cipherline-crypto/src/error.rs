//! Crypto error types.

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("Invalid wrapped key length: expected {expected}, got {actual}")]
    InvalidWrappedKeyLength { expected: usize, actual: usize },

    #[error("Envelope must carry one or two wrapped keys, got {0}")]
    InvalidWrappedKeyCount(usize),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("KDF iteration count {actual} is below the minimum of {minimum}")]
    WeakKdfParameters { minimum: u32, actual: u32 },

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        Self::InvalidEncoding(e.to_string())
    }
}
