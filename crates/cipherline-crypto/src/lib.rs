//! Cipherline E2E Encryption Library
//!
//! Pure cryptographic building blocks for the messaging client. Nothing in
//! this crate holds state between calls.
//!
//! ## Crypto primitives
//!
//! - **Identity**: X25519 static keypair per user
//! - **Messages**: fresh ChaCha20-Poly1305 key + 12-byte random nonce per message,
//!   key wrapped per recipient via ephemeral X25519 ECDH → HKDF-SHA256
//! - **Vault**: PBKDF2-HMAC-SHA256 password derivation for sealing the identity at rest
//! - **Fingerprints**: truncated SHA-256 of the public key, plus randomart rendering

pub mod encoding;
pub mod error;
pub mod fingerprint;
pub mod hybrid;
pub mod kdf;
pub mod keypair;
pub mod sealed;
pub mod visual;

pub use encoding::{decode_public_key, encode_public_key, public_key_from_bytes};
pub use error::CryptoError;
pub use fingerprint::{constant_time_str_eq, fingerprint, verify_fingerprint};
pub use hybrid::{
    EncryptedEnvelope, NONCE_SIZE, WRAPPED_KEY_SIZE, WrappedKey, decrypt, encrypt_for_both,
    encrypt_for_recipient,
};
pub use kdf::{DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS, SALT_SIZE, WrappingKey};
pub use keypair::{KEY_SIZE, KeyPair};
pub use sealed::{SealedSecret, open_secret, seal_secret};
pub use visual::{compare_fingerprints, fingerprint_randomart, format_fingerprint_display};

pub use x25519_dalek::PublicKey;
