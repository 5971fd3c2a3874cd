//! Identity keypair management.
//!
//! Each user identity owns one long-lived X25519 keypair. The public half is
//! published to peers; the secret half is handed to the key vault right after
//! generation and only leaves it wrapped under a password-derived key.

use rand::RngCore;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::encoding::encode_public_key;
use crate::error::CryptoError;
use crate::fingerprint::fingerprint;

/// Size of an X25519 secret or public key in bytes.
pub const KEY_SIZE: usize = 32;

/// An X25519 identity keypair.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random identity keypair.
    ///
    /// Fails only when the operating system cannot supply randomness.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng
            .try_fill_bytes(&mut *bytes)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        Ok(Self::from_array(*bytes))
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(bytes);
        let kp = Self::from_array(arr);
        arr.zeroize();
        Ok(kp)
    }

    fn from_array(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the public key.
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Get the public key as raw bytes.
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Get the public key in its portable base64 form.
    pub fn public_key_base64(&self) -> String {
        encode_public_key(&self.public)
    }

    /// Get the secret key as raw bytes. Handle with care.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Get the secret key reference for ECDH.
    pub(crate) const fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Short human-comparable fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.public.as_bytes())
    }
}
