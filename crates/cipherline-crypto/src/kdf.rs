//! Password-based key derivation for the key vault.
//!
//! PBKDF2-HMAC-SHA256 turns a password and a random salt into the 32-byte
//! wrapping key that seals the identity secret at rest. The iteration count is
//! stored next to every sealed package so older packages stay unlockable after
//! the default is raised.

use hmac::Hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Salt length for password derivation.
pub const SALT_SIZE: usize = 16;

/// Default PBKDF2 round count for newly sealed packages.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Lowest round count accepted at all. Anything below the default is only
/// meant for tests.
pub const MIN_KDF_ITERATIONS: u32 = 1_000;

/// 32-byte wrapping key derived from a password. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct WrappingKey([u8; 32]);

impl WrappingKey {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive a wrapping key from `password` and `salt`.
///
/// Deliberately slow; callers on an async runtime should run this on a
/// blocking thread.
pub fn derive_wrapping_key(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<WrappingKey, CryptoError> {
    if iterations < MIN_KDF_ITERATIONS {
        return Err(CryptoError::WeakKdfParameters {
            minimum: MIN_KDF_ITERATIONS,
            actual: iterations,
        });
    }
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::KeyDerivationFailed(format!(
            "salt must be {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }

    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut output)
        .map_err(|e| CryptoError::KeyDerivationFailed(format!("PBKDF2-HMAC-SHA256 failed: {e}")))?;
    Ok(WrappingKey(output))
}

/// Generate a fresh random salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}
