//! Password-sealed secrets.
//!
//! Derive-then-AEAD: PBKDF2 turns the password into a wrapping key, then
//! ChaCha20-Poly1305 seals the secret under a fresh nonce. The caller's
//! associated data (the owning user id) is authenticated so a package copied
//! to another identity refuses to open.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::hybrid::NONCE_SIZE;
use crate::kdf::{SALT_SIZE, derive_wrapping_key, generate_salt};

/// Everything needed to reopen a sealed secret given the password.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub iterations: u32,
}

impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecret")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl SealedSecret {
    /// Reassemble a package loaded from storage.
    pub fn from_parts(
        ciphertext: Vec<u8>,
        salt: &[u8],
        nonce: &[u8],
        iterations: u32,
    ) -> Result<Self, CryptoError> {
        let salt: [u8; SALT_SIZE] = salt.try_into().map_err(|_| {
            CryptoError::KeyDerivationFailed(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                salt.len()
            ))
        })?;
        let nonce: [u8; NONCE_SIZE] =
            nonce
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: nonce.len(),
                })?;
        Ok(Self {
            ciphertext,
            salt,
            nonce,
            iterations,
        })
    }
}

/// Seal `secret` under `password`.
pub fn seal_secret(
    secret: &[u8],
    password: &[u8],
    associated_data: &[u8],
    iterations: u32,
) -> Result<SealedSecret, CryptoError> {
    let salt = generate_salt();
    let wrapping_key = derive_wrapping_key(password, &salt, iterations)?;

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(wrapping_key.as_bytes()));
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: secret,
                aad: associated_data,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(SealedSecret {
        ciphertext,
        salt,
        nonce,
        iterations,
    })
}

/// Reopen a sealed secret. A wrong password, tampered bytes and a mismatched
/// `associated_data` all fail the same way.
pub fn open_secret(
    sealed: &SealedSecret,
    password: &[u8],
    associated_data: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let wrapping_key = derive_wrapping_key(password, &sealed.salt, sealed.iterations)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(wrapping_key.as_bytes()));
    cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad: associated_data,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed("sealed secret does not open".into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::kdf::MIN_KDF_ITERATIONS;

    const SECRET: [u8; 32] = [0x42; 32];

    #[test]
    fn opens_with_right_password() {
        let sealed = seal_secret(&SECRET, b"p1", b"alice", MIN_KDF_ITERATIONS).unwrap();
        assert_ne!(sealed.ciphertext[..32], SECRET);
        let opened = open_secret(&sealed, b"p1", b"alice").unwrap();
        assert_eq!(opened.as_slice(), SECRET);
    }

    #[test]
    fn wrong_password_fails() {
        let sealed = seal_secret(&SECRET, b"p1", b"alice", MIN_KDF_ITERATIONS).unwrap();
        assert!(matches!(
            open_secret(&sealed, b"p2", b"alice"),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn package_is_bound_to_owner() {
        let sealed = seal_secret(&SECRET, b"p1", b"alice", MIN_KDF_ITERATIONS).unwrap();
        assert!(open_secret(&sealed, b"p1", b"mallory").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut sealed = seal_secret(&SECRET, b"p1", b"alice", MIN_KDF_ITERATIONS).unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(open_secret(&sealed, b"p1", b"alice").is_err());
    }

    #[test]
    fn every_seal_uses_fresh_salt_and_nonce() {
        let a = seal_secret(&SECRET, b"p1", b"alice", MIN_KDF_ITERATIONS).unwrap();
        let b = seal_secret(&SECRET, b"p1", b"alice", MIN_KDF_ITERATIONS).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn from_parts_validates_lengths() {
        assert!(SealedSecret::from_parts(vec![0; 48], &[0; 8], &[0; NONCE_SIZE], 1_000).is_err());
        assert!(SealedSecret::from_parts(vec![0; 48], &[0; SALT_SIZE], &[0; 8], 1_000).is_err());
        assert!(
            SealedSecret::from_parts(vec![0; 48], &[0; SALT_SIZE], &[0; NONCE_SIZE], 1_000).is_ok()
        );
    }

    #[test]
    fn debug_does_not_dump_bytes() {
        let sealed = seal_secret(&SECRET, b"p1", b"alice", MIN_KDF_ITERATIONS).unwrap();
        let dbg = format!("{sealed:?}");
        assert!(dbg.contains("ciphertext_len"));
        assert!(!dbg.contains("66, 66"));
    }
}
