//! Hybrid message encryption.
//!
//! Each message gets a fresh random 256-bit content key and a fresh 96-bit
//! nonce; the body is sealed with ChaCha20-Poly1305 under that key. The
//! content key is then wrapped once per recipient public key:
//!
//! ```text
//! wrapped = ephemeral_public (32) || wrap_nonce (12) || AEAD(content_key) (48)
//! wrap_key = HKDF-SHA256(salt = WRAP_SALT,
//!                        ikm  = X25519(ephemeral_secret, recipient_public),
//!                        info = WRAP_INFO || ephemeral_public || recipient_public)
//! ```
//!
//! Sent messages carry two wraps of the same content key, one for the
//! recipient and one for the sender, so the sender can read their own history.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::encoding::{self, public_key_from_bytes};
use crate::error::CryptoError;
use crate::keypair::{KEY_SIZE, KeyPair};

/// HKDF salt for key-wrapping domain separation.
const WRAP_SALT: &[u8] = b"cipherline-key-wrap-salt-v1";

/// HKDF info prefix for key wrapping.
const WRAP_INFO: &[u8] = b"cipherline-key-wrap-v1";

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Size of the per-message content key.
pub const CONTENT_KEY_SIZE: usize = 32;

/// Poly1305 tag size.
const TAG_SIZE: usize = 16;

/// Size of one wrapped content key.
pub const WRAPPED_KEY_SIZE: usize = KEY_SIZE + NONCE_SIZE + CONTENT_KEY_SIZE + TAG_SIZE;

/// Most wrapped copies an envelope may carry (recipient and sender).
pub const MAX_WRAPPED_KEYS: usize = 2;

/// A content key sealed to one recipient's public key.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey([u8; WRAPPED_KEY_SIZE]);

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WrappedKey")
            .field(&hex::encode(&self.0[..KEY_SIZE]))
            .finish()
    }
}

impl WrappedKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidWrappedKeyLength {
                expected: WRAPPED_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    pub fn from_base64(input: &str) -> Result<Self, CryptoError> {
        Self::from_bytes(&encoding::decode(input)?)
    }

    pub const fn as_bytes(&self) -> &[u8; WRAPPED_KEY_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        encoding::encode(&self.0)
    }

    fn ephemeral_public(&self) -> Result<PublicKey, CryptoError> {
        public_key_from_bytes(&self.0[..KEY_SIZE])
    }

    fn nonce(&self) -> &[u8] {
        &self.0[KEY_SIZE..KEY_SIZE + NONCE_SIZE]
    }

    fn sealed_key(&self) -> &[u8] {
        &self.0[KEY_SIZE + NONCE_SIZE..]
    }
}

/// Ciphertext plus everything a recipient needs to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// ChaCha20-Poly1305 ciphertext (includes the 16-byte tag).
    pub ciphertext: Vec<u8>,
    /// Nonce used for the body.
    pub nonce: [u8; NONCE_SIZE],
    wrapped_keys: Vec<WrappedKey>,
}

impl EncryptedEnvelope {
    /// Assemble an envelope received from the wire.
    pub fn new(
        ciphertext: Vec<u8>,
        nonce: &[u8],
        wrapped_keys: Vec<WrappedKey>,
    ) -> Result<Self, CryptoError> {
        let nonce: [u8; NONCE_SIZE] =
            nonce
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: nonce.len(),
                })?;
        if wrapped_keys.is_empty() || wrapped_keys.len() > MAX_WRAPPED_KEYS {
            return Err(CryptoError::InvalidWrappedKeyCount(wrapped_keys.len()));
        }
        Ok(Self {
            ciphertext,
            nonce,
            wrapped_keys,
        })
    }

    pub fn wrapped_keys(&self) -> &[WrappedKey] {
        &self.wrapped_keys
    }

    /// The copy wrapped for the message recipient.
    pub fn recipient_key(&self) -> &WrappedKey {
        &self.wrapped_keys[0]
    }

    /// The copy wrapped for the sender, present on dual-wrapped envelopes.
    pub fn sender_key(&self) -> Option<&WrappedKey> {
        self.wrapped_keys.get(1)
    }
}

fn random_array<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Derive the key-wrapping key for one (ephemeral, recipient) pair.
fn derive_wrap_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &PublicKey,
    recipient_public: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(WRAP_SALT), shared_secret);
    let mut info = Vec::with_capacity(WRAP_INFO.len() + 2 * KEY_SIZE);
    info.extend_from_slice(WRAP_INFO);
    info.extend_from_slice(ephemeral_public.as_bytes());
    info.extend_from_slice(recipient_public.as_bytes());

    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(&info, key.as_mut_slice())
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

fn wrap_content_key(
    content_key: &[u8; CONTENT_KEY_SIZE],
    recipient: &PublicKey,
) -> Result<WrappedKey, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::EncryptionFailed(
            "recipient public key is a low-order point".into(),
        ));
    }

    let wrap_key = derive_wrap_key(shared.as_bytes(), &ephemeral_public, recipient)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(wrap_key.as_slice()));
    let wrap_nonce: [u8; NONCE_SIZE] = random_array();
    let sealed = cipher
        .encrypt(Nonce::from_slice(&wrap_nonce), content_key.as_slice())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = [0u8; WRAPPED_KEY_SIZE];
    out[..KEY_SIZE].copy_from_slice(ephemeral_public.as_bytes());
    out[KEY_SIZE..KEY_SIZE + NONCE_SIZE].copy_from_slice(&wrap_nonce);
    out[KEY_SIZE + NONCE_SIZE..].copy_from_slice(&sealed);
    Ok(WrappedKey(out))
}

fn unwrap_content_key(
    wrapped: &WrappedKey,
    key_pair: &KeyPair,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let ephemeral_public = wrapped.ephemeral_public()?;
    let shared = key_pair.secret().diffie_hellman(&ephemeral_public);
    let wrap_key = derive_wrap_key(shared.as_bytes(), &ephemeral_public, key_pair.public_key())?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(wrap_key.as_slice()));
    cipher
        .decrypt(Nonce::from_slice(wrapped.nonce()), wrapped.sealed_key())
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::DecryptionFailed("wrapped key does not open".into()))
}

fn seal(plaintext: &[u8], recipients: &[&PublicKey]) -> Result<EncryptedEnvelope, CryptoError> {
    let content_key = Zeroizing::new(random_array::<CONTENT_KEY_SIZE>());
    let nonce: [u8; NONCE_SIZE] = random_array();

    let cipher = ChaCha20Poly1305::new(Key::from_slice(content_key.as_slice()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let wrapped_keys = recipients
        .iter()
        .map(|recipient| wrap_content_key(&content_key, recipient))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EncryptedEnvelope {
        ciphertext,
        nonce,
        wrapped_keys,
    })
}

/// Encrypt `plaintext` so that only the holder of `recipient`'s secret can
/// read it.
pub fn encrypt_for_recipient(
    plaintext: &[u8],
    recipient: &PublicKey,
) -> Result<EncryptedEnvelope, CryptoError> {
    seal(plaintext, &[recipient])
}

/// Encrypt `plaintext` once and wrap the content key for both the recipient
/// and the sender.
pub fn encrypt_for_both(
    plaintext: &[u8],
    recipient: &PublicKey,
    sender: &PublicKey,
) -> Result<EncryptedEnvelope, CryptoError> {
    seal(plaintext, &[recipient, sender])
}

/// Open an envelope with `key_pair`.
///
/// Every wrapped copy is tried in turn; copies addressed to other keys fail
/// authentication and are skipped.
pub fn decrypt(envelope: &EncryptedEnvelope, key_pair: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    let content_key = envelope
        .wrapped_keys
        .iter()
        .find_map(|wrapped| unwrap_content_key(wrapped, key_pair).ok())
        .ok_or_else(|| {
            CryptoError::DecryptionFailed("no wrapped key opens with this private key".into())
        })?;
    if content_key.len() != CONTENT_KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: CONTENT_KEY_SIZE,
            actual: content_key.len(),
        });
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(content_key.as_slice()));
    cipher
        .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key_pair() -> KeyPair {
        KeyPair::generate().unwrap()
    }

    #[test]
    fn recipient_roundtrip() {
        let bob = key_pair();
        let envelope = encrypt_for_recipient(b"hello bob", bob.public_key()).unwrap();

        assert_eq!(envelope.wrapped_keys().len(), 1);
        assert!(envelope.sender_key().is_none());
        assert_eq!(decrypt(&envelope, &bob).unwrap(), b"hello bob");
    }

    #[test]
    fn both_parties_can_open_dual_envelope() {
        let alice = key_pair();
        let bob = key_pair();
        let envelope =
            encrypt_for_both(b"hello", bob.public_key(), alice.public_key()).unwrap();

        assert_eq!(envelope.wrapped_keys().len(), 2);
        assert_ne!(envelope.recipient_key(), envelope.sender_key().unwrap());
        assert_eq!(decrypt(&envelope, &bob).unwrap(), b"hello");
        assert_eq!(decrypt(&envelope, &alice).unwrap(), b"hello");
    }

    #[test]
    fn third_party_cannot_open() {
        let alice = key_pair();
        let bob = key_pair();
        let eve = key_pair();
        let envelope =
            encrypt_for_both(b"secret", bob.public_key(), alice.public_key()).unwrap();

        assert!(matches!(
            decrypt(&envelope, &eve),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn repeated_encryption_is_fresh() {
        let bob = key_pair();
        let a = encrypt_for_recipient(b"same", bob.public_key()).unwrap();
        let b = encrypt_for_recipient(b"same", bob.public_key()).unwrap();

        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.recipient_key(), b.recipient_key());
    }

    #[test]
    fn nonces_never_repeat() {
        let bob = key_pair();
        let mut nonces = std::collections::HashSet::new();
        for _ in 0..500 {
            let envelope = encrypt_for_recipient(b"x", bob.public_key()).unwrap();
            assert!(nonces.insert(envelope.nonce), "nonce collision detected");
        }
    }

    #[test]
    fn empty_and_large_payloads_roundtrip() {
        let bob = key_pair();
        let empty = encrypt_for_recipient(b"", bob.public_key()).unwrap();
        assert!(decrypt(&empty, &bob).unwrap().is_empty());

        let big = vec![0xABu8; 1024 * 1024];
        let envelope = encrypt_for_recipient(&big, bob.public_key()).unwrap();
        assert_eq!(decrypt(&envelope, &bob).unwrap(), big);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let bob = key_pair();
        let mut envelope = encrypt_for_recipient(b"secret data", bob.public_key()).unwrap();
        envelope.ciphertext[0] ^= 0xFF;
        assert!(matches!(
            decrypt(&envelope, &bob),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn tampered_nonce_is_rejected() {
        let bob = key_pair();
        let mut envelope = encrypt_for_recipient(b"secret data", bob.public_key()).unwrap();
        envelope.nonce[0] ^= 0x01;
        assert!(decrypt(&envelope, &bob).is_err());
    }

    #[test]
    fn tampered_wrapped_key_is_rejected() {
        let bob = key_pair();
        let envelope = encrypt_for_recipient(b"secret data", bob.public_key()).unwrap();
        let mut raw = *envelope.recipient_key().as_bytes();
        raw[WRAPPED_KEY_SIZE - 1] ^= 0x01;
        let tampered = EncryptedEnvelope::new(
            envelope.ciphertext.clone(),
            &envelope.nonce,
            vec![WrappedKey::from_bytes(&raw).unwrap()],
        )
        .unwrap();
        assert!(matches!(
            decrypt(&tampered, &bob),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn sender_copy_alone_opens_for_sender() {
        let alice = key_pair();
        let bob = key_pair();
        let envelope =
            encrypt_for_both(b"history", bob.public_key(), alice.public_key()).unwrap();

        let sender_only = EncryptedEnvelope::new(
            envelope.ciphertext.clone(),
            &envelope.nonce,
            vec![envelope.sender_key().unwrap().clone()],
        )
        .unwrap();
        assert_eq!(decrypt(&sender_only, &alice).unwrap(), b"history");
        assert!(decrypt(&sender_only, &bob).is_err());
    }

    #[test]
    fn low_order_recipient_key_is_refused() {
        let zero = PublicKey::from([0u8; 32]);
        assert!(matches!(
            encrypt_for_recipient(b"x", &zero),
            Err(CryptoError::EncryptionFailed(_))
        ));
    }

    #[test]
    fn envelope_validates_shape() {
        let bob = key_pair();
        let envelope = encrypt_for_recipient(b"x", bob.public_key()).unwrap();
        let wrapped = envelope.recipient_key().clone();

        assert!(matches!(
            EncryptedEnvelope::new(vec![1], &[0u8; 8], vec![wrapped.clone()]),
            Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: 8
            })
        ));
        assert!(matches!(
            EncryptedEnvelope::new(vec![1], &[0u8; NONCE_SIZE], vec![]),
            Err(CryptoError::InvalidWrappedKeyCount(0))
        ));
        assert!(matches!(
            EncryptedEnvelope::new(
                vec![1],
                &[0u8; NONCE_SIZE],
                vec![wrapped.clone(), wrapped.clone(), wrapped]
            ),
            Err(CryptoError::InvalidWrappedKeyCount(3))
        ));
    }

    #[test]
    fn wrapped_key_rejects_wrong_length() {
        assert!(matches!(
            WrappedKey::from_bytes(&[0u8; 10]),
            Err(CryptoError::InvalidWrappedKeyLength {
                expected: WRAPPED_KEY_SIZE,
                actual: 10
            })
        ));
    }

    #[test]
    fn wrapped_key_survives_base64() {
        let bob = key_pair();
        let envelope = encrypt_for_recipient(b"x", bob.public_key()).unwrap();
        let encoded = envelope.recipient_key().to_base64();
        assert_eq!(
            &WrappedKey::from_base64(&encoded).unwrap(),
            envelope.recipient_key()
        );
    }
}
