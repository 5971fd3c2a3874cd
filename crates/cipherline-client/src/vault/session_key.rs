//! The unlocked identity as a revocable capability.

use std::sync::{PoisonError, RwLock};

use cipherline_crypto::encoding::encode;
use cipherline_crypto::{KeyPair, PublicKey};
use zeroize::Zeroizing;

use super::VaultError;

/// The decrypted identity key of an unlocked session.
///
/// Handed out as `Arc<SessionKey>`. [`SessionKey::revoke`] drops the key
/// material for every holder at once; later use fails with
/// [`VaultError::Locked`]. A use already in progress holds the read lock, so
/// revocation waits for it to finish.
pub struct SessionKey {
    generation: u64,
    user_id: String,
    public: PublicKey,
    key_pair: RwLock<Option<KeyPair>>,
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("generation", &self.generation)
            .field("user_id", &self.user_id)
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}

impl SessionKey {
    pub(crate) fn new(generation: u64, user_id: &str, key_pair: KeyPair) -> Self {
        Self {
            generation,
            user_id: user_id.to_string(),
            public: *key_pair.public_key(),
            key_pair: RwLock::new(Some(key_pair)),
        }
    }

    /// Monotonic counter, bumped on every unlock.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Public half. Stays readable after revocation.
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn is_revoked(&self) -> bool {
        self.key_pair
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Run `f` with the key pair, unless revoked.
    pub fn with_key_pair<R>(&self, f: impl FnOnce(&KeyPair) -> R) -> Result<R, VaultError> {
        let guard = self.key_pair.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f).ok_or(VaultError::Locked)
    }

    /// Drop the key material. Idempotent.
    pub fn revoke(&self) {
        let taken = self
            .key_pair
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // StaticSecret zeroizes itself on drop.
        drop(taken);
    }

    /// Portable encoding of the secret for the session cache.
    pub(crate) fn export(&self) -> Result<Zeroizing<String>, VaultError> {
        self.with_key_pair(|kp| Zeroizing::new(encode(kp.secret_bytes().as_slice())))
    }
}
