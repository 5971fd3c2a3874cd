//! Key vault: the identity secret at rest and in memory.
//!
//! At rest the secret is sealed under a password-derived key in the
//! `locked_keys` table. Unlocking yields an [`Arc<SessionKey>`] that the rest
//! of the client borrows; locking revokes it for every holder.
//!
//! ```text
//! Locked ──unlock()──> Unlocking ──ok──> Unlocked
//!   ^                      │                 │
//!   └──────────fail────────┘                 │
//!   └────────────── lock() / logout() ───────┘
//! ```

mod cache;
mod session_key;

pub use cache::{MemorySessionCache, RuntimeDirCache, SessionCache};
pub use session_key::SessionKey;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cipherline_core::config::{ResolvedSessionCache, VaultConfig};
use cipherline_crypto::encoding::{decode, encode};
use cipherline_crypto::{
    CryptoError, KeyPair, PublicKey, SealedSecret, open_secret, public_key_from_bytes,
    seal_secret,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::storage::{Database, DatabaseError, NewLockedKey};

/// Observable vault state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Locked,
    Unlocking,
    Unlocked,
}

impl VaultState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocking => "unlocking",
            Self::Unlocked => "unlocked",
        }
    }
}

impl std::fmt::Display for VaultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key vault errors.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Wrong password, missing package and corrupt package all look the same.
    #[error("Unable to unlock the vault")]
    UnlockFailed,

    #[error("Vault is locked")]
    Locked,

    #[error("Key generation failed: {0}")]
    KeyGeneration(#[source] CryptoError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Session cache error: {0}")]
    Cache(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Why an unlock failed. Logged locally, never returned.
#[derive(Debug, thiserror::Error)]
enum UnlockFailure {
    #[error("no sealed identity for this user")]
    Missing,
    #[error("storage: {0}")]
    Storage(DatabaseError),
    #[error("corrupt package: {0}")]
    Corrupt(String),
    #[error("package did not open: {0}")]
    Crypto(CryptoError),
    #[error("background task: {0}")]
    Task(String),
}

/// Resets the state to `Locked` unless disarmed, so an unlock that errors or
/// is dropped mid-flight never leaves the vault in `Unlocking`.
struct UnlockingGuard<'a> {
    state: &'a watch::Sender<VaultState>,
    armed: bool,
}

impl Drop for UnlockingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(VaultState::Locked);
        }
    }
}

/// Owns the identity secret for one local device.
pub struct KeyVault {
    db: Database,
    cache: Option<Arc<dyn SessionCache>>,
    kdf_iterations: u32,
    state: watch::Sender<VaultState>,
    current: Mutex<Option<Arc<SessionKey>>>,
    /// Serializes create/unlock/recover/lock/logout.
    transition: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl KeyVault {
    /// Create a vault without a session cache.
    pub fn new(db: Database, kdf_iterations: u32) -> Self {
        let (state, _) = watch::channel(VaultState::Locked);
        Self {
            db,
            cache: None,
            kdf_iterations,
            state,
            current: Mutex::new(None),
            transition: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a vault with the cache selected by `config`.
    pub fn from_config(db: Database, config: &VaultConfig) -> Self {
        Self::with_resolved_cache(db, config.kdf_iterations, config.resolved_session_cache())
    }

    pub fn with_resolved_cache(
        db: Database,
        kdf_iterations: u32,
        cache: ResolvedSessionCache,
    ) -> Self {
        let vault = Self::new(db, kdf_iterations);
        match cache {
            ResolvedSessionCache::Disabled => vault,
            ResolvedSessionCache::Memory => {
                vault.with_session_cache(Arc::new(MemorySessionCache::new()))
            }
            ResolvedSessionCache::RuntimeDir(dir) => {
                vault.with_session_cache(Arc::new(RuntimeDirCache::new(dir)))
            }
        }
    }

    #[must_use]
    pub fn with_session_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn state(&self) -> VaultState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<VaultState> {
        self.state.subscribe()
    }

    /// The current session key, if unlocked.
    pub fn session_key(&self) -> Option<Arc<SessionKey>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn has_identity(&self, user_id: &str) -> Result<bool, VaultError> {
        Ok(self.db.get_locked_key(user_id).await?.is_some())
    }

    /// Public half of a sealed identity. Readable while locked.
    pub async fn identity_public_key(&self, user_id: &str) -> Result<Option<PublicKey>, VaultError> {
        match self.db.get_locked_key(user_id).await? {
            Some(package) => Ok(Some(public_key_from_bytes(&package.public_key)?)),
            None => Ok(None),
        }
    }

    /// Generate a fresh identity and seal it. Returns the public key.
    pub async fn generate_identity(
        &self,
        user_id: &str,
        password: &str,
    ) -> Result<PublicKey, VaultError> {
        let key_pair = tokio::task::spawn_blocking(KeyPair::generate)
            .await
            .map_err(|e| VaultError::Task(e.to_string()))?
            .map_err(VaultError::KeyGeneration)?;
        self.create(user_id, password, &key_pair).await?;
        Ok(*key_pair.public_key())
    }

    /// Seal `key_pair` under `password`, replacing any existing package for
    /// `user_id`. A live session for the same user is locked first.
    pub async fn create(
        &self,
        user_id: &str,
        password: &str,
        key_pair: &KeyPair,
    ) -> Result<(), VaultError> {
        let _transition = self.transition.lock().await;
        if self
            .session_key()
            .is_some_and(|key| key.user_id() == user_id)
        {
            self.lock_inner();
        }

        let secret = key_pair.secret_bytes();
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let aad = user_id.as_bytes().to_vec();
        let iterations = self.kdf_iterations;
        let sealed = tokio::task::spawn_blocking(move || {
            seal_secret(secret.as_slice(), &password, &aad, iterations)
        })
        .await
        .map_err(|e| VaultError::Task(e.to_string()))??;

        self.db
            .upsert_locked_key(&NewLockedKey {
                user_id,
                public_key: key_pair.public_key().as_bytes(),
                ciphertext: &sealed.ciphertext,
                salt: &sealed.salt,
                iv: &sealed.nonce,
                kdf_iterations: sealed.iterations,
            })
            .await?;

        info!(user_id, iterations, "Identity sealed");
        Ok(())
    }

    /// Unlock with `password`. Any failure is reported as
    /// [`VaultError::UnlockFailed`] and leaves the vault `Locked`.
    pub async fn unlock(&self, user_id: &str, password: &str) -> Result<Arc<SessionKey>, VaultError> {
        let _transition = self.transition.lock().await;
        self.lock_inner();

        self.state.send_replace(VaultState::Unlocking);
        let mut guard = UnlockingGuard {
            state: &self.state,
            armed: true,
        };

        match self.open_package(user_id, password).await {
            Ok(key_pair) => {
                guard.armed = false;
                Ok(self.install(user_id, key_pair))
            }
            Err(UnlockFailure::Missing) => {
                debug!(user_id, "Vault unlock failed: no sealed identity");
                Err(VaultError::UnlockFailed)
            }
            Err(reason) => {
                warn!(user_id, %reason, "Vault unlock failed");
                Err(VaultError::UnlockFailed)
            }
        }
    }

    async fn open_package(&self, user_id: &str, password: &str) -> Result<KeyPair, UnlockFailure> {
        let package = self
            .db
            .get_locked_key(user_id)
            .await
            .map_err(UnlockFailure::Storage)?
            .ok_or(UnlockFailure::Missing)?;

        let iterations = u32::try_from(package.kdf_iterations)
            .map_err(|_| UnlockFailure::Corrupt("iteration count out of range".into()))?;
        let sealed =
            SealedSecret::from_parts(package.ciphertext, &package.salt, &package.iv, iterations)
                .map_err(|e| UnlockFailure::Corrupt(e.to_string()))?;

        let password = Zeroizing::new(password.as_bytes().to_vec());
        let aad = user_id.as_bytes().to_vec();
        let key_pair = tokio::task::spawn_blocking(move || {
            let secret = open_secret(&sealed, &password, &aad)?;
            KeyPair::from_secret_bytes(&secret)
        })
        .await
        .map_err(|e| UnlockFailure::Task(e.to_string()))?
        .map_err(UnlockFailure::Crypto)?;

        if key_pair.public_bytes().as_slice() != package.public_key.as_slice() {
            return Err(UnlockFailure::Corrupt(
                "secret does not match stored public key".into(),
            ));
        }
        Ok(key_pair)
    }

    fn install(&self, user_id: &str, key_pair: KeyPair) -> Arc<SessionKey> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let key = Arc::new(SessionKey::new(generation, user_id, key_pair));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&key));
        self.state.send_replace(VaultState::Unlocked);
        info!(user_id, generation, "Vault unlocked");

        if let Err(e) = self.cache_session_key() {
            warn!(user_id, error = %e, "Failed to cache session key");
        }
        key
    }

    /// Mirror the current session key into the session cache.
    ///
    /// A no-op when no cache is configured.
    pub fn cache_session_key(&self) -> Result<(), VaultError> {
        let key = self.session_key().ok_or(VaultError::Locked)?;
        let Some(cache) = &self.cache else {
            debug!("No session cache configured");
            return Ok(());
        };
        let encoded = key.export()?;
        cache.store(key.user_id(), &encoded)
    }

    /// Restore a session from the session cache without the password.
    ///
    /// Returns `None` when nothing usable is cached. An unusable entry
    /// (unreadable, malformed or not matching the sealed identity) is cleared
    /// and the vault stays `Locked`.
    pub async fn recover_session_key(
        &self,
        user_id: &str,
    ) -> Result<Option<Arc<SessionKey>>, VaultError> {
        let Some(cache) = self.cache.clone() else {
            return Ok(None);
        };
        let _transition = self.transition.lock().await;

        if let Some(key) = self.session_key() {
            if key.user_id() == user_id {
                return Ok(Some(key));
            }
        }
        self.lock_inner();

        let encoded = match cache.load(user_id) {
            Ok(Some(encoded)) => encoded,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(user_id, error = %e, "Session cache unreadable");
                Self::discard_cache_entry(cache.as_ref(), user_id);
                return Ok(None);
            }
        };

        let expected_public = self
            .db
            .get_locked_key(user_id)
            .await?
            .map(|package| package.public_key);

        let recovered = decode(&encoded)
            .map(Zeroizing::new)
            .and_then(|secret| KeyPair::from_secret_bytes(&secret));

        match (recovered, expected_public) {
            (Ok(key_pair), Some(expected))
                if key_pair.public_bytes().as_slice() == expected.as_slice() =>
            {
                debug!(user_id, "Session key recovered from cache");
                Ok(Some(self.install(user_id, key_pair)))
            }
            (Ok(_), None) => {
                warn!(user_id, "Cached session key has no sealed identity; discarding");
                Self::discard_cache_entry(cache.as_ref(), user_id);
                Ok(None)
            }
            (Ok(_), Some(_)) => {
                warn!(user_id, "Cached session key does not match sealed identity; discarding");
                Self::discard_cache_entry(cache.as_ref(), user_id);
                Ok(None)
            }
            (Err(e), _) => {
                warn!(user_id, error = %e, "Cached session key is malformed; discarding");
                Self::discard_cache_entry(cache.as_ref(), user_id);
                Ok(None)
            }
        }
    }

    fn discard_cache_entry(cache: &dyn SessionCache, user_id: &str) {
        if let Err(e) = cache.clear(user_id) {
            warn!(user_id, error = %e, "Failed to clear session cache entry");
        }
    }

    /// Revoke the session key and clear its cache entry.
    pub async fn lock(&self) {
        let _transition = self.transition.lock().await;
        self.lock_inner();
    }

    fn lock_inner(&self) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(key) = previous {
            key.revoke();
            if let Some(cache) = &self.cache {
                Self::discard_cache_entry(cache.as_ref(), key.user_id());
            }
            info!(user_id = key.user_id(), generation = key.generation(), "Vault locked");
        }
        self.state.send_if_modified(|state| {
            let changed = *state != VaultState::Locked;
            *state = VaultState::Locked;
            changed
        });
    }

    /// Lock and destroy the sealed identity for `user_id`.
    pub async fn logout(&self, user_id: &str) -> Result<(), VaultError> {
        let _transition = self.transition.lock().await;
        self.lock_inner();
        if let Some(cache) = &self.cache {
            Self::discard_cache_entry(cache.as_ref(), user_id);
        }
        let removed = self.db.delete_locked_key(user_id).await?;
        info!(user_id, removed, "Logged out");
        Ok(())
    }
}
