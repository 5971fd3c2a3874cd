//! Trust-on-first-use pinning of peer identities.
//!
//! A pin records the fingerprint of a peer's public key after the user has
//! compared it out of band. Status is never stored: it is recomputed from the
//! active pin and the key the peer currently advertises.

use cipherline_crypto::{PublicKey, constant_time_str_eq, encode_public_key, fingerprint};
use tracing::{debug, info};

use crate::storage::{Database, DatabaseError, PinnedIdentity};

/// Verification status of a peer's current key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Never pinned.
    Unverified,
    /// Matches the active pin.
    Verified,
    /// Differs from the active pin. Sending is blocked until re-pinned.
    Changed,
}

impl VerificationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
            Self::Changed => "changed",
        }
    }

    /// Derive the status from the active pin and the current fingerprint.
    pub fn derive(pin: Option<&PinnedIdentity>, current_fingerprint: &str) -> Self {
        match pin {
            None => Self::Unverified,
            Some(pin) if constant_time_str_eq(&pin.fingerprint, current_fingerprint) => {
                Self::Verified
            }
            Some(_) => Self::Changed,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust store errors.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Pinned identities per (owner, peer).
#[derive(Clone)]
pub struct TrustStore {
    db: Database,
}

impl TrustStore {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Pin `public_key` for `peer_id`. Only call after the user confirmed the
    /// fingerprint.
    ///
    /// Re-pinning the key that is already active returns the existing pin.
    pub async fn pin(
        &self,
        owner_id: &str,
        peer_id: &str,
        public_key: &PublicKey,
    ) -> Result<PinnedIdentity, TrustError> {
        let fp = fingerprint(public_key.as_bytes());

        if let Some(active) = self.db.active_pin(owner_id, peer_id).await? {
            if constant_time_str_eq(&active.fingerprint, &fp) {
                debug!(owner_id, peer_id, "Key already pinned");
                return Ok(active);
            }
        }

        let pin = self
            .db
            .replace_pin(owner_id, peer_id, &fp, &encode_public_key(public_key))
            .await?;
        info!(owner_id, peer_id, fingerprint = %fp, "Pinned peer identity");
        Ok(pin)
    }

    /// Status of `current_public_key` against the active pin.
    pub async fn status(
        &self,
        owner_id: &str,
        peer_id: &str,
        current_public_key: &PublicKey,
    ) -> Result<VerificationStatus, TrustError> {
        let pin = self.db.active_pin(owner_id, peer_id).await?;
        let current = fingerprint(current_public_key.as_bytes());
        Ok(VerificationStatus::derive(pin.as_ref(), &current))
    }

    pub async fn active_pin(
        &self,
        owner_id: &str,
        peer_id: &str,
    ) -> Result<Option<PinnedIdentity>, TrustError> {
        Ok(self.db.active_pin(owner_id, peer_id).await?)
    }

    /// All pins for the pair, superseded ones included, oldest first.
    pub async fn pin_history(
        &self,
        owner_id: &str,
        peer_id: &str,
    ) -> Result<Vec<PinnedIdentity>, TrustError> {
        Ok(self.db.pin_history(owner_id, peer_id).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cipherline_crypto::KeyPair;

    async fn store() -> TrustStore {
        TrustStore::new(Database::open_in_memory().await.unwrap())
    }

    fn key() -> PublicKey {
        *KeyPair::generate().unwrap().public_key()
    }

    #[tokio::test]
    async fn status_walks_through_tofu_transitions() {
        let trust = store().await;
        let k = key();
        let k2 = key();

        assert_eq!(
            trust.status("alice", "bob", &k).await.unwrap(),
            VerificationStatus::Unverified
        );

        trust.pin("alice", "bob", &k).await.unwrap();
        assert_eq!(
            trust.status("alice", "bob", &k).await.unwrap(),
            VerificationStatus::Verified
        );
        assert_eq!(
            trust.status("alice", "bob", &k2).await.unwrap(),
            VerificationStatus::Changed
        );

        trust.pin("alice", "bob", &k2).await.unwrap();
        assert_eq!(
            trust.status("alice", "bob", &k2).await.unwrap(),
            VerificationStatus::Verified
        );
        assert_eq!(
            trust.status("alice", "bob", &k).await.unwrap(),
            VerificationStatus::Changed
        );
    }

    #[tokio::test]
    async fn repin_keeps_history() {
        let trust = store().await;
        let k = key();
        let k2 = key();
        trust.pin("alice", "bob", &k).await.unwrap();
        trust.pin("alice", "bob", &k2).await.unwrap();

        let history = trust.pin_history("alice", "bob").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].fingerprint, fingerprint(k.as_bytes()));
        assert!(history[0].superseded_at.is_some());
        assert_eq!(history[1].public_key, encode_public_key(&k2));
        assert!(history[1].is_active());
    }

    #[tokio::test]
    async fn pinning_same_key_twice_is_idempotent() {
        let trust = store().await;
        let k = key();
        let first = trust.pin("alice", "bob", &k).await.unwrap();
        let second = trust.pin("alice", "bob", &k).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(trust.pin_history("alice", "bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pins_do_not_leak_between_owners() {
        let trust = store().await;
        let k = key();
        trust.pin("alice", "bob", &k).await.unwrap();
        assert_eq!(
            trust.status("carol", "bob", &k).await.unwrap(),
            VerificationStatus::Unverified
        );
        assert!(trust.active_pin("carol", "bob").await.unwrap().is_none());
    }

    #[test]
    fn derive_is_pure() {
        assert_eq!(
            VerificationStatus::derive(None, "aaaa"),
            VerificationStatus::Unverified
        );
        let pin = PinnedIdentity {
            id: 1,
            owner_id: "alice".into(),
            peer_id: "bob".into(),
            fingerprint: "aaaa".into(),
            public_key: String::new(),
            pinned_at: 0,
            superseded_at: None,
        };
        assert_eq!(
            VerificationStatus::derive(Some(&pin), "aaaa"),
            VerificationStatus::Verified
        );
        assert_eq!(
            VerificationStatus::derive(Some(&pin), "aaab"),
            VerificationStatus::Changed
        );
    }
}
