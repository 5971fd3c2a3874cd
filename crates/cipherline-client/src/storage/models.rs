//! Database models for the Cipherline client.

use serde::{Deserialize, Serialize};

/// A password-sealed identity secret, keyed by user id.
#[derive(Clone, sqlx::FromRow)]
pub struct LockedKeyPackage {
    pub user_id: String,
    /// Raw 32-byte public half, readable without the password.
    pub public_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
    pub kdf_iterations: i64,
    pub created_at: i64,
}

impl std::fmt::Debug for LockedKeyPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedKeyPackage")
            .field("user_id", &self.user_id)
            .field("kdf_iterations", &self.kdf_iterations)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// A trust record for one (owner, peer) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PinnedIdentity {
    pub id: i64,
    pub owner_id: String,
    pub peer_id: String,
    pub fingerprint: String,
    /// Base64 of the pinned public key.
    pub public_key: String,
    pub pinned_at: i64,
    pub superseded_at: Option<i64>,
}

impl PinnedIdentity {
    pub const fn is_active(&self) -> bool {
        self.superseded_at.is_none()
    }
}
