//! Client error taxonomy.
//!
//! Component errors ([`VaultError`], [`TrustError`], [`SendError`]) convert
//! into [`ClientError`] at the crate boundary.

use cipherline_crypto::CryptoError;

use crate::session::{SendError, TransportError};
use crate::storage::DatabaseError;
use crate::trust::TrustError;
use crate::vault::VaultError;

/// Errors surfaced to the host application.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No identity can be created. Fatal for signup.
    #[error("Key generation failed: {0}")]
    KeyGeneration(#[source] CryptoError),

    /// Re-prompt for the password, or reset the identity.
    #[error("Unable to unlock the vault")]
    VaultUnlock,

    /// One message is unreadable. Never affects other messages.
    #[error("Decryption failed: {0}")]
    Decryption(#[source] CryptoError),

    /// The peer's key differs from the pinned one. Blocks sending only.
    #[error("Identity of {peer_id} changed; verify it before sending")]
    TrustMismatch { peer_id: String },

    #[error("Vault is locked")]
    VaultLocked,

    #[error("No public key known for {0}")]
    UnknownPeer(String),

    #[error("Invalid peer public key: {0}")]
    InvalidPeerKey(#[source] CryptoError),

    #[error("Crypto error: {0}")]
    Crypto(#[source] CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Session cache error: {0}")]
    SessionCache(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Background task failed: {0}")]
    Task(String),

    /// The orchestrator's event loop has exited.
    #[error("Session is not running")]
    SessionStopped,
}

impl From<VaultError> for ClientError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::UnlockFailed => Self::VaultUnlock,
            VaultError::Locked => Self::VaultLocked,
            VaultError::KeyGeneration(inner) => Self::KeyGeneration(inner),
            VaultError::Crypto(inner) => Self::Crypto(inner),
            VaultError::Storage(inner) => Self::Storage(inner),
            VaultError::Cache(msg) => Self::SessionCache(msg),
            VaultError::Task(msg) => Self::Task(msg),
        }
    }
}

impl From<TrustError> for ClientError {
    fn from(e: TrustError) -> Self {
        match e {
            TrustError::Storage(inner) => Self::Storage(inner),
        }
    }
}

impl From<SendError> for ClientError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::VaultLocked => Self::VaultLocked,
            SendError::TrustChanged { peer_id } => Self::TrustMismatch { peer_id },
            SendError::UnknownPeer(peer_id) => Self::UnknownPeer(peer_id),
            SendError::Trust(inner) => inner.into(),
            SendError::Encryption(inner) => Self::Crypto(inner),
            SendError::Transport(inner) => Self::Transport(inner),
            SendError::Stopped => Self::SessionStopped,
        }
    }
}
