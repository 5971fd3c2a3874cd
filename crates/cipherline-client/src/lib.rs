//! Cipherline client core.
//!
//! - [`vault`]: the identity secret sealed at rest and unlocked in memory
//! - [`trust`]: pinned peer fingerprints and derived verification status
//! - [`session`]: decrypt/encrypt glue between the vault, trust and transport
//! - [`storage`]: local `SQLite` tables backing the vault and trust store

pub mod error;
pub mod session;
pub mod storage;
pub mod trust;
pub mod vault;

pub use error::ClientError;
pub use session::{
    Conversation, HistorySource, MessageBody, SendError, SessionHandle, SessionOrchestrator,
    SystemNotice, TransportError,
};
pub use storage::{Database, PinnedIdentity};
pub use trust::{TrustError, TrustStore, VerificationStatus};
pub use vault::{KeyVault, SessionKey, VaultError, VaultState};
