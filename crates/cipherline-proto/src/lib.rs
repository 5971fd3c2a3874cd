//! Cipherline wire protocol.
//!
//! JSON shapes exchanged with the transport collaborator (a bidirectional
//! real-time channel) and the history API. Every binary field is standard
//! base64; this crate never interprets it.

use serde::{Deserialize, Serialize};

/// User identifier as issued by the server.
pub type UserId = String;

/// A message handed to the real-time channel for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient_id: UserId,
    pub ciphertext: String,
    pub iv: String,
    pub encrypted_key_for_recipient: String,
    pub encrypted_key_for_sender: String,
}

/// A message pushed by the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub ciphertext: String,
    pub iv: String,
    pub encrypted_key_for_recipient: String,
    pub encrypted_key_for_sender: String,
    /// Server receive time (Unix seconds). Informational only.
    pub timestamp: i64,
}

/// Notification that a user replaced their identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityChange {
    pub user_id: UserId,
    pub new_public_key: String,
}

/// Events arriving on the real-time channel, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Message(InboundMessage),
    IdentityChange(IdentityChange),
}

impl InboundEvent {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One stored message returned by `history(peer_id)`.
///
/// The server picks the wrapped key addressed to the requesting user, so only
/// one copy is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub sender_id: UserId,
    pub encrypted_content: String,
    pub encrypted_key: String,
    pub iv: String,
    pub timestamp: i64,
}
