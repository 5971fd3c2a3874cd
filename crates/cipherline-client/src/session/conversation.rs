//! Per-peer conversation state.

use cipherline_crypto::EncryptedEnvelope;
use cipherline_proto::UserId;

/// Shown for a message that cannot be decrypted.
pub const UNREADABLE_PLACEHOLDER: &str = "[Unable to decrypt]";

/// Shown for a message while the vault is locked.
pub const LOCKED_PLACEHOLDER: &str = "[Encrypted]";

/// Decrypted content of one message, or why it is not available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Plaintext(String),
    /// Decryption failed; permanent for this envelope.
    Unreadable,
    /// Vault locked; retried on the next unlock.
    Locked,
}

impl MessageBody {
    /// Text to render.
    pub fn text(&self) -> &str {
        match self {
            Self::Plaintext(text) => text,
            Self::Unreadable => UNREADABLE_PLACEHOLDER,
            Self::Locked => LOCKED_PLACEHOLDER,
        }
    }

    pub const fn is_plaintext(&self) -> bool {
        matches!(self, Self::Plaintext(_))
    }
}

/// One message in arrival order.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub id: i64,
    pub sender_id: UserId,
    /// Server receive time. Informational; never used for ordering.
    pub timestamp: i64,
    pub body: MessageBody,
    /// `None` when the wire form could not be parsed.
    pub(crate) envelope: Option<EncryptedEnvelope>,
}

impl ConversationMessage {
    pub const fn has_envelope(&self) -> bool {
        self.envelope.is_some()
    }
}

/// A local-only notice, never sent over the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemNotice {
    /// The peer advertised a new identity key. Stays until the peer is
    /// re-verified.
    IdentityChanged { peer_id: UserId, fingerprint: String },
}

impl std::fmt::Display for SystemNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentityChanged {
                peer_id,
                fingerprint,
            } => write!(
                f,
                "{peer_id}'s identity key changed (new fingerprint {fingerprint}). \
                 Verify it before sending."
            ),
        }
    }
}

/// Whether the conversation can currently show plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    NoKey,
    Ready,
}

/// Messages and notices exchanged with one peer.
#[derive(Debug, Clone)]
pub struct Conversation {
    peer_id: UserId,
    state: ConversationState,
    messages: Vec<ConversationMessage>,
    notice: Option<SystemNotice>,
}

impl Conversation {
    pub(crate) const fn new(peer_id: UserId, state: ConversationState) -> Self {
        Self {
            peer_id,
            state,
            messages: Vec::new(),
            notice: None,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub const fn state(&self) -> ConversationState {
        self.state
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub const fn notice(&self) -> Option<&SystemNotice> {
        self.notice.as_ref()
    }

    pub(crate) const fn set_state(&mut self, state: ConversationState) {
        self.state = state;
    }

    pub(crate) fn set_notice(&mut self, notice: Option<SystemNotice>) {
        self.notice = notice;
    }

    pub(crate) fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    pub(crate) fn messages_mut(&mut self) -> &mut [ConversationMessage] {
        &mut self.messages
    }

    /// Replace the contents with loaded history, keeping live messages that
    /// the history did not include.
    pub(crate) fn replace_with_history(&mut self, history: Vec<ConversationMessage>) {
        let live: Vec<_> = std::mem::take(&mut self.messages)
            .into_iter()
            .filter(|live| !history.iter().any(|h| h.id == live.id))
            .collect();
        self.messages = history;
        self.messages.extend(live);
    }

    /// Drop every decrypted body, keeping envelopes for the next unlock.
    pub(crate) fn forget_plaintext(&mut self) {
        for message in &mut self.messages {
            if message.envelope.is_some() {
                message.body = MessageBody::Locked;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64, body: MessageBody) -> ConversationMessage {
        ConversationMessage {
            id,
            sender_id: "bob".into(),
            timestamp: 0,
            body,
            envelope: None,
        }
    }

    #[test]
    fn placeholders_render() {
        assert_eq!(MessageBody::Unreadable.text(), "[Unable to decrypt]");
        assert_eq!(MessageBody::Locked.text(), "[Encrypted]");
        assert_eq!(MessageBody::Plaintext("hi".into()).text(), "hi");
    }

    #[test]
    fn history_merge_keeps_unseen_live_messages() {
        let mut conversation = Conversation::new("bob".into(), ConversationState::Ready);
        conversation.push(message(2, MessageBody::Plaintext("live dup".into())));
        conversation.push(message(9, MessageBody::Plaintext("live new".into())));

        conversation.replace_with_history(vec![
            message(1, MessageBody::Plaintext("old".into())),
            message(2, MessageBody::Plaintext("from history".into())),
        ]);

        let ids: Vec<_> = conversation.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 9]);
        assert_eq!(conversation.messages()[1].body.text(), "from history");
    }

    #[test]
    fn forget_plaintext_spares_unparseable_messages() {
        let mut conversation = Conversation::new("bob".into(), ConversationState::Ready);
        conversation.push(message(1, MessageBody::Unreadable));
        conversation.forget_plaintext();
        assert_eq!(conversation.messages()[0].body, MessageBody::Unreadable);
    }

    #[test]
    fn notice_mentions_peer_and_fingerprint() {
        let notice = SystemNotice::IdentityChanged {
            peer_id: "bob".into(),
            fingerprint: "3f2a 9c01".into(),
        };
        let text = notice.to_string();
        assert!(text.contains("bob"));
        assert!(text.contains("3f2a 9c01"));
    }
}
