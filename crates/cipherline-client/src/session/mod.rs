//! Session orchestration.
//!
//! Binds the vault, the trust store and the transport together. Incoming
//! envelopes are decrypted with the current session key (or kept for later
//! while locked), identity changes re-derive trust, and outgoing messages are
//! gated on both the vault and the peer's verification status.
//!
//! Reading is never blocked by trust; sending is.

mod conversation;
mod handle;
mod transport;
mod wire;

pub use conversation::{
    Conversation, ConversationMessage, ConversationState, LOCKED_PLACEHOLDER, MessageBody,
    SystemNotice, UNREADABLE_PLACEHOLDER,
};
pub use handle::{SessionCommand, SessionHandle};
pub use transport::{HistorySource, NoHistory, TransportError};
pub use wire::{open_message, seal_message};

use std::collections::HashMap;
use std::sync::Arc;

use cipherline_crypto::{CryptoError, EncryptedEnvelope, PublicKey, decode_public_key, fingerprint};
use cipherline_proto::{IdentityChange, InboundEvent, InboundMessage, OutboundMessage, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::storage::PinnedIdentity;
use crate::trust::{TrustError, TrustStore, VerificationStatus};
use crate::vault::{KeyVault, SessionKey, VaultState};

/// Why a send was refused.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Vault is locked")]
    VaultLocked,

    #[error("Identity of {peer_id} changed; verify it before sending")]
    TrustChanged { peer_id: UserId },

    #[error("No public key known for {0}")]
    UnknownPeer(UserId),

    #[error("Trust lookup failed: {0}")]
    Trust(#[from] TrustError),

    #[error("Encryption failed: {0}")]
    Encryption(#[source] CryptoError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session is not running")]
    Stopped,
}

/// A history load in flight. Produced by
/// [`SessionOrchestrator::begin_history_load`].
pub struct HistoryLoad {
    epoch: u64,
    peer_id: UserId,
    key: Option<Arc<SessionKey>>,
}

/// Fetched and decrypted history, ready to apply.
pub struct LoadedHistory {
    epoch: u64,
    peer_id: UserId,
    generation: Option<u64>,
    messages: Vec<ConversationMessage>,
}

impl HistoryLoad {
    /// Fetch and decrypt. Does not touch the orchestrator, so a newer load
    /// can start while this one is pending.
    pub async fn fetch<H: HistorySource>(self, history: &H) -> Result<LoadedHistory, TransportError> {
        let entries = history.fetch(&self.peer_id).await?;
        let envelopes: Vec<_> = entries
            .iter()
            .map(|entry| {
                wire::envelope_from_history(entry)
                    .inspect_err(|e| warn!(peer_id = %self.peer_id, id = entry.id, error = %e, "Malformed history entry"))
                    .ok()
            })
            .collect();
        let bodies = decrypt_batch(self.key.as_ref(), envelopes.clone()).await;

        let messages = entries
            .into_iter()
            .zip(envelopes)
            .zip(bodies)
            .map(|((entry, envelope), body)| ConversationMessage {
                id: entry.id,
                sender_id: entry.sender_id,
                timestamp: entry.timestamp,
                body,
                envelope,
            })
            .collect();

        Ok(LoadedHistory {
            epoch: self.epoch,
            peer_id: self.peer_id,
            generation: self.key.map(|key| key.generation()),
            messages,
        })
    }
}

/// Decrypt envelopes on blocking threads, one task each, results in input
/// order. Without a key every parseable envelope stays `Locked`.
async fn decrypt_batch(
    key: Option<&Arc<SessionKey>>,
    envelopes: Vec<Option<EncryptedEnvelope>>,
) -> Vec<MessageBody> {
    let Some(key) = key else {
        return envelopes
            .iter()
            .map(|envelope| {
                if envelope.is_some() {
                    MessageBody::Locked
                } else {
                    MessageBody::Unreadable
                }
            })
            .collect();
    };

    let handles: Vec<_> = envelopes
        .into_iter()
        .map(|envelope| {
            let key = Arc::clone(key);
            tokio::task::spawn_blocking(move || wire::open_body(&key, envelope.as_ref()))
        })
        .collect();

    let mut bodies = Vec::with_capacity(handles.len());
    for handle in handles {
        bodies.push(handle.await.unwrap_or_else(|e| {
            warn!(error = %e, "Decrypt task failed");
            MessageBody::Unreadable
        }));
    }
    bodies
}

/// Drives conversations for one signed-in user.
pub struct SessionOrchestrator<H> {
    user_id: UserId,
    vault: Arc<KeyVault>,
    trust: TrustStore,
    history: H,
    outbound: mpsc::Sender<OutboundMessage>,
    peer_keys: HashMap<UserId, PublicKey>,
    conversations: HashMap<UserId, Conversation>,
    active: Option<UserId>,
    load_epoch: u64,
}

impl<H: HistorySource> SessionOrchestrator<H> {
    pub fn new(
        user_id: impl Into<UserId>,
        vault: Arc<KeyVault>,
        trust: TrustStore,
        history: H,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            vault,
            trust,
            history,
            outbound,
            peer_keys: HashMap::new(),
            conversations: HashMap::new(),
            active: None,
            load_epoch: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn conversation(&self, peer_id: &str) -> Option<&Conversation> {
        self.conversations.get(peer_id)
    }

    pub fn peer_key(&self, peer_id: &str) -> Option<&PublicKey> {
        self.peer_keys.get(peer_id)
    }

    /// Record a peer's key learned from the directory. No notice is raised.
    pub fn set_peer_key(&mut self, peer_id: impl Into<UserId>, key: PublicKey) {
        self.peer_keys.insert(peer_id.into(), key);
    }

    /// Current verification status of a peer's cached key.
    pub async fn peer_status(&self, peer_id: &str) -> Result<VerificationStatus, ClientError> {
        let key = self
            .peer_keys
            .get(peer_id)
            .ok_or_else(|| ClientError::UnknownPeer(peer_id.to_string()))?;
        Ok(self.trust.status(&self.user_id, peer_id, key).await?)
    }

    fn conversation_state(&self) -> ConversationState {
        if self.vault.session_key().is_some() {
            ConversationState::Ready
        } else {
            ConversationState::NoKey
        }
    }

    fn conversation_mut(&mut self, peer_id: &str) -> &mut Conversation {
        let state = self.conversation_state();
        self.conversations
            .entry(peer_id.to_string())
            .or_insert_with(|| Conversation::new(peer_id.to_string(), state))
    }

    fn is_current(&self, generation: Option<u64>) -> bool {
        self.vault.session_key().map(|key| key.generation()) == generation
    }

    // =========================================================================
    // Conversation switching
    // =========================================================================

    /// Make `peer_id` the active conversation and start loading its history.
    ///
    /// Any load started earlier becomes stale.
    pub fn begin_history_load(&mut self, peer_id: &str, peer_key: PublicKey) -> HistoryLoad {
        self.load_epoch += 1;
        self.active = Some(peer_id.to_string());
        self.peer_keys.insert(peer_id.to_string(), peer_key);
        self.conversation_mut(peer_id);

        HistoryLoad {
            epoch: self.load_epoch,
            peer_id: peer_id.to_string(),
            key: self.vault.session_key(),
        }
    }

    /// Install loaded history. Returns `false` if the active conversation
    /// changed since the load began; the results are dropped.
    pub async fn apply_history(&mut self, loaded: LoadedHistory) -> bool {
        if loaded.epoch != self.load_epoch {
            debug!(peer_id = %loaded.peer_id, "Discarding stale history load");
            return false;
        }

        let stale_key = !self.is_current(loaded.generation);
        let mut messages = loaded.messages;
        if stale_key {
            for message in &mut messages {
                if message.envelope.is_some() {
                    message.body = MessageBody::Locked;
                }
            }
        }

        self.conversation_mut(&loaded.peer_id)
            .replace_with_history(messages);
        self.refresh_conversation(&loaded.peer_id).await;
        self.sync_identity_notice(&loaded.peer_id).await;
        true
    }

    /// Raise the identity notice if the peer's cached key no longer matches
    /// its pin, e.g. after a change that arrived while another conversation
    /// was active. A key that verifies clears it.
    async fn sync_identity_notice(&mut self, peer_id: &str) {
        let Some(key) = self.peer_keys.get(peer_id).copied() else {
            return;
        };
        let status = match self.trust.status(&self.user_id, peer_id, &key).await {
            Ok(status) => status,
            Err(e) => {
                warn!(peer_id, error = %e, "Trust lookup failed");
                return;
            }
        };
        let notice = match status {
            VerificationStatus::Changed => Some(SystemNotice::IdentityChanged {
                peer_id: peer_id.to_string(),
                fingerprint: fingerprint(key.as_bytes()),
            }),
            VerificationStatus::Verified => None,
            VerificationStatus::Unverified => return,
        };
        self.conversation_mut(peer_id).set_notice(notice);
    }

    /// Switch to `peer_id` and load its decrypted history.
    pub async fn open_conversation(
        &mut self,
        peer_id: &str,
        peer_key: PublicKey,
    ) -> Result<(), ClientError> {
        let load = self.begin_history_load(peer_id, peer_key);
        let loaded = load.fetch(&self.history).await?;
        self.apply_history(loaded).await;
        info!(peer_id, "Conversation opened");
        Ok(())
    }

    // =========================================================================
    // Inbound events
    // =========================================================================

    pub async fn handle_event(&mut self, event: InboundEvent) -> Result<(), ClientError> {
        match event {
            InboundEvent::Message(message) => {
                self.handle_message(message).await;
                Ok(())
            }
            InboundEvent::IdentityChange(change) => {
                self.handle_identity_change(change).await.map(|_| ())
            }
        }
    }

    /// Decrypt and append a pushed message. Failures become placeholders.
    pub async fn handle_message(&mut self, message: InboundMessage) {
        let peer_id = if message.sender_id == self.user_id {
            message.recipient_id.clone()
        } else {
            message.sender_id.clone()
        };

        let envelope = wire::envelope_from_message(&message)
            .inspect_err(|e| warn!(%peer_id, id = message.id, error = %e, "Malformed message"))
            .ok();

        let key = self.vault.session_key();
        let generation = key.as_ref().map(|key| key.generation());
        let mut body = decrypt_batch(key.as_ref(), vec![envelope.clone()])
            .await
            .pop()
            .unwrap_or(MessageBody::Unreadable);
        if envelope.is_some() && !self.is_current(generation) {
            body = MessageBody::Locked;
        }

        debug!(%peer_id, id = message.id, plaintext = body.is_plaintext(), "Message received");
        self.conversation_mut(&peer_id).push(ConversationMessage {
            id: message.id,
            sender_id: message.sender_id,
            timestamp: message.timestamp,
            body,
            envelope,
        });
    }

    /// Cache the peer's new key and recompute trust. The active conversation
    /// gets a notice that stays until the peer is verified again; other
    /// conversations get it when they are next opened.
    pub async fn handle_identity_change(
        &mut self,
        change: IdentityChange,
    ) -> Result<VerificationStatus, ClientError> {
        let key = decode_public_key(&change.new_public_key).map_err(ClientError::InvalidPeerKey)?;
        self.peer_keys.insert(change.user_id.clone(), key);

        let status = self.trust.status(&self.user_id, &change.user_id, &key).await?;
        let new_fingerprint = fingerprint(key.as_bytes());
        if status == VerificationStatus::Changed {
            warn!(peer_id = %change.user_id, fingerprint = %new_fingerprint, "Peer identity changed");
        } else {
            info!(peer_id = %change.user_id, %status, "Peer identity updated");
        }

        if self.active.as_deref() == Some(change.user_id.as_str()) {
            let notice = SystemNotice::IdentityChanged {
                peer_id: change.user_id.clone(),
                fingerprint: new_fingerprint,
            };
            self.conversation_mut(&change.user_id)
                .set_notice(Some(notice));
        }
        Ok(status)
    }

    /// Pin the peer's cached key after the user confirmed it, and dismiss the
    /// identity notice.
    pub async fn verify_peer(&mut self, peer_id: &str) -> Result<PinnedIdentity, ClientError> {
        let key = *self
            .peer_keys
            .get(peer_id)
            .ok_or_else(|| ClientError::UnknownPeer(peer_id.to_string()))?;
        let pin = self.trust.pin(&self.user_id, peer_id, &key).await?;
        if let Some(conversation) = self.conversations.get_mut(peer_id) {
            conversation.set_notice(None);
        }
        Ok(pin)
    }

    // =========================================================================
    // Vault state
    // =========================================================================

    /// Re-decrypt on unlock, forget plaintext on lock.
    pub async fn handle_vault_state(&mut self, state: VaultState) {
        match state {
            VaultState::Unlocking => {}
            VaultState::Locked => {
                for conversation in self.conversations.values_mut() {
                    conversation.forget_plaintext();
                    conversation.set_state(ConversationState::NoKey);
                }
                debug!("Cleared decrypted messages");
            }
            VaultState::Unlocked => {
                let peers: Vec<_> = self.conversations.keys().cloned().collect();
                for peer_id in peers {
                    self.refresh_conversation(&peer_id).await;
                }
            }
        }
    }

    /// Decrypt every `Locked` message in a conversation with the current key.
    async fn refresh_conversation(&mut self, peer_id: &str) {
        let key = self.vault.session_key();
        let Some(conversation) = self.conversations.get_mut(peer_id) else {
            return;
        };
        let Some(key) = key else {
            conversation.set_state(ConversationState::NoKey);
            return;
        };

        let pending: Vec<(usize, Option<EncryptedEnvelope>)> = conversation
            .messages()
            .iter()
            .enumerate()
            .filter(|(_, message)| message.body == MessageBody::Locked)
            .map(|(index, message)| (index, message.envelope.clone()))
            .collect();
        let (indices, envelopes): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let bodies = decrypt_batch(Some(&key), envelopes).await;

        if !self.is_current(Some(key.generation())) {
            debug!(peer_id, "Session key changed during re-decrypt; results dropped");
            return;
        }
        if let Some(conversation) = self.conversations.get_mut(peer_id) {
            let messages = conversation.messages_mut();
            for (index, body) in indices.into_iter().zip(bodies) {
                if let Some(message) = messages.get_mut(index) {
                    message.body = body;
                }
            }
            conversation.set_state(ConversationState::Ready);
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Encrypt `text` for the peer and for ourselves, then hand it to the
    /// transport. Delivery is the transport's concern.
    ///
    /// The message shows up in the conversation when the transport echoes it.
    pub async fn send(&self, peer_id: &str, text: &str) -> Result<(), SendError> {
        let key = self.vault.session_key().ok_or(SendError::VaultLocked)?;
        let peer_key = *self
            .peer_keys
            .get(peer_id)
            .ok_or_else(|| SendError::UnknownPeer(peer_id.to_string()))?;

        if self.trust.status(&self.user_id, peer_id, &peer_key).await? == VerificationStatus::Changed
        {
            warn!(peer_id, "Send blocked: peer identity changed");
            return Err(SendError::TrustChanged {
                peer_id: peer_id.to_string(),
            });
        }

        let recipient_id = peer_id.to_string();
        let text = text.to_string();
        let message = tokio::task::spawn_blocking(move || {
            wire::seal_message(&key, &recipient_id, &peer_key, &text)
        })
        .await
        .map_err(|e| SendError::Encryption(CryptoError::EncryptionFailed(e.to_string())))?
        .map_err(|e| match e {
            ClientError::VaultLocked => SendError::VaultLocked,
            ClientError::Crypto(inner) => SendError::Encryption(inner),
            other => SendError::Encryption(CryptoError::EncryptionFailed(other.to_string())),
        })?;

        self.outbound
            .send(message)
            .await
            .map_err(|_| TransportError::ChannelClosed)?;
        debug!(peer_id, "Message handed to transport");
        Ok(())
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Process inbound events, vault state changes and `commands` until
    /// `inbound` closes.
    ///
    /// Inbound events are served before commands that are ready at the same
    /// time, so a command observes every event queued ahead of it.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<InboundEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        let mut vault_state = self.vault.subscribe();
        let initial = *vault_state.borrow_and_update();
        self.handle_vault_state(initial).await;
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;
                event = inbound.recv() => {
                    let Some(event) = event else {
                        debug!("Inbound channel closed");
                        break;
                    };
                    if let Err(e) = self.handle_event(event).await {
                        warn!(error = %e, "Failed to handle inbound event");
                    }
                }
                changed = vault_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *vault_state.borrow_and_update();
                    self.handle_vault_state(state).await;
                }
                command = commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => commands_open = false,
                    }
                }
            }
        }
    }

    /// Serve one request. A dropped reply receiver is not an error.
    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Send {
                peer_id,
                text,
                reply,
            } => {
                let _ = reply.send(self.send(&peer_id, &text).await);
            }
            SessionCommand::OpenConversation {
                peer_id,
                peer_key,
                reply,
            } => {
                let _ = reply.send(self.open_conversation(&peer_id, peer_key).await);
            }
            SessionCommand::VerifyPeer { peer_id, reply } => {
                let _ = reply.send(self.verify_peer(&peer_id).await);
            }
            SessionCommand::Conversation { peer_id, reply } => {
                let _ = reply.send(self.conversations.get(&peer_id).cloned());
            }
        }
    }
}
