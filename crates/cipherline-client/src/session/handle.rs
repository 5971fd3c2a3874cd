//! Requests into a running orchestrator.
//!
//! [`SessionOrchestrator::run`](super::SessionOrchestrator::run) owns the
//! orchestrator; UI code talks to it through a cloneable [`SessionHandle`].
//! Every request carries a `oneshot` for its reply.

use cipherline_crypto::PublicKey;
use cipherline_proto::UserId;
use tokio::sync::{mpsc, oneshot};

use super::SendError;
use super::conversation::Conversation;
use crate::error::ClientError;
use crate::storage::PinnedIdentity;

/// A request served by the orchestrator's event loop.
#[derive(Debug)]
pub enum SessionCommand {
    Send {
        peer_id: UserId,
        text: String,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    OpenConversation {
        peer_id: UserId,
        peer_key: PublicKey,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    VerifyPeer {
        peer_id: UserId,
        reply: oneshot::Sender<Result<PinnedIdentity, ClientError>>,
    },
    /// A copy of one conversation, for rendering.
    Conversation {
        peer_id: UserId,
        reply: oneshot::Sender<Option<Conversation>>,
    },
}

/// Cloneable front for a running orchestrator.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Create a handle and the receiver to pass to `run`.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (commands, rx) = mpsc::channel(buffer);
        (Self { commands }, rx)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Same gating as [`SessionOrchestrator::send`](super::SessionOrchestrator::send).
    pub async fn send(&self, peer_id: &str, text: &str) -> Result<(), SendError> {
        self.request(|reply| SessionCommand::Send {
            peer_id: peer_id.to_string(),
            text: text.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(SendError::Stopped))
    }

    pub async fn open_conversation(
        &self,
        peer_id: &str,
        peer_key: PublicKey,
    ) -> Result<(), ClientError> {
        self.request(|reply| SessionCommand::OpenConversation {
            peer_id: peer_id.to_string(),
            peer_key,
            reply,
        })
        .await
        .unwrap_or(Err(ClientError::SessionStopped))
    }

    pub async fn verify_peer(&self, peer_id: &str) -> Result<PinnedIdentity, ClientError> {
        self.request(|reply| SessionCommand::VerifyPeer {
            peer_id: peer_id.to_string(),
            reply,
        })
        .await
        .unwrap_or(Err(ClientError::SessionStopped))
    }

    /// `Ok(None)` when there is no conversation with `peer_id` yet.
    pub async fn conversation(&self, peer_id: &str) -> Result<Option<Conversation>, ClientError> {
        self.request(|reply| SessionCommand::Conversation {
            peer_id: peer_id.to_string(),
            reply,
        })
        .await
        .ok_or(ClientError::SessionStopped)
    }
}
