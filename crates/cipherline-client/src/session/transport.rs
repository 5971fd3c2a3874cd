//! The boundary to the transport collaborator.
//!
//! Outbound messages go onto an `mpsc` channel that the transport drains;
//! inbound events arrive on another. History is request/response.

use std::future::Future;

use cipherline_proto::HistoryEntry;

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Outbound channel closed")]
    ChannelClosed,

    #[error("History request failed: {0}")]
    History(String),
}

/// Request/response access to stored envelopes.
pub trait HistorySource: Send + Sync {
    /// Stored messages exchanged with `peer_id`, oldest first.
    fn fetch(
        &self,
        peer_id: &str,
    ) -> impl Future<Output = Result<Vec<HistoryEntry>, TransportError>> + Send;
}

/// A history source with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl HistorySource for NoHistory {
    async fn fetch(&self, _peer_id: &str) -> Result<Vec<HistoryEntry>, TransportError> {
        Ok(Vec::new())
    }
}
