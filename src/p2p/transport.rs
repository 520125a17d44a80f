use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::{Message, PeerId, ProtocolError, SyncRequest, SyncResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Request to {0} timed out")]
    Timeout(PeerId),
    #[error("Peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("Connection to {0} closed")]
    Closed(PeerId),
}

/// Network collaborator used by the sync coordinator and the node
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `message` to every connected peer; returns how many were reached
    async fn broadcast(&self, message: Message) -> Result<usize, TransportError>;

    /// Ask `peer` a sync query, failing after `timeout`
    async fn request(
        &self,
        peer: &PeerId,
        request: SyncRequest,
        timeout: Duration,
    ) -> Result<SyncResponse, TransportError>;
}
