//! Liveness probes
//!
//! Periodically asks every connected peer for its chain metadata. A peer on
//! another genesis is denylisted; a peer advertising more work than the local
//! chain triggers a sync.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chain::{ChainHandle, ChainMetadata};
use crate::p2p::{PeerId, SyncRequest, SyncResponse, Transport, UNRESPONSIVE_PENALTY};

/// Result of one round of probes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub probed: usize,
    pub responded: usize,
    /// Peers with more accumulated work than the local chain
    pub ahead: Vec<PeerId>,
}

impl LivenessReport {
    pub fn diverged(&self) -> bool {
        !self.ahead.is_empty()
    }
}

/// Ask every connected peer for its metadata, record the answers and return
/// the peers on the local genesis
pub async fn probe_peers(
    chain: &ChainHandle,
    transport: &dyn Transport,
    timeout: Duration,
) -> Vec<(PeerId, ChainMetadata)> {
    let genesis_hash = chain.read().genesis_hash();
    let peers = chain.peers().connected_peers();
    let responses = join_all(peers.iter().map(|peer| async move {
        let response = transport
            .request(peer, SyncRequest::ChainMetadata, timeout)
            .await;
        (peer.clone(), response)
    }))
    .await;

    let mut live = Vec::new();
    for (peer, response) in responses {
        match response {
            Ok(SyncResponse::ChainMetadata(metadata)) => {
                if metadata.genesis_hash != genesis_hash {
                    chain.peers().denylist(&peer, "genesis mismatch");
                    continue;
                }
                chain.peers().update_metadata(&peer, metadata.clone());
                live.push((peer, metadata));
            }
            Ok(_) => {
                chain.peers().record_misbehaviour(&peer, UNRESPONSIVE_PENALTY);
            }
            Err(error) => debug!(%peer, %error, "Liveness probe failed"),
        }
    }
    live
}

pub struct LivenessService {
    chain: ChainHandle,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl LivenessService {
    pub fn new(chain: ChainHandle, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            chain,
            transport,
            timeout,
        }
    }

    pub async fn probe(&self) -> LivenessReport {
        let probed = self.chain.peers().connected_count();
        let live = probe_peers(&self.chain, self.transport.as_ref(), self.timeout).await;
        let local_work = self.chain.metadata().total_work();
        LivenessReport {
            probed,
            responded: live.len(),
            ahead: live
                .into_iter()
                .filter(|(_, metadata)| metadata.total_work() > local_work)
                .map(|(peer, _)| peer)
                .collect(),
        }
    }

    /// Probe every `interval` and send on `trigger` when a peer is ahead
    pub async fn run(self, interval: Duration, trigger: mpsc::Sender<()>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.probe().await;
                    if report.diverged() {
                        info!(ahead = report.ahead.len(), "Peers ahead of local chain");
                        let _ = trigger.try_send(());
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
}
