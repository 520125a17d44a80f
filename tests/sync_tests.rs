//! Sync coordinator against in-memory peers

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{constants, feed, genesis, mine, new_chain, SPACING};
use mw_core::chain::{Blockchain, ChainHandle};
use mw_core::config::{ConsensusConstants, Network};
use mw_core::mempool::Mempool;
use mw_core::node::create_genesis_block;
use mw_core::p2p::{Message, PeerId, PeerManager, SyncRequest, SyncResponse, Transport, TransportError};
use mw_core::storage::MemoryBackend;
use mw_core::sync::{probe_peers, serve_request, SyncConfig, SyncCoordinator, SyncOutcome, SyncState};
use tokio_util::sync::CancellationToken;

/// Answers requests straight from the peers' chains
struct MemoryTransport {
    peers: HashMap<PeerId, ChainHandle>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn broadcast(&self, _message: Message) -> Result<usize, TransportError> {
        Ok(self.peers.len())
    }

    async fn request(
        &self,
        peer: &PeerId,
        request: SyncRequest,
        _timeout: Duration,
    ) -> Result<SyncResponse, TransportError> {
        let remote = self
            .peers
            .get(peer)
            .ok_or_else(|| TransportError::NotConnected(peer.clone()))?;
        let response = serve_request(&remote.read(), &request);
        Ok(response)
    }
}

fn handle_for(chain: Blockchain) -> ChainHandle {
    let constants = chain.constants().clone();
    ChainHandle::new(
        chain,
        Arc::new(Mempool::new(constants)),
        Arc::new(PeerManager::new(100)),
    )
}

/// Local handle connected to every remote, plus a coordinator over them
fn connect(local: Blockchain, remotes: Vec<(&str, Blockchain)>) -> (ChainHandle, SyncCoordinator) {
    let local = handle_for(local);
    let mut peers = HashMap::new();
    for (name, chain) in remotes {
        let id = PeerId::new(name);
        local.peers().add_peer(id.clone());
        peers.insert(id, handle_for(chain));
    }
    let transport = Arc::new(MemoryTransport { peers });
    let coordinator = SyncCoordinator::new(local.clone(), transport, genesis(), SyncConfig::default());
    (local, coordinator)
}

fn mainnet_chain() -> Blockchain {
    let constants = ConsensusConstants::for_network(Network::Mainnet);
    let genesis = create_genesis_block(&constants);
    Blockchain::load(constants, Arc::new(MemoryBackend::new()), &genesis).unwrap()
}

#[tokio::test]
async fn test_block_sync_from_peer_ahead() {
    let mut remote = new_chain();
    let blocks = mine(&mut remote, 5, SPACING);
    let mut local = new_chain();
    feed(&mut local, &blocks[..3]);
    let remote_tip = remote.tip_hash();

    let (local, coordinator) = connect(local, vec![("ahead", remote)]);
    let outcome = coordinator.synchronize(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::BlockSync {
            peer: PeerId::new("ahead"),
            from: 4,
            to: 5
        }
    );
    assert_eq!(local.read().tip_hash(), remote_tip);
    assert_eq!(coordinator.state(), SyncState::Idle);
}

#[tokio::test]
async fn test_horizon_sync_from_genesis() {
    let mut remote = new_chain();
    mine(&mut remote, 30, SPACING);
    let remote_tip = remote.tip_hash();
    let remote_utxos = remote.state().utxos.len();
    assert_eq!(remote.metadata().pruned_height, 10);

    let (local, coordinator) = connect(new_chain(), vec![("archive", remote)]);
    let backend = local.read().backend();
    let outcome = coordinator.synchronize(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::HorizonSync {
            peer: PeerId::new("archive"),
            horizon_height: 10,
            height: 30
        }
    );
    let chain = local.read();
    assert_eq!(chain.height(), 30);
    assert_eq!(chain.tip_hash(), remote_tip);
    assert_eq!(chain.state().utxos.len(), remote_utxos);

    // The synced chain lives in the node's own store and survives a restart
    let reloaded = Blockchain::load(constants(), backend, &genesis()).unwrap();
    assert_eq!(reloaded.tip_hash(), remote_tip);
    assert_eq!(reloaded.state().roots(), chain.state().roots());
}

#[tokio::test]
async fn test_fork_syncs_from_common_ancestor() {
    let mut remote = new_chain();
    let shared = mine(&mut remote, 5, SPACING);
    let mut local = new_chain();
    feed(&mut local, &shared);
    mine(&mut local, 3, SPACING);
    mine(&mut remote, 6, SPACING);
    let remote_metadata = remote.metadata();

    let (local, coordinator) = connect(local, vec![("fork", remote)]);
    let ancestor = coordinator
        .find_common_ancestor(&PeerId::new("fork"), &remote_metadata)
        .await
        .unwrap();
    assert_eq!(ancestor, Some(5));

    let outcome = coordinator.synchronize(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::BlockSync {
            peer: PeerId::new("fork"),
            from: 6,
            to: 11
        }
    );
    assert_eq!(local.read().tip_hash(), remote_metadata.best_hash);
}

#[tokio::test]
async fn test_peer_with_less_work_is_ignored() {
    let mut local = new_chain();
    let blocks = mine(&mut local, 4, SPACING);
    let mut remote = new_chain();
    feed(&mut remote, &blocks[..2]);
    let local_tip = local.tip_hash();

    let (local, coordinator) = connect(local, vec![("behind", remote)]);
    let outcome = coordinator.synchronize(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::UpToDate);
    assert_eq!(local.read().tip_hash(), local_tip);
}

#[tokio::test]
async fn test_genesis_mismatch_denylists_peer() {
    let (local, coordinator) = connect(
        new_chain(),
        vec![("stranger", mainnet_chain()), ("friend", new_chain())],
    );
    let outcome = coordinator.synchronize(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::UpToDate);
    assert!(local.peers().is_denylisted(&PeerId::new("stranger")));
    assert!(!local.peers().is_denylisted(&PeerId::new("friend")));
    assert_eq!(local.peers().connected_peers(), vec![PeerId::new("friend")]);
}

#[tokio::test]
async fn test_unknown_peer_fails_probe_without_penalty() {
    let local = handle_for(new_chain());
    local.peers().add_peer(PeerId::new("gone"));
    let transport = MemoryTransport {
        peers: HashMap::new(),
    };
    assert!(probe_peers(&local, &transport, Duration::from_secs(1)).await.is_empty());
    assert!(!local.peers().is_denylisted(&PeerId::new("gone")));
}
