//! Mimblewimble full node
//!
//! Usage: `mw-node [config.json]`. Without a config file the node runs a
//! local network with default settings.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use mw_core::chain::{BlockAddResult, Blockchain, ChainHandle};
use mw_core::config::NodeConfig;
use mw_core::consensus::PowAlgorithm;
use mw_core::mempool::{Mempool, MempoolAddResult};
use mw_core::mining::{Miner, MiningResult};
use mw_core::node::{create_genesis_block, unix_time, GenesisInfo};
use mw_core::p2p::{
    Inbound, Message, PeerManager, TcpTransport, Transport, MALFORMED_PENALTY, PROTOCOL_VERSION,
};
use mw_core::storage::SledBackend;
use mw_core::sync::{serve_request, LivenessService, SyncConfig, SyncCoordinator};

/// Transactions per mined block
const MINING_MAX_TRANSACTIONS: usize = 1_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    let constants = config.consensus_constants();
    constants.validate()?;

    let genesis = create_genesis_block(&constants);
    let info = GenesisInfo::new(&constants);
    info!(network = ?config.network, genesis = %info.hash, "Starting node");

    let backend = Arc::new(SledBackend::open(&config.data_dir)?);
    let chain = Blockchain::load(constants.clone(), backend, &genesis)?;
    info!(height = chain.height(), tip = %chain.tip_hash(), "Chain loaded");

    let peers = Arc::new(PeerManager::new(config.denylist_threshold));
    let handle = ChainHandle::new(chain, Arc::new(Mempool::new(constants.clone())), peers.clone());
    let (transport, inbound) = TcpTransport::new(config.network.magic(), peers);
    let cancel = CancellationToken::new();

    {
        let transport = Arc::clone(&transport);
        let addr = config.listen_addr.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = transport.listen(&addr, cancel).await {
                error!(%error, "Listener stopped");
            }
        });
    }

    for addr in &config.peers {
        match transport.connect(addr).await {
            Ok(peer) => {
                let hello = Message::Hello {
                    version: PROTOCOL_VERSION,
                    metadata: handle.metadata(),
                };
                if let Err(error) = transport.send(&peer, hello) {
                    debug!(%peer, %error, "Hello failed");
                }
            }
            Err(error) => warn!(addr, %error, "Could not connect to peer"),
        }
    }

    tokio::spawn(dispatch_inbound(handle.clone(), Arc::clone(&transport), inbound));

    let request_timeout = Duration::from_millis(config.request_timeout_ms);
    let (trigger, mut triggered) = mpsc::channel::<()>(1);
    let liveness = LivenessService::new(handle.clone(), transport.clone(), request_timeout);
    tokio::spawn(liveness.run(
        Duration::from_secs(config.liveness_interval_secs.max(1)),
        trigger.clone(),
        cancel.clone(),
    ));

    let coordinator = Arc::new(SyncCoordinator::new(
        handle.clone(),
        transport.clone(),
        genesis,
        SyncConfig::from(&config),
    ));
    {
        let cancel = cancel.clone();
        let sync_interval = Duration::from_secs(config.sync_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(()) = triggered.recv() => {}
                    _ = cancel.cancelled() => return,
                }
                match coordinator.synchronize(&cancel).await {
                    Ok(outcome) => debug!(?outcome, "Sync round finished"),
                    Err(error) => warn!(%error, "Sync round failed"),
                }
            }
        });
    }

    let miner = Miner::new(PowAlgorithm::Primary, MINING_MAX_TRANSACTIONS);
    if config.mining_enabled {
        tokio::spawn(mine(handle.clone(), transport.clone(), miner.clone(), cancel.clone()));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    miner.stop();
    cancel.cancel();
    Ok(())
}

/// Handle every message that is not a response to one of our requests
async fn dispatch_inbound(handle: ChainHandle, transport: Arc<TcpTransport>, mut inbound: Inbound) {
    while let Some((peer, message)) = inbound.recv().await {
        if handle.peers().is_denylisted(&peer) {
            continue;
        }
        match message {
            Message::Hello { version, metadata } => {
                if metadata.genesis_hash != handle.read().genesis_hash() {
                    handle.peers().denylist(&peer, "genesis mismatch");
                    continue;
                }
                debug!(%peer, version, height = metadata.height, "Hello");
                // Answer only the first hello so two nodes do not echo forever
                let first = handle
                    .peers()
                    .peer(&peer)
                    .map_or(true, |info| info.metadata.is_none());
                handle.peers().update_metadata(&peer, metadata);
                if first {
                    let reply = Message::Hello {
                        version: PROTOCOL_VERSION,
                        metadata: handle.metadata(),
                    };
                    let _ = transport.send(&peer, reply);
                }
            }
            Message::Ping(nonce) => {
                let _ = transport.send(&peer, Message::Pong(nonce));
            }
            Message::Pong(_) => {}
            Message::Request { id, request } => {
                let response = serve_request(&handle.read(), &request);
                let _ = transport.send(&peer, Message::Response { id, response });
            }
            Message::Response { .. } => {
                handle.peers().record_misbehaviour(&peer, MALFORMED_PENALTY);
            }
            Message::NewBlock(block) => {
                let hash = block.hash();
                match handle.submit_block(block.clone(), Some(&peer), unix_time()) {
                    Ok(result) if result.changed_tip() => {
                        info!(%peer, %hash, height = block.height(), "Accepted block");
                        let _ = transport.broadcast(Message::NewBlock(block)).await;
                    }
                    Ok(BlockAddResult::Rejected(error)) => {
                        warn!(%peer, %hash, %error, "Rejected block");
                    }
                    Ok(result) => debug!(%peer, %hash, ?result, "Block processed"),
                    Err(error) => warn!(%peer, %hash, %error, "Block not processed"),
                }
            }
            Message::NewTransaction(tx) => {
                match handle.submit_transaction(tx.clone(), unix_time()) {
                    Ok(MempoolAddResult::Accepted) => {
                        let _ = transport.broadcast(Message::NewTransaction(tx)).await;
                    }
                    Ok(result) => debug!(%peer, ?result, "Transaction not relayed"),
                    Err(error) => debug!(%peer, %error, "Mempool refused transaction"),
                }
            }
        }
    }
}

/// Mine on the local tip, announcing every block that extends it
async fn mine(handle: ChainHandle, transport: Arc<TcpTransport>, miner: Miner, cancel: CancellationToken) {
    info!(algo = %miner.algorithm(), "Mining enabled");
    while !cancel.is_cancelled() {
        let template = match miner.assemble_block(&handle) {
            Ok(template) => template,
            Err(error) => {
                error!(%error, "Could not assemble block");
                return;
            }
        };
        let worker = miner.clone();
        let result = match tokio::task::spawn_blocking(move || worker.mine_block(template)).await {
            Ok(result) => result,
            Err(error) => {
                error!(%error, "Mining task failed");
                return;
            }
        };
        let MiningResult::Success(block) = result else {
            return;
        };
        match handle.submit_block(block.clone(), None, unix_time()) {
            Ok(BlockAddResult::AcceptedTip) => {
                let _ = transport.broadcast(Message::NewBlock(block)).await;
            }
            Ok(result) => debug!(?result, "Mined block not on tip"),
            Err(error) => error!(%error, "Could not store mined block"),
        }
    }
}
