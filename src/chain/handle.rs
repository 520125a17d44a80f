use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::consensus::{Block, PowAlgorithm};
use crate::mempool::{Mempool, MempoolAddResult, MempoolError};
use crate::p2p::{PeerId, PeerManager, INVALID_BLOCK_PENALTY, MALFORMED_PENALTY};
use crate::transaction::Transaction;

use super::{BlockAddResult, BlockTemplate, Blockchain, ChainError, ChainMetadata};

/// Shared entry point to the chain and the mempool.
///
/// Block application takes the write lock, so blocks are applied one at a
/// time; readers see either the old tip or the new one.
#[derive(Clone)]
pub struct ChainHandle {
    chain: Arc<RwLock<Blockchain>>,
    mempool: Arc<Mempool>,
    peers: Arc<PeerManager>,
}

impl ChainHandle {
    pub fn new(chain: Blockchain, mempool: Arc<Mempool>, peers: Arc<PeerManager>) -> Self {
        Self {
            chain: Arc::new(RwLock::new(chain)),
            mempool,
            peers,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Blockchain> {
        self.chain.read()
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.peers
    }

    pub fn metadata(&self) -> ChainMetadata {
        self.chain.read().metadata()
    }

    /// Swap in a chain rebuilt by a full resync. It is written to the live
    /// backend in one batch while the write lock is held; if that fails the
    /// current chain stays in place, in memory and on disk.
    pub fn replace(&self, mut chain: Blockchain, now: u64) -> Result<(), ChainError> {
        {
            let mut current = self.chain.write();
            chain.persist_into(current.backend())?;
            *current = chain;
        }
        self.refresh_mempool(now);
        Ok(())
    }

    /// Offer a block, optionally received from `from`. Malformed or invalid
    /// blocks count against the sending peer.
    pub fn submit_block(
        &self,
        block: Block,
        from: Option<&PeerId>,
        now: u64,
    ) -> Result<BlockAddResult, ChainError> {
        if let Some(peer) = from {
            if self.peers.is_denylisted(peer) {
                return Err(ChainError::DenylistedPeer(peer.clone()));
            }
        }

        let (result, changes) = {
            let mut chain = self.chain.write();
            let result = chain.add_block(block, now)?;
            (result, chain.take_changes())
        };

        if let (BlockAddResult::Rejected(error), Some(peer)) = (&result, from) {
            let points = if error.is_malformed() {
                MALFORMED_PENALTY
            } else {
                INVALID_BLOCK_PENALTY
            };
            self.peers.record_misbehaviour(peer, points);
        }

        if !changes.is_empty() {
            let reorged = self.mempool.take_reorged(&changes.removed);
            self.mempool.remove_mined(&changes.added);
            let chain = self.chain.read();
            let tip = chain.tip_hash();
            let height = chain.height() + 1;
            self.mempool
                .resubmit(reorged, &chain.state().utxos, height, &tip, now);
            self.mempool
                .process_new_height(&chain.state().utxos, height, &tip, now);
            debug!(height = chain.height(), pool = ?self.mempool.stats(), "Mempool refreshed");
        }
        Ok(result)
    }

    /// Validate a transaction against the tip and add it to the pool
    pub fn submit_transaction(
        &self,
        tx: Transaction,
        now: u64,
    ) -> Result<MempoolAddResult, MempoolError> {
        let (utxos, height, tip) = {
            let chain = self.chain.read();
            (chain.state().utxos.clone(), chain.height() + 1, chain.tip_hash())
        };
        self.mempool.insert(tx, &utxos, height, &tip, now)
    }

    /// Template on the current tip filled from the mempool
    pub fn block_template(
        &self,
        algorithm: PowAlgorithm,
        max_transactions: usize,
        timestamp: u64,
    ) -> Result<BlockTemplate, ChainError> {
        let transactions = self.mempool.retrieve(max_transactions);
        self.chain
            .read()
            .prepare_block_template(&transactions, algorithm, timestamp)
    }

    fn refresh_mempool(&self, now: u64) {
        let chain = self.chain.read();
        self.mempool.process_new_height(
            &chain.state().utxos,
            chain.height() + 1,
            &chain.tip_hash(),
            now,
        );
    }
}
