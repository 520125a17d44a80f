//! Block miner implementation
//!
//! Takes a template from the chain and searches for a proof of work meeting
//! the template's target. Primary blocks vary the header nonce; secondary
//! blocks vary the nonce inside the merge-mining data.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::chain::{BlockTemplate, ChainError, ChainHandle};
use crate::consensus::{build_merge_mining_data, Block, PowAlgorithm};
use crate::node::unix_time;

/// Nonces tried between checks of the stop signal and the clock
const STOP_CHECK_INTERVAL: u64 = 4_096;

/// Mining result
#[derive(Debug)]
pub enum MiningResult {
    /// Successfully mined a block
    Success(Block),
    /// Mining was interrupted
    Interrupted,
}

/// Block miner
#[derive(Clone)]
pub struct Miner {
    algorithm: PowAlgorithm,
    /// Most mempool transactions to include per block
    max_transactions: usize,
    stop_signal: Arc<AtomicBool>,
}

impl Miner {
    pub fn new(algorithm: PowAlgorithm, max_transactions: usize) -> Self {
        Self {
            algorithm,
            max_transactions,
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn algorithm(&self) -> PowAlgorithm {
        self.algorithm
    }

    /// Get a stop signal handle
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Assemble a candidate block on the current tip
    pub fn assemble_block(&self, chain: &ChainHandle) -> Result<BlockTemplate, ChainError> {
        let template = chain.block_template(self.algorithm, self.max_transactions, unix_time())?;
        debug!(
            height = template.block.height(),
            target = template.target_difficulty,
            reward = template.reward,
            "Assembled block template"
        );
        Ok(template)
    }

    /// Search for a proof of work meeting the template's target
    pub fn mine_block(&self, template: BlockTemplate) -> MiningResult {
        self.mine_with_progress(template, u64::MAX, |_| {})
    }

    /// Mine, calling `callback` with the attempt count every `progress_interval` attempts
    pub fn mine_with_progress<F>(
        &self,
        template: BlockTemplate,
        progress_interval: u64,
        mut callback: F,
    ) -> MiningResult
    where
        F: FnMut(u64),
    {
        let target = template.target_difficulty;
        let mut block = template.block;
        let mut attempts = 0u64;

        loop {
            if attempts % STOP_CHECK_INTERVAL == 0 && self.stopped() {
                return MiningResult::Interrupted;
            }

            if block.header.pow.pow_algo == PowAlgorithm::Secondary {
                block.header.pow.pow_data =
                    build_merge_mining_data(&block.header.mining_hash(), attempts);
            }
            if matches!(block.header.achieved_difficulty(), Ok(d) if d >= target) {
                info!(
                    height = block.height(),
                    hash = %block.hash(),
                    algo = %block.header.pow.pow_algo,
                    attempts,
                    "Mined block"
                );
                return MiningResult::Success(block);
            }

            attempts = attempts.wrapping_add(1);
            if block.header.pow.pow_algo == PowAlgorithm::Primary {
                block.header.nonce = block.header.nonce.wrapping_add(1);
                // Nonce space exhausted: a new timestamp gives a new mining hash
                if block.header.nonce == 0 {
                    block.header.timestamp = block.header.timestamp.max(unix_time()) + 1;
                }
            }
            if progress_interval > 0 && attempts % progress_interval == 0 {
                callback(attempts);
            }
        }
    }

    /// Mine blocks on `chain` until stopped
    pub fn run(&self, chain: &ChainHandle) -> Result<(), ChainError> {
        while !self.stopped() {
            let template = self.assemble_block(chain)?;
            let height = template.block.height();
            match self.mine_block(template) {
                MiningResult::Success(block) => {
                    let result = chain.submit_block(block, None, unix_time())?;
                    debug!(height, ?result, "Submitted mined block");
                }
                MiningResult::Interrupted => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockAddResult, Blockchain};
    use crate::config::{ConsensusConstants, Network};
    use crate::mempool::Mempool;
    use crate::node::create_genesis_block;
    use crate::p2p::PeerManager;
    use crate::storage::SledBackend;

    fn handle(dir: &tempfile::TempDir) -> ChainHandle {
        let constants = ConsensusConstants::for_network(Network::LocalNet);
        let genesis = create_genesis_block(&constants);
        let backend = Arc::new(SledBackend::open(dir.path()).unwrap());
        let chain = Blockchain::load(constants.clone(), backend, &genesis).unwrap();
        ChainHandle::new(
            chain,
            Arc::new(Mempool::new(constants.clone())),
            Arc::new(PeerManager::new(100)),
        )
    }

    #[test]
    fn test_miner_stop_signal() {
        let miner = Miner::new(PowAlgorithm::Primary, 10);
        let signal = miner.stop_signal();
        assert!(!signal.load(Ordering::SeqCst));
        miner.stop();
        assert!(signal.load(Ordering::SeqCst));
        miner.reset();
        assert!(!signal.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stopped_miner_is_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let chain = handle(&dir);
        let miner = Miner::new(PowAlgorithm::Primary, 10);
        let mut template = miner.assemble_block(&chain).unwrap();
        template.target_difficulty = u64::MAX;
        miner.stop();
        assert!(matches!(miner.mine_block(template), MiningResult::Interrupted));
    }

    #[test]
    fn test_mine_and_extend_chain() {
        let dir = tempfile::tempdir().unwrap();
        let chain = handle(&dir);
        for algorithm in [PowAlgorithm::Primary, PowAlgorithm::Secondary] {
            let miner = Miner::new(algorithm, 10);
            let template = miner.assemble_block(&chain).unwrap();
            let MiningResult::Success(block) = miner.mine_block(template) else {
                panic!("mining was interrupted");
            };
            assert!(block.header.achieved_difficulty().is_ok());
            let result = chain.submit_block(block, None, unix_time()).unwrap();
            assert_eq!(result, BlockAddResult::AcceptedTip);
        }
        assert_eq!(chain.metadata().height, 2);
    }
}
