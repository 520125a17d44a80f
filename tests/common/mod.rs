//! Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use mw_core::chain::{BlockAddResult, BlockTemplate, Blockchain, ChainHandle};
use mw_core::config::{ConsensusConstants, Network};
use mw_core::consensus::{build_merge_mining_data, Block, PowAlgorithm};
use mw_core::mempool::Mempool;
use mw_core::node::create_genesis_block;
use mw_core::p2p::PeerManager;
use mw_core::storage::MemoryBackend;
use mw_core::transaction::{Transaction, UnblindedOutput};

/// Seconds between test blocks; keeps localnet difficulty at its minimum
pub const SPACING: u64 = 120;

pub fn constants() -> ConsensusConstants {
    ConsensusConstants::for_network(Network::LocalNet)
}

pub fn genesis() -> Block {
    create_genesis_block(&constants())
}

pub fn new_chain() -> Blockchain {
    Blockchain::load(constants(), Arc::new(MemoryBackend::new()), &genesis()).unwrap()
}

pub fn new_handle() -> ChainHandle {
    ChainHandle::new(
        new_chain(),
        Arc::new(Mempool::new(constants())),
        Arc::new(PeerManager::new(100)),
    )
}

/// Alternate algorithms so both accumulators grow
pub fn algorithm_for(height: u64) -> PowAlgorithm {
    if height % 2 == 0 {
        PowAlgorithm::Secondary
    } else {
        PowAlgorithm::Primary
    }
}

/// Find a proof of work for a template
pub fn solve(template: BlockTemplate) -> Block {
    let target = template.target_difficulty;
    let mut block = template.block;
    let mut attempt = 0u64;
    loop {
        if block.header.pow.pow_algo == PowAlgorithm::Secondary {
            block.header.pow.pow_data = build_merge_mining_data(&block.header.mining_hash(), attempt);
        } else {
            block.header.nonce = attempt;
        }
        if block.header.achieved_difficulty().unwrap() >= target {
            return block;
        }
        attempt += 1;
    }
}

/// Template on the chain's tip `spacing` seconds after it
pub fn template(chain: &Blockchain, transactions: &[Transaction], spacing: u64) -> BlockTemplate {
    let height = chain.height() + 1;
    let timestamp = chain.tip_header().timestamp + spacing;
    chain
        .prepare_block_template(transactions, algorithm_for(height), timestamp)
        .unwrap()
}

/// Mine one block with `transactions` onto the tip; returns the block and
/// the secrets of its coinbase
pub fn mine_with(
    chain: &mut Blockchain,
    transactions: &[Transaction],
    spacing: u64,
) -> (Block, UnblindedOutput) {
    let template = template(chain, transactions, spacing);
    let coinbase = template.coinbase.clone();
    let block = solve(template);
    let now = block.header.timestamp;
    assert_eq!(
        chain.add_block(block.clone(), now).unwrap(),
        BlockAddResult::AcceptedTip
    );
    (block, coinbase)
}

pub fn mine(chain: &mut Blockchain, count: usize, spacing: u64) -> Vec<Block> {
    (0..count).map(|_| mine_with(chain, &[], spacing).0).collect()
}

/// Offer blocks in order, asserting each is accepted
pub fn feed(chain: &mut Blockchain, blocks: &[Block]) -> Vec<BlockAddResult> {
    blocks
        .iter()
        .map(|block| {
            let result = chain.add_block(block.clone(), block.header.timestamp).unwrap();
            assert!(result.is_accepted(), "block {} not accepted: {result:?}", block.height());
            result
        })
        .collect()
}
