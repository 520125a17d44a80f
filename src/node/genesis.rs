//! Genesis block generation
//!
//! The genesis block carries no transactions and mints nothing. Its timestamp
//! comes from the network's consensus constants, so each network has its own
//! genesis hash and nodes on different networks never agree on a common
//! ancestor.

use crate::config::ConsensusConstants;
use crate::constants::BLOCKCHAIN_VERSION;
use crate::consensus::{AccumulatedDifficulty, Block, BlockHeader, PowAlgorithm, ProofOfWork};
use crate::crypto::{Hash, SecretKey};
use crate::transaction::AggregateBody;

/// Create the genesis block for a network
///
/// Reproducible byte for byte: every node on the same network derives the
/// same block from the same constants.
pub fn create_genesis_block(constants: &ConsensusConstants) -> Block {
    let accumulated = AccumulatedDifficulty::genesis();
    let header = BlockHeader {
        version: BLOCKCHAIN_VERSION,
        height: 0,
        prev_hash: Hash::zero(),
        timestamp: constants.genesis_timestamp,
        // Roots of the empty UTXO set and kernel list
        output_mr: Hash::zero(),
        range_proof_mr: Hash::zero(),
        kernel_mr: Hash::zero(),
        total_kernel_offset: SecretKey::zero(),
        nonce: 0,
        pow: ProofOfWork {
            accumulated_primary: accumulated.primary,
            accumulated_secondary: accumulated.secondary,
            pow_algo: PowAlgorithm::Primary,
            pow_data: Vec::new(),
        },
    };
    Block::new(header, AggregateBody::empty())
}

/// Verify genesis block matches expected hash
pub fn verify_genesis_hash(block: &Block, expected_hash: &Hash) -> bool {
    block.hash() == *expected_hash
}

pub fn genesis_hash(constants: &ConsensusConstants) -> Hash {
    create_genesis_block(constants).hash()
}

/// Genesis block summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisInfo {
    pub hash: Hash,
    pub timestamp: u64,
    pub accumulated: AccumulatedDifficulty,
}

impl GenesisInfo {
    pub fn new(constants: &ConsensusConstants) -> Self {
        let genesis = create_genesis_block(constants);
        Self {
            hash: genesis.hash(),
            timestamp: genesis.header.timestamp,
            accumulated: genesis.header.pow.accumulated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::storage::ChainState;

    #[test]
    fn test_genesis_is_deterministic() {
        let constants = ConsensusConstants::for_network(Network::LocalNet);
        assert_eq!(
            create_genesis_block(&constants).hash(),
            create_genesis_block(&constants).hash()
        );
    }

    #[test]
    fn test_genesis_is_genesis() {
        let genesis = create_genesis_block(&ConsensusConstants::for_network(Network::LocalNet));
        assert!(genesis.is_genesis());
        assert!(genesis.body.is_empty());
    }

    #[test]
    fn test_genesis_roots_match_empty_state() {
        let genesis = create_genesis_block(&ConsensusConstants::for_network(Network::Mainnet));
        let roots = ChainState::new(&genesis).unwrap().roots();
        assert_eq!(roots.output_mr, genesis.header.output_mr);
        assert_eq!(roots.range_proof_mr, genesis.header.range_proof_mr);
        assert_eq!(roots.kernel_mr, genesis.header.kernel_mr);
    }

    #[test]
    fn test_networks_have_distinct_genesis() {
        let mainnet = genesis_hash(&ConsensusConstants::for_network(Network::Mainnet));
        let localnet = genesis_hash(&ConsensusConstants::for_network(Network::LocalNet));
        assert_ne!(mainnet, localnet);
    }

    #[test]
    fn test_genesis_info() {
        let constants = ConsensusConstants::for_network(Network::Testnet);
        let info = GenesisInfo::new(&constants);
        assert_eq!(info.timestamp, constants.genesis_timestamp);
        assert_eq!(info.accumulated, AccumulatedDifficulty::genesis());
        assert!(verify_genesis_hash(&create_genesis_block(&constants), &info.hash));
    }
}
