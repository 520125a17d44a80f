//! Chain selection
//!
//! Owns the header arena, the tip state and the orphan pool. Blocks are
//! validated against a staged copy of the state and committed only when every
//! check has passed.

mod arena;
mod blockchain;
mod handle;
mod orphans;

pub use arena::{HeaderArena, HeaderNode};
pub use blockchain::{BlockTemplate, Blockchain};
pub use handle::ChainHandle;
pub use orphans::OrphanPool;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::{AccumulatedDifficulty, Block};
use crate::crypto::Hash;
use crate::p2p::PeerId;
use crate::storage::{StorageError, UtxoEntry};
use crate::transaction::TransactionKernel;
use crate::validation::ValidationError;

/// Chain errors. Consensus outcomes are reported through `BlockAddResult`;
/// these are storage failures and conditions the node must act on.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Fork at height {fork_height} is deeper than the reorg window (tip {tip_height})")]
    ReorgBeyondHorizon { fork_height: u64, tip_height: u64 },
    #[error("Genesis mismatch: expected {expected}, found {found}")]
    GenesisMismatch { expected: Hash, found: Hash },
    #[error("Block {0} not found")]
    MissingBlock(Hash),
    #[error("No undo data for height {0}")]
    MissingDelta(u64),
    #[error("Height {0} is below the pruning horizon")]
    Pruned(u64),
    #[error("Invalid block template: {0}")]
    InvalidTemplate(String),
    #[error("Invalid horizon state: {0}")]
    InvalidHorizonState(ValidationError),
    #[error("Peer {0} is denylisted")]
    DenylistedPeer(PeerId),
}

/// Outcome of offering a block to the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockAddResult {
    /// Already known
    Duplicate,
    Rejected(ValidationError),
    /// Parent unknown; buffered until it arrives
    Orphan,
    /// Extended the best chain
    AcceptedTip,
    /// Stored on a side chain with less work than the tip
    AcceptedFork,
    /// The best chain switched to a heavier fork
    Reorg { removed: Vec<Hash>, added: Vec<Hash> },
}

impl BlockAddResult {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            BlockAddResult::AcceptedTip | BlockAddResult::AcceptedFork | BlockAddResult::Reorg { .. }
        )
    }

    pub fn changed_tip(&self) -> bool {
        matches!(self, BlockAddResult::AcceptedTip | BlockAddResult::Reorg { .. })
    }
}

/// Main-chain blocks removed and added since the last `take_changes`
#[derive(Debug, Clone, Default)]
pub struct ChainChanges {
    pub removed: Vec<Block>,
    pub added: Vec<Block>,
}

impl ChainChanges {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Summary of a chain advertised to peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub height: u64,
    pub best_hash: Hash,
    pub accumulated: AccumulatedDifficulty,
    pub genesis_hash: Hash,
    /// Lowest height the node can serve state for
    pub pruned_height: u64,
}

impl ChainMetadata {
    /// Accumulated work, always recomputed from the two accumulators
    pub fn total_work(&self) -> u128 {
        self.accumulated.total_work()
    }
}

/// UTXO set and kernels as they were at one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizonSnapshot {
    pub height: u64,
    pub hash: Hash,
    pub utxos: Vec<UtxoEntry>,
    pub kernels: Vec<TransactionKernel>,
}
