//! Chain state management
//!
//! Tracks the state at the tip of the best chain: the UTXO set, every kernel,
//! the tip height and hash, and the coins issued so far. A block is staged
//! against the state without touching it, then committed; blocks rewind as
//! `BlockDelta`s.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::consensus::Block;
use crate::crypto::{Hash, MerkleAccumulator};
use crate::transaction::TransactionKernel;

use super::{StagedUtxos, StorageError, UtxoDelta, UtxoEntry, UtxoSet};

/// Everything needed to undo one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDelta {
    pub height: u64,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub utxo: UtxoDelta,
    pub kernels: Vec<TransactionKernel>,
    /// Block reward issued by this block
    pub emission: u64,
}

/// The three Merkle roots committed to by a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRoots {
    pub output_mr: Hash,
    pub range_proof_mr: Hash,
    pub kernel_mr: Hash,
}

/// A block applied to a private version of the state
#[derive(Debug, Clone)]
pub struct StagedBlock {
    /// Tip the block was staged on
    parent: Hash,
    utxos: StagedUtxos,
    kernel_mr: Hash,
    hash: Hash,
    height: u64,
    kernels: Vec<TransactionKernel>,
    emission: u64,
}

impl StagedBlock {
    pub fn roots(&self) -> StateRoots {
        StateRoots {
            output_mr: self.utxos.output_mr(),
            range_proof_mr: self.utxos.range_proof_mr(),
            kernel_mr: self.kernel_mr,
        }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Undo data this block leaves once committed
    pub fn delta(&self) -> BlockDelta {
        BlockDelta {
            height: self.height,
            hash: self.hash,
            prev_hash: self.parent,
            utxo: self.utxos.delta().clone(),
            kernels: self.kernels.clone(),
            emission: self.emission,
        }
    }
}

/// Complete chain state at one block
#[derive(Debug, Clone)]
pub struct ChainState {
    pub utxos: UtxoSet,
    kernels: Arc<Vec<TransactionKernel>>,
    kernel_tree: Arc<MerkleAccumulator>,
    pub height: u64,
    pub tip_hash: Hash,
    /// Total block rewards issued up to and including the tip
    pub total_emission: u64,
}

impl ChainState {
    /// State after the genesis block
    pub fn new(genesis: &Block) -> Result<Self, StorageError> {
        let mut state = Self::from_parts(UtxoSet::new(), Vec::new(), 0, Hash::zero(), 0);
        state.apply_block(genesis, 0)?;
        Ok(state)
    }

    /// Restore from persisted or downloaded parts
    pub fn from_parts(
        utxos: UtxoSet,
        kernels: Vec<TransactionKernel>,
        height: u64,
        tip_hash: Hash,
        total_emission: u64,
    ) -> Self {
        let kernel_tree = MerkleAccumulator::from_leaves(kernels.iter().map(|k| k.hash()));
        Self {
            utxos,
            kernels: Arc::new(kernels),
            kernel_tree: Arc::new(kernel_tree),
            height,
            tip_hash,
            total_emission,
        }
    }

    pub fn kernels(&self) -> &[TransactionKernel] {
        &self.kernels
    }

    /// Apply `block` to a new version of the outputs and compute the roots it
    /// would leave. The block must already be valid; this state is untouched.
    pub fn stage_block(&self, block: &Block, emission: u64) -> Result<StagedBlock, StorageError> {
        let height = block.header.height;
        let spends: Vec<_> = block.body.inputs.iter().map(|i| i.commitment).collect();
        let inserts: Vec<_> = block
            .body
            .outputs
            .iter()
            .map(|o| UtxoEntry::new(o.clone(), height))
            .collect();
        let utxos = self.utxos.stage(&spends, inserts, height)?;
        let kernel_hashes: Vec<Hash> = block.body.kernels.iter().map(|k| k.hash()).collect();
        Ok(StagedBlock {
            parent: self.tip_hash,
            utxos,
            kernel_mr: self.kernel_tree.root_with(&kernel_hashes),
            hash: block.hash(),
            height,
            kernels: block.body.kernels.clone(),
            emission,
        })
    }

    /// Make a staged block the new tip
    pub fn commit_block(&mut self, staged: StagedBlock) -> Result<BlockDelta, StorageError> {
        if staged.parent != self.tip_hash {
            return Err(StorageError::Corrupt(format!(
                "block {} was staged on {} but tip is {}",
                staged.hash, staged.parent, self.tip_hash
            )));
        }
        let utxo = self.utxos.commit(staged.utxos);
        let tree = Arc::make_mut(&mut self.kernel_tree);
        for kernel in &staged.kernels {
            tree.push(kernel.hash());
        }
        Arc::make_mut(&mut self.kernels).extend(staged.kernels.iter().cloned());
        self.height = staged.height;
        self.tip_hash = staged.hash;
        self.total_emission = self.total_emission.saturating_add(staged.emission);
        Ok(BlockDelta {
            height: staged.height,
            hash: staged.hash,
            prev_hash: staged.parent,
            utxo,
            kernels: staged.kernels,
            emission: staged.emission,
        })
    }

    /// Stage and commit in one step. Structural conflicts leave the state
    /// untouched.
    pub fn apply_block(&mut self, block: &Block, emission: u64) -> Result<BlockDelta, StorageError> {
        let staged = self.stage_block(block, emission)?;
        self.commit_block(staged)
    }

    /// Undo the tip block
    pub fn rewind_block(&mut self, delta: &BlockDelta) -> Result<(), StorageError> {
        if delta.hash != self.tip_hash {
            return Err(StorageError::Corrupt(format!(
                "rewinding {} but tip is {}",
                delta.hash, self.tip_hash
            )));
        }
        self.utxos.rewind(&delta.utxo)?;
        let keep = self.kernels.len().saturating_sub(delta.kernels.len());
        Arc::make_mut(&mut self.kernels).truncate(keep);
        Arc::make_mut(&mut self.kernel_tree).truncate(keep);
        self.height = delta.height.saturating_sub(1);
        self.tip_hash = delta.prev_hash;
        self.total_emission = self.total_emission.saturating_sub(delta.emission);
        Ok(())
    }

    pub fn kernel_mr(&self) -> Hash {
        self.kernel_tree.root()
    }

    pub fn roots(&self) -> StateRoots {
        StateRoots {
            output_mr: self.utxos.output_mr(),
            range_proof_mr: self.utxos.range_proof_mr(),
            kernel_mr: self.kernel_mr(),
        }
    }
}
