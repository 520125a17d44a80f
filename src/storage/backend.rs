//! Storage collaborator interface
//!
//! Every mutation reaches a backend as one `WriteBatch`, applied all at once
//! or not at all. An accepted block is one batch (`put_batch`), a reorg is
//! one batch undoing the old branch and applying the new one
//! (`commit_blocks`), and a resync replaces the whole chain in one batch
//! (`write_state`). Historical UTXO sets are rebuilt by rewinding stored
//! deltas from the tip.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::consensus::{Block, BlockHeader};
use crate::crypto::{Commitment, Hash};
use crate::transaction::TransactionKernel;

use super::{BlockDelta, ChainState, StorageError, UtxoEntry, UtxoSet};

/// Persisted tip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipMetadata {
    pub height: u64,
    pub hash: Hash,
    pub total_emission: u64,
}

/// One change inside a `WriteBatch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Drop every output, kernel, delta and main-chain height
    ResetState,
    InsertUtxo(UtxoEntry),
    DeleteUtxo(Commitment),
    InsertKernel(u64, TransactionKernel),
    DeleteKernel(u64),
    InsertDelta(BlockDelta),
    DeleteDelta(u64),
    InsertHeader(BlockHeader),
    /// Stores the header too
    InsertBlock(Block),
    SetHeight(u64, Hash),
    DeleteHeight(u64),
    SetTip(TipMetadata),
}

/// Ordered changes that become visible together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Undo `reverted` (tip first), then apply `applied` (lowest first), on
    /// top of the stored `tip` holding `kernel_count` kernels
    pub fn for_blocks(
        tip: Option<TipMetadata>,
        kernel_count: u64,
        reverted: &[BlockDelta],
        applied: &[BlockDelta],
    ) -> Result<Self, StorageError> {
        let mut batch = Self::new();
        let mut tip = tip;
        let mut kernels = kernel_count;
        for delta in reverted {
            let current = match tip {
                Some(current) if current.hash == delta.hash => current,
                _ => {
                    return Err(StorageError::Corrupt(format!(
                        "{} is not the stored tip",
                        delta.hash
                    )))
                }
            };
            for entry in &delta.utxo.created {
                batch.push(WriteOp::DeleteUtxo(entry.commitment()));
            }
            for entry in &delta.utxo.spent {
                batch.push(WriteOp::InsertUtxo(entry.clone()));
            }
            let first = kernels
                .checked_sub(delta.kernels.len() as u64)
                .ok_or_else(|| {
                    StorageError::Corrupt(format!("{} has more kernels than stored", delta.hash))
                })?;
            for index in first..kernels {
                batch.push(WriteOp::DeleteKernel(index));
            }
            kernels = first;
            batch.push(WriteOp::DeleteDelta(delta.height));
            batch.push(WriteOp::DeleteHeight(delta.height));
            tip = Some(TipMetadata {
                height: delta.height.saturating_sub(1),
                hash: delta.prev_hash,
                total_emission: current.total_emission.saturating_sub(delta.emission),
            });
        }
        for delta in applied {
            if let Some(current) = tip {
                if current.hash != delta.prev_hash {
                    return Err(StorageError::Corrupt(format!(
                        "{} does not extend the stored tip {}",
                        delta.hash, current.hash
                    )));
                }
            }
            for entry in &delta.utxo.spent {
                batch.push(WriteOp::DeleteUtxo(entry.commitment()));
            }
            for entry in &delta.utxo.created {
                batch.push(WriteOp::InsertUtxo(entry.clone()));
            }
            for kernel in &delta.kernels {
                batch.push(WriteOp::InsertKernel(kernels, kernel.clone()));
                kernels += 1;
            }
            batch.push(WriteOp::InsertDelta(delta.clone()));
            batch.push(WriteOp::SetHeight(delta.height, delta.hash));
            let emitted = tip.map_or(0, |t| t.total_emission);
            tip = Some(TipMetadata {
                height: delta.height,
                hash: delta.hash,
                total_emission: emitted.saturating_add(delta.emission),
            });
        }
        match tip {
            Some(tip) if !(reverted.is_empty() && applied.is_empty()) => {
                batch.push(WriteOp::SetTip(tip));
            }
            _ => {}
        }
        Ok(batch)
    }

    /// Replace everything stored with `image`
    pub fn for_image(image: &ChainImage<'_>) -> Self {
        let mut batch = Self::new();
        batch.push(WriteOp::ResetState);
        for entry in image.state.utxos.iter() {
            batch.push(WriteOp::InsertUtxo(entry.clone()));
        }
        for (index, kernel) in image.state.kernels().iter().enumerate() {
            batch.push(WriteOp::InsertKernel(index as u64, kernel.clone()));
        }
        for delta in image.deltas {
            batch.push(WriteOp::InsertDelta(delta.clone()));
        }
        for (height, hash) in image.main_chain.iter().enumerate() {
            batch.push(WriteOp::SetHeight(height as u64, *hash));
        }
        for header in image.headers {
            batch.push(WriteOp::InsertHeader(header.clone()));
        }
        for block in image.blocks {
            batch.push(WriteOp::InsertBlock(block.clone()));
        }
        batch.push(WriteOp::SetTip(TipMetadata {
            height: image.state.height,
            hash: image.state.tip_hash,
            total_emission: image.state.total_emission,
        }));
        batch
    }
}

/// A whole chain as written by `ChainBackend::write_state`
#[derive(Debug, Clone, Copy)]
pub struct ChainImage<'a> {
    pub state: &'a ChainState,
    /// Main-chain hashes from genesis to the tip
    pub main_chain: &'a [Hash],
    /// Main-chain headers without a stored body, e.g. below a horizon snapshot
    pub headers: &'a [BlockHeader],
    pub blocks: &'a [Block],
    /// Undo data for the retained window
    pub deltas: &'a [BlockDelta],
}

pub trait ChainBackend: Send + Sync {
    /// Live output by commitment
    fn get(&self, commitment: &Commitment) -> Result<Option<UtxoEntry>, StorageError>;

    fn fetch_delta(&self, height: u64) -> Result<Option<BlockDelta>, StorageError>;

    fn fetch_utxos(&self) -> Result<Vec<UtxoEntry>, StorageError>;

    fn fetch_kernels(&self) -> Result<Vec<TransactionKernel>, StorageError>;

    /// One past the highest stored kernel index
    fn kernel_count(&self) -> Result<u64, StorageError>;

    fn fetch_header(&self, hash: &Hash) -> Result<Option<BlockHeader>, StorageError>;

    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError>;

    /// Main-chain block hash at `height`
    fn fetch_hash_at(&self, height: u64) -> Result<Option<Hash>, StorageError>;

    fn fetch_tip(&self) -> Result<Option<TipMetadata>, StorageError>;

    /// Apply `batch` atomically: afterwards either every op is visible or
    /// none is
    fn write(&self, batch: &WriteBatch) -> Result<(), StorageError>;

    /// Undo `reverted` (tip first), then apply `applied` (lowest first), as
    /// one write
    fn commit_blocks(
        &self,
        reverted: &[BlockDelta],
        applied: &[BlockDelta],
    ) -> Result<(), StorageError> {
        let batch =
            WriteBatch::for_blocks(self.fetch_tip()?, self.kernel_count()?, reverted, applied)?;
        self.write(&batch)
    }

    /// Apply one block's spends and inserts and record its delta
    fn put_batch(&self, delta: &BlockDelta) -> Result<(), StorageError> {
        self.commit_blocks(&[], std::slice::from_ref(delta))
    }

    /// Undo the tip block's batch
    fn revert_batch(&self, delta: &BlockDelta) -> Result<(), StorageError> {
        self.commit_blocks(std::slice::from_ref(delta), &[])
    }

    fn insert_header(&self, header: &BlockHeader) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertHeader(header.clone()));
        self.write(&batch)
    }

    fn insert_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::InsertBlock(block.clone()));
        self.write(&batch)
    }

    /// Replace all chain state, e.g. after a horizon sync
    fn write_state(&self, image: &ChainImage<'_>) -> Result<(), StorageError> {
        self.write(&WriteBatch::for_image(image))
    }

    /// UTXO set as it was at `height`, rebuilt from stored deltas
    fn snapshot_at(&self, height: u64) -> Result<Vec<UtxoEntry>, StorageError> {
        let tip = self.fetch_tip()?.ok_or(StorageError::EmptyDatabase)?;
        if height > tip.height {
            return Err(StorageError::HeightNotFound(height));
        }
        let mut utxos = UtxoSet::from_entries(self.fetch_utxos()?)?;
        for h in ((height + 1)..=tip.height).rev() {
            let delta = self
                .fetch_delta(h)?
                .ok_or(StorageError::HeightNotFound(h))?;
            utxos.rewind(&delta.utxo)?;
        }
        Ok(utxos.entries())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    utxos: BTreeMap<Commitment, UtxoEntry>,
    kernels: BTreeMap<u64, TransactionKernel>,
    deltas: BTreeMap<u64, BlockDelta>,
    headers: HashMap<Hash, BlockHeader>,
    blocks: HashMap<Hash, Block>,
    heights: BTreeMap<u64, Hash>,
    tip: Option<TipMetadata>,
}

impl MemoryState {
    fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::ResetState => {
                self.utxos.clear();
                self.kernels.clear();
                self.deltas.clear();
                self.heights.clear();
            }
            WriteOp::InsertUtxo(entry) => {
                self.utxos.insert(entry.commitment(), entry.clone());
            }
            WriteOp::DeleteUtxo(commitment) => {
                self.utxos.remove(commitment);
            }
            WriteOp::InsertKernel(index, kernel) => {
                self.kernels.insert(*index, kernel.clone());
            }
            WriteOp::DeleteKernel(index) => {
                self.kernels.remove(index);
            }
            WriteOp::InsertDelta(delta) => {
                self.deltas.insert(delta.height, delta.clone());
            }
            WriteOp::DeleteDelta(height) => {
                self.deltas.remove(height);
            }
            WriteOp::InsertHeader(header) => {
                self.headers.insert(header.hash(), header.clone());
            }
            WriteOp::InsertBlock(block) => {
                self.headers.insert(block.hash(), block.header.clone());
                self.blocks.insert(block.hash(), block.clone());
            }
            WriteOp::SetHeight(height, hash) => {
                self.heights.insert(*height, *hash);
            }
            WriteOp::DeleteHeight(height) => {
                self.heights.remove(height);
            }
            WriteOp::SetTip(tip) => self.tip = Some(*tip),
        }
    }
}

/// In-memory backend for tests, ephemeral nodes and staging a resync
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainBackend for MemoryBackend {
    fn get(&self, commitment: &Commitment) -> Result<Option<UtxoEntry>, StorageError> {
        Ok(self.state.read().utxos.get(commitment).cloned())
    }

    fn fetch_delta(&self, height: u64) -> Result<Option<BlockDelta>, StorageError> {
        Ok(self.state.read().deltas.get(&height).cloned())
    }

    fn fetch_utxos(&self) -> Result<Vec<UtxoEntry>, StorageError> {
        Ok(self.state.read().utxos.values().cloned().collect())
    }

    fn fetch_kernels(&self) -> Result<Vec<TransactionKernel>, StorageError> {
        Ok(self.state.read().kernels.values().cloned().collect())
    }

    fn kernel_count(&self) -> Result<u64, StorageError> {
        Ok(self
            .state
            .read()
            .kernels
            .keys()
            .next_back()
            .map_or(0, |index| index + 1))
    }

    fn fetch_header(&self, hash: &Hash) -> Result<Option<BlockHeader>, StorageError> {
        Ok(self.state.read().headers.get(hash).cloned())
    }

    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        Ok(self.state.read().blocks.get(hash).cloned())
    }

    fn fetch_hash_at(&self, height: u64) -> Result<Option<Hash>, StorageError> {
        Ok(self.state.read().heights.get(&height).copied())
    }

    fn fetch_tip(&self) -> Result<Option<TipMetadata>, StorageError> {
        Ok(self.state.read().tip)
    }

    fn write(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        let mut state = self.state.write();
        for op in batch.ops() {
            state.apply(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::storage::UtxoDelta;
    use crate::transaction::UnblindedOutput;

    fn entry(value: u64, height: u64) -> UtxoEntry {
        let output = UnblindedOutput::new(value, SecretKey::random())
            .as_transaction_output(&SecretKey::random());
        UtxoEntry::new(output, height)
    }

    fn delta(height: u64, prev: Hash, spent: Vec<UtxoEntry>, created: Vec<UtxoEntry>) -> BlockDelta {
        BlockDelta {
            height,
            hash: crate::crypto::hash_bytes(&height.to_le_bytes()),
            prev_hash: prev,
            utxo: UtxoDelta {
                height,
                spent,
                created,
            },
            kernels: vec![],
            emission: 10,
        }
    }

    #[test]
    fn test_put_revert_and_snapshot() {
        let backend = MemoryBackend::new();
        let a = entry(1, 1);
        let b = entry(2, 2);
        let d1 = delta(1, Hash::zero(), vec![], vec![a.clone()]);
        let d2 = delta(2, d1.hash, vec![a.clone()], vec![b.clone()]);
        backend.put_batch(&d1).unwrap();
        backend.put_batch(&d2).unwrap();

        assert!(backend.get(&a.commitment()).unwrap().is_none());
        assert!(backend.get(&b.commitment()).unwrap().is_some());
        assert_eq!(backend.fetch_tip().unwrap().unwrap().total_emission, 20);

        let at_one = backend.snapshot_at(1).unwrap();
        assert_eq!(at_one, vec![a.clone()]);

        backend.revert_batch(&d2).unwrap();
        assert!(backend.get(&a.commitment()).unwrap().is_some());
        assert_eq!(backend.fetch_tip().unwrap().unwrap().hash, d1.hash);
        assert!(backend.revert_batch(&d2).is_err());
    }

    #[test]
    fn test_commit_blocks_switches_branch_in_one_batch() {
        let backend = MemoryBackend::new();
        let a = entry(1, 1);
        let d1 = delta(1, Hash::zero(), vec![], vec![a.clone()]);
        let old = delta(2, d1.hash, vec![a.clone()], vec![entry(2, 2)]);
        backend.put_batch(&d1).unwrap();
        backend.put_batch(&old).unwrap();

        let mut new = delta(2, d1.hash, vec![], vec![entry(3, 2)]);
        new.hash = crate::crypto::hash_bytes(b"other branch");
        new.emission = 7;
        let batch = WriteBatch::for_blocks(
            backend.fetch_tip().unwrap(),
            backend.kernel_count().unwrap(),
            std::slice::from_ref(&old),
            std::slice::from_ref(&new),
        )
        .unwrap();
        assert_eq!(batch.ops().iter().filter(|op| matches!(op, WriteOp::SetTip(_))).count(), 1);

        backend.commit_blocks(&[old], &[new.clone()]).unwrap();
        let tip = backend.fetch_tip().unwrap().unwrap();
        assert_eq!((tip.height, tip.hash, tip.total_emission), (2, new.hash, 17));
        assert!(backend.get(&a.commitment()).unwrap().is_some());
        assert_eq!(backend.fetch_hash_at(2).unwrap(), Some(new.hash));
    }

    #[test]
    fn test_rejected_batch_writes_nothing() {
        let backend = MemoryBackend::new();
        let d1 = delta(1, Hash::zero(), vec![], vec![entry(1, 1)]);
        backend.put_batch(&d1).unwrap();
        let before = backend.fetch_utxos().unwrap();

        // Second delta does not extend the first
        let d2 = delta(2, d1.hash, vec![], vec![entry(2, 2)]);
        let stray = delta(3, Hash::zero(), vec![], vec![entry(3, 3)]);
        assert!(backend.commit_blocks(&[], &[d2, stray]).is_err());
        assert_eq!(backend.fetch_tip().unwrap().unwrap().hash, d1.hash);
        assert_eq!(backend.fetch_utxos().unwrap(), before);
        assert!(backend.fetch_delta(2).unwrap().is_none());
    }
}
