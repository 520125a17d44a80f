//! Database persistence layer using Sled
//!
//! Trees: `utxos` (commitment -> entry), `kernels` (index -> kernel),
//! `deltas` (height -> block delta), `headers` and `blocks` (hash -> value),
//! `heights` (height -> main-chain hash) and `metadata` (tip). Each
//! `WriteBatch` is committed as one transaction across all of them.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, Transactional};
use sled::{Db, Tree};

use crate::consensus::{Block, BlockHeader};
use crate::crypto::{Commitment, Hash};
use crate::transaction::TransactionKernel;

use super::{BlockDelta, ChainBackend, StorageError, TipMetadata, UtxoEntry, WriteBatch, WriteOp};

const TIP_KEY: &[u8] = b"tip";

/// Sled-backed chain storage
#[derive(Debug, Clone)]
pub struct SledBackend {
    db: Db,
    utxos_tree: Tree,
    kernels_tree: Tree,
    deltas_tree: Tree,
    headers_tree: Tree,
    blocks_tree: Tree,
    heights_tree: Tree,
    metadata_tree: Tree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Store {
    Utxos,
    Kernels,
    Deltas,
    Headers,
    Blocks,
    Heights,
    Metadata,
}

/// Encoded form of one op: `None` removes the key
type RawWrite = (Store, Vec<u8>, Option<Vec<u8>>);

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes)?)
}

fn height_key(height: u64) -> Vec<u8> {
    height.to_be_bytes().to_vec()
}

impl SledBackend {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            utxos_tree: db.open_tree("utxos")?,
            kernels_tree: db.open_tree("kernels")?,
            deltas_tree: db.open_tree("deltas")?,
            headers_tree: db.open_tree("headers")?,
            blocks_tree: db.open_tree("blocks")?,
            heights_tree: db.open_tree("heights")?,
            metadata_tree: db.open_tree("metadata")?,
            db,
        })
    }

    fn tree(&self, store: Store) -> &Tree {
        match store {
            Store::Utxos => &self.utxos_tree,
            Store::Kernels => &self.kernels_tree,
            Store::Deltas => &self.deltas_tree,
            Store::Headers => &self.headers_tree,
            Store::Blocks => &self.blocks_tree,
            Store::Heights => &self.heights_tree,
            Store::Metadata => &self.metadata_tree,
        }
    }

    /// Encode `op`, appending to `writes`. Serialisation happens here so the
    /// transaction body itself cannot fail on bad data.
    fn encode_op(&self, op: &WriteOp, writes: &mut Vec<RawWrite>) -> Result<(), StorageError> {
        match op {
            WriteOp::ResetState => {
                for store in [Store::Utxos, Store::Kernels, Store::Deltas, Store::Heights] {
                    for key in self.tree(store).iter().keys() {
                        writes.push((store, key?.to_vec(), None));
                    }
                }
            }
            WriteOp::InsertUtxo(entry) => {
                writes.push((Store::Utxos, entry.commitment().0.to_vec(), Some(encode(entry)?)));
            }
            WriteOp::DeleteUtxo(commitment) => {
                writes.push((Store::Utxos, commitment.0.to_vec(), None));
            }
            WriteOp::InsertKernel(index, kernel) => {
                writes.push((Store::Kernels, height_key(*index), Some(encode(kernel)?)));
            }
            WriteOp::DeleteKernel(index) => {
                writes.push((Store::Kernels, height_key(*index), None));
            }
            WriteOp::InsertDelta(delta) => {
                writes.push((Store::Deltas, height_key(delta.height), Some(encode(delta)?)));
            }
            WriteOp::DeleteDelta(height) => {
                writes.push((Store::Deltas, height_key(*height), None));
            }
            WriteOp::InsertHeader(header) => {
                writes.push((Store::Headers, header.hash().0.to_vec(), Some(encode(header)?)));
            }
            WriteOp::InsertBlock(block) => {
                let hash = block.hash();
                writes.push((Store::Headers, hash.0.to_vec(), Some(encode(&block.header)?)));
                writes.push((Store::Blocks, hash.0.to_vec(), Some(encode(block)?)));
            }
            WriteOp::SetHeight(height, hash) => {
                writes.push((Store::Heights, height_key(*height), Some(hash.0.to_vec())));
            }
            WriteOp::DeleteHeight(height) => {
                writes.push((Store::Heights, height_key(*height), None));
            }
            WriteOp::SetTip(tip) => {
                writes.push((Store::Metadata, TIP_KEY.to_vec(), Some(encode(tip)?)));
            }
        }
        Ok(())
    }
}

impl ChainBackend for SledBackend {
    fn get(&self, commitment: &Commitment) -> Result<Option<UtxoEntry>, StorageError> {
        self.utxos_tree
            .get(commitment.0)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn fetch_delta(&self, height: u64) -> Result<Option<BlockDelta>, StorageError> {
        self.deltas_tree
            .get(height.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn fetch_utxos(&self) -> Result<Vec<UtxoEntry>, StorageError> {
        self.utxos_tree
            .iter()
            .values()
            .map(|item| decode(&item?))
            .collect()
    }

    fn fetch_kernels(&self) -> Result<Vec<TransactionKernel>, StorageError> {
        self.kernels_tree
            .iter()
            .values()
            .map(|item| decode(&item?))
            .collect()
    }

    fn kernel_count(&self) -> Result<u64, StorageError> {
        match self.kernels_tree.last()? {
            Some((key, _)) => {
                let index: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::Corrupt("kernel index".to_string()))?;
                Ok(u64::from_be_bytes(index) + 1)
            }
            None => Ok(0),
        }
    }

    fn fetch_header(&self, hash: &Hash) -> Result<Option<BlockHeader>, StorageError> {
        self.headers_tree
            .get(hash.0)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        self.blocks_tree
            .get(hash.0)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn fetch_hash_at(&self, height: u64) -> Result<Option<Hash>, StorageError> {
        match self.heights_tree.get(height.to_be_bytes())? {
            Some(bytes) => {
                let array: [u8; 32] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::Corrupt(format!("hash at height {}", height)))?;
                Ok(Some(Hash(array)))
            }
            None => Ok(None),
        }
    }

    fn fetch_tip(&self) -> Result<Option<TipMetadata>, StorageError> {
        self.metadata_tree
            .get(TIP_KEY)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn write(&self, batch: &WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut writes = Vec::with_capacity(batch.ops().len());
        for op in batch.ops() {
            self.encode_op(op, &mut writes)?;
        }

        let trees = (
            &self.utxos_tree,
            &self.kernels_tree,
            &self.deltas_tree,
            &self.headers_tree,
            &self.blocks_tree,
            &self.heights_tree,
            &self.metadata_tree,
        );
        trees
            .transaction(|(utxos, kernels, deltas, headers, blocks, heights, metadata)| {
                for (store, key, value) in &writes {
                    let tree = match store {
                        Store::Utxos => utxos,
                        Store::Kernels => kernels,
                        Store::Deltas => deltas,
                        Store::Headers => headers,
                        Store::Blocks => blocks,
                        Store::Heights => heights,
                        Store::Metadata => metadata,
                    };
                    match value {
                        Some(value) => {
                            tree.insert(key.as_slice(), value.as_slice())?;
                        }
                        None => {
                            tree.remove(key.as_slice())?;
                        }
                    }
                }
                Ok(())
            })
            .map_err(|error: TransactionError<StorageError>| match error {
                TransactionError::Abort(error) => error,
                TransactionError::Storage(error) => StorageError::Sled(error),
            })?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_bytes, SecretKey};
    use crate::storage::{ChainImage, ChainState, UtxoDelta, UtxoSet};
    use crate::transaction::UnblindedOutput;

    fn entry(value: u64, height: u64) -> UtxoEntry {
        let output = UnblindedOutput::new(value, SecretKey::random())
            .as_transaction_output(&SecretKey::random());
        UtxoEntry::new(output, height)
    }

    fn delta(height: u64, prev_hash: Hash, spent: Vec<UtxoEntry>, created: Vec<UtxoEntry>) -> BlockDelta {
        BlockDelta {
            height,
            hash: hash_bytes(&height.to_le_bytes()),
            prev_hash,
            utxo: UtxoDelta {
                height,
                spent,
                created,
            },
            kernels: vec![],
            emission: 5,
        }
    }

    #[test]
    fn test_batches_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let a = entry(1, 1);
        let b = entry(2, 2);
        let d1 = delta(1, Hash::zero(), vec![], vec![a.clone()]);
        let d2 = delta(2, d1.hash, vec![a.clone()], vec![b.clone()]);
        {
            let backend = SledBackend::open(dir.path()).unwrap();
            backend.put_batch(&d1).unwrap();
            backend.put_batch(&d2).unwrap();
        }
        let backend = SledBackend::open(dir.path()).unwrap();
        let tip = backend.fetch_tip().unwrap().unwrap();
        assert_eq!((tip.height, tip.hash, tip.total_emission), (2, d2.hash, 10));
        assert_eq!(backend.fetch_utxos().unwrap(), vec![b]);
        assert_eq!(backend.snapshot_at(1).unwrap(), vec![a]);

        backend.revert_batch(&d2).unwrap();
        assert_eq!(backend.fetch_tip().unwrap().unwrap().hash, d1.hash);
        assert!(backend.fetch_delta(2).unwrap().is_none());
        assert!(backend.fetch_hash_at(2).unwrap().is_none());
    }

    #[test]
    fn test_rejected_commit_leaves_every_tree_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SledBackend::open(dir.path()).unwrap();
        let d1 = delta(1, Hash::zero(), vec![], vec![entry(1, 1)]);
        backend.put_batch(&d1).unwrap();
        let utxos = backend.fetch_utxos().unwrap();

        let d2 = delta(2, d1.hash, vec![], vec![entry(2, 2)]);
        let unrelated = delta(2, hash_bytes(b"elsewhere"), vec![], vec![]);
        assert!(backend.commit_blocks(&[unrelated], &[d2]).is_err());
        assert_eq!(backend.fetch_tip().unwrap().unwrap().hash, d1.hash);
        assert_eq!(backend.fetch_utxos().unwrap(), utxos);
        assert!(backend.fetch_hash_at(2).unwrap().is_none());
    }

    #[test]
    fn test_write_state_replaces_previous_chain() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SledBackend::open(dir.path()).unwrap();
        let d1 = delta(1, Hash::zero(), vec![], vec![entry(1, 1)]);
        backend.put_batch(&d1).unwrap();

        let kept = entry(9, 4);
        let state = ChainState::from_parts(
            UtxoSet::from_entries(vec![kept.clone()]).unwrap(),
            vec![],
            4,
            hash_bytes(b"four"),
            40,
        );
        let main_chain = [hash_bytes(b"zero"), hash_bytes(b"one"), hash_bytes(b"two"), hash_bytes(b"three"), hash_bytes(b"four")];
        backend
            .write_state(&ChainImage {
                state: &state,
                main_chain: &main_chain,
                headers: &[],
                blocks: &[],
                deltas: &[],
            })
            .unwrap();
        assert_eq!(backend.fetch_utxos().unwrap(), vec![kept]);
        assert!(backend.fetch_delta(1).unwrap().is_none());
        assert_eq!(backend.fetch_hash_at(4).unwrap(), Some(main_chain[4]));
        let tip = backend.fetch_tip().unwrap().unwrap();
        assert_eq!((tip.height, tip.total_emission), (4, 40));
    }
}
