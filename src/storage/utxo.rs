//! UTXO set implementation
//!
//! Live outputs sit in a persistent Merkle trie, so readers take O(1)
//! snapshots and a block is staged on its own version of the set before it
//! is committed. A spent index over the retained window stops a spent
//! commitment from reappearing.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use k256::ProjectivePoint;
use serde::{Deserialize, Serialize};

use crate::crypto::{Commitment, CryptoError, Hash};
use crate::transaction::TransactionOutput;

use super::{StorageError, UtxoTrie};

/// A live output and the height it was mined at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub output: TransactionOutput,
    pub mined_height: u64,
}

impl UtxoEntry {
    pub fn new(output: TransactionOutput, mined_height: u64) -> Self {
        Self {
            output,
            mined_height,
        }
    }

    pub fn commitment(&self) -> Commitment {
        self.output.commitment
    }
}

/// Read access to live outputs
pub trait UtxoLookup {
    fn fetch_utxo(&self, commitment: &Commitment) -> Option<UtxoEntry>;

    /// Whether the commitment was spent within the retained window
    fn is_spent(&self, commitment: &Commitment) -> bool;
}

/// Outputs removed and added by one block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoDelta {
    pub height: u64,
    pub spent: Vec<UtxoEntry>,
    pub created: Vec<UtxoEntry>,
}

/// Outputs after one block, not yet committed to the set they came from
#[derive(Debug, Clone)]
pub struct StagedUtxos {
    trie: UtxoTrie,
    delta: UtxoDelta,
}

impl StagedUtxos {
    pub fn delta(&self) -> &UtxoDelta {
        &self.delta
    }

    pub fn output_mr(&self) -> Hash {
        self.trie.output_root()
    }

    pub fn range_proof_mr(&self) -> Hash {
        self.trie.range_proof_root()
    }
}

/// Set of all unspent transaction outputs
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    trie: UtxoTrie,
    /// Spent commitment -> height it was spent at
    spent: Arc<BTreeMap<Commitment, u64>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from snapshot entries; duplicates are rejected
    pub fn from_entries(entries: Vec<UtxoEntry>) -> Result<Self, StorageError> {
        let mut trie = UtxoTrie::new();
        for entry in entries {
            let commitment = entry.commitment();
            if !trie.insert(entry) {
                return Err(StorageError::DuplicateOutput(commitment));
            }
        }
        Ok(Self {
            trie,
            spent: Arc::new(BTreeMap::new()),
        })
    }

    /// Point-in-time view sharing storage with this set
    pub fn snapshot(&self) -> UtxoSet {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn get(&self, commitment: &Commitment) -> Option<&UtxoEntry> {
        self.trie.get(commitment)
    }

    pub fn contains(&self, commitment: &Commitment) -> bool {
        self.trie.contains(commitment)
    }

    pub fn spent_height(&self, commitment: &Commitment) -> Option<u64> {
        self.spent.get(commitment).copied()
    }

    /// Entries in trie key order
    pub fn iter(&self) -> impl Iterator<Item = &UtxoEntry> {
        self.trie.iter()
    }

    pub fn entries(&self) -> Vec<UtxoEntry> {
        self.trie.iter().cloned().collect()
    }

    /// Spend `spends` and insert `inserts` at `height` on a new version of
    /// the set. Fails unless every spend is live and every insert is new.
    pub fn stage(
        &self,
        spends: &[Commitment],
        inserts: Vec<UtxoEntry>,
        height: u64,
    ) -> Result<StagedUtxos, StorageError> {
        let mut seen = HashSet::new();
        for commitment in spends {
            if !seen.insert(*commitment) {
                return Err(StorageError::AlreadySpent(*commitment));
            }
            if !self.trie.contains(commitment) {
                return Err(StorageError::UtxoNotFound(*commitment));
            }
        }
        let mut new = HashSet::new();
        for entry in &inserts {
            let commitment = entry.commitment();
            if self.trie.contains(&commitment) || !new.insert(commitment) {
                return Err(StorageError::DuplicateOutput(commitment));
            }
            if self.spent.contains_key(&commitment) || seen.contains(&commitment) {
                return Err(StorageError::AlreadySpent(commitment));
            }
        }

        let mut trie = self.trie.clone();
        let spent: Vec<UtxoEntry> = spends.iter().filter_map(|c| trie.remove(c)).collect();
        for entry in &inserts {
            trie.insert(entry.clone());
        }
        Ok(StagedUtxos {
            trie,
            delta: UtxoDelta {
                height,
                spent,
                created: inserts,
            },
        })
    }

    /// Adopt a version staged from this set
    pub fn commit(&mut self, staged: StagedUtxos) -> UtxoDelta {
        if !staged.delta.spent.is_empty() {
            let spent_index = Arc::make_mut(&mut self.spent);
            for entry in &staged.delta.spent {
                spent_index.insert(entry.commitment(), staged.delta.height);
            }
        }
        self.trie = staged.trie;
        staged.delta
    }

    /// Stage and commit in one step
    pub fn apply(
        &mut self,
        spends: &[Commitment],
        inserts: Vec<UtxoEntry>,
        height: u64,
    ) -> Result<UtxoDelta, StorageError> {
        let staged = self.stage(spends, inserts, height)?;
        Ok(self.commit(staged))
    }

    /// Undo `delta`, which must be the most recent delta applied
    pub fn rewind(&mut self, delta: &UtxoDelta) -> Result<(), StorageError> {
        for entry in &delta.created {
            if !self.trie.contains(&entry.commitment()) {
                return Err(StorageError::UtxoNotFound(entry.commitment()));
            }
        }
        for entry in &delta.created {
            self.trie.remove(&entry.commitment());
        }
        if !delta.spent.is_empty() {
            let spent_index = Arc::make_mut(&mut self.spent);
            for entry in &delta.spent {
                spent_index.remove(&entry.commitment());
            }
        }
        for entry in &delta.spent {
            self.trie.insert(entry.clone());
        }
        Ok(())
    }

    /// Record a spend that happened at `height`, e.g. when restoring from
    /// persisted block deltas
    pub fn mark_spent(&mut self, commitment: Commitment, height: u64) {
        Arc::make_mut(&mut self.spent).insert(commitment, height);
    }

    /// Forget spends older than `height`
    pub fn prune_spent_below(&mut self, height: u64) {
        if self.spent.values().any(|h| *h < height) {
            Arc::make_mut(&mut self.spent).retain(|_, h| *h >= height);
        }
    }

    /// Merkle root over live outputs
    pub fn output_mr(&self) -> Hash {
        self.trie.output_root()
    }

    /// Merkle root over live range proofs
    pub fn range_proof_mr(&self) -> Hash {
        self.trie.range_proof_root()
    }

    /// Sum of every live commitment
    pub fn commitment_sum(&self) -> Result<ProjectivePoint, CryptoError> {
        Commitment::sum(self.trie.iter().map(|e| &e.output.commitment))
    }
}

impl UtxoLookup for UtxoSet {
    fn fetch_utxo(&self, commitment: &Commitment) -> Option<UtxoEntry> {
        self.trie.get(commitment).cloned()
    }

    fn is_spent(&self, commitment: &Commitment) -> bool {
        self.spent.contains_key(commitment)
    }
}
