use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::config::ConsensusConstants;
use crate::consensus::Block;
use crate::constants::LOCK_TIME_THRESHOLD;
use crate::crypto::{Commitment, Hash};
use crate::storage::UtxoLookup;
use crate::transaction::Transaction;
use crate::validation::{TransactionValidator, ValidationError, ValidationState};

use super::{MempoolAddResult, MempoolError, DEFAULT_MAX_LOCK_DISTANCE, DEFAULT_MAX_TRANSACTIONS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MempoolStats {
    pub unconfirmed: usize,
    pub time_locked: usize,
    pub reorg: usize,
}

/// Concurrent transaction pool keyed by fingerprint.
///
/// Validation runs without locks so admissions proceed in parallel; the
/// conflict check and insert run under `admission` so a fingerprint or an
/// input is admitted at most once. Unconfirmed and time-locked transactions
/// share the capacity and the input index.
pub struct Mempool {
    validator: TransactionValidator,
    capacity: usize,
    /// Blocks ahead a time lock may point
    max_lock_distance: u64,
    block_interval: u64,
    /// Retention of mined transactions, in blocks
    reorg_depth: u64,
    unconfirmed: DashMap<Hash, Transaction>,
    time_locked: DashMap<Hash, Transaction>,
    /// Mined transactions and the height they were mined at
    reorg_pool: DashMap<Hash, (Transaction, u64)>,
    /// Input commitment to the fingerprint of the held transaction spending it
    spent_by: DashMap<Commitment, Hash>,
    /// Kernel signature hash to transaction fingerprint
    kernels: DashMap<Hash, Hash>,
    admission: Mutex<()>,
}

impl Mempool {
    pub fn new(constants: ConsensusConstants) -> Self {
        Self::with_capacity(constants, DEFAULT_MAX_TRANSACTIONS)
    }

    pub fn with_capacity(constants: ConsensusConstants, capacity: usize) -> Self {
        Self {
            reorg_depth: constants.pruning_horizon,
            block_interval: constants.target_block_interval,
            validator: TransactionValidator::new(constants),
            capacity,
            max_lock_distance: DEFAULT_MAX_LOCK_DISTANCE,
            unconfirmed: DashMap::new(),
            time_locked: DashMap::new(),
            reorg_pool: DashMap::new(),
            spent_by: DashMap::new(),
            kernels: DashMap::new(),
            admission: Mutex::new(()),
        }
    }

    pub fn with_max_lock_distance(mut self, blocks: u64) -> Self {
        self.max_lock_distance = blocks;
        self
    }

    /// Unconfirmed plus time-locked
    pub fn len(&self) -> usize {
        self.unconfirmed.len() + self.time_locked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            unconfirmed: self.unconfirmed.len(),
            time_locked: self.time_locked.len(),
            reorg: self.reorg_pool.len(),
        }
    }

    pub fn contains(&self, fingerprint: &Hash) -> bool {
        self.unconfirmed.contains_key(fingerprint) || self.time_locked.contains_key(fingerprint)
    }

    pub fn get(&self, fingerprint: &Hash) -> Option<Transaction> {
        self.unconfirmed
            .get(fingerprint)
            .or_else(|| self.time_locked.get(fingerprint))
            .map(|tx| tx.clone())
    }

    /// Validate `tx` for the block at `height` (the tip height + 1) and admit it
    pub fn insert<U: UtxoLookup>(
        &self,
        tx: Transaction,
        utxos: &U,
        height: u64,
        prev_hash: &Hash,
        now: u64,
    ) -> Result<MempoolAddResult, MempoolError> {
        let fingerprint = tx.fingerprint();
        if self.contains(&fingerprint) {
            trace!(%fingerprint, "Duplicate transaction");
            return Ok(MempoolAddResult::Duplicate);
        }

        let state = self.validator.validate(&tx, utxos, height, prev_hash, now);
        let _guard = self.admission.lock();
        if self.contains(&fingerprint) {
            return Ok(MempoolAddResult::Duplicate);
        }
        let locked = match state {
            ValidationState::Rejected(error) => return Ok(MempoolAddResult::Rejected(error)),
            ValidationState::TimeLocked => true,
            ValidationState::Validated => false,
        };
        if let Some(input) = tx
            .body
            .inputs
            .iter()
            .find(|i| self.spent_by.contains_key(&i.commitment))
        {
            return Ok(MempoolAddResult::Rejected(ValidationError::DoubleSpend(
                input.commitment,
            )));
        }
        if locked {
            self.check_lock_distance(&tx, height, now)?;
        }
        if self.len() >= self.capacity && !self.evict_for(&tx) {
            return Err(MempoolError::Full {
                capacity: self.capacity,
            });
        }
        self.index(fingerprint, &tx);
        if locked {
            debug!(%fingerprint, "Transaction time-locked");
            self.time_locked.insert(fingerprint, tx);
            Ok(MempoolAddResult::TimeLocked)
        } else {
            debug!(%fingerprint, fee = tx.fee().unwrap_or(0), "Transaction accepted");
            self.unconfirmed.insert(fingerprint, tx);
            Ok(MempoolAddResult::Accepted)
        }
    }

    fn check_lock_distance(&self, tx: &Transaction, height: u64, now: u64) -> Result<(), MempoolError> {
        for kernel in &tx.body.kernels {
            let lock = kernel.lock_height;
            let (current, limit) = if lock >= LOCK_TIME_THRESHOLD {
                (now, self.max_lock_distance.saturating_mul(self.block_interval))
            } else {
                (height, self.max_lock_distance)
            };
            if lock.saturating_sub(current) > limit {
                return Err(MempoolError::LockTooDistant { lock });
            }
        }
        Ok(())
    }

    fn index(&self, fingerprint: Hash, tx: &Transaction) {
        for input in &tx.body.inputs {
            self.spent_by.insert(input.commitment, fingerprint);
        }
        for kernel in &tx.body.kernels {
            self.kernels.insert(kernel.excess_sig.hash(), fingerprint);
        }
    }

    /// Remove a held transaction, unconfirmed or time-locked, and release
    /// its inputs
    fn remove_held(&self, fingerprint: &Hash) -> Option<Transaction> {
        let (_, tx) = self
            .unconfirmed
            .remove(fingerprint)
            .or_else(|| self.time_locked.remove(fingerprint))?;
        for input in &tx.body.inputs {
            self.spent_by.remove_if(&input.commitment, |_, owner| owner == fingerprint);
        }
        for kernel in &tx.body.kernels {
            self.kernels
                .remove_if(&kernel.excess_sig.hash(), |_, owner| owner == fingerprint);
        }
        Some(tx)
    }

    /// Drop the lowest-priority held transaction if `tx` pays more per weight
    fn evict_for(&self, tx: &Transaction) -> bool {
        let lowest = self
            .unconfirmed
            .iter()
            .chain(self.time_locked.iter())
            .map(|entry| (entry.value().fee_per_weight(), *entry.key()))
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));
        match lowest {
            Some((fee, fingerprint)) if fee < tx.fee_per_weight() => {
                debug!(%fingerprint, "Evicted low-fee transaction");
                self.remove_held(&fingerprint);
                true
            }
            _ => false,
        }
    }

    /// Highest fee-per-weight transactions first, at most `max`. Pool
    /// transactions never share inputs so the result can go into one block.
    pub fn retrieve(&self, max: usize) -> Vec<Transaction> {
        let mut txs: Vec<(u64, Hash, Transaction)> = self
            .unconfirmed
            .iter()
            .map(|entry| (entry.value().fee_per_weight(), *entry.key(), entry.value().clone()))
            .collect();
        txs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        txs.into_iter().take(max).map(|(_, _, tx)| tx).collect()
    }

    /// Remove transactions mined in `blocks` and any that double-spend their
    /// inputs. Mined transactions move to the reorg pool.
    pub fn remove_mined(&self, blocks: &[Block]) {
        let _guard = self.admission.lock();
        for block in blocks {
            let mut mined = HashSet::new();
            for kernel in &block.body.kernels {
                if let Some(owner) = self.kernels.get(&kernel.excess_sig.hash()) {
                    mined.insert(*owner);
                }
            }
            for fingerprint in &mined {
                if let Some(tx) = self.remove_held(fingerprint) {
                    self.reorg_pool.insert(*fingerprint, (tx, block.height()));
                }
            }
            let conflicting: HashSet<Hash> = block
                .body
                .inputs
                .iter()
                .filter_map(|i| self.spent_by.get(&i.commitment).map(|owner| *owner))
                .collect();
            for fingerprint in &conflicting {
                self.remove_held(fingerprint);
            }
            if !mined.is_empty() || !conflicting.is_empty() {
                debug!(
                    height = block.height(),
                    mined = mined.len(),
                    discarded = conflicting.len(),
                    "Pool updated for block"
                );
            }
            let floor = block.height().saturating_sub(self.reorg_depth);
            self.reorg_pool.retain(|_, (_, height)| *height > floor);
        }
    }

    /// Transactions from the reorg pool whose kernels were in `removed`
    pub fn take_reorged(&self, removed: &[Block]) -> Vec<Transaction> {
        let mut sigs = HashSet::new();
        for block in removed {
            sigs.extend(block.body.kernels.iter().map(|k| k.excess_sig.hash()));
        }
        let fingerprints: Vec<Hash> = self
            .reorg_pool
            .iter()
            .filter(|entry| {
                let (tx, _) = entry.value();
                tx.body.kernels.iter().any(|k| sigs.contains(&k.excess_sig.hash()))
            })
            .map(|entry| *entry.key())
            .collect();
        fingerprints
            .iter()
            .filter_map(|fingerprint| self.reorg_pool.remove(fingerprint).map(|(_, (tx, _))| tx))
            .collect()
    }

    /// Offer transactions again after a reorg. Returns how many were admitted.
    pub fn resubmit<U: UtxoLookup>(
        &self,
        txs: Vec<Transaction>,
        utxos: &U,
        height: u64,
        prev_hash: &Hash,
        now: u64,
    ) -> usize {
        let total = txs.len();
        let admitted = txs
            .into_iter()
            .filter(|tx| {
                matches!(
                    self.insert(tx.clone(), utxos, height, prev_hash, now),
                    Ok(MempoolAddResult::Accepted | MempoolAddResult::TimeLocked)
                )
            })
            .count();
        if total > 0 {
            info!(total, admitted, "Resubmitted reorged transactions");
        }
        admitted
    }

    /// Re-validate the pool against a new tip: time-locked transactions that
    /// became minable are promoted, anything now invalid is dropped
    pub fn process_new_height<U: UtxoLookup>(
        &self,
        utxos: &U,
        height: u64,
        prev_hash: &Hash,
        now: u64,
    ) {
        let _guard = self.admission.lock();
        let unconfirmed: Vec<(Hash, Transaction)> = self
            .unconfirmed
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (fingerprint, tx) in unconfirmed {
            match self.validator.validate(&tx, utxos, height, prev_hash, now) {
                ValidationState::Validated => {}
                ValidationState::TimeLocked => {
                    if let Some((_, tx)) = self.unconfirmed.remove(&fingerprint) {
                        self.time_locked.insert(fingerprint, tx);
                    }
                }
                ValidationState::Rejected(error) => {
                    debug!(%fingerprint, %error, "Dropping invalidated transaction");
                    self.remove_held(&fingerprint);
                }
            }
        }

        let locked: Vec<(Hash, Transaction)> = self
            .time_locked
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        let mut promoted = 0;
        for (fingerprint, tx) in locked {
            match self.validator.validate(&tx, utxos, height, prev_hash, now) {
                ValidationState::TimeLocked => {}
                ValidationState::Validated => {
                    // Inputs stay claimed; only the bucket changes
                    if let Some((_, tx)) = self.time_locked.remove(&fingerprint) {
                        self.unconfirmed.insert(fingerprint, tx);
                        promoted += 1;
                    }
                }
                ValidationState::Rejected(error) => {
                    debug!(%fingerprint, %error, "Dropping invalidated time-locked transaction");
                    self.remove_held(&fingerprint);
                }
            }
        }
        if promoted > 0 {
            debug!(height, promoted, "Time-locked transactions promoted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::crypto::SecretKey;
    use crate::storage::{UtxoEntry, UtxoSet};
    use crate::transaction::{TransactionBuilder, UnblindedOutput};

    fn constants() -> ConsensusConstants {
        ConsensusConstants::for_network(Network::LocalNet)
    }

    fn funded(values: &[u64]) -> (UtxoSet, Vec<UnblindedOutput>) {
        let outputs: Vec<UnblindedOutput> = values
            .iter()
            .map(|v| UnblindedOutput::new(*v, SecretKey::random()))
            .collect();
        let entries = outputs
            .iter()
            .map(|o| UtxoEntry::new(o.as_transaction_output(&SecretKey::random()), 1))
            .collect();
        (UtxoSet::from_entries(entries).unwrap(), outputs)
    }

    fn spend(input: &UnblindedOutput, fee: u64, lock_height: u64) -> Transaction {
        TransactionBuilder::new()
            .with_input(input.clone())
            .with_output(UnblindedOutput::new(input.value - fee, SecretKey::random()))
            .with_fee(fee)
            .with_lock_height(lock_height)
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_by_fingerprint() {
        let (utxos, outputs) = funded(&[100]);
        let pool = Mempool::new(constants());
        let tx = spend(&outputs[0], 5, 0);
        let tip = Hash::zero();
        assert_eq!(
            pool.insert(tx.clone(), &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::Accepted
        );
        assert_eq!(
            pool.insert(tx, &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::Duplicate
        );
        assert_eq!(pool.stats().unconfirmed, 1);
    }

    #[test]
    fn test_pool_double_spend_rejected() {
        let (utxos, outputs) = funded(&[100]);
        let pool = Mempool::new(constants());
        let tip = Hash::zero();
        pool.insert(spend(&outputs[0], 5, 0), &utxos, 5, &tip, 0).unwrap();
        assert!(matches!(
            pool.insert(spend(&outputs[0], 7, 0), &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::Rejected(ValidationError::DoubleSpend(_))
        ));
    }

    #[test]
    fn test_time_locked_promoted() {
        let (utxos, outputs) = funded(&[100]);
        let pool = Mempool::new(constants());
        let tip = Hash::zero();
        let tx = spend(&outputs[0], 5, 10);
        assert_eq!(
            pool.insert(tx.clone(), &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::TimeLocked
        );
        assert!(pool.retrieve(10).is_empty());
        pool.process_new_height(&utxos, 10, &tip, 0);
        assert_eq!(pool.retrieve(10), vec![tx]);
        assert_eq!(pool.stats().time_locked, 0);
    }

    #[test]
    fn test_retrieve_orders_by_fee() {
        let (utxos, outputs) = funded(&[100, 100, 100]);
        let pool = Mempool::new(constants());
        let tip = Hash::zero();
        for (output, fee) in outputs.iter().zip([6u64, 60, 30]) {
            pool.insert(spend(output, fee, 0), &utxos, 5, &tip, 0).unwrap();
        }
        let fees: Vec<u64> = pool.retrieve(2).iter().map(|tx| tx.fee().unwrap()).collect();
        assert_eq!(fees, vec![60, 30]);
    }

    #[test]
    fn test_full_pool_evicts_lowest_fee() {
        let (utxos, outputs) = funded(&[100, 100, 100]);
        let pool = Mempool::with_capacity(constants(), 1);
        let tip = Hash::zero();
        pool.insert(spend(&outputs[0], 12, 0), &utxos, 5, &tip, 0).unwrap();
        assert_eq!(
            pool.insert(spend(&outputs[1], 6, 0), &utxos, 5, &tip, 0),
            Err(MempoolError::Full { capacity: 1 })
        );
        assert_eq!(
            pool.insert(spend(&outputs[2], 60, 0), &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::Accepted
        );
        assert_eq!(pool.retrieve(5)[0].fee(), Some(60));
    }

    #[test]
    fn test_time_locked_claims_its_inputs() {
        let (utxos, outputs) = funded(&[100]);
        let pool = Mempool::with_capacity(constants(), 2);
        let tip = Hash::zero();
        assert_eq!(
            pool.insert(spend(&outputs[0], 5, 10), &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::TimeLocked
        );
        for fee in 6..56 {
            assert!(matches!(
                pool.insert(spend(&outputs[0], fee, 10), &utxos, 5, &tip, 0).unwrap(),
                MempoolAddResult::Rejected(ValidationError::DoubleSpend(_))
            ));
        }
        assert!(matches!(
            pool.insert(spend(&outputs[0], 9, 0), &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::Rejected(ValidationError::DoubleSpend(_))
        ));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.stats().time_locked, 1);
    }

    #[test]
    fn test_time_locked_counts_towards_capacity() {
        let (utxos, outputs) = funded(&[100, 100, 100, 100]);
        let pool = Mempool::with_capacity(constants(), 2);
        let tip = Hash::zero();
        for output in &outputs[..2] {
            assert_eq!(
                pool.insert(spend(output, 5, 10), &utxos, 5, &tip, 0).unwrap(),
                MempoolAddResult::TimeLocked
            );
        }
        assert_eq!(
            pool.insert(spend(&outputs[2], 5, 10), &utxos, 5, &tip, 0),
            Err(MempoolError::Full { capacity: 2 })
        );
        assert_eq!(
            pool.insert(spend(&outputs[2], 5, 0), &utxos, 5, &tip, 0),
            Err(MempoolError::Full { capacity: 2 })
        );

        // A better payer displaces a held one, whose input is released
        assert_eq!(
            pool.insert(spend(&outputs[3], 50, 0), &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::Accepted
        );
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().time_locked, 1);
        let claimed = outputs[..2]
            .iter()
            .filter(|output| pool.spent_by.contains_key(&output.commitment()))
            .count();
        assert_eq!(claimed, 1);
    }

    #[test]
    fn test_distant_locks_rejected() {
        let (utxos, outputs) = funded(&[100, 100, 100]);
        let pool = Mempool::new(constants()).with_max_lock_distance(10);
        let tip = Hash::zero();
        assert_eq!(
            pool.insert(spend(&outputs[0], 5, 16), &utxos, 5, &tip, 0),
            Err(MempoolError::LockTooDistant { lock: 16 })
        );
        assert_eq!(
            pool.insert(spend(&outputs[0], 5, 15), &utxos, 5, &tip, 0).unwrap(),
            MempoolAddResult::TimeLocked
        );

        // Timestamp locks get ten target intervals
        let now = LOCK_TIME_THRESHOLD;
        let interval = constants().target_block_interval;
        let far = now + 10 * interval + 1;
        assert_eq!(
            pool.insert(spend(&outputs[1], 5, far), &utxos, 5, &tip, now),
            Err(MempoolError::LockTooDistant { lock: far })
        );
        assert_eq!(
            pool.insert(spend(&outputs[2], 5, far - 1), &utxos, 5, &tip, now).unwrap(),
            MempoolAddResult::TimeLocked
        );
        assert_eq!(pool.stats().time_locked, 2);
    }
}
