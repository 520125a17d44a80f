//! Aggregate body shared by transactions and blocks

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::crypto::{Commitment, CryptoError, PublicKey};

use super::{TransactionInput, TransactionKernel, TransactionOutput};

/// Inputs, outputs and kernels in canonical order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateBody {
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub kernels: Vec<TransactionKernel>,
}

impl AggregateBody {
    /// Create a body and sort it
    pub fn new(
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        kernels: Vec<TransactionKernel>,
    ) -> Self {
        let mut body = Self {
            inputs,
            outputs,
            kernels,
        };
        body.sort();
        body
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty() && self.kernels.is_empty()
    }

    /// Canonical order: inputs and outputs by commitment, kernels by hash
    pub fn sort(&mut self) {
        self.inputs.sort_by(|a, b| a.commitment.cmp(&b.commitment));
        self.outputs.sort_by(|a, b| a.commitment.cmp(&b.commitment));
        self.kernels.sort_by_cached_key(|k| k.hash());
    }

    pub fn is_sorted(&self) -> bool {
        let kernel_hashes: Vec<_> = self.kernels.iter().map(|k| k.hash()).collect();
        self.inputs.windows(2).all(|w| w[0].commitment <= w[1].commitment)
            && self.outputs.windows(2).all(|w| w[0].commitment <= w[1].commitment)
            && kernel_hashes.windows(2).all(|w| w[0] <= w[1])
    }

    /// Any repeated input, output or kernel
    pub fn has_duplicates(&self) -> bool {
        let mut inputs = HashSet::new();
        let mut outputs = HashSet::new();
        let mut kernels = HashSet::new();
        !(self.inputs.iter().all(|i| inputs.insert(i.commitment))
            && self.outputs.iter().all(|o| outputs.insert(o.commitment))
            && self.kernels.iter().all(|k| kernels.insert(k.hash())))
    }

    /// Output commitments that are also spent in this body
    pub fn cut_through_commitments(&self) -> Vec<Commitment> {
        let spent: HashSet<_> = self.inputs.iter().map(|i| i.commitment).collect();
        self.outputs
            .iter()
            .map(|o| o.commitment)
            .filter(|c| spent.contains(c))
            .collect()
    }

    pub fn total_fee(&self) -> Option<u64> {
        self.kernels
            .iter()
            .try_fold(0u64, |acc, k| acc.checked_add(k.fee))
    }

    pub fn max_lock_height(&self) -> u64 {
        self.kernels.iter().map(|k| k.lock_height).max().unwrap_or(0)
    }

    pub fn coinbase_outputs(&self) -> impl Iterator<Item = &TransactionOutput> {
        self.outputs.iter().filter(|o| o.is_coinbase())
    }

    pub fn coinbase_kernels(&self) -> impl Iterator<Item = &TransactionKernel> {
        self.kernels.iter().filter(|k| k.is_coinbase())
    }

    /// Sum of kernel excesses as a commitment (`Σ excess·G`)
    pub fn total_excess(&self) -> Result<Commitment, CryptoError> {
        let excesses: Result<Vec<Commitment>, CryptoError> = self
            .kernels
            .iter()
            .map(|k| Commitment::from_public_key(&k.excess))
            .collect();
        Ok(Commitment::from_point(&Commitment::sum(excesses?.iter())?))
    }

    /// Merge another body into this one and restore canonical order
    pub fn merge(&mut self, other: AggregateBody) {
        self.inputs.extend(other.inputs);
        self.outputs.extend(other.outputs);
        self.kernels.extend(other.kernels);
        self.sort();
    }

    pub fn excess_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.kernels.iter().map(|k| &k.excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::script::ExecutionStack;
    use crate::transaction::UnblindedOutput;

    fn input(value: u64) -> TransactionInput {
        TransactionInput::new_signed(
            Commitment::from_value(value),
            ExecutionStack::empty(),
            &SecretKey::random(),
        )
    }

    #[test]
    fn test_sorting() {
        let body = AggregateBody::new(vec![input(3), input(1), input(2)], vec![], vec![]);
        assert!(body.is_sorted());
        let mut unsorted = body.clone();
        unsorted.inputs.reverse();
        assert!(!unsorted.is_sorted());
    }

    #[test]
    fn test_duplicates() {
        let body = AggregateBody::new(vec![input(3), input(3)], vec![], vec![]);
        assert!(body.has_duplicates());
        let body = AggregateBody::new(vec![input(3), input(4)], vec![], vec![]);
        assert!(!body.has_duplicates());
    }

    #[test]
    fn test_cut_through_detected() {
        let unblinded = UnblindedOutput::new(9, SecretKey::random());
        let output = unblinded.as_transaction_output(&SecretKey::random());
        let spend = unblinded.as_transaction_input();
        let body = AggregateBody::new(vec![spend], vec![output.clone()], vec![]);
        assert_eq!(body.cut_through_commitments(), vec![output.commitment]);
    }
}
