use serde::{Deserialize, Serialize};

use crate::crypto::{DomainHasher, Hash, SecretKey};

use super::AggregateBody;

/// A Mimblewimble transaction: a body plus the blinding offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub offset: SecretKey,
    pub body: AggregateBody,
}

impl Transaction {
    pub fn new(offset: SecretKey, body: AggregateBody) -> Self {
        Self { offset, body }
    }

    /// Identity of the transaction in the mempool: a hash over its kernel
    /// signatures, which cannot change without re-signing
    pub fn fingerprint(&self) -> Hash {
        let mut hasher = DomainHasher::new("tx_fingerprint");
        for kernel in &self.body.kernels {
            hasher.update(kernel.excess_sig.hash().0);
        }
        hasher.finalize()
    }

    pub fn fee(&self) -> Option<u64> {
        self.body.total_fee()
    }

    /// Fee per input/output/kernel, used to order the mempool
    pub fn fee_per_weight(&self) -> u64 {
        let weight = (self.body.inputs.len() + self.body.outputs.len() * 4 + self.body.kernels.len())
            .max(1) as u64;
        self.fee().unwrap_or(0) / weight
    }

    /// Combine transactions into one: bodies concatenated, offsets summed
    pub fn aggregate(transactions: &[Transaction]) -> Transaction {
        let mut offset = SecretKey::zero();
        let mut body = AggregateBody::empty();
        for tx in transactions {
            offset = offset + tx.offset;
            body.merge(tx.body.clone());
        }
        Transaction { offset, body }
    }
}
