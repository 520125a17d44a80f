//! Transaction kernels
//!
//! The kernel carries the fee and lock height and proves, with a signature
//! by the excess, that the transaction balances. Kernels are never pruned.

use serde::{Deserialize, Serialize};

use crate::constants::LOCK_TIME_THRESHOLD;
use crate::crypto::{CryptoError, DomainHasher, Hash, PublicKey, SecretKey, Signature};

use super::kernel_features;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionKernel {
    pub features: u8,
    pub fee: u64,
    /// Block height (below 500 000 000) or UNIX time before which the
    /// transaction cannot be mined
    pub lock_height: u64,
    /// Public excess `r·G`
    pub excess: PublicKey,
    pub excess_sig: Signature,
}

impl TransactionKernel {
    /// Kernel signed with the excess blinding factor
    pub fn new_signed(features: u8, fee: u64, lock_height: u64, excess: &SecretKey) -> Self {
        let message = Self::build_message(features, fee, lock_height);
        Self {
            features,
            fee,
            lock_height,
            excess: excess.public_key(),
            excess_sig: Signature::sign(excess, &message),
        }
    }

    /// Challenge message binding the fee and lock height
    pub fn build_message(features: u8, fee: u64, lock_height: u64) -> Hash {
        DomainHasher::new("kernel_message")
            .chain([features])
            .chain(fee.to_le_bytes())
            .chain(lock_height.to_le_bytes())
            .finalize()
    }

    pub fn hash(&self) -> Hash {
        DomainHasher::new("kernel")
            .chain([self.features])
            .chain(self.fee.to_le_bytes())
            .chain(self.lock_height.to_le_bytes())
            .chain(self.excess.0)
            .chain(self.excess_sig.public_nonce)
            .chain(self.excess_sig.s)
            .finalize()
    }

    pub fn is_coinbase(&self) -> bool {
        self.features & kernel_features::COINBASE_KERNEL != 0
    }

    pub fn verify_signature(&self) -> Result<(), CryptoError> {
        let message = Self::build_message(self.features, self.fee, self.lock_height);
        self.excess_sig.verify(&self.excess, &message)
    }

    /// Whether the lock has passed for a block at `height` with time `now`
    pub fn is_unlocked(&self, height: u64, now: u64) -> bool {
        if self.lock_height >= LOCK_TIME_THRESHOLD {
            now >= self.lock_height
        } else {
            height >= self.lock_height
        }
    }
}
