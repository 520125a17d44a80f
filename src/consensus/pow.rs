//! Hybrid proof of work
//!
//! Two algorithms share the chain. The primary algorithm is mined standalone:
//! its hash is Blake2b over the header mining hash and nonce. The secondary
//! algorithm is merge-mined: the header carries an auxiliary parent-chain header
//! that embeds the mining hash, and the PoW hash is that header's double SHA-256.
//!
//! Fork choice compares the geometric mean of the two accumulated difficulties,
//! so neither algorithm alone can outweigh the other.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::constants::MAX_POW_DATA_SIZE;
use crate::crypto::{hash_bytes, Hash};

/// Proof of work errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PowError {
    #[error("Unknown PoW algorithm tag {0}")]
    UnknownAlgorithm(u8),
    #[error("Auxiliary data does not commit to the mining hash")]
    MissingMergeMiningTag,
    #[error("PoW data of {0} bytes exceeds the maximum")]
    PowDataTooLarge(usize),
    #[error("Primary PoW carries unexpected algorithm data")]
    UnexpectedPowData,
}

/// Mining algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize)]
pub enum PowAlgorithm {
    /// Standalone Blake2b
    Primary,
    /// Merge-mined double SHA-256
    Secondary,
}

impl PowAlgorithm {
    pub fn as_u8(&self) -> u8 {
        match self {
            PowAlgorithm::Primary => 0,
            PowAlgorithm::Secondary => 1,
        }
    }

    pub fn from_u8(tag: u8) -> Result<Self, PowError> {
        match tag {
            0 => Ok(PowAlgorithm::Primary),
            1 => Ok(PowAlgorithm::Secondary),
            other => Err(PowError::UnknownAlgorithm(other)),
        }
    }
}

impl fmt::Display for PowAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowAlgorithm::Primary => write!(f, "primary"),
            PowAlgorithm::Secondary => write!(f, "secondary"),
        }
    }
}

/// PoW section of the block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfWork {
    /// Accumulated primary difficulty including this block
    pub accumulated_primary: u64,
    /// Accumulated secondary difficulty including this block
    pub accumulated_secondary: u64,
    pub pow_algo: PowAlgorithm,
    /// Algorithm specific data (auxiliary header for merge mining)
    pub pow_data: Vec<u8>,
}

impl ProofOfWork {
    pub fn new(algorithm: PowAlgorithm) -> Self {
        Self {
            accumulated_primary: 0,
            accumulated_secondary: 0,
            pow_algo: algorithm,
            pow_data: Vec::new(),
        }
    }

    pub fn accumulated(&self) -> AccumulatedDifficulty {
        AccumulatedDifficulty {
            primary: self.accumulated_primary,
            secondary: self.accumulated_secondary,
        }
    }
}

/// Running totals of both algorithms' target difficulties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccumulatedDifficulty {
    pub primary: u64,
    pub secondary: u64,
}

impl AccumulatedDifficulty {
    /// Genesis totals; both start at one so the geometric mean is never zero
    pub fn genesis() -> Self {
        Self {
            primary: 1,
            secondary: 1,
        }
    }

    /// Add one block's target difficulty to its algorithm's total
    pub fn add(&self, algorithm: PowAlgorithm, difficulty: u64) -> Option<Self> {
        let mut next = *self;
        match algorithm {
            PowAlgorithm::Primary => next.primary = next.primary.checked_add(difficulty)?,
            PowAlgorithm::Secondary => next.secondary = next.secondary.checked_add(difficulty)?,
        }
        Some(next)
    }

    pub fn get(&self, algorithm: PowAlgorithm) -> u64 {
        match algorithm {
            PowAlgorithm::Primary => self.primary,
            PowAlgorithm::Secondary => self.secondary,
        }
    }

    /// `ceil(sqrt(primary × secondary))`, computed locally and never transmitted
    pub fn total_work(&self) -> u128 {
        let product = BigUint::from(self.primary) * BigUint::from(self.secondary);
        let root = product.sqrt();
        let root = if &root * &root < product { root + 1u32 } else { root };
        // sqrt of a u128 product always fits in u64
        root.iter_u64_digits().next().map(u128::from).unwrap_or(0)
    }
}

/// Auxiliary merge-mining data: a parent-chain header committing to our mining hash
pub fn build_merge_mining_data(mining_hash: &Hash, aux_nonce: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 + 8);
    data.extend_from_slice(b"MMTG");
    data.extend_from_slice(&mining_hash.0);
    data.extend_from_slice(&aux_nonce.to_le_bytes());
    data
}

/// PoW hash of the header for its claimed algorithm
pub fn pow_hash(
    algorithm: PowAlgorithm,
    mining_hash: &Hash,
    nonce: u64,
    pow_data: &[u8],
) -> Result<Hash, PowError> {
    if pow_data.len() > MAX_POW_DATA_SIZE {
        return Err(PowError::PowDataTooLarge(pow_data.len()));
    }
    match algorithm {
        PowAlgorithm::Primary => {
            if !pow_data.is_empty() {
                return Err(PowError::UnexpectedPowData);
            }
            let mut preimage = Vec::with_capacity(40);
            preimage.extend_from_slice(&mining_hash.0);
            preimage.extend_from_slice(&nonce.to_le_bytes());
            Ok(hash_bytes(&preimage))
        }
        PowAlgorithm::Secondary => {
            if !pow_data.windows(32).any(|window| window == mining_hash.0) {
                return Err(PowError::MissingMergeMiningTag);
            }
            let first = Sha256::digest(pow_data);
            Ok(Hash(Sha256::digest(first).into()))
        }
    }
}

/// Difficulty achieved by a PoW hash: `(2^256 - 1) / hash`, saturating at u64
pub fn difficulty_from_hash(hash: &Hash) -> u64 {
    let value = BigUint::from_bytes_be(&hash.0);
    if value == BigUint::from(0u32) {
        return u64::MAX;
    }
    let max = (BigUint::from(1u32) << 256usize) - 1u32;
    let difficulty = max / value;
    if difficulty > BigUint::from(u64::MAX) {
        u64::MAX
    } else {
        difficulty.iter_u64_digits().next().unwrap_or(0)
    }
}

/// Difficulty achieved by a header's proof of work
pub fn achieved_difficulty(
    algorithm: PowAlgorithm,
    mining_hash: &Hash,
    nonce: u64,
    pow_data: &[u8],
) -> Result<u64, PowError> {
    Ok(difficulty_from_hash(&pow_hash(algorithm, mining_hash, nonce, pow_data)?))
}
