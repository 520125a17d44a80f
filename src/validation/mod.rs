//! Transaction and block validation
//!
//! Validators never mutate committed state. Block bodies are applied to a
//! staged copy of the chain state; the caller swaps it in only on success.

mod block;
mod helpers;
mod transaction;

pub use block::*;
pub use helpers::*;
pub use transaction::*;

use thiserror::Error;

use crate::consensus::PowError;
use crate::covenants::CovenantError;
use crate::crypto::{Commitment, CryptoError};
use crate::script::ScriptError;

/// Validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    // Malformed input
    #[error("Body is not in canonical order")]
    UnsortedBody,
    #[error("Body contains duplicate inputs, outputs or kernels")]
    DuplicateEntries,
    #[error("Output {0} is spent in the same body")]
    CutThrough(Commitment),
    #[error("Output {0} has malformed features")]
    MalformedFeatures(Commitment),
    #[error("Covenant of {size} bytes exceeds {max}")]
    CovenantTooLarge { size: usize, max: usize },
    #[error("Output {0} carries an undecodable covenant")]
    MalformedCovenant(Commitment),
    #[error("Invalid range proof for {0}")]
    InvalidRangeProof(Commitment),
    #[error("Invalid metadata signature for {0}")]
    InvalidMetadataSignature(Commitment),
    #[error("Invalid script signature for {0}")]
    InvalidScriptSignature(Commitment),
    #[error("Invalid kernel signature")]
    InvalidKernelSignature,
    #[error("Commitments do not balance")]
    BalanceMismatch,
    #[error("Fee overflow")]
    FeeOverflow,
    #[error("Transaction contains coinbase outputs or kernels")]
    CoinbaseInTransaction,
    #[error("Body has no kernels")]
    MissingKernel,
    #[error("Invalid coinbase: {0}")]
    InvalidCoinbase(String),
    #[error("Invalid proof of work: {0}")]
    Pow(#[from] PowError),
    #[error("Achieved difficulty {achieved} below target {target}")]
    InsufficientDifficulty { achieved: u64, target: u64 },
    #[error("Accumulated difficulty does not match the parent plus target")]
    AccumulatedDifficultyMismatch,
    #[error("Unsupported header version {0}")]
    InvalidVersion(u16),
    #[error("Expected height {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },
    #[error("Previous hash does not match the parent")]
    PrevHashMismatch,
    #[error("Header {0} Merkle root does not match the state")]
    MerkleRootMismatch(&'static str),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Block or its ancestor was previously rejected")]
    KnownInvalid,

    // Consensus violations against the current state
    #[error("Input {0} does not spend a live output")]
    UnknownInput(Commitment),
    #[error("Input {0} spends an already spent output")]
    DoubleSpend(Commitment),
    #[error("Output {0} already exists")]
    OutputExists(Commitment),
    #[error("Input {commitment} is immature until height {maturity}")]
    ImmatureInput { commitment: Commitment, maturity: u64 },
    #[error("Kernel locked until {lock_height}")]
    KernelLocked { lock_height: u64 },
    #[error("Script for {commitment} failed: {reason}")]
    ScriptFailed {
        commitment: Commitment,
        reason: ScriptError,
    },
    #[error("Covenant on {commitment} failed: {reason}")]
    CovenantFailed {
        commitment: Commitment,
        reason: CovenantError,
    },
    #[error("Timestamp {timestamp} not after median time past {median}")]
    TimestampTooOld { timestamp: u64, median: u64 },
    #[error("Timestamp {timestamp} beyond future limit {limit}")]
    TimestampInFuture { timestamp: u64, limit: u64 },
    #[error("State error: {0}")]
    State(String),
}

impl ValidationError {
    /// Errors that prove the sender relayed junk, as opposed to data that
    /// conflicts with our current view of the chain
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ValidationError::UnsortedBody
                | ValidationError::DuplicateEntries
                | ValidationError::CutThrough(_)
                | ValidationError::MalformedFeatures(_)
                | ValidationError::CovenantTooLarge { .. }
                | ValidationError::MalformedCovenant(_)
                | ValidationError::InvalidRangeProof(_)
                | ValidationError::InvalidMetadataSignature(_)
                | ValidationError::InvalidScriptSignature(_)
                | ValidationError::InvalidKernelSignature
                | ValidationError::BalanceMismatch
                | ValidationError::FeeOverflow
                | ValidationError::CoinbaseInTransaction
                | ValidationError::MissingKernel
                | ValidationError::InvalidCoinbase(_)
                | ValidationError::Pow(_)
                | ValidationError::InsufficientDifficulty { .. }
                | ValidationError::AccumulatedDifficultyMismatch
                | ValidationError::InvalidVersion(_)
                | ValidationError::InvalidHeight { .. }
                | ValidationError::PrevHashMismatch
                | ValidationError::MerkleRootMismatch(_)
                | ValidationError::Crypto(_)
                | ValidationError::KnownInvalid
        )
    }
}

/// Outcome of validating a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationState {
    Validated,
    /// Valid, but a lock height or input maturity has not been reached
    TimeLocked,
    Rejected(ValidationError),
}

impl ValidationState {
    pub fn is_validated(&self) -> bool {
        matches!(self, ValidationState::Validated)
    }
}
