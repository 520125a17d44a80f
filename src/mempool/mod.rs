//! Transaction pool
//!
//! Holds validated transactions waiting to be mined, time-locked ones waiting
//! for their lock or maturity, and recently mined ones so a reorg can return
//! them to the pool.

mod pool;

pub use pool::{Mempool, MempoolStats};

use thiserror::Error;

use crate::validation::ValidationError;

/// Default maximum number of held transactions, time-locked ones included
pub const DEFAULT_MAX_TRANSACTIONS: usize = 10_000;

/// Default number of blocks ahead a time lock may point. Timestamp locks get
/// the same allowance in target block intervals.
pub const DEFAULT_MAX_LOCK_DISTANCE: u64 = 720;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Mempool full ({capacity} transactions) and the fee is too low to evict any")]
    Full { capacity: usize },
    #[error("Lock {lock} is further ahead than the pool holds transactions for")]
    LockTooDistant { lock: u64 },
}

/// Outcome of offering a transaction to the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolAddResult {
    Accepted,
    /// Valid but not yet minable; held until its lock or inputs mature.
    /// Counts towards capacity and claims its inputs like any other.
    TimeLocked,
    /// A transaction with the same fingerprint is already held
    Duplicate,
    Rejected(ValidationError),
}

impl MempoolAddResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MempoolAddResult::Accepted | MempoolAddResult::TimeLocked)
    }
}
