//! Mimblewimble consensus core
//!
//! Confidential UTXO ledger with Pedersen commitments, spending scripts and
//! covenants, secured by a hybrid proof of work (one standalone algorithm and
//! one merge-mined algorithm). The crate covers the data model, transaction and
//! block validation, covenant execution, chain selection with bounded reorgs,
//! difficulty accounting and horizon synchronisation.

pub mod chain;
pub mod config;
pub mod consensus;
pub mod covenants;
pub mod crypto;
pub mod mempool;
pub mod mining;
pub mod node;
pub mod p2p;
pub mod script;
pub mod storage;
pub mod sync;
pub mod transaction;
pub mod validation;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Header version produced by this implementation
    pub const BLOCKCHAIN_VERSION: u16 = 1;

    /// Maximum nesting depth of a covenant expression
    pub const COVENANT_MAX_DEPTH: usize = 16;

    /// Maximum number of field tags in a `Fields` covenant argument
    pub const COVENANT_MAX_FIELDS: usize = 9;

    /// Ancestors scanned per difficulty-window slot when collecting the
    /// blocks of one algorithm
    pub const DIFFICULTY_WINDOW_LOOKBACK: usize = 4;

    /// Number of previous timestamps in the median-time-past
    pub const MEDIAN_TIMESTAMP_COUNT: usize = 11;

    /// Kernel lock values at or above this are UNIX timestamps
    pub const LOCK_TIME_THRESHOLD: u64 = 500_000_000;

    /// Maximum script execution stack depth
    pub const MAX_STACK_SIZE: usize = 255;

    /// Maximum length of merge-mining auxiliary data
    pub const MAX_POW_DATA_SIZE: usize = 1024;
}
