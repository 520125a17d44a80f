//! Node bootstrap helpers

mod genesis;

pub use genesis::{create_genesis_block, genesis_hash, verify_genesis_hash, GenesisInfo};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in seconds
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
