//! Block mining

mod miner;

pub use miner::{Miner, MiningResult};
