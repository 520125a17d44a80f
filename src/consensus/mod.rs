//! Consensus module - Block structure, wire encoding, proof of work,
//! difficulty and emission

mod block;
mod difficulty;
mod emission;
mod encoding;
pub mod pow;

pub use block::*;
pub use difficulty::*;
pub use emission::*;
pub use encoding::*;
pub use pow::{
    achieved_difficulty, build_merge_mining_data, difficulty_from_hash, AccumulatedDifficulty,
    PowAlgorithm, PowError, ProofOfWork,
};
