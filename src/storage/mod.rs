//! Storage module - UTXO set, chain state and persistence backends

mod backend;
pub mod db;
mod state;
mod trie;
mod utxo;

pub use backend::*;
pub use db::SledBackend;
pub use state::*;
pub use trie::UtxoTrie;
pub use utxo::*;

use thiserror::Error;

use crate::crypto::Commitment;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Output {0} not found")]
    UtxoNotFound(Commitment),
    #[error("Output {0} already exists")]
    DuplicateOutput(Commitment),
    #[error("Output {0} already spent")]
    AlreadySpent(Commitment),
    #[error("No data at height {0}")]
    HeightNotFound(u64),
    #[error("Database is empty")]
    EmptyDatabase,
    #[error("Corrupt chain data: {0}")]
    Corrupt(String),
}
