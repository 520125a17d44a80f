//! Chain synchronisation
//!
//! `Idle -> Synchronizing -> Idle`. A node that is only a few blocks behind,
//! or on a fork inside the reorg window, downloads just the missing blocks.
//! Otherwise it syncs from a horizon snapshot: every header from genesis, the
//! UTXO set at the horizon height, then every block up to the tip. Nothing is
//! committed until the whole download has been verified, so a cancelled sync
//! leaves the chain as it was.

mod coordinator;
mod liveness;
mod server;

pub use coordinator::{SyncConfig, SyncCoordinator, SyncOutcome, SyncState};
pub use liveness::{probe_peers, LivenessReport, LivenessService};
pub use server::serve_request;

use thiserror::Error;

use crate::chain::ChainError;
use crate::p2p::{PeerId, TransportError};
use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("A sync is already running")]
    AlreadySynchronizing,
    #[error("Sync cancelled")]
    Cancelled,
    #[error("Unexpected response from {0}")]
    UnexpectedResponse(PeerId),
    #[error("Invalid header {height} from {peer}: {error}")]
    InvalidHeader {
        peer: PeerId,
        height: u64,
        error: ValidationError,
    },
    #[error("Invalid horizon snapshot from {peer}: {error}")]
    InvalidSnapshot { peer: PeerId, error: ValidationError },
    #[error("Invalid block {height} from {peer}: {error}")]
    InvalidBlock {
        peer: PeerId,
        height: u64,
        error: ValidationError,
    },
    #[error("Chain from {0} has no more work than ours")]
    InsufficientWork(PeerId),
    #[error("No peer could be synced from")]
    AllPeersFailed,
}
