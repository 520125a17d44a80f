use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{BlockAddResult, Blockchain, ChainError, ChainHandle, ChainMetadata, HeaderArena};
use crate::config::{ConsensusConstants, NodeConfig};
use crate::consensus::{Block, BlockHeader};
use crate::crypto::SecretKey;
use crate::node::unix_time;
use crate::p2p::{
    PeerId, SyncRequest, SyncResponse, Transport, MALFORMED_PENALTY, MAX_BLOCKS_PER_REQUEST,
    MAX_HEADERS_PER_REQUEST,
};
use crate::storage::{ChainState, MemoryBackend, UtxoEntry, UtxoSet};
use crate::transaction::TransactionKernel;
use crate::validation::{
    verify_horizon_balance, verify_kernel_signatures, verify_outputs, BlockValidator,
    ValidationError,
};

use super::{probe_peers, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Synchronizing,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub request_timeout: Duration,
    pub header_batch: u64,
    pub block_batch: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            header_batch: MAX_HEADERS_PER_REQUEST,
            block_batch: MAX_BLOCKS_PER_REQUEST,
        }
    }
}

impl From<&NodeConfig> for SyncConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No peer has more work than the local chain
    UpToDate,
    /// Missing blocks downloaded from a common ancestor
    BlockSync { peer: PeerId, from: u64, to: u64 },
    /// Chain rebuilt from a horizon snapshot
    HorizonSync {
        peer: PeerId,
        horizon_height: u64,
        height: u64,
    },
}

/// Resets the coordinator to `Idle` however the sync ends
struct Running<'a>(&'a Mutex<SyncState>);

impl<'a> Running<'a> {
    fn enter(state: &'a Mutex<SyncState>) -> Result<Self, SyncError> {
        let mut guard = state.lock();
        if *guard == SyncState::Synchronizing {
            return Err(SyncError::AlreadySynchronizing);
        }
        *guard = SyncState::Synchronizing;
        Ok(Self(state))
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        *self.0.lock() = SyncState::Idle;
    }
}

/// Everything downloaded for a horizon sync, verified but not yet committed
struct HorizonDownload {
    headers: Vec<BlockHeader>,
    horizon_height: u64,
    state: ChainState,
    blocks: Vec<Block>,
}

pub struct SyncCoordinator {
    chain: ChainHandle,
    transport: Arc<dyn Transport>,
    genesis: Block,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl SyncCoordinator {
    pub fn new(
        chain: ChainHandle,
        transport: Arc<dyn Transport>,
        genesis: Block,
        config: SyncConfig,
    ) -> Self {
        Self {
            chain,
            transport,
            genesis,
            config,
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    fn constants(&self) -> ConsensusConstants {
        self.chain.read().constants().clone()
    }

    async fn request(&self, peer: &PeerId, request: SyncRequest) -> Result<SyncResponse, SyncError> {
        Ok(self
            .transport
            .request(peer, request, self.config.request_timeout)
            .await?)
    }

    fn unexpected(&self, peer: &PeerId) -> SyncError {
        self.chain.peers().record_misbehaviour(peer, MALFORMED_PENALTY);
        SyncError::UnexpectedResponse(peer.clone())
    }

    /// Bring the local chain up to the best peer's
    pub async fn synchronize(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let _running = Running::enter(&self.state)?;
        let local_work = self.chain.metadata().total_work();
        let live = probe_peers(&self.chain, self.transport.as_ref(), self.config.request_timeout).await;
        let candidates: Vec<(PeerId, ChainMetadata)> = self
            .chain
            .peers()
            .sync_candidates()
            .into_iter()
            .filter(|(peer, metadata)| {
                metadata.total_work() > local_work && live.iter().any(|(p, _)| p == peer)
            })
            .collect();
        if candidates.is_empty() {
            debug!("No peer ahead of local chain");
            return Ok(SyncOutcome::UpToDate);
        }
        info!(candidates = candidates.len(), "Synchronizing");

        for (peer, metadata) in candidates {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match self.sync_from(&peer, &metadata, cancel).await {
                Ok(outcome) => {
                    info!(?outcome, "Sync complete");
                    return Ok(outcome);
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(error) => warn!(%peer, %error, "Sync from peer failed, trying next"),
            }
        }
        Err(SyncError::AllPeersFailed)
    }

    async fn sync_from(
        &self,
        peer: &PeerId,
        metadata: &ChainMetadata,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        match self.find_common_ancestor(peer, metadata).await? {
            Some(ancestor) if ancestor >= metadata.pruned_height => {
                match self.block_sync(peer, ancestor + 1, metadata.height, cancel).await {
                    Err(SyncError::Chain(ChainError::ReorgBeyondHorizon { .. })) => {
                        info!(%peer, "Fork deeper than the reorg window, full resync");
                        self.horizon_sync(peer, metadata, cancel).await
                    }
                    result => result,
                }
            }
            _ => self.horizon_sync(peer, metadata, cancel).await,
        }
    }

    async fn peer_hash_matches(&self, peer: &PeerId, height: u64) -> Result<bool, SyncError> {
        match self.request(peer, SyncRequest::HeaderAtHeight(height)).await? {
            SyncResponse::Header(Some(header)) => {
                if header.height != height {
                    return Err(self.unexpected(peer));
                }
                Ok(self.chain.read().hash_at(height) == Some(header.hash()))
            }
            SyncResponse::Header(None) => Ok(false),
            _ => Err(self.unexpected(peer)),
        }
    }

    /// Highest height within the reorg window at which the local main chain
    /// and the peer's agree. `None` means no ancestor inside the window.
    pub async fn find_common_ancestor(
        &self,
        peer: &PeerId,
        metadata: &ChainMetadata,
    ) -> Result<Option<u64>, SyncError> {
        let (floor, top) = {
            let chain = self.chain.read();
            (chain.reorg_floor(), chain.height().min(metadata.height))
        };
        if top < floor || !self.peer_hash_matches(peer, floor).await? {
            return Ok(None);
        }
        if self.peer_hash_matches(peer, top).await? {
            return Ok(Some(top));
        }
        // Agreement is monotone: once the chains split they never rejoin
        let (mut agree, mut differ) = (floor, top);
        while differ - agree > 1 {
            let mid = agree + (differ - agree) / 2;
            if self.peer_hash_matches(peer, mid).await? {
                agree = mid;
            } else {
                differ = mid;
            }
        }
        Ok(Some(agree))
    }

    async fn fetch_blocks(&self, peer: &PeerId, from: u64, to: u64) -> Result<Vec<Block>, SyncError> {
        match self.request(peer, SyncRequest::Blocks { from, to }).await? {
            SyncResponse::Blocks(blocks)
                if !blocks.is_empty()
                    && blocks.len() as u64 <= to - from + 1
                    && blocks.iter().zip(from..).all(|(b, h)| b.height() == h) =>
            {
                Ok(blocks)
            }
            _ => Err(self.unexpected(peer)),
        }
    }

    /// Download blocks `from..=to` and offer them to the chain one by one
    async fn block_sync(
        &self,
        peer: &PeerId,
        from: u64,
        to: u64,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        info!(%peer, from, to, "Block sync");
        let mut next = from;
        while next <= to {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let end = to.min(next + self.config.block_batch - 1);
            for block in self.fetch_blocks(peer, next, end).await? {
                let height = block.height();
                if let BlockAddResult::Rejected(error) =
                    self.chain.submit_block(block, Some(peer), unix_time())?
                {
                    return Err(SyncError::InvalidBlock {
                        peer: peer.clone(),
                        height,
                        error,
                    });
                }
                next = height + 1;
            }
        }
        Ok(SyncOutcome::BlockSync {
            peer: peer.clone(),
            from,
            to,
        })
    }

    async fn horizon_sync(
        &self,
        peer: &PeerId,
        metadata: &ChainMetadata,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let download = self.download_horizon(peer, metadata, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // Staged in memory; nothing reaches the live backend until `replace`
        let mut chain = Blockchain::from_horizon_snapshot(
            self.constants(),
            Arc::new(MemoryBackend::new()),
            &self.genesis,
            &download.headers[..download.horizon_height as usize],
            download.state,
        )?;
        let now = unix_time();
        for block in download.blocks {
            let height = block.height();
            match chain.add_block(block, now)? {
                BlockAddResult::AcceptedTip => {}
                BlockAddResult::Rejected(error) => {
                    return Err(SyncError::InvalidBlock {
                        peer: peer.clone(),
                        height,
                        error,
                    })
                }
                _ => return Err(self.unexpected(peer)),
            }
        }
        let height = chain.height();
        chain.take_changes();
        self.chain.replace(chain, now)?;
        info!(%peer, horizon = download.horizon_height, height, "Horizon sync committed");
        Ok(SyncOutcome::HorizonSync {
            peer: peer.clone(),
            horizon_height: download.horizon_height,
            height,
        })
    }

    async fn download_horizon(
        &self,
        peer: &PeerId,
        metadata: &ChainMetadata,
        cancel: &CancellationToken,
    ) -> Result<HorizonDownload, SyncError> {
        let constants = self.constants();
        let validator = BlockValidator::new(constants.clone());
        let headers = self.download_headers(peer, metadata, &validator, cancel).await?;
        let height = headers.len() as u64;
        let horizon_height = height
            .saturating_sub(constants.pruning_horizon)
            .max(metadata.pruned_height)
            .min(height);
        info!(%peer, height, horizon_height, "Headers verified, fetching horizon state");

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let snapshot = match self
            .request(peer, SyncRequest::UtxoSnapshot { height: horizon_height })
            .await?
        {
            SyncResponse::UtxoSnapshot(snapshot) if snapshot.height == horizon_height => snapshot,
            _ => return Err(self.unexpected(peer)),
        };
        let state = self
            .verify_snapshot(&headers, horizon_height, snapshot.utxos, snapshot.kernels, &constants)
            .map_err(|error| {
                self.chain.peers().record_misbehaviour(peer, MALFORMED_PENALTY);
                SyncError::InvalidSnapshot {
                    peer: peer.clone(),
                    error,
                }
            })?;

        let mut staged = state.clone();
        let mut blocks = Vec::new();
        let mut next = horizon_height + 1;
        while next <= height {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let end = height.min(next + self.config.block_batch - 1);
            for block in self.fetch_blocks(peer, next, end).await? {
                let block_height = block.height();
                let expected = &headers[block_height as usize - 1];
                if block.header != *expected {
                    return Err(self.unexpected(peer));
                }
                let invalid = |error| SyncError::InvalidBlock {
                    peer: peer.clone(),
                    height: block_height,
                    error,
                };
                let next_state = validator.validate_body(&block, &staged).map_err(invalid)?;
                staged
                    .commit_block(next_state)
                    .map_err(|e| invalid(ValidationError::State(e.to_string())))?;
                blocks.push(block);
                next = block_height + 1;
            }
        }
        Ok(HorizonDownload {
            headers,
            horizon_height,
            state,
            blocks,
        })
    }

    /// Download and validate every header from height 1 to the peer's tip
    async fn download_headers(
        &self,
        peer: &PeerId,
        metadata: &ChainMetadata,
        validator: &BlockValidator,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockHeader>, SyncError> {
        let mut arena = HeaderArena::new(self.genesis.header.clone());
        let mut headers: Vec<BlockHeader> = Vec::new();
        let now = unix_time();
        let mut next = 1;
        while next <= metadata.height {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let count = self.config.header_batch.min(metadata.height - next + 1);
            let batch = match self
                .request(peer, SyncRequest::Headers { from: next, count })
                .await?
            {
                SyncResponse::Headers(batch) if !batch.is_empty() => batch,
                _ => return Err(self.unexpected(peer)),
            };
            for header in batch {
                let height = header.height;
                let checked = if height == next {
                    arena.check_header(&header, validator, now)
                } else {
                    Err(ValidationError::InvalidHeight {
                        expected: next,
                        got: height,
                    })
                };
                let target = checked.map_err(|error| {
                    self.chain.peers().record_misbehaviour(peer, MALFORMED_PENALTY);
                    SyncError::InvalidHeader {
                        peer: peer.clone(),
                        height,
                        error,
                    }
                })?;
                arena.insert(header.clone(), target);
                headers.push(header);
                next += 1;
            }
        }
        debug!(%peer, count = headers.len(), "Header chain downloaded");

        let work = headers
            .last()
            .map_or(0, |header| header.pow.accumulated().total_work());
        if work <= self.chain.metadata().total_work() {
            return Err(SyncError::InsufficientWork(peer.clone()));
        }
        Ok(headers)
    }

    /// Check a downloaded UTXO set against the header at `horizon_height`
    fn verify_snapshot(
        &self,
        headers: &[BlockHeader],
        horizon_height: u64,
        utxos: Vec<UtxoEntry>,
        kernels: Vec<TransactionKernel>,
        constants: &ConsensusConstants,
    ) -> Result<ChainState, ValidationError> {
        if horizon_height == 0 {
            return ChainState::new(&self.genesis).map_err(|e| ValidationError::State(e.to_string()));
        }
        let header = &headers[horizon_height as usize - 1];
        let outputs: Vec<_> = utxos.iter().map(|entry| entry.output.clone()).collect();
        verify_outputs(&outputs)?;
        verify_kernel_signatures(&kernels)?;

        let supply = constants.emission.supply_at_height(horizon_height);
        let utxos = UtxoSet::from_entries(utxos).map_err(|e| ValidationError::State(e.to_string()))?;
        let state = ChainState::from_parts(utxos, kernels, horizon_height, header.hash(), supply);
        let roots = state.roots();
        if roots.output_mr != header.output_mr {
            return Err(ValidationError::MerkleRootMismatch("output"));
        }
        if roots.range_proof_mr != header.range_proof_mr {
            return Err(ValidationError::MerkleRootMismatch("range proof"));
        }
        if roots.kernel_mr != header.kernel_mr {
            return Err(ValidationError::MerkleRootMismatch("kernel"));
        }

        let total_offset = headers[..horizon_height as usize]
            .iter()
            .fold(SecretKey::zero(), |acc, h| acc + h.total_kernel_offset);
        verify_horizon_balance(&state.utxos, state.kernels(), &total_offset, supply)?;
        Ok(state)
    }
}
