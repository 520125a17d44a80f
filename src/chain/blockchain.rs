//! Blockchain: fork choice, reorgs and orphan handling
//!
//! The best chain is the one with the greatest accumulated work. Equal work
//! falls back to the larger raw accumulator sum and then to the lower tip
//! hash, so every node picks the same tip. Reorgs rewind at most
//! `pruning_horizon` blocks; anything deeper needs a full resync.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ConsensusConstants;
use crate::constants::MEDIAN_TIMESTAMP_COUNT;
use crate::consensus::{median_time_past, AccumulatedDifficulty, Block, BlockHeader, PowAlgorithm};
use crate::crypto::{Hash, SecretKey};
use crate::storage::{
    BlockDelta, ChainBackend, ChainImage, ChainState, StagedBlock, StorageError, UtxoSet,
};
use crate::transaction::{build_coinbase, AggregateBody, Transaction, UnblindedOutput};
use crate::validation::{BlockValidator, ValidationError};

use super::{
    BlockAddResult, ChainChanges, ChainError, ChainMetadata, HeaderArena, HeaderNode,
    HorizonSnapshot, OrphanPool,
};

/// A block ready for proof of work
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub target_difficulty: u64,
    pub reward: u64,
    /// Secrets of the coinbase output
    pub coinbase: UnblindedOutput,
}

pub struct Blockchain {
    constants: ConsensusConstants,
    validator: BlockValidator,
    backend: Arc<dyn ChainBackend>,
    arena: HeaderArena,
    state: ChainState,
    /// Main-chain hashes by height
    main_chain: Vec<Hash>,
    /// Undo data for main-chain blocks inside the reorg window
    deltas: BTreeMap<u64, BlockDelta>,
    orphans: OrphanPool,
    invalid: HashSet<Hash>,
    /// Height of the horizon snapshot this node was synced from; no state
    /// below it exists
    snapshot_height: u64,
    changes: ChainChanges,
}

impl Blockchain {
    /// Open the chain stored in `backend`, initialising it with `genesis` when empty
    pub fn load(
        constants: ConsensusConstants,
        backend: Arc<dyn ChainBackend>,
        genesis: &Block,
    ) -> Result<Self, ChainError> {
        let tip = match backend.fetch_tip()? {
            Some(tip) => tip,
            None => {
                let state = ChainState::new(genesis)?;
                backend.write_state(&ChainImage {
                    state: &state,
                    main_chain: &[genesis.hash()],
                    headers: &[],
                    blocks: std::slice::from_ref(genesis),
                    deltas: &[],
                })?;
                info!(hash = %genesis.hash(), "Initialised chain at genesis");
                return Ok(Self::from_parts(
                    constants,
                    backend,
                    HeaderArena::new(genesis.header.clone()),
                    state,
                    vec![genesis.hash()],
                    BTreeMap::new(),
                    0,
                ));
            }
        };

        let stored_genesis = backend.fetch_hash_at(0)?.unwrap_or_default();
        if stored_genesis != genesis.hash() {
            return Err(ChainError::GenesisMismatch {
                expected: genesis.hash(),
                found: stored_genesis,
            });
        }

        let mut arena = HeaderArena::new(genesis.header.clone());
        let mut main_chain = vec![genesis.hash()];
        for height in 1..=tip.height {
            let hash = backend
                .fetch_hash_at(height)?
                .ok_or(StorageError::HeightNotFound(height))?;
            let header = backend
                .fetch_header(&hash)?
                .ok_or(ChainError::MissingBlock(hash))?;
            let target = arena
                .get(&header.prev_hash)
                .map(|parent| target_from_parent(parent, &header))
                .ok_or(ChainError::MissingBlock(header.prev_hash))?;
            arena.insert(header, target);
            main_chain.push(hash);
        }

        let floor = tip.height.saturating_sub(constants.pruning_horizon);
        let mut deltas = BTreeMap::new();
        let mut snapshot_height = floor;
        for height in ((floor + 1)..=tip.height).rev() {
            match backend.fetch_delta(height)? {
                Some(delta) => {
                    deltas.insert(height, delta);
                }
                None => {
                    snapshot_height = height;
                    break;
                }
            }
        }
        deltas.retain(|height, _| *height > snapshot_height);

        let mut utxos = UtxoSet::from_entries(backend.fetch_utxos()?)?;
        for delta in deltas.values() {
            for entry in &delta.utxo.spent {
                utxos.mark_spent(entry.commitment(), delta.height);
            }
        }
        let state = ChainState::from_parts(
            utxos,
            backend.fetch_kernels()?,
            tip.height,
            tip.hash,
            tip.total_emission,
        );

        let chain = Self::from_parts(
            constants,
            backend,
            arena,
            state,
            main_chain,
            deltas,
            snapshot_height,
        );
        chain.verify_tip_roots()?;
        info!(height = tip.height, hash = %tip.hash, "Loaded chain");
        Ok(chain)
    }

    /// Start from a verified horizon snapshot. `headers` runs from height 1 up
    /// to the snapshot height.
    ///
    /// The snapshot replaces whatever `backend` holds, so pass a scratch
    /// backend and move the finished chain with `persist_into`.
    pub fn from_horizon_snapshot(
        constants: ConsensusConstants,
        backend: Arc<dyn ChainBackend>,
        genesis: &Block,
        headers: &[BlockHeader],
        state: ChainState,
    ) -> Result<Self, ChainError> {
        let mut arena = HeaderArena::new(genesis.header.clone());
        let mut main_chain = vec![genesis.hash()];
        for header in headers {
            let target = arena
                .get(&header.prev_hash)
                .map(|parent| target_from_parent(parent, header))
                .ok_or(ChainError::MissingBlock(header.prev_hash))?;
            arena.insert(header.clone(), target);
            main_chain.push(header.hash());
        }
        if main_chain.last() != Some(&state.tip_hash) {
            return Err(ChainError::InvalidHorizonState(ValidationError::State(
                "snapshot does not match the header chain".to_string(),
            )));
        }
        backend.write_state(&ChainImage {
            state: &state,
            main_chain: &main_chain,
            headers,
            blocks: std::slice::from_ref(genesis),
            deltas: &[],
        })?;
        let snapshot_height = state.height;
        info!(height = snapshot_height, hash = %state.tip_hash, "Chain restored from horizon snapshot");
        let chain = Self::from_parts(
            constants,
            backend,
            arena,
            state,
            main_chain,
            BTreeMap::new(),
            snapshot_height,
        );
        chain.verify_tip_roots()?;
        Ok(chain)
    }

    fn from_parts(
        constants: ConsensusConstants,
        backend: Arc<dyn ChainBackend>,
        arena: HeaderArena,
        state: ChainState,
        main_chain: Vec<Hash>,
        deltas: BTreeMap<u64, BlockDelta>,
        snapshot_height: u64,
    ) -> Self {
        Self {
            validator: BlockValidator::new(constants.clone()),
            orphans: OrphanPool::new(constants.orphan_pool_size),
            constants,
            backend,
            arena,
            state,
            main_chain,
            deltas,
            invalid: HashSet::new(),
            snapshot_height,
            changes: ChainChanges::default(),
        }
    }

    /// Write this chain to `backend` in a single atomic batch, replacing what
    /// it held, and keep working on it. Meant for chains rebuilt from a
    /// horizon snapshot: every block above the snapshot is copied.
    pub fn persist_into(&mut self, backend: Arc<dyn ChainBackend>) -> Result<(), ChainError> {
        let headers = self.main_chain[1..]
            .iter()
            .map(|hash| {
                self.arena
                    .get(hash)
                    .map(|node| node.header.clone())
                    .ok_or(ChainError::MissingBlock(*hash))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut blocks = Vec::new();
        for height in std::iter::once(0).chain((self.snapshot_height + 1)..=self.height()) {
            let hash = self.main_chain[height as usize];
            let block = self
                .backend
                .fetch_block(&hash)?
                .ok_or(ChainError::MissingBlock(hash))?;
            blocks.push(block);
        }
        let deltas: Vec<BlockDelta> = self.deltas.values().cloned().collect();
        backend.write_state(&ChainImage {
            state: &self.state,
            main_chain: &self.main_chain,
            headers: &headers,
            blocks: &blocks,
            deltas: &deltas,
        })?;
        self.backend = backend;
        info!(height = self.height(), hash = %self.tip_hash(), "Chain persisted");
        Ok(())
    }

    fn verify_tip_roots(&self) -> Result<(), ChainError> {
        let tip = self.tip_header();
        let roots = self.state.roots();
        if roots.output_mr != tip.output_mr
            || roots.range_proof_mr != tip.range_proof_mr
            || roots.kernel_mr != tip.kernel_mr
        {
            return Err(ChainError::InvalidHorizonState(
                ValidationError::MerkleRootMismatch("tip"),
            ));
        }
        Ok(())
    }

    pub fn constants(&self) -> &ConsensusConstants {
        &self.constants
    }

    pub fn backend(&self) -> Arc<dyn ChainBackend> {
        Arc::clone(&self.backend)
    }

    pub fn validator(&self) -> &BlockValidator {
        &self.validator
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    pub fn height(&self) -> u64 {
        self.state.height
    }

    pub fn tip_hash(&self) -> Hash {
        self.state.tip_hash
    }

    fn tip_node(&self) -> &HeaderNode {
        // The tip is always in the arena
        self.arena
            .get(&self.state.tip_hash)
            .unwrap_or_else(|| self.arena.genesis())
    }

    pub fn tip_header(&self) -> &BlockHeader {
        &self.tip_node().header
    }

    pub fn genesis_hash(&self) -> Hash {
        self.main_chain[0]
    }

    pub fn accumulated(&self) -> AccumulatedDifficulty {
        self.tip_node().accumulated()
    }

    /// Lowest height the chain can rewind to
    pub fn reorg_floor(&self) -> u64 {
        self.height()
            .saturating_sub(self.constants.pruning_horizon)
            .max(self.snapshot_height)
    }

    pub fn metadata(&self) -> ChainMetadata {
        ChainMetadata {
            height: self.height(),
            best_hash: self.tip_hash(),
            accumulated: self.accumulated(),
            genesis_hash: self.genesis_hash(),
            pruned_height: self.reorg_floor(),
        }
    }

    pub fn arena(&self) -> &HeaderArena {
        &self.arena
    }

    pub fn is_known(&self, hash: &Hash) -> bool {
        self.arena.contains(hash) || self.orphans.contains(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn hash_at(&self, height: u64) -> Option<Hash> {
        self.main_chain.get(height as usize).copied()
    }

    pub fn header_at(&self, height: u64) -> Option<&BlockHeader> {
        self.hash_at(height)
            .and_then(|hash| self.arena.get(&hash))
            .map(|node| &node.header)
    }

    /// Up to `count` main-chain headers starting at `from`
    pub fn headers(&self, from: u64, count: usize) -> Vec<BlockHeader> {
        (from..)
            .take(count)
            .map_while(|height| self.header_at(height).cloned())
            .collect()
    }

    pub fn block_at(&self, height: u64) -> Result<Option<Block>, ChainError> {
        match self.hash_at(height) {
            Some(hash) if height > self.snapshot_height || height == 0 => {
                Ok(self.backend.fetch_block(&hash)?)
            }
            _ => Ok(None),
        }
    }

    /// Target difficulty for an `algorithm` block on top of `parent`
    pub fn target_difficulty(&self, parent: &Hash, algorithm: PowAlgorithm) -> u64 {
        self.arena.next_target(parent, algorithm, &self.constants)
    }

    /// Main-chain blocks removed and added since the last call
    pub fn take_changes(&mut self) -> ChainChanges {
        std::mem::take(&mut self.changes)
    }

    /// Offer a block. `now` bounds the header timestamp.
    pub fn add_block(&mut self, block: Block, now: u64) -> Result<BlockAddResult, ChainError> {
        let hash = block.hash();
        if self.is_known(&hash) {
            return Ok(BlockAddResult::Duplicate);
        }
        if self.invalid.contains(&hash) || self.invalid.contains(&block.header.prev_hash) {
            self.invalid.insert(hash);
            return Ok(BlockAddResult::Rejected(ValidationError::KnownInvalid));
        }
        if !self.arena.contains(&block.header.prev_hash) {
            debug!(height = block.height(), %hash, "Orphan block buffered");
            self.orphans.insert(block);
            return Ok(BlockAddResult::Orphan);
        }

        let result = self.connect(block, now)?;
        if result.is_accepted() {
            self.connect_orphans(hash, now)?;
        }
        Ok(result)
    }

    fn connect_orphans(&mut self, parent: Hash, now: u64) -> Result<(), ChainError> {
        let mut pending = vec![parent];
        while let Some(parent) = pending.pop() {
            for child in self.orphans.take_children(&parent) {
                let hash = child.hash();
                let result = self.connect(child, now)?;
                debug!(%hash, ?result, "Connected orphan");
                if result.is_accepted() {
                    pending.push(hash);
                }
            }
        }
        Ok(())
    }

    fn connect(&mut self, block: Block, now: u64) -> Result<BlockAddResult, ChainError> {
        let hash = block.hash();
        let target = match self.arena.check_header(&block.header, &self.validator, now) {
            Ok(target) => target,
            Err(error) => return Ok(self.reject(hash, error)),
        };

        if block.header.prev_hash == self.state.tip_hash {
            return match self.validator.validate_body(&block, &self.state) {
                Ok(staged) => {
                    self.commit_tip(block, target, staged)?;
                    Ok(BlockAddResult::AcceptedTip)
                }
                Err(error) => Ok(self.reject(hash, error)),
            };
        }

        self.backend.insert_block(&block)?;
        self.arena.insert(block.header.clone(), target);
        let better = match (self.arena.get(&hash), self.arena.get(&self.state.tip_hash)) {
            (Some(candidate), Some(tip)) => is_better(candidate, tip),
            _ => false,
        };
        if !better {
            debug!(height = block.height(), %hash, "Block stored on a side chain");
            return Ok(BlockAddResult::AcceptedFork);
        }
        self.reorganize(hash)
    }

    fn reject(&mut self, hash: Hash, error: ValidationError) -> BlockAddResult {
        debug!(%hash, %error, "Block rejected");
        self.invalid.insert(hash);
        BlockAddResult::Rejected(error)
    }

    /// Persist the block, then move the in-memory tip
    fn commit_tip(&mut self, block: Block, target: u64, staged: StagedBlock) -> Result<(), ChainError> {
        self.backend.insert_block(&block)?;
        self.backend.put_batch(&staged.delta())?;
        let delta = self.state.commit_block(staged)?;
        self.arena.insert(block.header.clone(), target);
        self.main_chain.push(delta.hash);
        info!(height = delta.height, hash = %delta.hash, "New tip");
        self.deltas.insert(delta.height, delta);
        self.changes.added.push(block);
        self.prune();
        Ok(())
    }

    /// Switch the best chain to end at `new_tip`
    fn reorganize(&mut self, new_tip: Hash) -> Result<BlockAddResult, ChainError> {
        let tip_height = self.height();
        let fork = match self.arena.fork_point(&self.state.tip_hash, &new_tip) {
            Some(node) => (node.hash, node.height()),
            None => return Err(ChainError::MissingBlock(new_tip)),
        };
        let (fork_hash, fork_height) = fork;
        if fork_height < self.reorg_floor() {
            warn!(fork_height, tip_height, "Fork beyond the reorg window");
            return Err(ChainError::ReorgBeyondHorizon {
                fork_height,
                tip_height,
            });
        }

        // Shares the UTXO trie with the live state; only touched paths copy
        let mut staged = self.state.clone();
        let mut removed_deltas = Vec::new();
        for height in ((fork_height + 1)..=tip_height).rev() {
            let delta = self
                .deltas
                .get(&height)
                .ok_or(ChainError::MissingDelta(height))?;
            staged.rewind_block(delta)?;
            removed_deltas.push(delta.clone());
        }

        let path = self
            .arena
            .path_from(&fork_hash, &new_tip)
            .ok_or(ChainError::MissingBlock(new_tip))?;
        let mut added_blocks = Vec::with_capacity(path.len());
        let mut added_deltas = Vec::with_capacity(path.len());
        for (i, hash) in path.iter().enumerate() {
            let block = self
                .backend
                .fetch_block(hash)?
                .ok_or(ChainError::MissingBlock(*hash))?;
            match self.validator.validate_body(&block, &staged) {
                Ok(next) => {
                    added_deltas.push(staged.commit_block(next)?);
                    added_blocks.push(block);
                }
                Err(error) => {
                    warn!(%hash, %error, "Fork block invalid, keeping current chain");
                    self.invalid.extend(path[i..].iter().copied());
                    return Ok(BlockAddResult::Rejected(error));
                }
            }
        }

        let mut removed_blocks = Vec::with_capacity(removed_deltas.len());
        for delta in &removed_deltas {
            removed_blocks.extend(self.backend.fetch_block(&delta.hash)?);
        }

        // One write for the whole switch; memory follows only once it lands
        self.backend.commit_blocks(&removed_deltas, &added_deltas)?;

        let mut removed = Vec::with_capacity(removed_deltas.len());
        for delta in &removed_deltas {
            self.deltas.remove(&delta.height);
            removed.push(delta.hash);
        }
        removed.reverse();
        self.changes.removed.extend(removed_blocks);
        self.main_chain.truncate(fork_height as usize + 1);
        for (block, delta) in added_blocks.into_iter().zip(added_deltas) {
            self.main_chain.push(delta.hash);
            self.deltas.insert(delta.height, delta);
            self.changes.added.push(block);
        }
        self.state = staged;
        info!(
            fork_height,
            removed = removed.len(),
            added = path.len(),
            tip = %self.state.tip_hash,
            "Chain reorganised"
        );
        self.prune();
        Ok(BlockAddResult::Reorg {
            removed,
            added: path,
        })
    }

    fn prune(&mut self) {
        let floor = self.reorg_floor();
        self.deltas.retain(|height, _| *height > floor);
        self.state.utxos.prune_spent_below(floor);
    }

    /// Assemble a block on the current tip from `transactions`, which must not
    /// conflict with each other. The header is complete apart from the nonce
    /// and PoW data.
    pub fn prepare_block_template(
        &self,
        transactions: &[Transaction],
        algorithm: PowAlgorithm,
        timestamp: u64,
    ) -> Result<BlockTemplate, ChainError> {
        let tip = self.tip_node();
        let height = tip.height() + 1;
        let fees = transactions
            .iter()
            .try_fold(0u64, |acc, tx| acc.checked_add(tx.fee()?))
            .ok_or_else(|| ChainError::InvalidTemplate("fee overflow".to_string()))?;
        let reward = self
            .constants
            .emission
            .block_reward(height, self.state.total_emission);
        let value = reward
            .checked_add(fees)
            .ok_or_else(|| ChainError::InvalidTemplate("coinbase overflow".to_string()))?;
        let coinbase = build_coinbase(value, height, self.constants.coinbase_lock_height);

        let aggregate = Transaction::aggregate(transactions);
        let mut body = aggregate.body;
        body.merge(AggregateBody::new(
            vec![],
            vec![coinbase.output],
            vec![coinbase.kernel],
        ));

        let target = self.target_difficulty(&tip.hash, algorithm);
        let accumulated = tip
            .accumulated()
            .add(algorithm, target)
            .ok_or_else(|| ChainError::InvalidTemplate("difficulty overflow".to_string()))?;
        let median = median_time_past(&self.arena.timestamps(&tip.hash, MEDIAN_TIMESTAMP_COUNT));

        let mut header = BlockHeader::from_previous(&tip.header);
        header.timestamp = timestamp.max(median + 1);
        header.total_kernel_offset = aggregate.offset;
        header.pow.pow_algo = algorithm;
        header.pow.accumulated_primary = accumulated.primary;
        header.pow.accumulated_secondary = accumulated.secondary;

        let mut block = Block::new(header, body);
        let roots = self
            .state
            .stage_block(&block, reward)
            .map_err(|e| ChainError::InvalidTemplate(e.to_string()))?
            .roots();
        block.header.output_mr = roots.output_mr;
        block.header.range_proof_mr = roots.range_proof_mr;
        block.header.kernel_mr = roots.kernel_mr;

        Ok(BlockTemplate {
            block,
            target_difficulty: target,
            reward,
            coinbase: coinbase.unblinded,
        })
    }

    /// UTXO set and kernels as of main-chain `height`, rebuilt by rewinding
    /// undo data from the tip
    pub fn horizon_snapshot(&self, height: u64) -> Result<HorizonSnapshot, ChainError> {
        if height < self.reorg_floor() || height > self.height() {
            return Err(ChainError::Pruned(height));
        }
        let mut state = self.state.clone();
        for h in ((height + 1)..=self.height()).rev() {
            let delta = self.deltas.get(&h).ok_or(ChainError::MissingDelta(h))?;
            state.rewind_block(delta)?;
        }
        Ok(HorizonSnapshot {
            height,
            hash: state.tip_hash,
            utxos: state.utxos.entries(),
            kernels: state.kernels().to_vec(),
        })
    }

    /// Sum of the kernel offsets of main-chain headers `1..=height`
    pub fn total_offset_at(&self, height: u64) -> SecretKey {
        (1..=height)
            .filter_map(|h| self.header_at(h))
            .fold(SecretKey::zero(), |acc, header| acc + header.total_kernel_offset)
    }
}

/// Target difficulty a stored header was mined against, recovered from the
/// growth of its algorithm's accumulator
fn target_from_parent(parent: &HeaderNode, header: &BlockHeader) -> u64 {
    let algorithm = header.pow.pow_algo;
    header
        .pow
        .accumulated()
        .get(algorithm)
        .saturating_sub(parent.accumulated().get(algorithm))
}

/// Fork choice: total work, then raw accumulator sum, then the lower hash
fn is_better(candidate: &HeaderNode, tip: &HeaderNode) -> bool {
    let raw_sum = |node: &HeaderNode| {
        let acc = node.accumulated();
        u128::from(acc.primary) + u128::from(acc.secondary)
    };
    (candidate.total_work(), raw_sum(candidate), std::cmp::Reverse(candidate.hash))
        > (tip.total_work(), raw_sum(tip), std::cmp::Reverse(tip.hash))
}
