//! Block validation
//!
//! Headers are checked against their parent alone, so the header chain can be
//! validated ahead of the bodies during sync. Bodies are checked against the
//! parent's chain state and staged on a private version of it; the caller
//! commits the staged block once it is accepted.

use tracing::debug;

use crate::config::ConsensusConstants;
use crate::constants::BLOCKCHAIN_VERSION;
use crate::consensus::{median_time_past, Block, BlockHeader};
use crate::storage::{ChainState, StagedBlock};

use super::{
    check_block_balance, check_body_structure, check_output_collisions,
    check_outputs_well_formed, first_immature, resolve_inputs, verify_covenants,
    verify_kernel_signatures, verify_outputs, verify_scripts, ValidationError,
};

/// Chain data a header is validated against
#[derive(Debug, Clone, Copy)]
pub struct HeaderContext<'a> {
    pub parent: &'a BlockHeader,
    /// Timestamps of up to 11 blocks ending with the parent
    pub timestamps: &'a [u64],
    /// Target difficulty for the header's algorithm
    pub target_difficulty: u64,
}

#[derive(Debug, Clone)]
pub struct BlockValidator {
    constants: ConsensusConstants,
}

impl BlockValidator {
    pub fn new(constants: ConsensusConstants) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &ConsensusConstants {
        &self.constants
    }

    pub fn validate_header(
        &self,
        header: &BlockHeader,
        context: &HeaderContext<'_>,
        now: u64,
    ) -> Result<(), ValidationError> {
        if header.version != BLOCKCHAIN_VERSION {
            return Err(ValidationError::InvalidVersion(header.version));
        }
        let expected = context.parent.height + 1;
        if header.height != expected {
            return Err(ValidationError::InvalidHeight {
                expected,
                got: header.height,
            });
        }
        if header.prev_hash != context.parent.hash() {
            return Err(ValidationError::PrevHashMismatch);
        }

        let median = median_time_past(context.timestamps);
        if header.timestamp <= median {
            return Err(ValidationError::TimestampTooOld {
                timestamp: header.timestamp,
                median,
            });
        }
        let limit = now.saturating_add(self.constants.future_time_limit());
        if header.timestamp >= limit {
            return Err(ValidationError::TimestampInFuture {
                timestamp: header.timestamp,
                limit,
            });
        }

        let achieved = header.achieved_difficulty()?;
        if achieved < context.target_difficulty {
            return Err(ValidationError::InsufficientDifficulty {
                achieved,
                target: context.target_difficulty,
            });
        }
        let accumulated = context
            .parent
            .pow
            .accumulated()
            .add(header.pow.pow_algo, context.target_difficulty)
            .ok_or(ValidationError::AccumulatedDifficultyMismatch)?;
        if header.pow.accumulated() != accumulated {
            return Err(ValidationError::AccumulatedDifficultyMismatch);
        }
        Ok(())
    }

    /// Validate the body of `block` on top of `state`, the state at its parent.
    /// On success returns the block staged on `state`, ready for
    /// `ChainState::commit_block`; `state` itself is never modified.
    pub fn validate_body(
        &self,
        block: &Block,
        state: &ChainState,
    ) -> Result<StagedBlock, ValidationError> {
        let header = &block.header;
        let body = &block.body;
        let height = header.height;

        check_body_structure(body)?;
        check_outputs_well_formed(&body.outputs, self.constants.max_covenant_size)?;
        self.check_coinbase(block)?;
        if let Some(kernel) = body
            .kernels
            .iter()
            .find(|k| !k.is_unlocked(height, header.timestamp))
        {
            return Err(ValidationError::KernelLocked {
                lock_height: kernel.lock_height,
            });
        }

        let resolved = resolve_inputs(&body.inputs, &state.utxos)?;
        if let Some(entry) = first_immature(&resolved, height) {
            return Err(ValidationError::ImmatureInput {
                commitment: entry.commitment(),
                maturity: entry.output.features.maturity,
            });
        }
        check_output_collisions(&body.outputs, &state.utxos)?;

        verify_kernel_signatures(&body.kernels)?;
        verify_outputs(&body.outputs)?;
        verify_scripts(&body.inputs, &resolved, height, &header.prev_hash)?;
        verify_covenants(&resolved, &body.outputs, height)?;

        let reward = self
            .constants
            .emission
            .block_reward(height, state.total_emission);
        check_block_balance(body, &header.total_kernel_offset, reward)?;

        let staged = state
            .stage_block(block, reward)
            .map_err(|e| ValidationError::State(e.to_string()))?;
        let roots = staged.roots();
        if roots.output_mr != header.output_mr {
            return Err(ValidationError::MerkleRootMismatch("output"));
        }
        if roots.range_proof_mr != header.range_proof_mr {
            return Err(ValidationError::MerkleRootMismatch("range proof"));
        }
        if roots.kernel_mr != header.kernel_mr {
            return Err(ValidationError::MerkleRootMismatch("kernel"));
        }
        debug!(height, hash = %staged.hash(), reward, "Block body valid");
        Ok(staged)
    }

    fn check_coinbase(&self, block: &Block) -> Result<(), ValidationError> {
        let outputs: Vec<_> = block.body.coinbase_outputs().collect();
        let kernels: Vec<_> = block.body.coinbase_kernels().collect();
        if outputs.len() != 1 {
            return Err(ValidationError::InvalidCoinbase(format!(
                "{} coinbase outputs",
                outputs.len()
            )));
        }
        if kernels.len() != 1 {
            return Err(ValidationError::InvalidCoinbase(format!(
                "{} coinbase kernels",
                kernels.len()
            )));
        }
        let min_maturity = block
            .header
            .height
            .saturating_add(self.constants.coinbase_lock_height);
        if outputs[0].features.maturity < min_maturity {
            return Err(ValidationError::InvalidCoinbase(format!(
                "maturity {} below {}",
                outputs[0].features.maturity, min_maturity
            )));
        }
        if kernels[0].fee != 0 || kernels[0].lock_height != 0 {
            return Err(ValidationError::InvalidCoinbase(
                "coinbase kernel carries a fee or lock".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::consensus::{AccumulatedDifficulty, PowAlgorithm, ProofOfWork};
    use crate::crypto::{Hash, SecretKey};
    use crate::transaction::{build_coinbase, AggregateBody};

    fn constants() -> ConsensusConstants {
        ConsensusConstants::for_network(Network::LocalNet)
    }

    fn genesis() -> Block {
        let mut pow = ProofOfWork::new(PowAlgorithm::Primary);
        let acc = AccumulatedDifficulty::genesis();
        pow.accumulated_primary = acc.primary;
        pow.accumulated_secondary = acc.secondary;
        let header = BlockHeader {
            version: BLOCKCHAIN_VERSION,
            height: 0,
            prev_hash: Hash::zero(),
            timestamp: 1_700_000_000,
            output_mr: Hash::zero(),
            range_proof_mr: Hash::zero(),
            kernel_mr: Hash::zero(),
            total_kernel_offset: SecretKey::zero(),
            nonce: 0,
            pow,
        };
        Block::new(header, AggregateBody::empty())
    }

    /// Child of `parent` with a correct coinbase and roots, target difficulty 1
    fn child(parent: &Block, state: &ChainState) -> Block {
        let constants = constants();
        let height = parent.height() + 1;
        let reward = constants.emission.block_reward(height, state.total_emission);
        let coinbase = build_coinbase(reward, height, constants.coinbase_lock_height);
        let mut header = BlockHeader::from_previous(&parent.header);
        header.timestamp = parent.header.timestamp + 120;
        header.pow.accumulated_primary = parent.header.pow.accumulated_primary + 1;
        header.pow.accumulated_secondary = parent.header.pow.accumulated_secondary;
        let body = AggregateBody::new(vec![], vec![coinbase.output], vec![coinbase.kernel]);
        let mut block = Block::new(header, body);
        let roots = state.stage_block(&block, reward).unwrap().roots();
        block.header.output_mr = roots.output_mr;
        block.header.range_proof_mr = roots.range_proof_mr;
        block.header.kernel_mr = roots.kernel_mr;
        block
    }

    #[test]
    fn test_valid_block_body() {
        let genesis = genesis();
        let state = ChainState::new(&genesis).unwrap();
        let block = child(&genesis, &state);
        let validator = BlockValidator::new(constants());
        let staged = validator.validate_body(&block, &state).unwrap();
        assert_eq!(staged.height(), 1);
        assert_eq!(staged.hash(), block.hash());
        assert_eq!(state.height, 0);
        assert!(state.utxos.is_empty());

        let mut state = state;
        let delta = state.commit_block(staged).unwrap();
        assert_eq!(delta.hash, block.hash());
        assert_eq!(state.utxos.len(), 1);
    }

    #[test]
    fn test_bad_output_root_leaves_state_untouched() {
        let genesis = genesis();
        let state = ChainState::new(&genesis).unwrap();
        let mut block = child(&genesis, &state);
        block.header.output_mr = Hash::zero();
        let validator = BlockValidator::new(constants());
        assert_eq!(
            validator.validate_body(&block, &state).unwrap_err(),
            ValidationError::MerkleRootMismatch("output")
        );
        assert!(state.utxos.is_empty());
    }

    #[test]
    fn test_missing_coinbase() {
        let genesis = genesis();
        let state = ChainState::new(&genesis).unwrap();
        let mut block = child(&genesis, &state);
        block.body.outputs.clear();
        let validator = BlockValidator::new(constants());
        assert!(matches!(
            validator.validate_body(&block, &state),
            Err(ValidationError::InvalidCoinbase(_))
        ));
    }

    #[test]
    fn test_inflated_coinbase_rejected() {
        let genesis = genesis();
        let state = ChainState::new(&genesis).unwrap();
        let mut block = child(&genesis, &state);
        let reward = constants().emission.block_reward(1, 0);
        let coinbase = build_coinbase(reward + 1, 1, constants().coinbase_lock_height);
        block.body = AggregateBody::new(vec![], vec![coinbase.output], vec![coinbase.kernel]);
        let validator = BlockValidator::new(constants());
        assert_eq!(
            validator.validate_body(&block, &state).unwrap_err(),
            ValidationError::BalanceMismatch
        );
    }

    #[test]
    fn test_header_checks() {
        let genesis = genesis();
        let state = ChainState::new(&genesis).unwrap();
        let block = child(&genesis, &state);
        let validator = BlockValidator::new(constants());
        let timestamps = [genesis.header.timestamp];
        let context = HeaderContext {
            parent: &genesis.header,
            timestamps: &timestamps,
            target_difficulty: 1,
        };
        let now = block.header.timestamp;
        assert!(validator.validate_header(&block.header, &context, now).is_ok());

        let mut stale = block.header.clone();
        stale.timestamp = genesis.header.timestamp;
        assert!(matches!(
            validator.validate_header(&stale, &context, now),
            Err(ValidationError::TimestampTooOld { .. })
        ));

        let mut future = block.header.clone();
        future.timestamp = now + constants().future_time_limit();
        assert!(matches!(
            validator.validate_header(&future, &context, now),
            Err(ValidationError::TimestampInFuture { .. })
        ));

        let mut wrong_acc = block.header.clone();
        wrong_acc.pow.accumulated_primary += 1;
        assert_eq!(
            validator.validate_header(&wrong_acc, &context, now),
            Err(ValidationError::AccumulatedDifficultyMismatch)
        );

        let mut orphaned = block.header.clone();
        orphaned.prev_hash = Hash::zero();
        assert_eq!(
            validator.validate_header(&orphaned, &context, now),
            Err(ValidationError::PrevHashMismatch)
        );
    }
}
