//! Transaction validation against a UTXO view
//!
//! Stateless checks run first so that junk is rejected before any lookup.
//! Lock heights and input maturity defer a transaction (`TimeLocked`) rather
//! than reject it; scripts and covenants run last because they depend on the
//! height the transaction would be mined at.

use tracing::trace;

use crate::config::ConsensusConstants;
use crate::crypto::Hash;
use crate::storage::UtxoLookup;
use crate::transaction::Transaction;

use super::{
    check_body_structure, check_output_collisions, check_outputs_well_formed,
    check_transaction_balance, first_immature, resolve_inputs, verify_covenants,
    verify_kernel_signatures, verify_outputs, verify_scripts, ValidationError, ValidationState,
};

/// Validates loose transactions for the mempool
#[derive(Debug, Clone)]
pub struct TransactionValidator {
    constants: ConsensusConstants,
}

impl TransactionValidator {
    pub fn new(constants: ConsensusConstants) -> Self {
        Self { constants }
    }

    /// Checks that need no chain state
    pub fn validate_stateless(&self, tx: &Transaction) -> Result<(), ValidationError> {
        check_body_structure(&tx.body)?;
        if tx.body.coinbase_outputs().next().is_some() || tx.body.coinbase_kernels().next().is_some()
        {
            return Err(ValidationError::CoinbaseInTransaction);
        }
        check_outputs_well_formed(&tx.body.outputs, self.constants.max_covenant_size)?;
        verify_kernel_signatures(&tx.body.kernels)?;
        verify_outputs(&tx.body.outputs)?;
        check_transaction_balance(&tx.body, &tx.offset)
    }

    /// Validate `tx` for inclusion in the block at `height`, whose parent is
    /// `prev_hash`. `now` is compared against timestamp lock heights.
    pub fn validate<U: UtxoLookup>(
        &self,
        tx: &Transaction,
        utxos: &U,
        height: u64,
        prev_hash: &Hash,
        now: u64,
    ) -> ValidationState {
        match self.validate_inner(tx, utxos, height, prev_hash, now) {
            Ok(state) => state,
            Err(error) => {
                trace!(fingerprint = %tx.fingerprint(), %error, "Transaction rejected");
                ValidationState::Rejected(error)
            }
        }
    }

    fn validate_inner<U: UtxoLookup>(
        &self,
        tx: &Transaction,
        utxos: &U,
        height: u64,
        prev_hash: &Hash,
        now: u64,
    ) -> Result<ValidationState, ValidationError> {
        self.validate_stateless(tx)?;
        let resolved = resolve_inputs(&tx.body.inputs, utxos)?;
        check_output_collisions(&tx.body.outputs, utxos)?;

        if tx.body.kernels.iter().any(|k| !k.is_unlocked(height, now)) {
            return Ok(ValidationState::TimeLocked);
        }
        if first_immature(&resolved, height).is_some() {
            return Ok(ValidationState::TimeLocked);
        }

        verify_scripts(&tx.body.inputs, &resolved, height, prev_hash)?;
        verify_covenants(&resolved, &tx.body.outputs, height)?;
        Ok(ValidationState::Validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::covenants::{Covenant, CovenantExpr};
    use crate::crypto::SecretKey;
    use crate::storage::{UtxoEntry, UtxoSet};
    use crate::transaction::{build_coinbase, OutputFeatures, TransactionBuilder, UnblindedOutput};

    const NOW: u64 = 1_700_000_000;

    fn validator() -> TransactionValidator {
        TransactionValidator::new(ConsensusConstants::for_network(Network::LocalNet))
    }

    fn funded(value: u64, mined_height: u64) -> (UnblindedOutput, UtxoSet) {
        let unblinded = UnblindedOutput::new(value, SecretKey::random());
        let mut utxos = UtxoSet::new();
        let entry = UtxoEntry::new(
            unblinded.as_transaction_output(&SecretKey::random()),
            mined_height,
        );
        utxos.apply(&[], vec![entry], mined_height).unwrap();
        (unblinded, utxos)
    }

    #[test]
    fn test_valid_spend_with_fee() {
        let (input, utxos) = funded(100, 1);
        let tx = TransactionBuilder::new()
            .with_input(input)
            .with_output(UnblindedOutput::new(95, SecretKey::random()))
            .with_fee(5)
            .build()
            .unwrap();
        assert_eq!(
            validator().validate(&tx, &utxos, 2, &Hash::zero(), NOW),
            ValidationState::Validated
        );
    }

    #[test]
    fn test_unknown_input_rejected() {
        let (_, utxos) = funded(100, 1);
        let stranger = UnblindedOutput::new(100, SecretKey::random());
        let tx = TransactionBuilder::new()
            .with_input(stranger.clone())
            .with_output(UnblindedOutput::new(100, SecretKey::random()))
            .build()
            .unwrap();
        assert_eq!(
            validator().validate(&tx, &utxos, 2, &Hash::zero(), NOW),
            ValidationState::Rejected(ValidationError::UnknownInput(stranger.commitment()))
        );
    }

    #[test]
    fn test_lock_height_defers() {
        let (input, utxos) = funded(100, 1);
        let tx = TransactionBuilder::new()
            .with_input(input)
            .with_output(UnblindedOutput::new(100, SecretKey::random()))
            .with_lock_height(10)
            .build()
            .unwrap();
        let validator = validator();
        assert_eq!(
            validator.validate(&tx, &utxos, 9, &Hash::zero(), NOW),
            ValidationState::TimeLocked
        );
        assert_eq!(
            validator.validate(&tx, &utxos, 10, &Hash::zero(), NOW),
            ValidationState::Validated
        );
    }

    #[test]
    fn test_immature_input_defers() {
        let mut input = UnblindedOutput::new(100, SecretKey::random());
        input.features = OutputFeatures::with_maturity(20);
        let mut utxos = UtxoSet::new();
        let entry = UtxoEntry::new(input.as_transaction_output(&SecretKey::random()), 1);
        utxos.apply(&[], vec![entry], 1).unwrap();
        let tx = TransactionBuilder::new()
            .with_input(input)
            .with_output(UnblindedOutput::new(100, SecretKey::random()))
            .build()
            .unwrap();
        assert_eq!(
            validator().validate(&tx, &utxos, 19, &Hash::zero(), NOW),
            ValidationState::TimeLocked
        );
    }

    #[test]
    fn test_coinbase_not_allowed_loose() {
        let coinbase = build_coinbase(10, 1, 2);
        let tx = Transaction::new(
            SecretKey::zero(),
            crate::transaction::AggregateBody::new(vec![], vec![coinbase.output], vec![coinbase.kernel]),
        );
        assert_eq!(
            validator().validate_stateless(&tx),
            Err(ValidationError::CoinbaseInTransaction)
        );
    }

    #[test]
    fn test_covenant_failure_rejects() {
        let mut input = UnblindedOutput::new(100, SecretKey::random());
        input.covenant = Covenant::new(&CovenantExpr::RelativeHeight(10));
        let mut utxos = UtxoSet::new();
        let entry = UtxoEntry::new(input.as_transaction_output(&SecretKey::random()), 5);
        utxos.apply(&[], vec![entry], 5).unwrap();
        let commitment = input.commitment();
        let tx = TransactionBuilder::new()
            .with_input(input)
            .with_output(UnblindedOutput::new(100, SecretKey::random()))
            .build()
            .unwrap();
        let validator = validator();
        assert!(matches!(
            validator.validate(&tx, &utxos, 10, &Hash::zero(), NOW),
            ValidationState::Rejected(ValidationError::CovenantFailed { commitment: c, .. }) if c == commitment
        ));
        assert_eq!(
            validator.validate(&tx, &utxos, 15, &Hash::zero(), NOW),
            ValidationState::Validated
        );
    }

    #[test]
    fn test_revalidation_is_idempotent() {
        let (input, utxos) = funded(50, 1);
        let tx = TransactionBuilder::new()
            .with_input(input)
            .with_output(UnblindedOutput::new(49, SecretKey::random()))
            .with_fee(1)
            .build()
            .unwrap();
        let validator = validator();
        let first = validator.validate(&tx, &utxos, 2, &Hash::zero(), NOW);
        let second = validator.validate(&tx, &utxos, 2, &Hash::zero(), NOW);
        assert_eq!(first, second);
        assert_eq!(utxos.len(), 1);
    }
}
