//! Transaction construction helpers
//!
//! Wallets own key management; these helpers only assemble the pieces once
//! the secrets are known.

use thiserror::Error;

use crate::covenants::Covenant;
use crate::crypto::{Commitment, RangeProof, SecretKey, Signature};
use crate::script::{ExecutionStack, Script};

use super::{
    kernel_features, AggregateBody, OutputFeatures, Transaction, TransactionInput,
    TransactionKernel, TransactionOutput,
};

/// Transaction building errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Inputs ({inputs}) do not cover outputs ({outputs}) plus fee ({fee})")]
    ValueMismatch { inputs: u64, outputs: u64, fee: u64 },
    #[error("Value overflow")]
    Overflow,
    #[error("Transaction has no outputs")]
    NoOutputs,
}

/// An output together with the secrets needed to create or spend it
#[derive(Debug, Clone)]
pub struct UnblindedOutput {
    pub value: u64,
    pub blinding_factor: SecretKey,
    pub features: OutputFeatures,
    pub script: Script,
    pub covenant: Covenant,
    /// Secret for the key the script returns
    pub script_private_key: SecretKey,
    /// Data stack supplied when spending
    pub input_data: ExecutionStack,
}

impl UnblindedOutput {
    /// Plain output paying to a fresh script key
    pub fn new(value: u64, blinding_factor: SecretKey) -> Self {
        let script_private_key = SecretKey::random();
        Self {
            value,
            blinding_factor,
            features: OutputFeatures::default(),
            script: Script::pay_to_public_key(&script_private_key.public_key()),
            covenant: Covenant::empty(),
            script_private_key,
            input_data: ExecutionStack::empty(),
        }
    }

    pub fn commitment(&self) -> Commitment {
        Commitment::commit(self.value, &self.blinding_factor)
    }

    /// Build the on-chain output, signing its metadata with `sender_offset`
    pub fn as_transaction_output(&self, sender_offset: &SecretKey) -> TransactionOutput {
        let mut output = TransactionOutput {
            features: self.features.clone(),
            commitment: self.commitment(),
            range_proof: RangeProof::prove(self.value, &self.blinding_factor),
            script: self.script.clone(),
            sender_offset_public_key: sender_offset.public_key(),
            covenant: self.covenant.clone(),
            metadata_signature: Signature::default(),
        };
        output.sign_metadata(sender_offset);
        output
    }

    /// Build the input that spends this output
    pub fn as_transaction_input(&self) -> TransactionInput {
        TransactionInput::new_signed(self.commitment(), self.input_data.clone(), &self.script_private_key)
    }
}

/// Builds a balanced, signed single-kernel transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    inputs: Vec<UnblindedOutput>,
    outputs: Vec<UnblindedOutput>,
    fee: u64,
    lock_height: u64,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: UnblindedOutput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: UnblindedOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_lock_height(mut self, lock_height: u64) -> Self {
        self.lock_height = lock_height;
        self
    }

    pub fn build(self) -> Result<Transaction, TransactionError> {
        if self.outputs.is_empty() {
            return Err(TransactionError::NoOutputs);
        }
        let total_in = sum_values(&self.inputs)?;
        let total_out = sum_values(&self.outputs)?;
        if total_out.checked_add(self.fee) != Some(total_in) {
            return Err(TransactionError::ValueMismatch {
                inputs: total_in,
                outputs: total_out,
                fee: self.fee,
            });
        }

        // excess + offset = Σ r_out - Σ r_in
        let mut blinding_sum = SecretKey::zero();
        for output in &self.outputs {
            blinding_sum = blinding_sum + output.blinding_factor;
        }
        for input in &self.inputs {
            blinding_sum = blinding_sum - input.blinding_factor;
        }
        let offset = SecretKey::random();
        let excess = blinding_sum - offset;

        let kernel = TransactionKernel::new_signed(0, self.fee, self.lock_height, &excess);
        let inputs = self.inputs.iter().map(|i| i.as_transaction_input()).collect();
        let outputs = self
            .outputs
            .iter()
            .map(|o| o.as_transaction_output(&SecretKey::random()))
            .collect();
        Ok(Transaction::new(offset, AggregateBody::new(inputs, outputs, vec![kernel])))
    }
}

fn sum_values(outputs: &[UnblindedOutput]) -> Result<u64, TransactionError> {
    outputs
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value))
        .ok_or(TransactionError::Overflow)
}

/// Coinbase output and kernel for a block
#[derive(Debug, Clone)]
pub struct Coinbase {
    pub unblinded: UnblindedOutput,
    pub output: TransactionOutput,
    pub kernel: TransactionKernel,
}

/// Build the coinbase paying `value` (block reward plus fees), spendable from
/// `height + lock_height`
pub fn build_coinbase(value: u64, height: u64, lock_height: u64) -> Coinbase {
    let blinding = SecretKey::random();
    let mut unblinded = UnblindedOutput::new(value, blinding);
    unblinded.features = OutputFeatures::coinbase(height.saturating_add(lock_height));
    let output = unblinded.as_transaction_output(&SecretKey::random());
    let kernel = TransactionKernel::new_signed(kernel_features::COINBASE_KERNEL, 0, 0, &blinding);
    Coinbase {
        unblinded,
        output,
        kernel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generator_h;
    use k256::Scalar;

    #[test]
    fn test_builder_balances() {
        let input = UnblindedOutput::new(100, SecretKey::random());
        let tx = TransactionBuilder::new()
            .with_input(input)
            .with_output(UnblindedOutput::new(95, SecretKey::random()))
            .with_fee(5)
            .build()
            .unwrap();

        let outputs: Vec<_> = tx.body.outputs.iter().map(|o| o.commitment).collect();
        let inputs: Vec<_> = tx.body.inputs.iter().map(|i| i.commitment).collect();
        let lhs = Commitment::sum(outputs.iter()).unwrap() - Commitment::sum(inputs.iter()).unwrap()
            + generator_h() * Scalar::from(5u64);
        let rhs = tx.body.total_excess().unwrap().to_point().unwrap()
            + Commitment::from_public_key(&tx.offset.public_key()).unwrap().to_point().unwrap();
        assert_eq!(Commitment::from_point(&lhs), Commitment::from_point(&rhs));
        assert!(tx.body.kernels[0].verify_signature().is_ok());
    }

    #[test]
    fn test_builder_rejects_imbalance() {
        let result = TransactionBuilder::new()
            .with_input(UnblindedOutput::new(100, SecretKey::random()))
            .with_output(UnblindedOutput::new(96, SecretKey::random()))
            .with_fee(5)
            .build();
        assert_eq!(
            result.unwrap_err(),
            TransactionError::ValueMismatch {
                inputs: 100,
                outputs: 96,
                fee: 5
            }
        );
    }

    #[test]
    fn test_coinbase_excess_matches_output() {
        let coinbase = build_coinbase(1_000, 7, 3);
        assert!(coinbase.output.is_coinbase());
        assert_eq!(coinbase.output.features.maturity, 10);
        assert!(coinbase.kernel.is_coinbase());
        assert_eq!(coinbase.kernel.fee, 0);
        // C - v·H == excess
        let lhs = (&coinbase.output.commitment - &Commitment::from_value(1_000)).unwrap();
        assert_eq!(lhs, Commitment::from_public_key(&coinbase.kernel.excess).unwrap());
    }
}
