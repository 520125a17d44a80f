//! Checks shared by transaction, block and horizon validation

use k256::ProjectivePoint;
use rayon::prelude::*;

use crate::covenants::{CovenantContext, CovenantError};
use crate::crypto::{Commitment, Hash, SecretKey};
use crate::script::ScriptContext;
use crate::storage::{UtxoEntry, UtxoLookup, UtxoSet};
use crate::transaction::{AggregateBody, TransactionInput, TransactionKernel, TransactionOutput};

use super::ValidationError;

/// Canonical ordering, no duplicates and no cut-through
pub fn check_body_structure(body: &AggregateBody) -> Result<(), ValidationError> {
    if !body.is_sorted() {
        return Err(ValidationError::UnsortedBody);
    }
    if body.has_duplicates() {
        return Err(ValidationError::DuplicateEntries);
    }
    if let Some(commitment) = body.cut_through_commitments().first() {
        return Err(ValidationError::CutThrough(*commitment));
    }
    if body.kernels.is_empty() {
        return Err(ValidationError::MissingKernel);
    }
    Ok(())
}

/// Output features are well formed and covenants decode within the size limit
pub fn check_outputs_well_formed(
    outputs: &[TransactionOutput],
    max_covenant_size: usize,
) -> Result<(), ValidationError> {
    for output in outputs {
        if !output.features.is_well_formed() {
            return Err(ValidationError::MalformedFeatures(output.commitment));
        }
        if output.covenant.len() > max_covenant_size {
            return Err(ValidationError::CovenantTooLarge {
                size: output.covenant.len(),
                max: max_covenant_size,
            });
        }
        if output.covenant.decode().is_err() {
            return Err(ValidationError::MalformedCovenant(output.commitment));
        }
    }
    Ok(())
}

/// Range proofs and metadata signatures of every output
pub fn verify_outputs(outputs: &[TransactionOutput]) -> Result<(), ValidationError> {
    let failure = outputs.par_iter().find_map_first(|output| {
        if output.verify_range_proof().is_err() {
            return Some(ValidationError::InvalidRangeProof(output.commitment));
        }
        if output.verify_metadata_signature().is_err() {
            return Some(ValidationError::InvalidMetadataSignature(output.commitment));
        }
        None
    });
    failure.map_or(Ok(()), Err)
}

pub fn verify_kernel_signatures(kernels: &[TransactionKernel]) -> Result<(), ValidationError> {
    let invalid = kernels
        .par_iter()
        .any(|kernel| kernel.verify_signature().is_err());
    if invalid {
        return Err(ValidationError::InvalidKernelSignature);
    }
    Ok(())
}

/// Resolve every input against the UTXO view
pub fn resolve_inputs<U: UtxoLookup>(
    inputs: &[TransactionInput],
    utxos: &U,
) -> Result<Vec<UtxoEntry>, ValidationError> {
    inputs
        .iter()
        .map(|input| match utxos.fetch_utxo(&input.commitment) {
            Some(entry) => Ok(entry),
            None if utxos.is_spent(&input.commitment) => {
                Err(ValidationError::DoubleSpend(input.commitment))
            }
            None => Err(ValidationError::UnknownInput(input.commitment)),
        })
        .collect()
}

/// New outputs must not collide with live or recently spent commitments
pub fn check_output_collisions<U: UtxoLookup>(
    outputs: &[TransactionOutput],
    utxos: &U,
) -> Result<(), ValidationError> {
    for output in outputs {
        if utxos.fetch_utxo(&output.commitment).is_some() || utxos.is_spent(&output.commitment) {
            return Err(ValidationError::OutputExists(output.commitment));
        }
    }
    Ok(())
}

/// First input whose spent output is not yet mature at `height`
pub fn first_immature(resolved: &[UtxoEntry], height: u64) -> Option<&UtxoEntry> {
    resolved
        .iter()
        .find(|entry| entry.output.features.maturity > height)
}

/// Run each spent output's script and check the input signs for the key it yields
pub fn verify_scripts(
    inputs: &[TransactionInput],
    resolved: &[UtxoEntry],
    height: u64,
    prev_hash: &Hash,
) -> Result<(), ValidationError> {
    let failure = inputs
        .par_iter()
        .zip(resolved.par_iter())
        .find_map_first(|(input, entry)| {
            let context = ScriptContext::new(height, *prev_hash, input.commitment);
            match entry.output.script.execute(&input.input_data, &context) {
                Ok(key) if input.verify_script_signature(&key).is_ok() => None,
                Ok(_) => Some(ValidationError::InvalidScriptSignature(input.commitment)),
                Err(reason) => Some(ValidationError::ScriptFailed {
                    commitment: input.commitment,
                    reason,
                }),
            }
        });
    failure.map_or(Ok(()), Err)
}

/// Every spent output's covenant must select at least one of `outputs`
pub fn verify_covenants(
    resolved: &[UtxoEntry],
    outputs: &[TransactionOutput],
    height: u64,
) -> Result<(), ValidationError> {
    let failure = resolved.par_iter().find_map_first(|entry| {
        let context = CovenantContext::new(&entry.output, outputs, entry.mined_height, height);
        entry
            .output
            .covenant
            .check(&context)
            .err()
            .map(|reason: CovenantError| ValidationError::CovenantFailed {
                commitment: entry.commitment(),
                reason,
            })
    });
    failure.map_or(Ok(()), Err)
}

fn excess_sum(kernels: &[TransactionKernel]) -> Result<ProjectivePoint, ValidationError> {
    kernels
        .iter()
        .try_fold(ProjectivePoint::IDENTITY, |acc, kernel| {
            Ok(acc + kernel.excess.to_point()?)
        })
}

/// `Σout − Σin + fee·H − reward·H == Σexcess + offset·G`
///
/// Transactions pass `reward = 0`; blocks pass the block reward and include
/// the coinbase, whose value already covers the fees.
fn check_balance(
    body: &AggregateBody,
    offset: &SecretKey,
    fee: u64,
    reward: u64,
) -> Result<(), ValidationError> {
    let outputs = Commitment::sum(body.outputs.iter().map(|o| &o.commitment))?;
    let inputs = Commitment::sum(body.inputs.iter().map(|i| &i.commitment))?;
    let lhs = outputs - inputs + Commitment::from_value(fee).to_point()?
        - Commitment::from_value(reward).to_point()?;
    let rhs = excess_sum(&body.kernels)? + Commitment::commit(0, offset).to_point()?;
    if lhs != rhs {
        return Err(ValidationError::BalanceMismatch);
    }
    Ok(())
}

pub fn check_transaction_balance(
    body: &AggregateBody,
    offset: &SecretKey,
) -> Result<(), ValidationError> {
    let fee = body.total_fee().ok_or(ValidationError::FeeOverflow)?;
    check_balance(body, offset, fee, 0)
}

pub fn check_block_balance(
    body: &AggregateBody,
    total_offset: &SecretKey,
    reward: u64,
) -> Result<(), ValidationError> {
    // Fees are paid to the coinbase, so they cancel out of the block equation
    check_balance(body, total_offset, 0, reward)
}

/// Mimblewimble balance of a whole UTXO set:
/// `Σutxo − supply·H == Σexcess + Σoffset·G`
pub fn verify_horizon_balance(
    utxos: &UtxoSet,
    kernels: &[TransactionKernel],
    total_offset: &SecretKey,
    supply: u64,
) -> Result<(), ValidationError> {
    let lhs = utxos.commitment_sum()? - Commitment::from_value(supply).to_point()?;
    let rhs = excess_sum(kernels)? + Commitment::commit(0, total_offset).to_point()?;
    if lhs != rhs {
        return Err(ValidationError::BalanceMismatch);
    }
    Ok(())
}
