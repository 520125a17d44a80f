//! Range proofs that a committed value lies in `[0, 2^64)`
//!
//! The value is split into 64 bit commitments `C_i = b_i·2^i·H + r_i·G` whose
//! sum is the output commitment. Each bit carries a two-key ring signature
//! proving `C_i` opens to either `0` or `2^i` without saying which.

use k256::elliptic_curve::{Field, PrimeField};
use k256::{FieldBytes, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::commitment::generator_h;
use super::keys::{decode_point, encode_point, scalar_from_hash, POINT_LENGTH};
use super::{Commitment, CryptoError, DomainHasher, Hash, SecretKey};

/// Number of value bits proven
pub const RANGE_BITS: usize = 64;

const BIT_PROOF_LENGTH: usize = POINT_LENGTH + 32 * 3;

/// Serialized proof; parsed lazily so malformed bytes surface at verification
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeProof(pub Vec<u8>);

struct BitProof {
    commitment: ProjectivePoint,
    e0: Scalar,
    s0: Scalar,
    s1: Scalar,
}

impl RangeProof {
    /// Byte length of a well-formed proof
    pub const LENGTH: usize = RANGE_BITS * BIT_PROOF_LENGTH;

    /// Prove that `Commitment::commit(value, blinding)` hides a 64-bit value
    pub fn prove(value: u64, blinding: &SecretKey) -> RangeProof {
        let commitment = Commitment::commit(value, blinding);
        let h = generator_h();
        let mut blinds: Vec<Scalar> = (0..RANGE_BITS - 1)
            .map(|_| Scalar::random(&mut OsRng))
            .collect();
        let partial: Scalar = blinds.iter().fold(Scalar::ZERO, |acc, r| acc + *r);
        blinds.push(blinding.0 - partial);

        let mut bytes = Vec::with_capacity(Self::LENGTH);
        for (i, &r) in blinds.iter().enumerate() {
            let bit = (value >> i) & 1 == 1;
            let weight = h * Scalar::from(1u64 << i);
            let c_i = if bit {
                weight + ProjectivePoint::GENERATOR * r
            } else {
                ProjectivePoint::GENERATOR * r
            };
            // Ring keys: P0 = C_i, P1 = C_i - 2^i·H
            let p0 = c_i;
            let p1 = c_i - weight;
            let k = Scalar::random(&mut OsRng);
            let nonce = ProjectivePoint::GENERATOR * k;
            let (e0, s0, s1) = if bit {
                let e0 = bit_challenge(&commitment, i, &c_i, &nonce);
                let s0 = Scalar::random(&mut OsRng);
                let r0 = ProjectivePoint::GENERATOR * s0 - p0 * e0;
                let e1 = bit_challenge(&commitment, i, &c_i, &r0);
                (e0, s0, k + e1 * r)
            } else {
                let e1 = bit_challenge(&commitment, i, &c_i, &nonce);
                let s1 = Scalar::random(&mut OsRng);
                let r1 = ProjectivePoint::GENERATOR * s1 - p1 * e1;
                let e0 = bit_challenge(&commitment, i, &c_i, &r1);
                (e0, k + e0 * r, s1)
            };
            bytes.extend_from_slice(&encode_point(&c_i));
            bytes.extend_from_slice(&e0.to_bytes());
            bytes.extend_from_slice(&s0.to_bytes());
            bytes.extend_from_slice(&s1.to_bytes());
        }
        RangeProof(bytes)
    }

    /// Verify the proof against an output commitment
    pub fn verify(&self, commitment: &Commitment) -> Result<(), CryptoError> {
        if self.0.len() != Self::LENGTH {
            return Err(CryptoError::InvalidRangeProof(format!(
                "expected {} bytes, got {}",
                Self::LENGTH,
                self.0.len()
            )));
        }
        let target = commitment.to_point()?;
        let h = generator_h();
        let mut total = ProjectivePoint::IDENTITY;
        for (i, chunk) in self.0.chunks(BIT_PROOF_LENGTH).enumerate() {
            let proof = parse_bit_proof(chunk)?;
            let weight = h * Scalar::from(1u64 << i);
            let p0 = proof.commitment;
            let p1 = proof.commitment - weight;
            let r0 = ProjectivePoint::GENERATOR * proof.s0 - p0 * proof.e0;
            let e1 = bit_challenge(commitment, i, &proof.commitment, &r0);
            let r1 = ProjectivePoint::GENERATOR * proof.s1 - p1 * e1;
            let e0 = bit_challenge(commitment, i, &proof.commitment, &r1);
            if e0 != proof.e0 {
                return Err(CryptoError::InvalidRangeProof(format!("bit {} ring fails", i)));
            }
            total += proof.commitment;
        }
        if total != target {
            return Err(CryptoError::InvalidRangeProof(
                "bit commitments do not sum to the output".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hash(&self) -> Hash {
        DomainHasher::new("range_proof").chain(&self.0).finalize()
    }
}

impl fmt::Debug for RangeProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RangeProof({} bytes, {})", self.0.len(), self.hash())
    }
}

fn parse_bit_proof(chunk: &[u8]) -> Result<BitProof, CryptoError> {
    let mut point = [0u8; POINT_LENGTH];
    point.copy_from_slice(&chunk[..POINT_LENGTH]);
    let scalar_at = |offset: usize| -> Result<Scalar, CryptoError> {
        let bytes = FieldBytes::clone_from_slice(&chunk[offset..offset + 32]);
        Option::from(Scalar::from_repr(bytes))
            .ok_or_else(|| CryptoError::InvalidRangeProof("non-canonical scalar".to_string()))
    };
    Ok(BitProof {
        commitment: decode_point(&point)?,
        e0: scalar_at(POINT_LENGTH)?,
        s0: scalar_at(POINT_LENGTH + 32)?,
        s1: scalar_at(POINT_LENGTH + 64)?,
    })
}

fn bit_challenge(
    commitment: &Commitment,
    index: usize,
    bit_commitment: &ProjectivePoint,
    nonce: &ProjectivePoint,
) -> Scalar {
    let hash = DomainHasher::new("range_proof.bit")
        .chain(commitment.0)
        .chain((index as u64).to_le_bytes())
        .chain(encode_point(bit_commitment))
        .chain(encode_point(nonce))
        .finalize();
    scalar_from_hash(&hash)
}
