//! Pedersen commitments `C(v, r) = v·H + r·G`
//!
//! `H` is a nothing-up-my-sleeve generator found by hashing a fixed label to
//! x-coordinates until one lies on the curve, so nobody knows `log_G(H)`.

use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::sync::OnceLock;

use super::keys::{decode_point, encode_point, point_serde, POINT_LENGTH};
use super::{CryptoError, DomainHasher, PublicKey, SecretKey};

static GENERATOR_H: OnceLock<ProjectivePoint> = OnceLock::new();

/// The value generator `H`
pub fn generator_h() -> ProjectivePoint {
    *GENERATOR_H.get_or_init(|| {
        let mut counter: u64 = 0;
        loop {
            let x = DomainHasher::new("generator_h")
                .chain(counter.to_le_bytes())
                .finalize();
            let mut candidate = [0u8; POINT_LENGTH];
            candidate[0] = 0x02;
            candidate[1..].copy_from_slice(&x.0);
            if let Ok(point) = decode_point(&candidate) {
                return point;
            }
            counter += 1;
        }
    })
}

/// Compressed Pedersen commitment. The all-zero encoding is the identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "point_serde")] pub [u8; POINT_LENGTH]);

impl Commitment {
    /// Commit to `value` under `blinding`
    pub fn commit(value: u64, blinding: &SecretKey) -> Commitment {
        let point = generator_h() * Scalar::from(value) + ProjectivePoint::GENERATOR * blinding.0;
        Commitment::from_point(&point)
    }

    /// `value·H` with no blinding (fees, emission)
    pub fn from_value(value: u64) -> Commitment {
        Commitment::from_point(&(generator_h() * Scalar::from(value)))
    }

    /// `r·G`: the commitment form of a public key or offset
    pub fn from_public_key(key: &PublicKey) -> Result<Commitment, CryptoError> {
        Ok(Commitment::from_point(&key.to_point()?))
    }

    pub fn identity() -> Commitment {
        Commitment([0u8; POINT_LENGTH])
    }

    pub fn from_point(point: &ProjectivePoint) -> Commitment {
        Commitment(encode_point(point))
    }

    pub fn to_point(&self) -> Result<ProjectivePoint, CryptoError> {
        decode_point(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; POINT_LENGTH] {
        &self.0
    }

    /// Sum of commitments; fails if any encoding is invalid
    pub fn sum<'a, I>(commitments: I) -> Result<ProjectivePoint, CryptoError>
    where
        I: IntoIterator<Item = &'a Commitment>,
    {
        commitments
            .into_iter()
            .try_fold(ProjectivePoint::IDENTITY, |acc, c| Ok(acc + c.to_point()?))
    }

    /// Interpret as a public key (excess check: `C == r·G`)
    pub fn as_public_key(&self) -> PublicKey {
        PublicKey(self.0)
    }
}

impl Add for &Commitment {
    type Output = Result<Commitment, CryptoError>;

    fn add(self, rhs: &Commitment) -> Self::Output {
        Ok(Commitment::from_point(&(self.to_point()? + rhs.to_point()?)))
    }
}

impl Sub for &Commitment {
    type Output = Result<Commitment, CryptoError>;

    fn sub(self, rhs: &Commitment) -> Self::Output {
        Ok(Commitment::from_point(&(self.to_point()? - rhs.to_point()?)))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", hex::encode(self.0))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_h_is_independent() {
        let h = generator_h();
        assert_ne!(h, ProjectivePoint::GENERATOR);
        assert_ne!(h, ProjectivePoint::IDENTITY);
        assert_eq!(h, generator_h());
    }

    #[test]
    fn test_commitment_homomorphic() {
        let r1 = SecretKey::random();
        let r2 = SecretKey::random();
        let c1 = Commitment::commit(60, &r1);
        let c2 = Commitment::commit(40, &r2);
        let sum = (&c1 + &c2).unwrap();
        assert_eq!(sum, Commitment::commit(100, &(r1 + r2)));
    }

    #[test]
    fn test_balance_with_fee() {
        // 100 in, 95 out, fee 5: out - in + fee·H is a pure G multiple
        let r_in = SecretKey::random();
        let r_out = SecretKey::random();
        let input = Commitment::commit(100, &r_in);
        let output = Commitment::commit(95, &r_out);
        let excess = output.to_point().unwrap() - input.to_point().unwrap()
            + Commitment::from_value(5).to_point().unwrap();
        assert_eq!(excess, ProjectivePoint::GENERATOR * (r_out - r_in).0);
    }

    #[test]
    fn test_sum_of_nothing_is_identity() {
        let empty: Vec<Commitment> = vec![];
        assert_eq!(Commitment::sum(&empty).unwrap(), ProjectivePoint::IDENTITY);
        assert_eq!(Commitment::identity().to_point().unwrap(), ProjectivePoint::IDENTITY);
    }

    #[test]
    fn test_zero_value_zero_blind_is_identity() {
        assert_eq!(Commitment::commit(0, &SecretKey::zero()), Commitment::identity());
    }
}
