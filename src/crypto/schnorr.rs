//! Schnorr signatures
//!
//! Signatures are `(R, s)` with `s·G = R + e·P` and
//! `e = H(R ‖ P ‖ m)`. Kernels and script signatures both use this scheme;
//! the message is always a domain-separated challenge hash built by the caller.

use k256::elliptic_curve::{Field, PrimeField};
use k256::{FieldBytes, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::keys::{decode_point, encode_point, point_serde, scalar_from_hash, POINT_LENGTH};
use super::{CryptoError, DomainHasher, Hash, PublicKey, SecretKey};

/// 65-byte Schnorr signature: public nonce (compressed) and scalar
#[derive(Clone, Copy, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "point_serde")]
    pub public_nonce: [u8; POINT_LENGTH],
    pub s: [u8; 32],
}

impl Signature {
    /// Sign a message hash with a fresh random nonce
    pub fn sign(secret: &SecretKey, message: &Hash) -> Signature {
        let nonce = Scalar::random(&mut OsRng);
        let public_nonce = ProjectivePoint::GENERATOR * nonce;
        let public_key = secret.public_key();
        let e = challenge(&public_nonce, &public_key, message);
        let s = nonce + e * secret.0;
        Signature {
            public_nonce: encode_point(&public_nonce),
            s: s.to_bytes().into(),
        }
    }

    /// Verify against a public key
    pub fn verify(&self, public_key: &PublicKey, message: &Hash) -> Result<(), CryptoError> {
        let p = public_key.to_point().map_err(|_| CryptoError::InvalidSignature)?;
        let r = decode_point(&self.public_nonce).map_err(|_| CryptoError::InvalidSignature)?;
        let s: Scalar = Option::from(Scalar::from_repr(FieldBytes::clone_from_slice(&self.s)))
            .ok_or(CryptoError::InvalidSignature)?;
        let e = challenge(&r, public_key, message);
        if ProjectivePoint::GENERATOR * s == r + p * e {
            Ok(())
        } else {
            Err(CryptoError::InvalidSignature)
        }
    }

    pub fn is_valid(&self, public_key: &PublicKey, message: &Hash) -> bool {
        self.verify(public_key, message).is_ok()
    }

    /// Hash of the signature bytes (mempool fingerprint)
    pub fn hash(&self) -> Hash {
        DomainHasher::new("signature")
            .chain(self.public_nonce)
            .chain(self.s)
            .finalize()
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature {
            public_nonce: [0u8; POINT_LENGTH],
            s: [0u8; 32],
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signature({}{})",
            hex::encode(self.public_nonce),
            hex::encode(self.s)
        )
    }
}

fn challenge(public_nonce: &ProjectivePoint, public_key: &PublicKey, message: &Hash) -> Scalar {
    let hash = DomainHasher::new("schnorr")
        .chain(encode_point(public_nonce))
        .chain(public_key.0)
        .chain(message.0)
        .finalize();
    scalar_from_hash(&hash)
}
