//! Secret scalars and compressed public keys on secp256k1

use k256::elliptic_curve::bigint::U256;
use k256::elliptic_curve::group::{Group, GroupEncoding};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::{Field, PrimeField};
use k256::{FieldBytes, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use thiserror::Error;

use super::Hash;

/// Length of a compressed SEC1 point
pub const POINT_LENGTH: usize = 33;

/// Primitive errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid curve point")]
    InvalidPoint,
    #[error("Invalid scalar")]
    InvalidScalar,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid range proof: {0}")]
    InvalidRangeProof(String),
}

/// Secret scalar: private keys, blinding factors, kernel offsets.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SecretKey(pub(crate) Scalar);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

impl SecretKey {
    pub fn random() -> Self {
        SecretKey(Scalar::random(&mut OsRng))
    }

    pub fn zero() -> Self {
        SecretKey(Scalar::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        bool::from(self.0.is_zero())
    }

    /// Parse a canonical big-endian scalar
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        Option::from(Scalar::from_repr(FieldBytes::clone_from_slice(bytes)))
            .map(SecretKey)
            .ok_or(CryptoError::InvalidScalar)
    }

    /// Reduce a hash modulo the group order
    pub fn from_hash(hash: &Hash) -> Self {
        SecretKey(scalar_from_hash(hash))
    }

    pub fn from_u64(value: u64) -> Self {
        SecretKey(Scalar::from(value))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_point(&(ProjectivePoint::GENERATOR * self.0))
    }
}

impl Add for SecretKey {
    type Output = SecretKey;

    fn add(self, rhs: SecretKey) -> SecretKey {
        SecretKey(self.0 + rhs.0)
    }
}

impl Sub for SecretKey {
    type Output = SecretKey;

    fn sub(self, rhs: SecretKey) -> SecretKey {
        SecretKey(self.0 - rhs.0)
    }
}

impl Neg for SecretKey {
    type Output = SecretKey;

    fn neg(self) -> SecretKey {
        SecretKey(-self.0)
    }
}

impl Serialize for SecretKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        SecretKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn scalar_from_hash(hash: &Hash) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::clone_from_slice(&hash.0))
}

/// Compressed public key (33 bytes). Decoding is deferred to use so that
/// malformed keys on the wire fail validation instead of deserialization.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "point_serde")] pub [u8; POINT_LENGTH]);

impl PublicKey {
    pub fn from_point(point: &ProjectivePoint) -> Self {
        PublicKey(encode_point(point))
    }

    pub fn from_bytes(bytes: &[u8; POINT_LENGTH]) -> Result<Self, CryptoError> {
        let key = PublicKey(*bytes);
        key.to_point()?;
        Ok(key)
    }

    /// Decompress into a curve point. The identity is not a usable key.
    pub fn to_point(&self) -> Result<ProjectivePoint, CryptoError> {
        let point = decode_point(&self.0)?;
        if bool::from(point.is_identity()) {
            return Err(CryptoError::InvalidPoint);
        }
        Ok(point)
    }

    pub fn as_bytes(&self) -> &[u8; POINT_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Decode a compressed point; 33 zero bytes encode the identity
pub(crate) fn decode_point(bytes: &[u8; POINT_LENGTH]) -> Result<ProjectivePoint, CryptoError> {
    if bytes.iter().all(|b| *b == 0) {
        return Ok(ProjectivePoint::IDENTITY);
    }
    let repr = <ProjectivePoint as GroupEncoding>::Repr::clone_from_slice(bytes);
    Option::from(ProjectivePoint::from_bytes(&repr)).ok_or(CryptoError::InvalidPoint)
}

pub(crate) fn encode_point(point: &ProjectivePoint) -> [u8; POINT_LENGTH] {
    let mut bytes = [0u8; POINT_LENGTH];
    if !bool::from(point.is_identity()) {
        bytes.copy_from_slice(&point.to_bytes());
    }
    bytes
}

/// Serde for fixed 33-byte points (serde only derives arrays up to 32)
pub(crate) mod point_serde {
    use super::POINT_LENGTH;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; POINT_LENGTH], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; POINT_LENGTH], D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        if bytes.len() != POINT_LENGTH {
            return Err(serde::de::Error::custom("Invalid point length"));
        }
        let mut arr = [0u8; POINT_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_serialization() {
        let secret = SecretKey::random();
        let recovered = SecretKey::from_bytes(&secret.to_bytes()).unwrap();
        assert_eq!(secret.public_key(), recovered.public_key());
    }

    #[test]
    fn test_public_key_roundtrip() {
        let public = SecretKey::random().public_key();
        let point = public.to_point().unwrap();
        assert_eq!(PublicKey::from_point(&point), public);
    }

    #[test]
    fn test_invalid_point_rejected() {
        let mut bytes = [0xffu8; POINT_LENGTH];
        bytes[0] = 0x02;
        assert_eq!(PublicKey::from_bytes(&bytes), Err(CryptoError::InvalidPoint));
    }

    #[test]
    fn test_identity_is_not_a_key() {
        let zero = PublicKey([0u8; POINT_LENGTH]);
        assert_eq!(zero.to_point(), Err(CryptoError::InvalidPoint));
        assert_eq!(decode_point(&zero.0).unwrap(), ProjectivePoint::IDENTITY);
    }

    #[test]
    fn test_scalar_arithmetic() {
        let a = SecretKey::random();
        let b = SecretKey::random();
        let sum = a + b;
        assert_eq!(sum - b, a);
        assert!((a + (-a)).is_zero());
    }

    #[test]
    fn test_bincode_roundtrip() {
        let public = SecretKey::random().public_key();
        let bytes = bincode::serialize(&public).unwrap();
        let recovered: PublicKey = bincode::deserialize(&bytes).unwrap();
        assert_eq!(public, recovered);
    }
}
