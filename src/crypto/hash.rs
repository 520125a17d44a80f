//! Blake2b-256 hashing
//!
//! Every consensus hash (headers, outputs, kernels, Merkle nodes) is
//! Blake2b with a 32-byte digest.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// 32-byte hash output
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// All-zero hash (genesis previous hash, empty Merkle root)
    pub const fn zero() -> Self {
        Hash([0u8; 32])
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Create hash from hex string
    pub fn from_hex(hex: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

/// Incremental hasher with a domain-separation label.
///
/// The label is written first, length-prefixed, so two domains can never
/// produce the same preimage.
pub struct DomainHasher {
    inner: Blake2b256,
}

impl DomainHasher {
    pub fn new(label: &str) -> Self {
        let mut inner = Blake2b256::new();
        let label = format!("mw_core.{}", label);
        inner.update((label.len() as u64).to_le_bytes());
        inner.update(label.as_bytes());
        Self { inner }
    }

    pub fn chain(mut self, data: impl AsRef<[u8]>) -> Self {
        self.inner.update(data.as_ref());
        self
    }

    pub fn update(&mut self, data: impl AsRef<[u8]>) {
        self.inner.update(data.as_ref());
    }

    pub fn finalize(self) -> Hash {
        Hash(self.inner.finalize().into())
    }
}

/// Hash arbitrary bytes using Blake2b-256
pub fn hash_bytes(data: &[u8]) -> Hash {
    Hash(Blake2b256::digest(data).into())
}

/// Hash two hashes together (Merkle node)
pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Blake2b256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"hello world";
        assert_eq!(hash_bytes(data), hash_bytes(data));
    }

    #[test]
    fn test_hash_different_inputs() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn test_known_vector() {
        // Blake2b-256 of the empty string
        let empty = hash_bytes(b"");
        assert_eq!(
            empty.to_hex(),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = hash_bytes(b"test");
        let recovered = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
    }

    #[test]
    fn test_domain_separation() {
        let a = DomainHasher::new("output").chain(b"x").finalize();
        let b = DomainHasher::new("kernel").chain(b"x").finalize();
        assert_ne!(a, b);
        assert_ne!(a, hash_bytes(b"x"));
    }

    #[test]
    fn test_hash_pair_order_matters() {
        let left = hash_bytes(b"left");
        let right = hash_bytes(b"right");
        assert_eq!(hash_pair(&left, &right), hash_pair(&left, &right));
        assert_ne!(hash_pair(&left, &right), hash_pair(&right, &left));
    }
}
