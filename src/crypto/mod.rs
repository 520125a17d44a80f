//! Cryptography module - Blake2b hashing, Pedersen commitments, Schnorr
//! signatures, range proofs and Merkle roots

mod commitment;
mod hash;
mod keys;
mod merkle;
mod range_proof;
mod schnorr;

pub use commitment::*;
pub use hash::*;
pub use keys::*;
pub use merkle::*;
pub use range_proof::*;
pub use schnorr::*;
