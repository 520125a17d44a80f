//! Block and block header
//!
//! The header wire format is consensus critical. All integers are
//! little-endian, in this order:
//!
//! ```text
//! version u16 | height u64 | prev_hash 32 | timestamp u64 |
//! output_mr 32 | range_proof_mr 32 | kernel_mr 32 | total_kernel_offset 32 |
//! nonce u64 | accumulated_primary u64 | accumulated_secondary u64 |
//! pow_algo u8 | varint len + pow_data
//! ```

use serde::{Deserialize, Serialize};

use crate::constants::{BLOCKCHAIN_VERSION, MAX_POW_DATA_SIZE};
use crate::consensus::{
    pow, ConsensusDecoding, ConsensusEncoding, Decoder, Encoder, EncodingError, PowAlgorithm,
    PowError, ProofOfWork,
};
use crate::crypto::{hash_bytes, DomainHasher, Hash, SecretKey};
use crate::transaction::AggregateBody;

/// Block header containing all metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u16,
    /// Height of this block; parent height + 1
    pub height: u64,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Merkle root of the UTXO set after this block
    pub output_mr: Hash,
    /// Merkle root of the range proofs of the UTXO set after this block
    pub range_proof_mr: Hash,
    /// Merkle root of every kernel up to and including this block
    pub kernel_mr: Hash,
    /// Sum of the offsets of the transactions in this block
    pub total_kernel_offset: SecretKey,
    /// Nonce used for PoW
    pub nonce: u64,
    pub pow: ProofOfWork,
}

impl BlockHeader {
    /// Header template for a child of `prev`
    pub fn from_previous(prev: &BlockHeader) -> Self {
        Self {
            version: BLOCKCHAIN_VERSION,
            height: prev.height + 1,
            prev_hash: prev.hash(),
            timestamp: prev.timestamp,
            output_mr: Hash::zero(),
            range_proof_mr: Hash::zero(),
            kernel_mr: Hash::zero(),
            total_kernel_offset: SecretKey::zero(),
            nonce: 0,
            pow: ProofOfWork::new(PowAlgorithm::Primary),
        }
    }

    /// Calculate the hash of this header
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_consensus_bytes())
    }

    /// Hash committed to by the proof of work: every field except the
    /// nonce and the algorithm data, which the miner varies.
    pub fn mining_hash(&self) -> Hash {
        DomainHasher::new("mining_hash")
            .chain(self.version.to_le_bytes())
            .chain(self.height.to_le_bytes())
            .chain(self.prev_hash.0)
            .chain(self.timestamp.to_le_bytes())
            .chain(self.output_mr.0)
            .chain(self.range_proof_mr.0)
            .chain(self.kernel_mr.0)
            .chain(self.total_kernel_offset.to_bytes())
            .chain(self.pow.accumulated_primary.to_le_bytes())
            .chain(self.pow.accumulated_secondary.to_le_bytes())
            .chain([self.pow.pow_algo.as_u8()])
            .finalize()
    }

    /// Difficulty achieved by this header's proof of work
    pub fn achieved_difficulty(&self) -> Result<u64, PowError> {
        pow::achieved_difficulty(
            self.pow.pow_algo,
            &self.mining_hash(),
            self.nonce,
            &self.pow.pow_data,
        )
    }
}

impl ConsensusEncoding for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u16(self.version);
        encoder.write_u64(self.height);
        encoder.write_bytes(&self.prev_hash.0);
        encoder.write_u64(self.timestamp);
        encoder.write_bytes(&self.output_mr.0);
        encoder.write_bytes(&self.range_proof_mr.0);
        encoder.write_bytes(&self.kernel_mr.0);
        encoder.write_bytes(&self.total_kernel_offset.to_bytes());
        encoder.write_u64(self.nonce);
        encoder.write_u64(self.pow.accumulated_primary);
        encoder.write_u64(self.pow.accumulated_secondary);
        encoder.write_u8(self.pow.pow_algo.as_u8());
        encoder.write_var_bytes(&self.pow.pow_data);
    }
}

impl ConsensusDecoding for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder<'_>) -> Result<Self, EncodingError> {
        let version = decoder.read_u16()?;
        let height = decoder.read_u64()?;
        let prev_hash = Hash(decoder.read_array()?);
        let timestamp = decoder.read_u64()?;
        let output_mr = Hash(decoder.read_array()?);
        let range_proof_mr = Hash(decoder.read_array()?);
        let kernel_mr = Hash(decoder.read_array()?);
        let total_kernel_offset = SecretKey::from_bytes(&decoder.read_array()?)
            .map_err(|e| EncodingError::Invalid(format!("kernel offset: {}", e)))?;
        let nonce = decoder.read_u64()?;
        let accumulated_primary = decoder.read_u64()?;
        let accumulated_secondary = decoder.read_u64()?;
        let pow_algo = PowAlgorithm::from_u8(decoder.read_u8()?)
            .map_err(|e| EncodingError::Invalid(e.to_string()))?;
        let pow_data = decoder.read_var_bytes(MAX_POW_DATA_SIZE)?.to_vec();
        Ok(Self {
            version,
            height,
            prev_hash,
            timestamp,
            output_mr,
            range_proof_mr,
            kernel_mr,
            total_kernel_offset,
            nonce,
            pow: ProofOfWork {
                accumulated_primary,
                accumulated_secondary,
                pow_algo,
                pow_data,
            },
        })
    }
}

/// A complete block: header plus aggregate body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub body: AggregateBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: AggregateBody) -> Self {
        Self { header, body }
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_hash == Hash::zero()
    }
}
