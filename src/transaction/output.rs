//! Transaction outputs
//!
//! An output is a Pedersen commitment with a range proof, a spending script,
//! a covenant and features. The sender offset key signs the output hash
//! (the metadata signature) so nobody can alter the script or covenant later.

use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusEncoding;
use crate::covenants::Covenant;
use crate::crypto::{
    Commitment, CryptoError, DomainHasher, Hash, PublicKey, RangeProof, SecretKey, Signature,
};
use crate::script::Script;

use super::OutputFeatures;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub features: OutputFeatures,
    pub commitment: Commitment,
    pub range_proof: RangeProof,
    pub script: Script,
    pub sender_offset_public_key: PublicKey,
    pub covenant: Covenant,
    /// Signature by the sender offset key over the output hash
    pub metadata_signature: Signature,
}

impl TransactionOutput {
    /// Hash of everything except the range proof and metadata signature
    pub fn hash(&self) -> Hash {
        DomainHasher::new("output")
            .chain(self.features.to_consensus_bytes())
            .chain(self.commitment.0)
            .chain(self.script.to_bytes())
            .chain(self.sender_offset_public_key.0)
            .chain((self.covenant.len() as u64).to_le_bytes())
            .chain(self.covenant.as_bytes())
            .finalize()
    }

    pub fn is_coinbase(&self) -> bool {
        self.features.is_coinbase()
    }

    pub fn sign_metadata(&mut self, sender_offset: &SecretKey) {
        self.metadata_signature = Signature::sign(sender_offset, &self.hash());
    }

    pub fn verify_metadata_signature(&self) -> Result<(), CryptoError> {
        self.metadata_signature
            .verify(&self.sender_offset_public_key, &self.hash())
    }

    pub fn verify_range_proof(&self) -> Result<(), CryptoError> {
        self.range_proof.verify(&self.commitment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::UnblindedOutput;

    #[test]
    fn test_metadata_signature_binds_script() {
        let sender_offset = SecretKey::random();
        let mut output =
            UnblindedOutput::new(50, SecretKey::random()).as_transaction_output(&sender_offset);
        assert!(output.verify_metadata_signature().is_ok());
        assert!(output.verify_range_proof().is_ok());

        output.script = Script::pay_to_public_key(&SecretKey::random().public_key());
        assert!(output.verify_metadata_signature().is_err());
    }

    #[test]
    fn test_hash_excludes_proof_and_signature() {
        let output =
            UnblindedOutput::new(5, SecretKey::random()).as_transaction_output(&SecretKey::random());
        let mut altered = output.clone();
        altered.metadata_signature = Signature::default();
        altered.range_proof = RangeProof(vec![]);
        assert_eq!(output.hash(), altered.hash());
    }
}
