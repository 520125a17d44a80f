//! Output fields addressable by covenant filters

use std::fmt;

use crate::consensus::ConsensusEncoding;
use crate::transaction::TransactionOutput;

use super::CovenantDecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputField {
    Commitment,
    Script,
    SenderOffsetPublicKey,
    Covenant,
    Features,
    FeaturesFlags,
    FeaturesMaturity,
    FeaturesUniqueId,
}

impl OutputField {
    pub fn as_byte(&self) -> u8 {
        match self {
            OutputField::Commitment => 0,
            OutputField::Script => 1,
            OutputField::SenderOffsetPublicKey => 2,
            OutputField::Covenant => 3,
            OutputField::Features => 4,
            OutputField::FeaturesFlags => 5,
            OutputField::FeaturesMaturity => 6,
            OutputField::FeaturesUniqueId => 7,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, CovenantDecodeError> {
        let field = match byte {
            0 => OutputField::Commitment,
            1 => OutputField::Script,
            2 => OutputField::SenderOffsetPublicKey,
            3 => OutputField::Covenant,
            4 => OutputField::Features,
            5 => OutputField::FeaturesFlags,
            6 => OutputField::FeaturesMaturity,
            7 => OutputField::FeaturesUniqueId,
            other => return Err(CovenantDecodeError::UnknownOutputField(other)),
        };
        Ok(field)
    }

    /// Consensus encoding of this field of `output`
    pub fn get_field_bytes(&self, output: &TransactionOutput) -> Vec<u8> {
        match self {
            OutputField::Commitment => output.commitment.0.to_vec(),
            OutputField::Script => output.script.to_bytes(),
            OutputField::SenderOffsetPublicKey => output.sender_offset_public_key.0.to_vec(),
            OutputField::Covenant => output.covenant.as_bytes().to_vec(),
            OutputField::Features => output.features.to_consensus_bytes(),
            OutputField::FeaturesFlags => vec![output.features.flags],
            OutputField::FeaturesMaturity => output.features.maturity.to_le_bytes().to_vec(),
            OutputField::FeaturesUniqueId => output
                .features
                .unique_id
                .map(|id| id.0.to_vec())
                .unwrap_or_default(),
        }
    }

    /// Field value as a little-endian integer of one to eight bytes
    pub fn get_field_int(&self, output: &TransactionOutput) -> Option<u64> {
        let bytes = self.get_field_bytes(output);
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Some(u64::from_le_bytes(buf))
    }

    pub fn is_eq(&self, a: &TransactionOutput, b: &TransactionOutput) -> bool {
        self.get_field_bytes(a) == self.get_field_bytes(b)
    }
}

impl fmt::Display for OutputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputField::Commitment => "commitment",
            OutputField::Script => "script",
            OutputField::SenderOffsetPublicKey => "sender_offset_public_key",
            OutputField::Covenant => "covenant",
            OutputField::Features => "features",
            OutputField::FeaturesFlags => "features.flags",
            OutputField::FeaturesMaturity => "features.maturity",
            OutputField::FeaturesUniqueId => "features.unique_id",
        };
        f.write_str(name)
    }
}

/// Ordered list of fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputFields(Vec<OutputField>);

impl OutputFields {
    pub fn new(fields: Vec<OutputField>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[OutputField] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenated field bytes, in list order
    pub fn concat_bytes(&self, output: &TransactionOutput) -> Vec<u8> {
        self.0
            .iter()
            .flat_map(|field| field.get_field_bytes(output))
            .collect()
    }

    pub fn is_eq(&self, a: &TransactionOutput, b: &TransactionOutput) -> bool {
        self.0.iter().all(|field| field.is_eq(a, b))
    }
}

impl From<Vec<OutputField>> for OutputFields {
    fn from(fields: Vec<OutputField>) -> Self {
        Self(fields)
    }
}
