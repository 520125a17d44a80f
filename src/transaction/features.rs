use serde::{Deserialize, Serialize};

use crate::consensus::{ConsensusEncoding, Encoder};
use crate::crypto::Hash;

/// Output flag bits
pub mod output_flags {
    pub const COINBASE: u8 = 0x01;
    pub const NON_FUNGIBLE: u8 = 0x02;
}

/// Kernel flag bits
pub mod kernel_features {
    pub const COINBASE_KERNEL: u8 = 0x01;
}

/// Output features: flags, maturity height and non-fungible marker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFeatures {
    pub flags: u8,
    /// The output cannot be spent in a block below this height
    pub maturity: u64,
    /// Token identifier; present exactly when the NON_FUNGIBLE flag is set
    pub unique_id: Option<Hash>,
}

impl OutputFeatures {
    pub fn with_maturity(maturity: u64) -> Self {
        Self {
            maturity,
            ..Default::default()
        }
    }

    pub fn coinbase(maturity: u64) -> Self {
        Self {
            flags: output_flags::COINBASE,
            maturity,
            unique_id: None,
        }
    }

    pub fn non_fungible(unique_id: Hash) -> Self {
        Self {
            flags: output_flags::NON_FUNGIBLE,
            maturity: 0,
            unique_id: Some(unique_id),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.flags & output_flags::COINBASE != 0
    }

    pub fn is_non_fungible(&self) -> bool {
        self.flags & output_flags::NON_FUNGIBLE != 0
    }

    /// Flags are known and the non-fungible marker agrees with its flag
    pub fn is_well_formed(&self) -> bool {
        let known = output_flags::COINBASE | output_flags::NON_FUNGIBLE;
        self.flags & !known == 0 && self.is_non_fungible() == self.unique_id.is_some()
    }
}

impl ConsensusEncoding for OutputFeatures {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.flags);
        encoder.write_u64(self.maturity);
        match &self.unique_id {
            Some(id) => {
                encoder.write_u8(1);
                encoder.write_bytes(&id.0);
            }
            None => encoder.write_u8(0),
        }
    }
}
