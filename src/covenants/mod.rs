//! Covenants
//!
//! A covenant attached to an output restricts the outputs of any transaction
//! that spends it. The covenant is a filter expression over the spending
//! transaction's outputs and passes when at least one output survives.

mod arguments;
pub mod byte_codes;
mod context;
mod expression;
mod fields;
mod filters;
mod output_set;

pub use arguments::CovenantArg;
pub use context::CovenantContext;
pub use expression::CovenantExpr;
pub use fields::{OutputField, OutputFields};
pub use filters::hash_fields;
pub use output_set::OutputSet;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::{Decoder, Encoder, EncodingError};

/// Malformed covenant bytecode
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CovenantDecodeError {
    #[error("Unknown covenant opcode 0x{0:02x}")]
    UnknownOpCode(u8),
    #[error("Unknown covenant argument type 0x{0:02x}")]
    UnknownArgType(u8),
    #[error("Expected argument type 0x{expected:02x}, got 0x{got:02x}")]
    UnexpectedArgType { expected: u8, got: u8 },
    #[error("Unknown output field {0}")]
    UnknownOutputField(u8),
    #[error("{0} output fields exceeds the limit")]
    TooManyFields(u64),
    #[error("Covenant nesting deeper than {0}")]
    MaxDepthExceeded(usize),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Covenant evaluation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CovenantError {
    #[error("Malformed covenant: {0}")]
    Decode(#[from] CovenantDecodeError),
    #[error("Field {0} is not a little-endian integer")]
    FieldNotInteger(OutputField),
    #[error("Relative height overflows")]
    HeightOverflow,
    #[error("No output satisfies the covenant")]
    NoMatchingOutputs,
}

/// Serialized covenant. Holds raw bytes so that a malformed covenant can be
/// carried (and rejected) by validation rather than failing deserialization.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Covenant {
    bytes: Vec<u8>,
}

impl Covenant {
    pub fn new(expr: &CovenantExpr) -> Self {
        let mut encoder = Encoder::new();
        expr.encode(&mut encoder);
        Self {
            bytes: encoder.finish(),
        }
    }

    /// The zero-byte covenant, which places no restriction
    pub fn empty() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Parse and validate covenant bytecode
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CovenantDecodeError> {
        let covenant = Self {
            bytes: bytes.to_vec(),
        };
        covenant.decode()?;
        Ok(covenant)
    }

    /// Wrap bytes without validating them
    pub fn from_raw_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the expression; `None` for the empty covenant
    pub fn decode(&self) -> Result<Option<CovenantExpr>, CovenantDecodeError> {
        if self.bytes.is_empty() {
            return Ok(None);
        }
        let mut decoder = Decoder::new(&self.bytes);
        let expr = CovenantExpr::decode(&mut decoder, 1)?;
        decoder.finish()?;
        Ok(Some(expr))
    }

    /// Outputs of the spending transaction selected by this covenant
    pub fn execute(&self, context: &CovenantContext<'_>) -> Result<OutputSet, CovenantError> {
        match self.decode()? {
            None => Ok(OutputSet::all(context.output_count())),
            Some(expr) => expr.execute(context),
        }
    }

    /// Pass when the covenant is empty or selects at least one output
    pub fn check(&self, context: &CovenantContext<'_>) -> Result<(), CovenantError> {
        if self.bytes.is_empty() {
            return Ok(());
        }
        if self.execute(context)?.is_empty() {
            return Err(CovenantError::NoMatchingOutputs);
        }
        Ok(())
    }
}

/// Evaluate serialized covenant bytes against a spending context
pub fn evaluate_covenant(
    covenant_bytes: &[u8],
    context: &CovenantContext<'_>,
) -> Result<OutputSet, CovenantError> {
    Covenant::from_raw_bytes(covenant_bytes.to_vec()).execute(context)
}

impl fmt::Debug for Covenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Covenant({})", hex::encode(&self.bytes))
    }
}

impl Serialize for Covenant {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.bytes)
    }
}

impl<'de> Deserialize<'de> for Covenant {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        Ok(Covenant::from_raw_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covenants::byte_codes::*;
    use crate::crypto::hash_bytes;

    #[test]
    fn test_bytes_roundtrip() {
        let expr = CovenantExpr::or(
            CovenantExpr::and(
                CovenantExpr::FieldsPreserved(OutputFields::new(vec![
                    OutputField::Script,
                    OutputField::Covenant,
                ])),
                CovenantExpr::RelativeHeight(144),
            ),
            CovenantExpr::OutputHashEq(hash_bytes(b"target")),
        );
        let covenant = Covenant::new(&expr);
        let parsed = Covenant::from_bytes(covenant.as_bytes()).unwrap();
        assert_eq!(parsed.decode().unwrap(), Some(expr));
        assert_eq!(parsed.as_bytes(), covenant.as_bytes());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Covenant::new(&CovenantExpr::Identity).as_bytes().to_vec();
        bytes.push(OP_IDENTITY);
        assert_eq!(
            Covenant::from_bytes(&bytes),
            Err(CovenantDecodeError::Encoding(EncodingError::TrailingBytes(1)))
        );
    }

    #[test]
    fn test_ten_fields_rejected() {
        let mut bytes = vec![FILTER_FIELDS_PRESERVED, ARG_OUTPUT_FIELDS, 10];
        bytes.extend_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7, 0, 1]);
        assert_eq!(
            Covenant::from_bytes(&bytes),
            Err(CovenantDecodeError::TooManyFields(10))
        );
    }

    #[test]
    fn test_empty_covenant() {
        let covenant = Covenant::empty();
        assert_eq!(covenant.decode().unwrap(), None);
        assert!(Covenant::from_bytes(&[]).is_ok());
    }

    #[test]
    fn test_raw_bytes_deserialize_without_validation() {
        let covenant = Covenant::from_raw_bytes(vec![0xee]);
        let bytes = bincode::serialize(&covenant).unwrap();
        let decoded: Covenant = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, covenant);
        assert!(decoded.decode().is_err());
    }
}
