//! Covenant expression tree and its bytecode
//!
//! An expression is an opcode byte followed by its operands. Set operators
//! take nested expressions inline; filters take type-tagged arguments.

use crate::constants::COVENANT_MAX_DEPTH;
use crate::consensus::{Decoder, Encoder};
use crate::crypto::Hash;

use super::arguments::{require_hash, require_output_field, require_output_fields, require_varint, CovenantArg};
use super::byte_codes::*;
use super::{CovenantDecodeError, OutputField, OutputFields};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CovenantExpr {
    /// Every output
    Identity,
    And(Box<CovenantExpr>, Box<CovenantExpr>),
    Or(Box<CovenantExpr>, Box<CovenantExpr>),
    Xor(Box<CovenantExpr>, Box<CovenantExpr>),
    /// Complement within the spending transaction's outputs
    Not(Box<CovenantExpr>),
    /// No outputs
    Empty,
    OutputHashEq(Hash),
    FieldsPreserved(OutputFields),
    FieldIntEq(OutputField, u64),
    FieldsHashedEq(OutputFields, Hash),
    RelativeHeight(u64),
}

impl CovenantExpr {
    pub fn and(a: CovenantExpr, b: CovenantExpr) -> Self {
        CovenantExpr::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: CovenantExpr, b: CovenantExpr) -> Self {
        CovenantExpr::Or(Box::new(a), Box::new(b))
    }

    pub fn xor(a: CovenantExpr, b: CovenantExpr) -> Self {
        CovenantExpr::Xor(Box::new(a), Box::new(b))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(a: CovenantExpr) -> Self {
        CovenantExpr::Not(Box::new(a))
    }

    pub fn code(&self) -> u8 {
        match self {
            CovenantExpr::Identity => OP_IDENTITY,
            CovenantExpr::And(..) => OP_AND,
            CovenantExpr::Or(..) => OP_OR,
            CovenantExpr::Xor(..) => OP_XOR,
            CovenantExpr::Not(_) => OP_NOT,
            CovenantExpr::Empty => OP_EMPTY,
            CovenantExpr::OutputHashEq(_) => FILTER_OUTPUT_HASH_EQ,
            CovenantExpr::FieldsPreserved(_) => FILTER_FIELDS_PRESERVED,
            CovenantExpr::FieldIntEq(..) => FILTER_FIELD_INT_EQ,
            CovenantExpr::FieldsHashedEq(..) => FILTER_FIELDS_HASHED_EQ,
            CovenantExpr::RelativeHeight(_) => FILTER_RELATIVE_HEIGHT,
        }
    }

    /// Nodes on the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        match self {
            CovenantExpr::And(a, b) | CovenantExpr::Or(a, b) | CovenantExpr::Xor(a, b) => {
                1 + a.depth().max(b.depth())
            }
            CovenantExpr::Not(a) => 1 + a.depth(),
            _ => 1,
        }
    }

    pub fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.code());
        match self {
            CovenantExpr::Identity | CovenantExpr::Empty => {}
            CovenantExpr::And(a, b) | CovenantExpr::Or(a, b) | CovenantExpr::Xor(a, b) => {
                a.encode(encoder);
                b.encode(encoder);
            }
            CovenantExpr::Not(a) => a.encode(encoder),
            CovenantExpr::OutputHashEq(hash) => CovenantArg::Hash(*hash).write_to(encoder),
            CovenantExpr::FieldsPreserved(fields) => {
                CovenantArg::OutputFields(fields.clone()).write_to(encoder)
            }
            CovenantExpr::FieldIntEq(field, value) => {
                CovenantArg::OutputField(*field).write_to(encoder);
                CovenantArg::VarInt(*value).write_to(encoder);
            }
            CovenantExpr::FieldsHashedEq(fields, hash) => {
                CovenantArg::OutputFields(fields.clone()).write_to(encoder);
                CovenantArg::Hash(*hash).write_to(encoder);
            }
            CovenantExpr::RelativeHeight(height) => CovenantArg::VarInt(*height).write_to(encoder),
        }
    }

    /// Decode one expression whose root sits at `depth` (the root is 1)
    pub fn decode(decoder: &mut Decoder<'_>, depth: usize) -> Result<Self, CovenantDecodeError> {
        if depth > COVENANT_MAX_DEPTH {
            return Err(CovenantDecodeError::MaxDepthExceeded(COVENANT_MAX_DEPTH));
        }
        let code = decoder.read_u8()?;
        let expr = match code {
            OP_IDENTITY => CovenantExpr::Identity,
            OP_EMPTY => CovenantExpr::Empty,
            OP_AND | OP_OR | OP_XOR => {
                let a = Box::new(Self::decode(decoder, depth + 1)?);
                let b = Box::new(Self::decode(decoder, depth + 1)?);
                match code {
                    OP_AND => CovenantExpr::And(a, b),
                    OP_OR => CovenantExpr::Or(a, b),
                    _ => CovenantExpr::Xor(a, b),
                }
            }
            OP_NOT => CovenantExpr::Not(Box::new(Self::decode(decoder, depth + 1)?)),
            FILTER_OUTPUT_HASH_EQ => CovenantExpr::OutputHashEq(require_hash(decoder)?),
            FILTER_FIELDS_PRESERVED => CovenantExpr::FieldsPreserved(require_output_fields(decoder)?),
            FILTER_FIELD_INT_EQ => {
                let field = require_output_field(decoder)?;
                CovenantExpr::FieldIntEq(field, require_varint(decoder)?)
            }
            FILTER_FIELDS_HASHED_EQ => {
                let fields = require_output_fields(decoder)?;
                CovenantExpr::FieldsHashedEq(fields, require_hash(decoder)?)
            }
            FILTER_RELATIVE_HEIGHT => CovenantExpr::RelativeHeight(require_varint(decoder)?),
            other => return Err(CovenantDecodeError::UnknownOpCode(other)),
        };
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_nots(count: usize) -> CovenantExpr {
        (0..count).fold(CovenantExpr::Identity, |expr, _| CovenantExpr::not(expr))
    }

    fn decode_all(bytes: &[u8]) -> Result<CovenantExpr, CovenantDecodeError> {
        let mut decoder = Decoder::new(bytes);
        let expr = CovenantExpr::decode(&mut decoder, 1)?;
        decoder.finish()?;
        Ok(expr)
    }

    #[test]
    fn test_depth_limit() {
        let ok = nested_nots(COVENANT_MAX_DEPTH - 1);
        assert_eq!(ok.depth(), COVENANT_MAX_DEPTH);
        let mut encoder = Encoder::new();
        ok.encode(&mut encoder);
        assert_eq!(decode_all(&encoder.finish()).unwrap(), ok);

        let too_deep = nested_nots(COVENANT_MAX_DEPTH);
        let mut encoder = Encoder::new();
        too_deep.encode(&mut encoder);
        assert_eq!(
            decode_all(&encoder.finish()),
            Err(CovenantDecodeError::MaxDepthExceeded(COVENANT_MAX_DEPTH))
        );
    }

    #[test]
    fn test_operator_layout() {
        let expr = CovenantExpr::and(CovenantExpr::Identity, CovenantExpr::RelativeHeight(10));
        let mut encoder = Encoder::new();
        expr.encode(&mut encoder);
        assert_eq!(
            encoder.finish(),
            vec![OP_AND, OP_IDENTITY, FILTER_RELATIVE_HEIGHT, ARG_VAR_INT, 10]
        );
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(decode_all(&[0x26]), Err(CovenantDecodeError::UnknownOpCode(0x26)));
    }

    #[test]
    fn test_missing_operand() {
        assert!(matches!(
            decode_all(&[OP_AND, OP_IDENTITY]),
            Err(CovenantDecodeError::Encoding(_))
        ));
    }
}
