//! Type-tagged covenant arguments

use crate::constants::COVENANT_MAX_FIELDS;
use crate::consensus::{Decoder, Encoder};
use crate::crypto::{Commitment, Hash, PublicKey, POINT_LENGTH};
use crate::script::{Script, MAX_SCRIPT_BYTES};

use super::byte_codes::*;
use super::{Covenant, CovenantDecodeError, OutputField, OutputFields};

/// Largest variable-length argument payload
const MAX_ARG_BYTES: usize = MAX_SCRIPT_BYTES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CovenantArg {
    Hash(Hash),
    PublicKey(PublicKey),
    Commitment(Commitment),
    Script(Script),
    Covenant(Covenant),
    VarInt(u64),
    OutputField(OutputField),
    OutputFields(OutputFields),
    Bytes(Vec<u8>),
}

impl CovenantArg {
    pub fn code(&self) -> u8 {
        match self {
            CovenantArg::Hash(_) => ARG_HASH,
            CovenantArg::PublicKey(_) => ARG_PUBLIC_KEY,
            CovenantArg::Commitment(_) => ARG_COMMITMENT,
            CovenantArg::Script(_) => ARG_SCRIPT,
            CovenantArg::Covenant(_) => ARG_COVENANT,
            CovenantArg::VarInt(_) => ARG_VAR_INT,
            CovenantArg::OutputField(_) => ARG_OUTPUT_FIELD,
            CovenantArg::OutputFields(_) => ARG_OUTPUT_FIELDS,
            CovenantArg::Bytes(_) => ARG_BYTES,
        }
    }

    pub fn read_from(decoder: &mut Decoder<'_>) -> Result<Self, CovenantDecodeError> {
        let code = decoder.read_u8()?;
        let arg = match code {
            ARG_HASH => CovenantArg::Hash(Hash(decoder.read_array()?)),
            ARG_PUBLIC_KEY => CovenantArg::PublicKey(PublicKey(decoder.read_array::<POINT_LENGTH>()?)),
            ARG_COMMITMENT => CovenantArg::Commitment(Commitment(decoder.read_array::<POINT_LENGTH>()?)),
            ARG_SCRIPT => {
                let bytes = decoder.read_var_bytes(MAX_ARG_BYTES)?;
                CovenantArg::Script(Script::from_bytes(bytes)?)
            }
            ARG_COVENANT => {
                let bytes = decoder.read_var_bytes(MAX_ARG_BYTES)?;
                CovenantArg::Covenant(Covenant::from_bytes(bytes)?)
            }
            ARG_VAR_INT => CovenantArg::VarInt(decoder.read_varint()?),
            ARG_OUTPUT_FIELD => CovenantArg::OutputField(OutputField::from_byte(decoder.read_u8()?)?),
            ARG_OUTPUT_FIELDS => {
                let declared = decoder.read_varint()?;
                let count = usize::try_from(declared)
                    .ok()
                    .filter(|count| *count <= COVENANT_MAX_FIELDS)
                    .ok_or(CovenantDecodeError::TooManyFields(declared))?;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(OutputField::from_byte(decoder.read_u8()?)?);
                }
                CovenantArg::OutputFields(OutputFields::new(fields))
            }
            ARG_BYTES => CovenantArg::Bytes(decoder.read_var_bytes(MAX_ARG_BYTES)?.to_vec()),
            other => return Err(CovenantDecodeError::UnknownArgType(other)),
        };
        Ok(arg)
    }

    pub fn write_to(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.code());
        match self {
            CovenantArg::Hash(hash) => encoder.write_bytes(&hash.0),
            CovenantArg::PublicKey(key) => encoder.write_bytes(&key.0),
            CovenantArg::Commitment(commitment) => encoder.write_bytes(&commitment.0),
            CovenantArg::Script(script) => encoder.write_var_bytes(&script.to_bytes()),
            CovenantArg::Covenant(covenant) => encoder.write_var_bytes(covenant.as_bytes()),
            CovenantArg::VarInt(value) => encoder.write_varint(*value),
            CovenantArg::OutputField(field) => encoder.write_u8(field.as_byte()),
            CovenantArg::OutputFields(fields) => {
                encoder.write_varint(fields.len() as u64);
                for field in fields.fields() {
                    encoder.write_u8(field.as_byte());
                }
            }
            CovenantArg::Bytes(bytes) => encoder.write_var_bytes(bytes),
        }
    }
}

fn unexpected(expected: u8, got: &CovenantArg) -> CovenantDecodeError {
    CovenantDecodeError::UnexpectedArgType {
        expected,
        got: got.code(),
    }
}

pub(super) fn require_hash(decoder: &mut Decoder<'_>) -> Result<Hash, CovenantDecodeError> {
    match CovenantArg::read_from(decoder)? {
        CovenantArg::Hash(hash) => Ok(hash),
        other => Err(unexpected(ARG_HASH, &other)),
    }
}

pub(super) fn require_varint(decoder: &mut Decoder<'_>) -> Result<u64, CovenantDecodeError> {
    match CovenantArg::read_from(decoder)? {
        CovenantArg::VarInt(value) => Ok(value),
        other => Err(unexpected(ARG_VAR_INT, &other)),
    }
}

pub(super) fn require_output_field(
    decoder: &mut Decoder<'_>,
) -> Result<OutputField, CovenantDecodeError> {
    match CovenantArg::read_from(decoder)? {
        CovenantArg::OutputField(field) => Ok(field),
        other => Err(unexpected(ARG_OUTPUT_FIELD, &other)),
    }
}

pub(super) fn require_output_fields(
    decoder: &mut Decoder<'_>,
) -> Result<OutputFields, CovenantDecodeError> {
    match CovenantArg::read_from(decoder)? {
        CovenantArg::OutputFields(fields) => Ok(fields),
        other => Err(unexpected(ARG_OUTPUT_FIELDS, &other)),
    }
}
