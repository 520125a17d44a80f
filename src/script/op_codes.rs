//! Script instruction set
//!
//! A closed set of opcodes. Each is a single byte, optionally followed by a
//! fixed-size operand.

use std::fmt;

use crate::consensus::{Decoder, EncodingError};
use crate::crypto::{Hash, PublicKey, POINT_LENGTH};

// Block height checks
pub const OP_CHECK_HEIGHT_VERIFY: u8 = 0x66;
pub const OP_CHECK_HEIGHT: u8 = 0x67;

// Flow control
pub const OP_RETURN: u8 = 0x60;
pub const OP_IF_THEN: u8 = 0x61;
pub const OP_ELSE: u8 = 0x62;
pub const OP_END_IF: u8 = 0x63;

// Stack manipulation
pub const OP_DROP: u8 = 0x70;
pub const OP_DUP: u8 = 0x71;
pub const OP_NOP: u8 = 0x73;
pub const OP_PUSH_HASH: u8 = 0x7a;
pub const OP_PUSH_ZERO: u8 = 0x7b;
pub const OP_PUSH_ONE: u8 = 0x7c;
pub const OP_PUSH_INT: u8 = 0x7d;
pub const OP_PUSH_PUBKEY: u8 = 0x7e;

// Comparison
pub const OP_EQUAL: u8 = 0x80;
pub const OP_EQUAL_VERIFY: u8 = 0x81;
pub const OP_GE_ZERO: u8 = 0x82;

// Cryptography
pub const OP_CHECK_SIG: u8 = 0xac;
pub const OP_CHECK_SIG_VERIFY: u8 = 0xad;
pub const OP_HASH_BLAKE256: u8 = 0xb0;

#[derive(Clone, PartialEq, Eq)]
pub enum Opcode {
    /// Fail unless the block height is at least the operand
    CheckHeightVerify(u64),
    /// Push `block_height - operand`
    CheckHeight(u64),
    /// Always fail
    Return,
    /// Pop a number: 1 runs the following branch, 0 runs the `Else` branch
    IfThen,
    Else,
    EndIf,
    Drop,
    Dup,
    Nop,
    PushHash(Box<Hash>),
    PushZero,
    PushOne,
    PushInt(i64),
    PushPubKey(Box<PublicKey>),
    /// Pop two items, push 1 if equal else 0
    Equal,
    /// Pop two items, fail if not equal
    EqualVerify,
    /// Pop a number, push 1 if it is non-negative else 0
    GeZero,
    /// Pop a public key then a signature over the operand, push 1 if valid else 0
    CheckSig(Box<Hash>),
    CheckSigVerify(Box<Hash>),
    /// Pop an item, push the Blake2b-256 hash of its bytes
    HashBlake256,
}

impl Opcode {
    pub fn code(&self) -> u8 {
        match self {
            Opcode::CheckHeightVerify(_) => OP_CHECK_HEIGHT_VERIFY,
            Opcode::CheckHeight(_) => OP_CHECK_HEIGHT,
            Opcode::Return => OP_RETURN,
            Opcode::IfThen => OP_IF_THEN,
            Opcode::Else => OP_ELSE,
            Opcode::EndIf => OP_END_IF,
            Opcode::Drop => OP_DROP,
            Opcode::Dup => OP_DUP,
            Opcode::Nop => OP_NOP,
            Opcode::PushHash(_) => OP_PUSH_HASH,
            Opcode::PushZero => OP_PUSH_ZERO,
            Opcode::PushOne => OP_PUSH_ONE,
            Opcode::PushInt(_) => OP_PUSH_INT,
            Opcode::PushPubKey(_) => OP_PUSH_PUBKEY,
            Opcode::Equal => OP_EQUAL,
            Opcode::EqualVerify => OP_EQUAL_VERIFY,
            Opcode::GeZero => OP_GE_ZERO,
            Opcode::CheckSig(_) => OP_CHECK_SIG,
            Opcode::CheckSigVerify(_) => OP_CHECK_SIG_VERIFY,
            Opcode::HashBlake256 => OP_HASH_BLAKE256,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.code());
        match self {
            Opcode::CheckHeightVerify(height) | Opcode::CheckHeight(height) => {
                out.extend_from_slice(&height.to_le_bytes())
            }
            Opcode::PushInt(value) => out.extend_from_slice(&value.to_le_bytes()),
            Opcode::PushHash(hash) | Opcode::CheckSig(hash) | Opcode::CheckSigVerify(hash) => {
                out.extend_from_slice(&hash.0)
            }
            Opcode::PushPubKey(key) => out.extend_from_slice(&key.0),
            _ => {}
        }
    }

    /// Read one opcode and its operand
    pub fn read_from(decoder: &mut Decoder<'_>) -> Result<Opcode, EncodingError> {
        let code = decoder.read_u8()?;
        let op = match code {
            OP_CHECK_HEIGHT_VERIFY => Opcode::CheckHeightVerify(decoder.read_u64()?),
            OP_CHECK_HEIGHT => Opcode::CheckHeight(decoder.read_u64()?),
            OP_RETURN => Opcode::Return,
            OP_IF_THEN => Opcode::IfThen,
            OP_ELSE => Opcode::Else,
            OP_END_IF => Opcode::EndIf,
            OP_DROP => Opcode::Drop,
            OP_DUP => Opcode::Dup,
            OP_NOP => Opcode::Nop,
            OP_PUSH_HASH => Opcode::PushHash(Box::new(Hash(decoder.read_array()?))),
            OP_PUSH_ZERO => Opcode::PushZero,
            OP_PUSH_ONE => Opcode::PushOne,
            OP_PUSH_INT => Opcode::PushInt(decoder.read_u64()? as i64),
            OP_PUSH_PUBKEY => {
                Opcode::PushPubKey(Box::new(PublicKey(decoder.read_array::<POINT_LENGTH>()?)))
            }
            OP_EQUAL => Opcode::Equal,
            OP_EQUAL_VERIFY => Opcode::EqualVerify,
            OP_GE_ZERO => Opcode::GeZero,
            OP_CHECK_SIG => Opcode::CheckSig(Box::new(Hash(decoder.read_array()?))),
            OP_CHECK_SIG_VERIFY => Opcode::CheckSigVerify(Box::new(Hash(decoder.read_array()?))),
            OP_HASH_BLAKE256 => Opcode::HashBlake256,
            other => return Err(EncodingError::Invalid(format!("unknown opcode 0x{:02x}", other))),
        };
        Ok(op)
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::CheckHeightVerify(h) => write!(f, "CheckHeightVerify({})", h),
            Opcode::CheckHeight(h) => write!(f, "CheckHeight({})", h),
            Opcode::PushHash(h) => write!(f, "PushHash({})", h),
            Opcode::PushInt(n) => write!(f, "PushInt({})", n),
            Opcode::PushPubKey(k) => write!(f, "PushPubKey({})", k),
            Opcode::CheckSig(m) => write!(f, "CheckSig({})", m),
            Opcode::CheckSigVerify(m) => write!(f, "CheckSigVerify({})", m),
            Opcode::Return => write!(f, "Return"),
            Opcode::IfThen => write!(f, "IfThen"),
            Opcode::Else => write!(f, "Else"),
            Opcode::EndIf => write!(f, "EndIf"),
            Opcode::Drop => write!(f, "Drop"),
            Opcode::Dup => write!(f, "Dup"),
            Opcode::Nop => write!(f, "Nop"),
            Opcode::PushZero => write!(f, "PushZero"),
            Opcode::PushOne => write!(f, "PushOne"),
            Opcode::Equal => write!(f, "Equal"),
            Opcode::EqualVerify => write!(f, "EqualVerify"),
            Opcode::GeZero => write!(f, "GeZero"),
            Opcode::HashBlake256 => write!(f, "HashBlake256"),
        }
    }
}
