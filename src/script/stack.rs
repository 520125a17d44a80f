//! Script execution stack and the items it holds

use serde::{Deserialize, Serialize};

use crate::constants::MAX_STACK_SIZE;
use crate::consensus::{Decoder, EncodingError};
use crate::crypto::{Commitment, Hash, PublicKey, Signature, POINT_LENGTH};

use super::ScriptError;

const TYPE_NUMBER: u8 = 0x01;
const TYPE_HASH: u8 = 0x02;
const TYPE_COMMITMENT: u8 = 0x03;
const TYPE_PUBLIC_KEY: u8 = 0x04;
const TYPE_SIGNATURE: u8 = 0x05;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackItem {
    Number(i64),
    Hash(Hash),
    Commitment(Commitment),
    PublicKey(PublicKey),
    Signature(Signature),
}

impl StackItem {
    /// Raw bytes of the item, as hashed by `HashBlake256`
    pub fn value_bytes(&self) -> Vec<u8> {
        match self {
            StackItem::Number(n) => n.to_le_bytes().to_vec(),
            StackItem::Hash(h) => h.0.to_vec(),
            StackItem::Commitment(c) => c.0.to_vec(),
            StackItem::PublicKey(k) => k.0.to_vec(),
            StackItem::Signature(s) => {
                let mut bytes = s.public_nonce.to_vec();
                bytes.extend_from_slice(&s.s);
                bytes
            }
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        let tag = match self {
            StackItem::Number(_) => TYPE_NUMBER,
            StackItem::Hash(_) => TYPE_HASH,
            StackItem::Commitment(_) => TYPE_COMMITMENT,
            StackItem::PublicKey(_) => TYPE_PUBLIC_KEY,
            StackItem::Signature(_) => TYPE_SIGNATURE,
        };
        out.push(tag);
        out.extend_from_slice(&self.value_bytes());
    }

    fn read_from(decoder: &mut Decoder<'_>) -> Result<StackItem, EncodingError> {
        let item = match decoder.read_u8()? {
            TYPE_NUMBER => StackItem::Number(decoder.read_u64()? as i64),
            TYPE_HASH => StackItem::Hash(Hash(decoder.read_array()?)),
            TYPE_COMMITMENT => StackItem::Commitment(Commitment(decoder.read_array::<POINT_LENGTH>()?)),
            TYPE_PUBLIC_KEY => StackItem::PublicKey(PublicKey(decoder.read_array::<POINT_LENGTH>()?)),
            TYPE_SIGNATURE => StackItem::Signature(Signature {
                public_nonce: decoder.read_array::<POINT_LENGTH>()?,
                s: decoder.read_array()?,
            }),
            other => {
                return Err(EncodingError::Invalid(format!(
                    "unknown stack item type 0x{:02x}",
                    other
                )))
            }
        };
        Ok(item)
    }
}

/// Bounded stack; the last element is the top
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStack {
    items: Vec<StackItem>,
}

impl ExecutionStack {
    pub fn new(items: Vec<StackItem>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: StackItem) -> Result<(), ScriptError> {
        if self.items.len() >= MAX_STACK_SIZE {
            return Err(ScriptError::StackOverflow);
        }
        self.items.push(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<StackItem, ScriptError> {
        self.items.pop().ok_or(ScriptError::StackUnderflow)
    }

    pub fn peek(&self) -> Result<&StackItem, ScriptError> {
        self.items.last().ok_or(ScriptError::StackUnderflow)
    }

    pub fn pop_number(&mut self) -> Result<i64, ScriptError> {
        match self.pop()? {
            StackItem::Number(n) => Ok(n),
            _ => Err(ScriptError::IncompatibleTypes),
        }
    }

    pub fn into_items(self) -> Vec<StackItem> {
        self.items
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for item in &self.items {
            item.write_to(&mut out);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut decoder = Decoder::new(bytes);
        let mut items = Vec::new();
        while !decoder.is_empty() {
            if items.len() >= MAX_STACK_SIZE {
                return Err(EncodingError::TooLong {
                    length: items.len() + 1,
                    max: MAX_STACK_SIZE,
                });
            }
            items.push(StackItem::read_from(&mut decoder)?);
        }
        Ok(Self { items })
    }
}

impl Serialize for ExecutionStack {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for ExecutionStack {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        ExecutionStack::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_bytes, SecretKey};

    #[test]
    fn test_push_pop() {
        let mut stack = ExecutionStack::empty();
        stack.push(StackItem::Number(5)).unwrap();
        stack.push(StackItem::Hash(hash_bytes(b"x"))).unwrap();
        assert_eq!(stack.len(), 2);
        assert!(matches!(stack.pop().unwrap(), StackItem::Hash(_)));
        assert_eq!(stack.pop_number().unwrap(), 5);
        assert_eq!(stack.pop(), Err(ScriptError::StackUnderflow));
    }

    #[test]
    fn test_overflow() {
        let mut stack = ExecutionStack::empty();
        for _ in 0..MAX_STACK_SIZE {
            stack.push(StackItem::Number(1)).unwrap();
        }
        assert_eq!(stack.push(StackItem::Number(1)), Err(ScriptError::StackOverflow));
    }

    #[test]
    fn test_bytes_roundtrip_mixed_items() {
        let secret = SecretKey::random();
        let message = hash_bytes(b"m");
        let stack = ExecutionStack::new(vec![
            StackItem::Number(-3),
            StackItem::PublicKey(secret.public_key()),
            StackItem::Signature(Signature::sign(&secret, &message)),
            StackItem::Commitment(Commitment::from_value(9)),
        ]);
        let recovered = ExecutionStack::from_bytes(&stack.to_bytes()).unwrap();
        assert_eq!(stack, recovered);
    }

    #[test]
    fn test_unknown_item_type_rejected() {
        assert!(ExecutionStack::from_bytes(&[0x09, 0, 0]).is_err());
    }

    #[test]
    fn test_truncated_item_rejected() {
        assert!(matches!(
            ExecutionStack::from_bytes(&[TYPE_HASH, 1, 2]),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }
}
