//! Script type and interpreter

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::consensus::{Decoder, EncodingError};
use crate::crypto::{hash_bytes, Commitment, Hash, PublicKey};

use super::{ExecutionStack, Opcode, ScriptError, StackItem};

/// Maximum serialized size of a script
pub const MAX_SCRIPT_BYTES: usize = 4096;

/// Chain state visible to a running script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptContext {
    /// Height of the block the spending transaction is (or would be) mined in
    pub block_height: u64,
    pub prev_block_hash: Hash,
    /// Commitment of the output being spent
    pub commitment: Commitment,
}

impl ScriptContext {
    pub fn new(block_height: u64, prev_block_hash: Hash, commitment: Commitment) -> Self {
        Self {
            block_height,
            prev_block_hash,
            commitment,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Branch {
    executing: bool,
    parent_executing: bool,
    else_seen: bool,
}

/// A parsed script
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Script {
    ops: Vec<Opcode>,
}

impl Script {
    pub fn new(ops: Vec<Opcode>) -> Self {
        Self { ops }
    }

    /// The standard script: anyone holding the secret for `key` may spend
    pub fn pay_to_public_key(key: &PublicKey) -> Self {
        Self::new(vec![Opcode::PushPubKey(Box::new(*key))])
    }

    pub fn ops(&self) -> &[Opcode] {
        &self.ops
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for op in &self.ops {
            op.write_to(&mut out);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        if bytes.len() > MAX_SCRIPT_BYTES {
            return Err(EncodingError::TooLong {
                length: bytes.len(),
                max: MAX_SCRIPT_BYTES,
            });
        }
        let mut decoder = Decoder::new(bytes);
        let mut ops = Vec::new();
        while !decoder.is_empty() {
            ops.push(Opcode::read_from(&mut decoder)?);
        }
        Ok(Self { ops })
    }

    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }

    /// Run the script over `input`. Success leaves exactly one public key on
    /// the stack, which is returned.
    pub fn execute(
        &self,
        input: &ExecutionStack,
        context: &ScriptContext,
    ) -> Result<PublicKey, ScriptError> {
        let mut stack = input.clone();
        let mut branches: Vec<Branch> = Vec::new();

        for op in &self.ops {
            let executing = branches.last().map_or(true, |b| b.executing);
            match op {
                Opcode::IfThen => {
                    let taken = if executing {
                        match stack.pop_number()? {
                            1 => true,
                            0 => false,
                            _ => return Err(ScriptError::IncompatibleTypes),
                        }
                    } else {
                        false
                    };
                    branches.push(Branch {
                        executing: executing && taken,
                        parent_executing: executing,
                        else_seen: false,
                    });
                }
                Opcode::Else => {
                    let branch = branches.last_mut().ok_or(ScriptError::InvalidIfThenElse)?;
                    if branch.else_seen {
                        return Err(ScriptError::InvalidIfThenElse);
                    }
                    branch.else_seen = true;
                    branch.executing = branch.parent_executing && !branch.executing;
                }
                Opcode::EndIf => {
                    branches.pop().ok_or(ScriptError::InvalidIfThenElse)?;
                }
                _ if !executing => {}
                other => execute_op(other, &mut stack, context)?,
            }
        }

        if !branches.is_empty() {
            return Err(ScriptError::InvalidIfThenElse);
        }
        let mut items = stack.into_items();
        if items.len() != 1 {
            return Err(ScriptError::NonUnitLengthStack(items.len()));
        }
        match items.pop() {
            Some(StackItem::PublicKey(key)) => Ok(key),
            _ => Err(ScriptError::IncompatibleTypes),
        }
    }
}

fn execute_op(
    op: &Opcode,
    stack: &mut ExecutionStack,
    context: &ScriptContext,
) -> Result<(), ScriptError> {
    match op {
        Opcode::CheckHeightVerify(height) => {
            if context.block_height < *height {
                return Err(ScriptError::VerifyFailed);
            }
        }
        Opcode::CheckHeight(height) => {
            let diff = i128::from(context.block_height) - i128::from(*height);
            let diff = i64::try_from(diff).map_err(|_| ScriptError::ValueExceedsBounds)?;
            stack.push(StackItem::Number(diff))?;
        }
        Opcode::Return => return Err(ScriptError::Return),
        Opcode::Drop => {
            stack.pop()?;
        }
        Opcode::Dup => {
            let top = stack.peek()?.clone();
            stack.push(top)?;
        }
        Opcode::Nop => {}
        Opcode::PushHash(hash) => stack.push(StackItem::Hash(**hash))?,
        Opcode::PushZero => stack.push(StackItem::Number(0))?,
        Opcode::PushOne => stack.push(StackItem::Number(1))?,
        Opcode::PushInt(n) => stack.push(StackItem::Number(*n))?,
        Opcode::PushPubKey(key) => stack.push(StackItem::PublicKey(**key))?,
        Opcode::Equal => {
            let a = stack.pop()?;
            let b = stack.pop()?;
            stack.push(StackItem::Number(i64::from(a == b)))?;
        }
        Opcode::EqualVerify => {
            let a = stack.pop()?;
            let b = stack.pop()?;
            if a != b {
                return Err(ScriptError::VerifyFailed);
            }
        }
        Opcode::GeZero => {
            let n = stack.pop_number()?;
            stack.push(StackItem::Number(i64::from(n >= 0)))?;
        }
        Opcode::CheckSig(message) => {
            let valid = check_signature(stack, message)?;
            stack.push(StackItem::Number(i64::from(valid)))?;
        }
        Opcode::CheckSigVerify(message) => {
            if !check_signature(stack, message)? {
                return Err(ScriptError::VerifyFailed);
            }
        }
        Opcode::HashBlake256 => {
            let item = stack.pop()?;
            stack.push(StackItem::Hash(hash_bytes(&item.value_bytes())))?;
        }
        // Flow control is tracked by `Script::execute`
        Opcode::IfThen | Opcode::Else | Opcode::EndIf => {}
    }
    Ok(())
}

fn check_signature(stack: &mut ExecutionStack, message: &Hash) -> Result<bool, ScriptError> {
    let key = match stack.pop()? {
        StackItem::PublicKey(key) => key,
        _ => return Err(ScriptError::IncompatibleTypes),
    };
    let signature = match stack.pop()? {
        StackItem::Signature(signature) => signature,
        _ => return Err(ScriptError::IncompatibleTypes),
    };
    Ok(signature.is_valid(&key, message))
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ops.iter()).finish()
    }
}

impl Serialize for Script {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        Script::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{SecretKey, Signature};

    fn context(height: u64) -> ScriptContext {
        ScriptContext::new(height, Hash::zero(), Commitment::from_value(1))
    }

    #[test]
    fn test_pay_to_public_key() {
        let key = SecretKey::random().public_key();
        let script = Script::pay_to_public_key(&key);
        let result = script.execute(&ExecutionStack::empty(), &context(1)).unwrap();
        assert_eq!(result, key);
    }

    #[test]
    fn test_empty_script_returns_input_key() {
        let key = SecretKey::random().public_key();
        let input = ExecutionStack::new(vec![StackItem::PublicKey(key)]);
        assert_eq!(Script::default().execute(&input, &context(1)).unwrap(), key);
    }

    #[test]
    fn test_leftover_items_fail() {
        let key = SecretKey::random().public_key();
        let script = Script::new(vec![Opcode::PushOne, Opcode::PushPubKey(Box::new(key))]);
        assert_eq!(
            script.execute(&ExecutionStack::empty(), &context(1)),
            Err(ScriptError::NonUnitLengthStack(2))
        );
    }

    #[test]
    fn test_non_key_result_fails() {
        let script = Script::new(vec![Opcode::PushOne]);
        assert_eq!(
            script.execute(&ExecutionStack::empty(), &context(1)),
            Err(ScriptError::IncompatibleTypes)
        );
    }

    #[test]
    fn test_check_height_verify() {
        let key = SecretKey::random().public_key();
        let script = Script::new(vec![
            Opcode::CheckHeightVerify(10),
            Opcode::PushPubKey(Box::new(key)),
        ]);
        assert_eq!(
            script.execute(&ExecutionStack::empty(), &context(9)),
            Err(ScriptError::VerifyFailed)
        );
        assert_eq!(script.execute(&ExecutionStack::empty(), &context(10)).unwrap(), key);
    }

    #[test]
    fn test_hash_lock() {
        let key = SecretKey::random().public_key();
        let preimage = Hash([7u8; 32]);
        let lock = hash_bytes(&preimage.0);
        let script = Script::new(vec![
            Opcode::HashBlake256,
            Opcode::PushHash(Box::new(lock)),
            Opcode::EqualVerify,
            Opcode::PushPubKey(Box::new(key)),
        ]);
        let good = ExecutionStack::new(vec![StackItem::Hash(preimage)]);
        assert_eq!(script.execute(&good, &context(1)).unwrap(), key);
        let bad = ExecutionStack::new(vec![StackItem::Hash(Hash([8u8; 32]))]);
        assert_eq!(script.execute(&bad, &context(1)), Err(ScriptError::VerifyFailed));
    }

    #[test]
    fn test_if_then_else_branches() {
        let alice = SecretKey::random().public_key();
        let bob = SecretKey::random().public_key();
        let script = Script::new(vec![
            Opcode::IfThen,
            Opcode::PushPubKey(Box::new(alice)),
            Opcode::Else,
            Opcode::PushPubKey(Box::new(bob)),
            Opcode::EndIf,
        ]);
        let take = ExecutionStack::new(vec![StackItem::Number(1)]);
        let skip = ExecutionStack::new(vec![StackItem::Number(0)]);
        assert_eq!(script.execute(&take, &context(1)).unwrap(), alice);
        assert_eq!(script.execute(&skip, &context(1)).unwrap(), bob);
        let invalid = ExecutionStack::new(vec![StackItem::Number(2)]);
        assert_eq!(
            script.execute(&invalid, &context(1)),
            Err(ScriptError::IncompatibleTypes)
        );
    }

    #[test]
    fn test_nested_branch_inside_skipped_branch() {
        let alice = SecretKey::random().public_key();
        let bob = SecretKey::random().public_key();
        let script = Script::new(vec![
            Opcode::IfThen,
            Opcode::IfThen,
            Opcode::Return,
            Opcode::Else,
            Opcode::Return,
            Opcode::EndIf,
            Opcode::PushPubKey(Box::new(alice)),
            Opcode::Else,
            Opcode::PushPubKey(Box::new(bob)),
            Opcode::EndIf,
        ]);
        let skip = ExecutionStack::new(vec![StackItem::Number(0)]);
        assert_eq!(script.execute(&skip, &context(1)).unwrap(), bob);
    }

    #[test]
    fn test_unbalanced_branches() {
        let script = Script::new(vec![Opcode::PushOne, Opcode::IfThen]);
        assert_eq!(
            script.execute(&ExecutionStack::empty(), &context(1)),
            Err(ScriptError::InvalidIfThenElse)
        );
        let script = Script::new(vec![Opcode::EndIf]);
        assert_eq!(
            script.execute(&ExecutionStack::empty(), &context(1)),
            Err(ScriptError::InvalidIfThenElse)
        );
    }

    #[test]
    fn test_check_sig() {
        let secret = SecretKey::random();
        let message = hash_bytes(b"release");
        let script = Script::new(vec![
            Opcode::PushPubKey(Box::new(secret.public_key())),
            Opcode::CheckSigVerify(Box::new(message)),
            Opcode::PushPubKey(Box::new(secret.public_key())),
        ]);
        let good = ExecutionStack::new(vec![StackItem::Signature(Signature::sign(&secret, &message))]);
        assert!(script.execute(&good, &context(1)).is_ok());

        let other = SecretKey::random();
        let bad = ExecutionStack::new(vec![StackItem::Signature(Signature::sign(&other, &message))]);
        assert_eq!(script.execute(&bad, &context(1)), Err(ScriptError::VerifyFailed));
    }

    #[test]
    fn test_return_fails() {
        let script = Script::new(vec![Opcode::Return]);
        assert_eq!(
            script.execute(&ExecutionStack::empty(), &context(1)),
            Err(ScriptError::Return)
        );
    }

    #[test]
    fn test_script_bytes_roundtrip() {
        let key = SecretKey::random().public_key();
        let script = Script::new(vec![
            Opcode::CheckHeight(5),
            Opcode::GeZero,
            Opcode::PushInt(-9),
            Opcode::Drop,
            Opcode::Drop,
            Opcode::PushPubKey(Box::new(key)),
        ]);
        let decoded = Script::from_bytes(&script.to_bytes()).unwrap();
        assert_eq!(script, decoded);
        assert!(Script::from_bytes(&[0xff]).is_err());
    }
}
