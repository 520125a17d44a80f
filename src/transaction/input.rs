use serde::{Deserialize, Serialize};

use crate::crypto::{Commitment, CryptoError, DomainHasher, Hash, PublicKey, SecretKey, Signature};
use crate::script::ExecutionStack;

/// Spend of a live output, identified by its commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub commitment: Commitment,
    /// Data stack the spent output's script runs on
    pub input_data: ExecutionStack,
    /// Signature by the key the script returns
    pub script_signature: Signature,
}

impl TransactionInput {
    /// Build an input and sign it with the script key
    pub fn new_signed(commitment: Commitment, input_data: ExecutionStack, script_key: &SecretKey) -> Self {
        let message = Self::script_message(&commitment, &input_data);
        Self {
            commitment,
            input_data,
            script_signature: Signature::sign(script_key, &message),
        }
    }

    /// Message signed by the script key
    pub fn script_message(commitment: &Commitment, input_data: &ExecutionStack) -> Hash {
        DomainHasher::new("script_signature")
            .chain(commitment.0)
            .chain(input_data.to_bytes())
            .finalize()
    }

    pub fn verify_script_signature(&self, script_key: &PublicKey) -> Result<(), CryptoError> {
        let message = Self::script_message(&self.commitment, &self.input_data);
        self.script_signature.verify(script_key, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::StackItem;

    #[test]
    fn test_script_signature_binds_input_data() {
        let key = SecretKey::random();
        let mut input = TransactionInput::new_signed(
            Commitment::from_value(3),
            ExecutionStack::new(vec![StackItem::Number(1)]),
            &key,
        );
        assert!(input.verify_script_signature(&key.public_key()).is_ok());
        input.input_data = ExecutionStack::new(vec![StackItem::Number(0)]);
        assert!(input.verify_script_signature(&key.public_key()).is_err());
    }
}
