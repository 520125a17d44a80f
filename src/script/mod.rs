//! Spending scripts
//!
//! Every output carries a script. Spending it runs the script against the
//! input's data stack; a successful run leaves exactly one public key, and the
//! input must carry a signature by that key.

mod interpreter;
mod op_codes;
mod stack;

pub use interpreter::*;
pub use op_codes::*;
pub use stack::*;

use thiserror::Error;

use crate::consensus::EncodingError;

/// Script execution and parsing errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Script finished with {0} items on the stack")]
    NonUnitLengthStack(usize),
    #[error("Incompatible stack item types")]
    IncompatibleTypes,
    #[error("Verification failed")]
    VerifyFailed,
    #[error("Script executed OP_RETURN")]
    Return,
    #[error("Unbalanced IfThen/Else/EndIf")]
    InvalidIfThenElse,
    #[error("Arithmetic overflow")]
    ValueExceedsBounds,
    #[error("Malformed script: {0}")]
    Encoding(#[from] EncodingError),
}
