//! Bytecode errors

use thiserror::Error;

use super::Opcode;

/// Errors that can occur while encoding or decoding instructions.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BytecodeError {
  #[error("opcode {0} undefined")]
  UnknownOpcode(u8),

  #[error("{opcode} takes {expected} operands but was given {given}")]
  OperandCount {
    opcode   : Opcode,
    expected : usize,
    given    : usize,
  },

  #[error("unexpected end of bytecode: needed {needed} bytes but only {available} remain")]
  UnexpectedEnd {
    needed    : usize,
    available : usize,
  },
}
