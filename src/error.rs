//! Execution faults. Every fault is fatal to the run that raised it.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::bytecode::{BytecodeError, Opcode};

/// What went wrong while executing an instruction.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Fault {
  #[error("stack overflow")]
  StackOverflow,

  #[error("stack underflow")]
  StackUnderflow,

  #[error("call stack overflow: more than {0} frames")]
  FrameOverflow(usize),

  #[error("wrong number of arguments: want={expected}, got={given}")]
  ArityMismatch {
    expected : usize,
    given    : usize,
  },

  #[error("unsupported types for operation: {left} {right}")]
  TypeMismatch {
    left  : &'static str,
    right : &'static str,
  },

  #[error("unsupported type for operation: {0}")]
  UnsupportedOperand(&'static str),

  #[error("division by zero")]
  DivisionByZero,

  #[error("shift by {0} is out of range")]
  InvalidShift(i64),

  #[error("index {index} out of range for array of length {length}")]
  IndexOutOfRange {
    index  : i64,
    length : usize,
  },

  #[error("unusable as hash key: {0}")]
  UnhashableKey(&'static str),

  #[error("MakeHash operand {0} is odd")]
  OddHashOperand(usize),

  #[error("calling non-function: {0}")]
  NotCallable(&'static str),

  #[error("constant is not a function: {0}")]
  NotAFunction(&'static str),

  #[error("constant {0} undefined")]
  ConstantOutOfRange(usize),

  #[error("global {index} out of range: the store has {size} slots")]
  GlobalOutOfRange {
    index : usize,
    size  : usize,
  },

  #[error("local {index} out of range: the frame has {slots} slots")]
  LocalOutOfRange {
    index : usize,
    slots : usize,
  },

  #[error("free variable {index} out of range: the closure captures {captured}")]
  FreeOutOfRange {
    index    : usize,
    captured : usize,
  },

  #[error("builtin {0} undefined")]
  UnknownBuiltin(usize),

  #[error("module {0} undefined")]
  UnknownModule(String),

  #[error("jump target {target} is past the end of the {length} byte stream")]
  JumpOutOfRange {
    target : usize,
    length : usize,
  },

  /// Raised by a builtin function.
  #[error("{0}")]
  Builtin(String),

  #[error(transparent)]
  Bytecode(#[from] BytecodeError),
}

/// A fault together with where it happened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmError {
  pub fault  : Fault,
  /// `None` when the instruction could not be decoded.
  pub opcode : Option<Opcode>,
  /// Offset of the faulting instruction in the active frame's instruction stream.
  pub offset : usize,
  /// Number of frames on the call stack, the outermost frame being 1.
  pub depth  : usize,
}

impl Display for VmError {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self.opcode {
      Some(opcode) => write!(
        f,
        "{} (executing {} at {:04}, frame depth {})",
        self.fault, opcode, self.offset, self.depth
      ),
      None => write!(
        f,
        "{} (decoding at {:04}, frame depth {})",
        self.fault, self.offset, self.depth
      ),
    }
  }
}

impl std::error::Error for VmError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(&self.fault)
  }
}
