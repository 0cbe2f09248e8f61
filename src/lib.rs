/*!
  A bytecode instruction set and the stack machine that runs it, for a small dynamic scripting
  language with first class functions, closures, arrays and hashes.

  Programs reach the machine as `Bytecode`: a main instruction stream plus a constant pool that
  holds literals and compiled functions. Compilers produce it; for hand written programs the
  `bytecode::assemble` function reads the same text the disassembler prints.
*/

#[macro_use] extern crate prettytable;
#[macro_use] extern crate lazy_static;

pub mod builtins;
pub mod bytecode;
pub mod error;
pub mod frame;
pub mod object;
pub mod vm;

pub use builtins::{Builtins, RegistrationError};
pub use bytecode::{assemble, Bytecode, Opcode};
pub use error::{Fault, VmError};
pub use object::Value;
pub use vm::{Limits, Vm};
