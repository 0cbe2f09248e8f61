/*!

  Instructions are a dense byte stream. Every instruction starts with a one byte opcode followed
  by zero or more operands, each stored unsigned and big-endian at a width fixed by the opcode:

    Opcode:     8 bits
    Operand:    8 or 16 bits

  There is no padding, no alignment and no length prefix. Instruction boundaries are recovered
  from the opcode alone, so the width table in `Opcode::operand_widths` is the single source of
  truth for encoder, decoder and disassembler alike. Jump operands are absolute byte offsets
  into the same stream.

  Unlike the operands, the opcode is represented in memory as a fieldless enum, which gives us
  an exhaustive `match` over the width table. Instructions are *not* stored as an enum with one
  variant per opcode carrying its operands: executable code stays in its encoded form and is
  decoded one instruction at a time by the frame that runs it.

*/

mod assembly;
mod binary;
mod error;
mod instruction;

use crate::object::Value;

pub use assembly::{assemble, AssemblyError};
pub use binary::{
  disassemble,
  format_instruction,
  make,
  make_raw,
  read_operands,
  read_u16,
  read_u8,
  Instructions
};
pub use error::BytecodeError;
pub use instruction::{lookup, Definition, Opcode};

/// What a compiler hands to the VM: the main program and the constant pool it indexes into.
#[derive(Clone, Debug, Default)]
pub struct Bytecode {
  pub instructions : Instructions,
  pub constants    : Vec<Value>,
}
