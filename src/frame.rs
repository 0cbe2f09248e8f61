//! An activation record: one invocation of one closure.

use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::bytecode::{lookup, read_operands, read_u8, BytecodeError, Instructions, Opcode};
use crate::object::Closure;

/// One decoded instruction. No opcode has more than two operands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Decoded {
  pub offset   : usize,
  pub opcode   : Opcode,
  pub operands : [usize; 2],
}

#[derive(Debug)]
pub struct Frame {
  closure      : Rc<Closure>,
  /// Offset of the next instruction to fetch.
  ip           : usize,
  /// Stack index of local slot 0. The callee itself sits just below.
  base_pointer : usize,
}

impl Frame {

  pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Frame {
    Frame {
      closure,
      ip: 0,
      base_pointer,
    }
  }

  pub fn closure(&self) -> &Rc<Closure> {
    &self.closure
  }

  pub fn instructions(&self) -> &Instructions {
    &self.closure.function.instructions
  }

  pub fn ip(&self) -> usize {
    self.ip
  }

  pub fn base_pointer(&self) -> usize {
    self.base_pointer
  }

  /// The number of stack slots above the base pointer that hold parameters and locals.
  pub fn slots(&self) -> usize {
    self.closure.function.frame_slots()
  }

  /// Temporaries live from here up. Nothing at or below this index may be popped.
  pub fn stack_floor(&self) -> usize {
    self.base_pointer + self.slots()
  }

  pub fn is_finished(&self) -> bool {
    self.ip >= self.instructions().len()
  }

  /// Continue execution at `target`. Jumping to the very end of the stream is a return.
  pub fn jump(&mut self, target: usize) -> Result<(), usize> {
    let length = self.instructions().len();
    if target > length {
      return Err(length);
    }
    self.ip = target;
    Ok(())
  }

  /// Decodes the instruction at the instruction pointer and moves the pointer past it.
  pub fn fetch(&mut self) -> Result<Decoded, BytecodeError> {
    let offset       = self.ip;
    let instructions = &self.closure.function.instructions;

    let definition      = lookup(read_u8(&instructions[offset..])?)?;
    let (decoded, read) = read_operands(&definition, &instructions[offset + 1..])?;

    let mut operands = [0usize; 2];
    operands[..decoded.len()].copy_from_slice(&decoded);

    self.ip = offset + 1 + read;
    Ok(Decoded { offset, opcode: definition.opcode, operands })
  }
}

impl Display for Frame {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "closure/{} ip={:04} bp={}",
      self.closure.function.num_parameters, self.ip, self.base_pointer
    )
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::make;
  use crate::object::CompiledFunction;

  fn frame_for(code: Vec<Vec<u8>>, num_locals: usize, num_parameters: usize) -> Frame {
    let function = CompiledFunction::new(code.into_iter().collect(), num_locals, num_parameters);
    Frame::new(Rc::new(Closure::new(Rc::new(function), vec![])), 3)
  }

  #[test]
  fn fetch_walks_the_stream() {
    let mut frame = frame_for(
      vec![
        make(Opcode::MakeClosure, &[258, 3]).unwrap(),
        make(Opcode::Pop, &[]).unwrap(),
      ],
      0, 0
    );

    assert_eq!(
      frame.fetch(),
      Ok(Decoded { offset: 0, opcode: Opcode::MakeClosure, operands: [258, 3] })
    );
    assert_eq!(frame.ip(), 4);
    assert_eq!(frame.fetch(), Ok(Decoded { offset: 4, opcode: Opcode::Pop, operands: [0, 0] }));
    assert!(frame.is_finished());
  }

  #[test]
  fn fetch_decodes_every_opcode() {
    use strum::IntoEnumIterator;

    for opcode in Opcode::iter() {
      let operands: Vec<usize> = opcode.operand_widths().iter().map(|w| (1 << (8 * w)) - 1).collect();
      let mut frame = frame_for(vec![make(opcode, &operands).unwrap()], 0, 0);
      let decoded   = frame.fetch().unwrap();

      assert_eq!(decoded.opcode, opcode);
      assert_eq!(&decoded.operands[..operands.len()], operands.as_slice());
      assert_eq!(frame.ip(), opcode.definition().size());
    }
  }

  #[test]
  fn fetch_reports_bad_bytes() {
    let mut frame = frame_for(vec![vec![99]], 0, 0);
    assert_eq!(frame.fetch(), Err(BytecodeError::UnknownOpcode(99)));

    let mut frame = frame_for(vec![vec![Opcode::Jump.code(), 0]], 0, 0);
    assert_eq!(frame.fetch(), Err(BytecodeError::UnexpectedEnd { needed: 2, available: 1 }));
  }

  #[test]
  fn jumps_stay_inside_the_stream() {
    let mut frame = frame_for(vec![make(Opcode::Jump, &[0]).unwrap()], 0, 0);
    assert_eq!(frame.jump(3), Ok(()));
    assert!(frame.is_finished());
    assert_eq!(frame.jump(4), Err(3));
  }

  #[test]
  fn locals_sit_above_the_base_pointer() {
    let frame = frame_for(vec![], 4, 2);
    assert_eq!(frame.base_pointer(), 3);
    assert_eq!(frame.slots(), 4);
    assert_eq!(frame.stack_floor(), 7);
  }
}
