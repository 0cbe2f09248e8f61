/*!
  This module is responsible for the encoding and decoding of binary instructions and for
  rendering an instruction stream as text.

*/
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::iter::FromIterator;
use std::ops::Deref;

use super::{lookup, BytecodeError, Definition, Opcode};

/// An instruction stream: encoded instructions laid end to end. Immutable once built.
#[derive(Clone, Default, Debug, Eq, PartialEq, Hash)]
pub struct Instructions(Vec<u8>);

impl Instructions {
  pub fn new() -> Instructions {
    Instructions(vec![])
  }

  /// Appends an encoded instruction, returning the offset at which it starts.
  pub fn push_instruction(&mut self, instruction: &[u8]) -> usize {
    let offset = self.0.len();
    self.0.extend_from_slice(instruction);
    offset
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl Deref for Instructions {
  type Target = [u8];

  fn deref(&self) -> &[u8] {
    &self.0
  }
}

impl From<Vec<u8>> for Instructions {
  fn from(bytes: Vec<u8>) -> Instructions {
    Instructions(bytes)
  }
}

impl FromIterator<Vec<u8>> for Instructions {
  fn from_iter<T: IntoIterator<Item = Vec<u8>>>(iter: T) -> Instructions {
    Instructions(iter.into_iter().flatten().collect())
  }
}

/// Disassembly. One line per instruction: the zero padded offset, the mnemonic, the operands.
impl Display for Instructions {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut offset = 0;

    while offset < self.0.len() {
      let definition = match lookup(self.0[offset]) {
        Ok(definition) => definition,
        Err(error) => {
          // Skip the bad byte and try to resynchronize on the next one.
          writeln!(f, "{:04} ERROR: {}", offset, error)?;
          offset += 1;
          continue;
        }
      };

      match read_operands(&definition, &self.0[offset + 1..]) {
        Ok((operands, read)) => {
          writeln!(f, "{:04} {}", offset, format_instruction(&definition, &operands))?;
          offset += 1 + read;
        }
        Err(error) => {
          // A truncated operand block can only be the end of the stream.
          writeln!(f, "{:04} ERROR: {}", offset, error)?;
          break;
        }
      }
    }
    Ok(())
  }
}

/// Renders the instructions in `bytes` as text. See `Display for Instructions`.
pub fn disassemble(bytes: &[u8]) -> String {
  Instructions(bytes.to_vec()).to_string()
}

pub fn format_instruction(definition: &Definition, operands: &[usize]) -> String {
  let mut text = definition.name.to_string();
  for operand in operands {
    text.push(' ');
    text.push_str(&operand.to_string());
  }
  text
}

/**
  Encodes `opcode` and its operands. Each operand is written big-endian at the width the opcode
  declares for it, keeping only the low bytes: it is the caller's responsibility to pass values
  that fit.
*/
pub fn make(opcode: Opcode, operands: &[usize]) -> Result<Vec<u8>, BytecodeError> {
  let widths = opcode.operand_widths();
  if widths.len() != operands.len() {
    return Err(BytecodeError::OperandCount {
      opcode,
      expected : widths.len(),
      given    : operands.len(),
    });
  }

  let mut instruction = Vec::with_capacity(opcode.definition().size());
  instruction.push(opcode.code());

  for (operand, width) in operands.iter().zip(widths) {
    match *width {
      2 => instruction.extend_from_slice(&(*operand as u16).to_be_bytes()),
      _ => instruction.push(*operand as u8),
    }
  }
  Ok(instruction)
}

/// Encodes an instruction given the raw opcode byte.
pub fn make_raw(byte: u8, operands: &[usize]) -> Result<Vec<u8>, BytecodeError> {
  let opcode = Opcode::try_from(byte).map_err(|_| BytecodeError::UnknownOpcode(byte))?;
  make(opcode, operands)
}

/**
  Decodes the operands of an instruction described by `definition`. The slice must start right
  after the opcode byte. Returns the operands in declaration order and the number of bytes read.
*/
pub fn read_operands(definition: &Definition, bytes: &[u8])
  -> Result<(Vec<usize>, usize), BytecodeError>
{
  let needed = definition.operand_bytes();
  if bytes.len() < needed {
    return Err(BytecodeError::UnexpectedEnd { needed, available: bytes.len() });
  }

  let mut operands = Vec::with_capacity(definition.operand_widths.len());
  let mut offset   = 0;

  for width in definition.operand_widths {
    let operand = match *width {
      2 => read_u16(&bytes[offset..])? as usize,
      _ => read_u8(&bytes[offset..])? as usize,
    };
    operands.push(operand);
    offset += width;
  }

  Ok((operands, offset))
}

pub fn read_u8(bytes: &[u8]) -> Result<u8, BytecodeError> {
  bytes.first()
       .copied()
       .ok_or(BytecodeError::UnexpectedEnd { needed: 1, available: 0 })
}

pub fn read_u16(bytes: &[u8]) -> Result<u16, BytecodeError> {
  match bytes {
    [high, low, ..] => Ok(u16::from_be_bytes([*high, *low])),
    _ => Err(BytecodeError::UnexpectedEnd { needed: 2, available: bytes.len() }),
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use strum::IntoEnumIterator;

  fn max_for(width: usize) -> usize {
    match width {
      2 => u16::MAX as usize,
      _ => u8::MAX as usize,
    }
  }

  #[test]
  fn make_lays_out_big_endian_operands() {
    assert_eq!(make(Opcode::LoadConstant, &[65534]).unwrap(), vec![0, 255, 254]);
    assert_eq!(make(Opcode::LoadLocal, &[255]).unwrap(), vec![6, 255]);
    assert_eq!(make(Opcode::MakeClosure, &[65534, 255]).unwrap(), vec![18, 255, 254, 255]);
    assert_eq!(make(Opcode::Add, &[]).unwrap(), vec![21]);
  }

  #[test]
  fn make_truncates_to_the_declared_width() {
    assert_eq!(make(Opcode::Call, &[0x1ff]).unwrap(), vec![42, 0xff]);
    assert_eq!(make(Opcode::Jump, &[0x12345]).unwrap(), vec![41, 0x23, 0x45]);
  }

  #[test]
  fn make_rejects_wrong_operand_count() {
    assert_eq!(
      make(Opcode::MakeClosure, &[1]),
      Err(BytecodeError::OperandCount { opcode: Opcode::MakeClosure, expected: 2, given: 1 })
    );
    assert!(make(Opcode::Pop, &[1]).is_err());
  }

  #[test]
  fn make_raw_reports_unknown_opcodes() {
    assert_eq!(make_raw(200, &[]), Err(BytecodeError::UnknownOpcode(200)));
    assert_eq!(make_raw(19, &[]).unwrap(), vec![19]);
  }

  #[test]
  fn operands_survive_encoding_at_every_width() {
    for opcode in Opcode::iter() {
      let definition = opcode.definition();
      let widths     = definition.operand_widths;

      let mut samples: Vec<Vec<usize>> = vec![
        widths.iter().map(|_| 0).collect(),
        widths.iter().map(|_| 1).collect(),
        widths.iter().map(|w| max_for(*w)).collect(),
      ];
      if widths.contains(&2) {
        samples.push(widths.iter().map(|w| if *w == 2 { 0x1234 } else { 0x56 }).collect());
      }

      for operands in samples {
        let instruction = make(opcode, &operands).unwrap();
        assert_eq!(instruction.len(), definition.size());
        assert_eq!(lookup(instruction[0]).unwrap(), definition);

        let (read, consumed) = read_operands(&definition, &instruction[1..]).unwrap();
        assert_eq!(read, operands, "{}", opcode);
        assert_eq!(consumed, definition.operand_bytes());
      }
    }
  }

  #[test]
  fn read_operands_rejects_short_input() {
    let definition = Opcode::MakeClosure.definition();
    assert_eq!(
      read_operands(&definition, &[0, 1]),
      Err(BytecodeError::UnexpectedEnd { needed: 3, available: 2 })
    );
  }

  #[test]
  fn disassembly_of_two_instructions() {
    let instructions: Instructions = vec![
      make(Opcode::MakeClosure, &[65535, 255]).unwrap(),
      make(Opcode::Add, &[]).unwrap(),
    ].into_iter().collect();

    let text = instructions.to_string();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["0000 MakeClosure 65535 255", "0004 Add"]);
  }

  #[test]
  fn disassembly_listing() {
    let instructions: Instructions = vec![
      make(Opcode::Add, &[]).unwrap(),
      make(Opcode::LoadLocal, &[1]).unwrap(),
      make(Opcode::LoadConstant, &[2]).unwrap(),
      make(Opcode::LoadConstant, &[65535]).unwrap(),
      make(Opcode::MakeClosure, &[65535, 255]).unwrap(),
    ].into_iter().collect();

    let expected = "\
0000 Add
0001 LoadLocal 1
0003 LoadConstant 2
0006 LoadConstant 65535
0009 MakeClosure 65535 255
";
    assert_eq!(instructions.to_string(), expected);
  }

  #[test]
  fn disassembly_steps_over_unknown_bytes() {
    let text = disassemble(&[21, 250, 251, 19]);
    assert_eq!(
      text,
      "0000 Add\n0001 ERROR: opcode 250 undefined\n0002 ERROR: opcode 251 undefined\n0003 Pop\n"
    );
  }

  #[test]
  fn disassembly_stops_at_truncated_operands() {
    let text = disassemble(&[19, 0, 1]);
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().nth(1).unwrap().starts_with("0001 ERROR: unexpected end"));
  }

  #[test]
  fn push_instruction_reports_offsets() {
    let mut instructions = Instructions::new();
    assert_eq!(instructions.push_instruction(&make(Opcode::LoadTrue, &[]).unwrap()), 0);
    assert_eq!(instructions.push_instruction(&make(Opcode::Jump, &[9]).unwrap()), 1);
    assert_eq!(instructions.push_instruction(&make(Opcode::Pop, &[]).unwrap()), 4);
    assert_eq!(instructions.len(), 5);
  }
}
