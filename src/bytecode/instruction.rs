use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use strum_macros::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};
use num_enum::{TryFromPrimitive, IntoPrimitive};

use super::error::BytecodeError;

/**
  Opcodes of the virtual machine.

  Rust stores fieldless `#[repr(u8)]` enum variants as bytes numbered consecutively from zero,
  so the order the opcodes are listed below *is* the binary encoding. Appending is safe;
  reordering or inserting changes the meaning of every compiled program.

  The mnemonic of an opcode is its variant name, courtesy of `strum`.
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, EnumIter, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq, Debug,            Hash
)]
#[repr(u8)]
pub enum Opcode {
  // Scopes //
  LoadConstant,      // LoadConstant( constant:16 )
  LoadBuiltin,       // LoadBuiltin( builtin:8 )
  AssignGlobal,      // AssignGlobal( global:16 )
  AssignLocal,       // AssignLocal( local:8 )
  LoadGlobal,        // LoadGlobal( global:16 )
  BindGlobal,        // BindGlobal( global:16 )
  LoadLocal,         // LoadLocal( local:8 )
  BindLocal,         // BindLocal( local:8 )
  LoadFree,          // LoadFree( free:8 )
  LoadModule,
  SetSelf,           // SetSelf( free:8 )

  // Literals //
  LoadTrue,
  LoadFalse,
  LoadNull,

  // Collections //
  GetItem,
  SetItem,
  MakeArray,         // MakeArray( count:16 )
  MakeHash,          // MakeHash( count:16 )
  MakeClosure,       // MakeClosure( constant:16, free:8 )

  // Stack hygiene //
  Pop,
  Noop,

  // Arithmetic and logic //
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  Or,
  And,
  Not,
  BitwiseOR,
  BitwiseXOR,
  BitwiseAND,
  BitwiseNOT,
  LeftShift,
  RightShift,
  Equal,
  NotEqual,
  GreaterThan,
  GreaterThanEqual,
  Minus,

  // Control flow //
  JumpIfFalse,       // JumpIfFalse( offset:16 )
  Jump,              // Jump( offset:16 )
  Call,              // Call( arguments:8 )
  Return,
  ReturnValue,
}

/// The static description of an opcode: its mnemonic and the width in bytes of each operand.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Definition {
  pub opcode         : Opcode,
  pub name           : &'static str,
  pub operand_widths : &'static [usize],
}

impl Definition {
  /// The number of bytes the operands occupy, excluding the opcode byte.
  pub fn operand_bytes(&self) -> usize {
    self.operand_widths.iter().sum()
  }

  /// The number of bytes the whole instruction occupies.
  pub fn size(&self) -> usize {
    1 + self.operand_bytes()
  }
}

impl Display for Definition {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.name)
  }
}

impl Opcode {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  /// Operand widths in bytes, in operand order.
  pub fn operand_widths(&self) -> &'static [usize] {
    match self {
      | Opcode::LoadConstant
      | Opcode::AssignGlobal
      | Opcode::LoadGlobal
      | Opcode::BindGlobal
      | Opcode::MakeArray
      | Opcode::MakeHash
      | Opcode::JumpIfFalse
      | Opcode::Jump => &[2],

      | Opcode::LoadBuiltin
      | Opcode::AssignLocal
      | Opcode::LoadLocal
      | Opcode::BindLocal
      | Opcode::LoadFree
      | Opcode::SetSelf
      | Opcode::Call => &[1],

      Opcode::MakeClosure => &[2, 1],

      | Opcode::LoadModule
      | Opcode::LoadTrue
      | Opcode::LoadFalse
      | Opcode::LoadNull
      | Opcode::GetItem
      | Opcode::SetItem
      | Opcode::Pop
      | Opcode::Noop
      | Opcode::Add
      | Opcode::Sub
      | Opcode::Mul
      | Opcode::Div
      | Opcode::Mod
      | Opcode::Or
      | Opcode::And
      | Opcode::Not
      | Opcode::BitwiseOR
      | Opcode::BitwiseXOR
      | Opcode::BitwiseAND
      | Opcode::BitwiseNOT
      | Opcode::LeftShift
      | Opcode::RightShift
      | Opcode::Equal
      | Opcode::NotEqual
      | Opcode::GreaterThan
      | Opcode::GreaterThanEqual
      | Opcode::Minus
      | Opcode::Return
      | Opcode::ReturnValue => &[],
    }
  }

  pub fn arity(&self) -> usize {
    self.operand_widths().len()
  }

  pub fn definition(&self) -> Definition {
    Definition {
      opcode         : *self,
      name           : (*self).into(),
      operand_widths : self.operand_widths(),
    }
  }
}

/// Looks up the definition of the opcode encoded as `byte`.
pub fn lookup(byte: u8) -> Result<Definition, BytecodeError> {
  Opcode::try_from(byte)
    .map(|opcode| opcode.definition())
    .map_err(|_| BytecodeError::UnknownOpcode(byte))
}


#[cfg(test)]
mod tests {
  use super::*;
  use std::str::FromStr;
  use strum::IntoEnumIterator;

  #[test]
  fn every_opcode_has_a_definition() {
    for opcode in Opcode::iter() {
      let definition = lookup(opcode.code()).unwrap();
      assert_eq!(definition.opcode, opcode);
      assert_eq!(definition.name, opcode.to_string());
      assert!(definition.operand_widths.iter().all(|w| *w == 1 || *w == 2));
    }
  }

  #[test]
  fn byte_values_follow_declaration_order() {
    assert_eq!(Opcode::LoadConstant.code(), 0);
    assert_eq!(Opcode::Noop.code(), 20);
    assert_eq!(Opcode::ReturnValue.code(), 44);
    assert_eq!(Opcode::iter().count(), 45);
  }

  #[test]
  fn unknown_bytes_are_errors() {
    assert_eq!(lookup(45), Err(BytecodeError::UnknownOpcode(45)));
    assert_eq!(lookup(255), Err(BytecodeError::UnknownOpcode(255)));
  }

  #[test]
  fn closure_operands() {
    let definition = Opcode::MakeClosure.definition();
    assert_eq!(definition.operand_widths, &[2, 1]);
    assert_eq!(definition.size(), 4);
  }

  #[test]
  fn mnemonics_parse() {
    assert_eq!(Opcode::from_str("GreaterThanEqual"), Ok(Opcode::GreaterThanEqual));
    assert_eq!(Opcode::from_str("BitwiseXOR"), Ok(Opcode::BitwiseXOR));
    assert!(Opcode::from_str("Halt").is_err());
  }
}
