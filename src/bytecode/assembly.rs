/*!
  The human readable textual form of bytecode is called assembly. This module reads assembly
  back into `Bytecode`, leveraging the `strum` derives of `Opcode` to map mnemonics to opcodes.

  The instruction syntax is exactly what the disassembler prints, so a listing can be pasted back
  in unchanged; the leading offset is optional and ignored. Constants and functions are declared
  with directives, and each directive appends to the constant pool in the order it appears:

  ```text
  % A function of two parameters, stored at constant 0.
  .function 2 2
    LoadLocal 0
    LoadLocal 1
    Add
    ReturnValue
  .end
  .int 2                 % constant 1
  .str "hello"           % constant 2

  0000 MakeClosure 0 0
  0004 LoadConstant 1
  ```

  Everything outside a `.function` block belongs to the main program. Comments run from `%` to
  the end of the line; a `%` inside a string literal is just a character. String literals
  understand two escapes, `\"` and `\\`.
*/

use std::rc::Rc;
use std::str::FromStr;

use nom::{
  branch::alt,
  bytes::complete::{is_not, tag},
  character::complete::{alpha1, char as one_char, digit1, space0, space1},
  combinator::{all_consuming, map, map_res, opt, recognize},
  multi::{fold_many0, many0},
  sequence::{delimited, pair, preceded, terminated, tuple},
  IResult
};
use thiserror::Error;

use super::{make, Bytecode, BytecodeError, Instructions, Opcode};
use crate::object::{CompiledFunction, Value};

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AssemblyError {
  #[error("Error on line {line}: {name} is not an operation.")]
  NotAnOperation {
    line : usize,
    name : String,
  },

  #[error("Error on line {line}: {opcode} requires {expected} operands but was given {given}.")]
  WrongArity {
    line     : usize,
    opcode   : Opcode,
    expected : usize,
    given    : usize,
  },

  #[error("Error on line {line}: operand {operand} does not fit in {width} bytes.")]
  OperandTooWide {
    line    : usize,
    operand : String,
    width   : usize,
  },

  #[error("Error on line {line}: cannot parse `{text}`.")]
  Malformed {
    line : usize,
    text : String,
  },

  #[error("Error on line {line}: .end without a matching .function.")]
  UnmatchedEnd {
    line : usize,
  },

  #[error("Error on line {line}: .function blocks cannot nest.")]
  NestedFunction {
    line : usize,
  },

  #[error("Error on line {line}: .function is never closed with .end.")]
  UnterminatedFunction {
    line : usize,
  },

  #[error(transparent)]
  Encoding(#[from] BytecodeError),
}

/// One parsed line of assembly.
#[derive(Debug, Eq, PartialEq)]
enum Syntax<'a> {
  Instruction {
    name     : &'a str,
    operands : Vec<&'a str>,
  },
  Integer(i64),
  Str(String),
  Function {
    parameters : &'a str,
    locals     : &'a str,
  },
  End,
}

/// A `.function` block still being assembled.
struct OpenFunction {
  line           : usize,
  constant       : usize,
  num_parameters : usize,
  num_locals     : usize,
  instructions   : Instructions,
}

// region Parsers

fn integer(input: &str) -> IResult<&str, i64> {
  map_res(
    recognize(pair(opt(one_char('-')), digit1)),
    |text: &str| text.parse::<i64>()
  )(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
  delimited(
    one_char('"'),
    fold_many0(
      alt((
        is_not("\\\""),
        map(tag("\\\""), |_| "\""),
        map(tag("\\\\"), |_| "\\"),
      )),
      String::new(),
      |mut text: String, piece: &str| {
        text.push_str(piece);
        text
      }
    ),
    one_char('"')
  )(input)
}

fn comment(input: &str) -> IResult<&str, Option<&str>> {
  preceded(one_char('%'), opt(is_not("\n\r")))(input)
}

fn directive(input: &str) -> IResult<&str, Syntax<'_>> {
  alt((
    map(preceded(pair(tag(".int"), space1), integer), Syntax::Integer),
    map(preceded(pair(tag(".str"), space1), string_literal), Syntax::Str),
    map(
      preceded(
        tag(".function"),
        pair(preceded(space1, digit1), preceded(space1, digit1))
      ),
      |(parameters, locals)| Syntax::Function { parameters, locals }
    ),
    map(tag(".end"), |_| Syntax::End),
  ))(input)
}

fn instruction(input: &str) -> IResult<&str, Syntax<'_>> {
  map(
    tuple((
      opt(terminated(digit1, space1)),   // Offset, as printed by the disassembler
      alpha1,
      many0(preceded(space1, digit1))
    )),
    |(_offset, name, operands)| Syntax::Instruction { name, operands }
  )(input)
}

/// A line holds at most one directive or instruction, optionally followed by a comment.
fn line(input: &str) -> IResult<&str, Option<Syntax<'_>>> {
  all_consuming(
    delimited(space0, opt(alt((directive, instruction))), pair(space0, opt(comment)))
  )(input)
}

// endregion

fn encode(line: usize, name: &str, operands: &[&str]) -> Result<Vec<u8>, AssemblyError> {
  let opcode = Opcode::from_str(name).map_err(|_| {
    AssemblyError::NotAnOperation { line, name: name.to_string() }
  })?;

  let widths = opcode.operand_widths();
  if widths.len() != operands.len() {
    return Err(AssemblyError::WrongArity {
      line,
      opcode,
      expected : widths.len(),
      given    : operands.len(),
    });
  }

  let mut values = Vec::with_capacity(operands.len());
  for (operand, width) in operands.iter().zip(widths) {
    let limit = (1usize << (8 * width)) - 1;
    match operand.parse::<usize>() {
      Ok(value) if value <= limit => values.push(value),
      _ => {
        return Err(AssemblyError::OperandTooWide {
          line,
          operand : operand.to_string(),
          width   : *width,
        });
      }
    }
  }

  Ok(make(opcode, &values)?)
}

fn parse_count(line: usize, text: &str) -> Result<usize, AssemblyError> {
  text.parse::<usize>()
      .map_err(|_| AssemblyError::Malformed { line, text: text.to_string() })
}

/// Assembles `text` into a main program and its constant pool.
pub fn assemble(text: &str) -> Result<Bytecode, AssemblyError> {
  let mut constants: Vec<Value>          = vec![];
  let mut main                           = Instructions::new();
  let mut function: Option<OpenFunction> = None;

  for (index, raw_line) in text.lines().enumerate() {
    let line_number = index + 1;
    let syntax = match line(raw_line) {
      Ok((_rest, Some(syntax))) => syntax,
      Ok((_rest, None))         => continue,
      Err(_e) => {
        return Err(AssemblyError::Malformed {
          line : line_number,
          text : raw_line.trim().to_string(),
        });
      }
    };

    match syntax {

      Syntax::Instruction { name, operands } => {
        let encoded = encode(line_number, name, &operands)?;
        match function.as_mut() {
          Some(open) => open.instructions.push_instruction(&encoded),
          None       => main.push_instruction(&encoded),
        };
      }

      Syntax::Integer(value) => constants.push(Value::Integer(value)),

      Syntax::Str(text) => constants.push(Value::string(&text)),

      Syntax::Function { parameters, locals } => {
        if function.is_some() {
          return Err(AssemblyError::NestedFunction { line: line_number });
        }
        // Reserve the constant slot now so that indices follow the order of the directives.
        constants.push(Value::Null);
        function = Some(OpenFunction {
          line           : line_number,
          constant       : constants.len() - 1,
          num_parameters : parse_count(line_number, parameters)?,
          num_locals     : parse_count(line_number, locals)?,
          instructions   : Instructions::new(),
        });
      }

      Syntax::End => {
        let open = function.take().ok_or(AssemblyError::UnmatchedEnd { line: line_number })?;
        constants[open.constant] = Value::Function(Rc::new(CompiledFunction::new(
          open.instructions,
          open.num_locals,
          open.num_parameters
        )));
      }

    } // end match on syntax
  }

  if let Some(open) = function {
    return Err(AssemblyError::UnterminatedFunction { line: open.line });
  }

  Ok(Bytecode { instructions: main, constants })
}
