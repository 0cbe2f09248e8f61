//! The stack machine that executes bytecode: operand stack, call frames, globals and the
//! dispatch loop.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use indexmap::IndexMap;
use prettytable::{format as TableFormat, Table};
use string_cache::DefaultAtom;

use crate::builtins::Builtins;
use crate::bytecode::{Bytecode, Opcode};
use crate::error::{Fault, VmError};
use crate::frame::{Decoded, Frame};
use crate::object::*;

pub const STACK_SIZE   : usize = 2048;
pub const MAX_FRAMES   : usize = 1024;
/// `LoadGlobal` and friends address globals with two bytes.
pub const GLOBALS_SIZE : usize = 65536;

/// Resource bounds of one VM instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Limits {
  pub stack_size   : usize,
  pub max_frames   : usize,
  pub globals_size : usize,
}

impl Default for Limits {
  fn default() -> Limits {
    Limits {
      stack_size   : STACK_SIZE,
      max_frames   : MAX_FRAMES,
      globals_size : GLOBALS_SIZE,
    }
  }
}

pub struct Vm {
  // Program //
  constants   : Vec<Value>,
  builtins    : Builtins,
  modules     : HashMap<DefaultAtom, Value>,

  // Memory Stores //
  globals     : Vec<Value>,
  stack       : Vec<Value>, // The operand stack, shared by all frames.
  frames      : Vec<Frame>, // The call stack. The active frame is last.

  limits      : Limits,
  last_popped : Value,
}

impl Vm {

  // region Display methods

  fn make_slot_table<T> (
      name      : &str,
      slots     : &[T],
      highlight : Option<usize>
    ) -> Table
    where T: Display
  {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Address", ubl->"Contents"]);

    for (i, slot) in slots.iter().enumerate() {
      match Some(i) == highlight {

        true  => {
          table.add_row(
            row![r->format!("* --> {}[{}] =", name, i), format!("{}", slot)]
          );
        }

        false => {
          table.add_row(
            row![r->format!("{}[{}] =", name, i), format!("{}", slot)]
          );
        }

      } // end match on highlight
    } // end for
    table
  }

  // endregion

  // region Construction and inspection

  pub fn new(bytecode: Bytecode) -> Vm {
    Vm::with_limits(bytecode, Limits::default())
  }

  pub fn with_limits(bytecode: Bytecode, limits: Limits) -> Vm {
    let globals = vec![Value::Null; limits.globals_size];
    Vm::with_globals(bytecode, limits, globals)
  }

  /**
    Creates a VM that continues with the global store of a previous run, as a REPL does between
    inputs. The store is resized to `limits.globals_size`.
  */
  pub fn with_globals(bytecode: Bytecode, limits: Limits, mut globals: Vec<Value>) -> Vm {
    globals.resize(limits.globals_size, Value::Null);

    let main    = CompiledFunction::new(bytecode.instructions, 0, 0);
    let closure = Rc::new(Closure::new(Rc::new(main), vec![]));

    Vm {
      constants   : bytecode.constants,
      builtins    : Builtins::new(),
      modules     : HashMap::new(),
      globals,
      stack       : Vec::with_capacity(limits.stack_size),
      frames      : vec![Frame::new(closure, 0)],
      limits,
      last_popped : Value::Null,
    }
  }

  pub fn set_builtins(&mut self, builtins: Builtins) {
    self.builtins = builtins;
  }

  /// Makes `members` available to `LoadModule` under `name`.
  pub fn register_module(&mut self, name: &str, members: IndexMap<DefaultAtom, Value>) {
    let name   = DefaultAtom::from(name);
    let module = Module { name: name.clone(), members };
    self.modules.insert(name, Value::Module(Rc::new(module)));
  }

  /// Hands the global store back so that it can seed the next run.
  pub fn into_globals(self) -> Vec<Value> {
    self.globals
  }

  pub fn globals(&self) -> &[Value] {
    &self.globals
  }

  pub fn stack(&self) -> &[Value] {
    &self.stack
  }

  pub fn stack_top(&self) -> Option<&Value> {
    self.stack.last()
  }

  /// The value most recently discarded by `Pop`, which is how a finished program's last
  /// expression statement is observed.
  pub fn last_popped(&self) -> &Value {
    &self.last_popped
  }

  pub fn frame_depth(&self) -> usize {
    self.frames.len()
  }

  // endregion

  // region Stack primitives

  fn push(&mut self, value: Value) -> Result<(), Fault> {
    if self.stack.len() >= self.limits.stack_size {
      return Err(Fault::StackOverflow);
    }
    self.stack.push(value);
    Ok(())
  }

  /// The lowest stack index the active frame may pop.
  fn floor(&self) -> usize {
    self.frames.last().map_or(0, Frame::stack_floor)
  }

  fn pop(&mut self) -> Result<Value, Fault> {
    if self.stack.len() <= self.floor() {
      return Err(Fault::StackUnderflow);
    }
    self.stack.pop().ok_or(Fault::StackUnderflow)
  }

  /// Pops `count` values, returned in the order they were pushed.
  fn pop_many(&mut self, count: usize) -> Result<Vec<Value>, Fault> {
    let start = self.stack.len().checked_sub(count).ok_or(Fault::StackUnderflow)?;
    if start < self.floor() {
      return Err(Fault::StackUnderflow);
    }
    Ok(self.stack.split_off(start))
  }

  fn frame(&self) -> Result<&Frame, Fault> {
    self.frames.last().ok_or(Fault::StackUnderflow)
  }

  fn frame_mut(&mut self) -> Result<&mut Frame, Fault> {
    self.frames.last_mut().ok_or(Fault::StackUnderflow)
  }

  fn constant(&self, index: usize) -> Result<&Value, Fault> {
    self.constants.get(index).ok_or(Fault::ConstantOutOfRange(index))
  }

  /// Stack index of local slot `index` of the active frame.
  fn local_slot(&self, index: usize) -> Result<usize, Fault> {
    let frame = self.frame()?;
    match index < frame.slots() {
      true  => Ok(frame.base_pointer() + index),
      false => Err(Fault::LocalOutOfRange { index, slots: frame.slots() }),
    }
  }

  fn check_global(&self, index: usize) -> Result<usize, Fault> {
    match index < self.globals.len() {
      true  => Ok(index),
      false => Err(Fault::GlobalOutOfRange { index, size: self.globals.len() }),
    }
  }

  // endregion

  // region Dispatch loop

  /**
    Runs until the outermost frame returns or falls off the end of its instructions. A fault
    ends the run and is reported with the instruction that raised it; the stack and frames are
    left where the fault found them, for inspection.
  */
  pub fn run(&mut self) -> Result<(), VmError> {
    while let Some(frame) = self.frames.last_mut() {

      if frame.is_finished() {
        // Falling off the end of a function is a bare return, except for the outermost frame,
        // which leaves the stack alone.
        let offset = frame.ip();
        match self.frames.len() {
          1 => { self.frames.pop(); }
          _ => self.return_from_call(Value::Null)
                   .map_err(|fault| self.error(fault, None, offset))?,
        }
        continue;
      }

      let offset      = frame.ip();
      let instruction = frame.fetch().map_err(|e| self.error(e.into(), None, offset))?;

      #[cfg(feature = "trace_computation")]
        println!(
          "{:>3} {:04} {}",
          self.frames.len(),
          offset,
          crate::bytecode::format_instruction(
            &instruction.opcode.definition(),
            &instruction.operands[..instruction.opcode.arity()]
          )
        );

      self.execute(instruction)
          .map_err(|fault| self.error(fault, Some(instruction.opcode), offset))?;
    }
    Ok(())
  }

  fn error(&self, fault: Fault, opcode: Option<Opcode>, offset: usize) -> VmError {
    VmError {
      fault,
      opcode,
      offset,
      depth: self.frames.len(),
    }
  }

  fn execute(&mut self, instruction: Decoded) -> Result<(), Fault> {
    let [operand, second] = instruction.operands;

    match instruction.opcode {

      // Literals and constants //

      Opcode::LoadConstant => {
        let value = self.constant(operand)?.clone();
        self.push(value)
      }

      Opcode::LoadTrue  => self.push(Value::Boolean(true)),
      Opcode::LoadFalse => self.push(Value::Boolean(false)),
      Opcode::LoadNull  => self.push(Value::Null),

      // Scopes //

      Opcode::LoadBuiltin => {
        let builtin = self.builtins.get(operand).ok_or(Fault::UnknownBuiltin(operand))?;
        self.push(Value::Builtin(builtin))
      }

      Opcode::AssignGlobal => {
        let index          = self.check_global(operand)?;
        self.globals[index] = self.pop()?;
        Ok(())
      }

      Opcode::BindGlobal => {
        let index          = self.check_global(operand)?;
        let value          = self.pop()?;
        self.globals[index] = value.clone();
        self.push(value)
      }

      Opcode::LoadGlobal => {
        let index = self.check_global(operand)?;
        let value = self.globals[index].clone();
        self.push(value)
      }

      Opcode::AssignLocal => {
        let slot        = self.local_slot(operand)?;
        self.stack[slot] = self.pop()?;
        Ok(())
      }

      Opcode::BindLocal => {
        let slot        = self.local_slot(operand)?;
        let value       = self.pop()?;
        self.stack[slot] = value.clone();
        self.push(value)
      }

      Opcode::LoadLocal => {
        let slot  = self.local_slot(operand)?;
        let value = self.stack[slot].clone();
        self.push(value)
      }

      Opcode::LoadFree => {
        let closure = self.frame()?.closure().clone();
        let free    = closure.free.borrow();
        let value   = free.get(operand)
                          .cloned()
                          .ok_or(Fault::FreeOutOfRange { index: operand, captured: free.len() })?;
        self.push(value)
      }

      Opcode::SetSelf => {
        let closure  = self.frame()?.closure().clone();
        let mut free = closure.free.borrow_mut();
        let captured = free.len();
        let slot     = free.get_mut(operand)
                           .ok_or(Fault::FreeOutOfRange { index: operand, captured })?;
        *slot = Value::Closure(closure.clone());
        Ok(())
      }

      Opcode::LoadModule => {
        let module = match self.pop()? {
          Value::Str(name) => {
            self.modules
                .get(&name)
                .cloned()
                .ok_or_else(|| Fault::UnknownModule(name.to_string()))?
          }
          other => return Err(Fault::UnsupportedOperand(other.type_name())),
        };
        self.push(module)
      }

      // Collections //

      Opcode::GetItem => {
        let index     = self.pop()?;
        let container = self.pop()?;
        self.push(get_item(&container, &index)?)
      }

      Opcode::SetItem => {
        let value     = self.pop()?;
        let index     = self.pop()?;
        let container = self.pop()?;
        set_item(&container, &index, value)
      }

      Opcode::MakeArray => {
        let elements = self.pop_many(operand)?;
        self.push(Value::array(elements))
      }

      Opcode::MakeHash => {
        if operand % 2 != 0 {
          return Err(Fault::OddHashOperand(operand));
        }
        let items     = self.pop_many(operand)?;
        let mut pairs = IndexMap::with_capacity(operand / 2);
        for pair in items.chunks(2) {
          pairs.insert(pair[0].hash_key()?, pair[1].clone());
        }
        self.push(Value::hash(pairs))
      }

      Opcode::MakeClosure => {
        let function = match self.constant(operand)? {
          Value::Function(function) => function.clone(),
          other                     => return Err(Fault::NotAFunction(other.type_name())),
        };
        let free = self.pop_many(second)?;
        self.push(Value::Closure(Rc::new(Closure::new(function, free))))
      }

      // Stack hygiene //

      Opcode::Pop => {
        self.last_popped = self.pop()?;
        Ok(())
      }

      Opcode::Noop => Ok(()),

      // Arithmetic and logic //

      | Opcode::Add
      | Opcode::Sub
      | Opcode::Mul
      | Opcode::Div
      | Opcode::Mod
      | Opcode::BitwiseOR
      | Opcode::BitwiseXOR
      | Opcode::BitwiseAND
      | Opcode::LeftShift
      | Opcode::RightShift
      | Opcode::GreaterThan
      | Opcode::GreaterThanEqual => {
        let right = self.pop()?;
        let left  = self.pop()?;
        self.push(binary_operation(instruction.opcode, &left, &right)?)
      }

      Opcode::Equal | Opcode::NotEqual => {
        let right = self.pop()?;
        let left  = self.pop()?;
        let equal = left.equals(&right);
        self.push(Value::Boolean(equal == (instruction.opcode == Opcode::Equal)))
      }

      Opcode::Or | Opcode::And => {
        let right  = self.pop()?.is_truthy();
        let left   = self.pop()?.is_truthy();
        let result = match instruction.opcode {
          Opcode::Or => left || right,
          _          => left && right,
        };
        self.push(Value::Boolean(result))
      }

      Opcode::Not | Opcode::Minus | Opcode::BitwiseNOT => {
        let operand = self.pop()?;
        self.push(unary_operation(instruction.opcode, &operand)?)
      }

      // Control flow //

      Opcode::Jump => self.jump(operand),

      Opcode::JumpIfFalse => {
        let condition = self.pop()?;
        match condition.is_truthy() {
          true  => Ok(()),
          false => self.jump(operand),
        }
      }

      Opcode::Call => self.call(operand),

      Opcode::ReturnValue => {
        let value = self.pop()?;
        self.return_from_call(value)
      }

      Opcode::Return => self.return_from_call(Value::Null),

    } // end match on opcode
  }

  fn jump(&mut self, target: usize) -> Result<(), Fault> {
    self.frame_mut()?
        .jump(target)
        .map_err(|length| Fault::JumpOutOfRange { target, length })
  }

  // endregion

  // region Calls

  /// Calls the value sitting below the top `argument_count` stack values.
  fn call(&mut self, argument_count: usize) -> Result<(), Fault> {
    let callee_slot = self.stack
                          .len()
                          .checked_sub(argument_count + 1)
                          .ok_or(Fault::StackUnderflow)?;
    if callee_slot < self.floor() {
      return Err(Fault::StackUnderflow);
    }

    match self.stack[callee_slot].clone() {
      Value::Closure(closure) => self.call_closure(closure, argument_count),
      Value::Builtin(builtin) => self.call_builtin(&builtin, callee_slot),
      other                   => Err(Fault::NotCallable(other.type_name())),
    }
  }

  fn call_closure(&mut self, closure: Rc<Closure>, argument_count: usize) -> Result<(), Fault> {
    let function = closure.function.clone();
    if argument_count != function.num_parameters {
      return Err(Fault::ArityMismatch {
        expected : function.num_parameters,
        given    : argument_count,
      });
    }
    if self.frames.len() >= self.limits.max_frames {
      return Err(Fault::FrameOverflow(self.limits.max_frames));
    }

    // The arguments already occupy the first local slots.
    let base_pointer = self.stack.len() - argument_count;
    let top          = base_pointer + function.frame_slots();
    if top > self.limits.stack_size {
      return Err(Fault::StackOverflow);
    }
    self.stack.resize(top, Value::Null);
    self.frames.push(Frame::new(closure, base_pointer));

    #[cfg(feature = "trace_computation")] println!("{}", self);
    Ok(())
  }

  fn call_builtin(&mut self, builtin: &Builtin, callee_slot: usize) -> Result<(), Fault> {
    let result = (builtin.function)(&self.stack[callee_slot + 1..])?;
    self.stack.truncate(callee_slot);
    self.push(result)
  }

  /**
    Pops the active frame and leaves `value` where the callee used to be. The outermost frame
    has no callee slot: returning from it leaves `value` as the only thing on the stack and
    ends the run.
  */
  fn return_from_call(&mut self, value: Value) -> Result<(), Fault> {
    let frame = self.frames.pop().ok_or(Fault::StackUnderflow)?;

    match self.frames.is_empty() {
      true  => self.stack.truncate(frame.base_pointer()),
      false => self.stack.truncate(frame.base_pointer() - 1),
    }

    #[cfg(feature = "trace_computation")] println!("{}", self);
    self.push(value)
  }

  // endregion

}


lazy_static! {
  static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

impl Display for Vm {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let top         = self.stack.len().checked_sub(1);
    let stack_table = Vm::make_slot_table("S", &self.stack, top);
    let frame_table = Vm::make_slot_table("F", &self.frames, self.frames.len().checked_sub(1));

    let mut combined_table = table!([stack_table, frame_table]);

    combined_table.set_titles(row![ub->"Stack", ub->"Frames"]);
    combined_table.set_format(*TABLE_DISPLAY_FORMAT);

    write!(f, "Last popped: {}\n{}", self.last_popped, combined_table)
  }
}
