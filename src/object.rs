//! Runtime values: what lives on the operand stack, in the globals and in the constant pool.

use std::cell::RefCell;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

use indexmap::IndexMap;
use string_cache::DefaultAtom;

use crate::bytecode::{Instructions, Opcode};
use crate::error::Fault;

pub type RcArray     = Rc<RefCell<Vec<Value>>>;
pub type RcHash      = Rc<RefCell<IndexMap<HashKey, Value>>>;
pub type BuiltinFunction = fn(&[Value]) -> Result<Value, Fault>;

#[derive(Clone)]
pub enum Value {
  Integer(i64),
  Boolean(bool),
  /// The value of nothing: uninitialized locals, bare returns, missing elements.
  Null,
  /// As with all strings in this codebase, string values are interned.
  Str(DefaultAtom),
  Array(RcArray),
  Hash(RcHash),
  Function(Rc<CompiledFunction>),
  Closure(Rc<Closure>),
  Builtin(Rc<Builtin>),
  Module(Rc<Module>),
}

/// The subset of values that can key a hash.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum HashKey {
  Integer(i64),
  Boolean(bool),
  Str(DefaultAtom),
}

/// The output of compiling one function body. Never changes once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompiledFunction {
  pub instructions   : Instructions,
  /// Number of local slots, parameters included.
  pub num_locals     : usize,
  pub num_parameters : usize,
}

/**
  A compiled function together with the free variables it captured when it was created.

  The captures are fixed at creation time, with one exception: `SetSelf` stores the closure into
  one of its own capture slots so that the closure can call itself. That makes a reference cycle,
  which plain reference counting never reclaims.
*/
pub struct Closure {
  pub function : Rc<CompiledFunction>,
  pub free     : RefCell<Vec<Value>>,
}

pub struct Builtin {
  pub name     : DefaultAtom,
  pub function : BuiltinFunction,
}

/// A named collection of values the host makes available through `LoadModule`.
#[derive(Debug)]
pub struct Module {
  pub name    : DefaultAtom,
  pub members : IndexMap<DefaultAtom, Value>,
}

// region Constructors

impl CompiledFunction {
  pub fn new(instructions: Instructions, num_locals: usize, num_parameters: usize) -> CompiledFunction {
    CompiledFunction { instructions, num_locals, num_parameters }
  }

  /// The number of stack slots a frame running this function owns above its base pointer.
  pub fn frame_slots(&self) -> usize {
    self.num_locals.max(self.num_parameters)
  }
}

impl Closure {
  pub fn new(function: Rc<CompiledFunction>, free: Vec<Value>) -> Closure {
    Closure { function, free: RefCell::new(free) }
  }
}

impl Value {
  pub fn array(elements: Vec<Value>) -> Value {
    Value::Array(Rc::new(RefCell::new(elements)))
  }

  pub fn hash(pairs: IndexMap<HashKey, Value>) -> Value {
    Value::Hash(Rc::new(RefCell::new(pairs)))
  }

  pub fn string(text: &str) -> Value {
    Value::Str(DefaultAtom::from(text))
  }

  /// A closure with no captures wrapping `function`.
  pub fn closure(function: CompiledFunction) -> Value {
    Value::Closure(Rc::new(Closure::new(Rc::new(function), vec![])))
  }
}

impl From<i64> for Value {
  fn from(value: i64) -> Value {
    Value::Integer(value)
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Value {
    Value::Boolean(value)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Value {
    Value::string(value)
  }
}

impl From<HashKey> for Value {
  fn from(key: HashKey) -> Value {
    match key {
      HashKey::Integer(i) => Value::Integer(i),
      HashKey::Boolean(b) => Value::Boolean(b),
      HashKey::Str(s)     => Value::Str(s),
    }
  }
}

// endregion

// region Queries

impl Value {
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Integer(_)  => "INTEGER",
      Value::Boolean(_)  => "BOOLEAN",
      Value::Null        => "NULL",
      Value::Str(_)      => "STRING",
      Value::Array(_)    => "ARRAY",
      Value::Hash(_)     => "HASH",
      Value::Function(_) => "FUNCTION",
      Value::Closure(_)  => "CLOSURE",
      Value::Builtin(_)  => "BUILTIN",
      Value::Module(_)   => "MODULE",
    }
  }

  /// `false` and `null` are falsy. Everything else is truthy, `0` and empty containers included.
  pub fn is_truthy(&self) -> bool {
    !matches!(self, Value::Boolean(false) | Value::Null)
  }

  pub fn hash_key(&self) -> Result<HashKey, Fault> {
    match self {
      Value::Integer(i) => Ok(HashKey::Integer(*i)),
      Value::Boolean(b) => Ok(HashKey::Boolean(*b)),
      Value::Str(s)     => Ok(HashKey::Str(s.clone())),
      other             => Err(Fault::UnhashableKey(other.type_name())),
    }
  }

  /// Equality as the `Equal` opcode sees it: scalars by value, everything else by identity.
  pub fn equals(&self, other: &Value) -> bool {
    match (self, other) {
      (Value::Integer(a),  Value::Integer(b))  => a == b,
      (Value::Boolean(a),  Value::Boolean(b))  => a == b,
      (Value::Null,        Value::Null)        => true,
      (Value::Str(a),      Value::Str(b))      => a == b,
      (Value::Array(a),    Value::Array(b))    => Rc::ptr_eq(a, b),
      (Value::Hash(a),     Value::Hash(b))     => Rc::ptr_eq(a, b),
      (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
      (Value::Closure(a),  Value::Closure(b))  => Rc::ptr_eq(a, b),
      (Value::Builtin(a),  Value::Builtin(b))  => Rc::ptr_eq(a, b),
      (Value::Module(a),   Value::Module(b))   => Rc::ptr_eq(a, b),
      _                                        => false,
    }
  }
}

/**
  Structural equality, for hosts and tests. Callables and modules still compare by identity.

  `SetItem` can make a container hold itself. A pair of containers met again while it is still
  being compared is assumed equal, which terminates on cycles and leaves acyclic values alone.
*/
impl PartialEq for Value {
  fn eq(&self, other: &Value) -> bool {
    structural_eq(self, other, &mut vec![])
  }
}

fn structural_eq(left: &Value, right: &Value, comparing: &mut Vec<(usize, usize)>) -> bool {
  let pair = match (left, right) {
    (Value::Array(a), Value::Array(b)) => (container_id(a), container_id(b)),
    (Value::Hash(a),  Value::Hash(b))  => (container_id(a), container_id(b)),
    _                                  => return left.equals(right),
  };
  if pair.0 == pair.1 || comparing.contains(&pair) {
    return true;
  }

  comparing.push(pair);
  let equal = match (left, right) {

    (Value::Array(a), Value::Array(b)) => {
      let (a, b) = (a.borrow(), b.borrow());
      a.len() == b.len()
        && a.iter().zip(b.iter()).all(|(x, y)| structural_eq(x, y, comparing))
    }

    (Value::Hash(a), Value::Hash(b)) => {
      let (a, b) = (a.borrow(), b.borrow());
      a.len() == b.len()
        && a.iter().all(|(key, x)| {
             b.get(key).map_or(false, |y| structural_eq(x, y, comparing))
           })
    }

    _ => false,

  }; // end match on containers
  comparing.pop();
  equal
}

/// Address of the shared cell behind a container, for cycle detection.
fn container_id<T>(container: &Rc<RefCell<T>>) -> usize {
  Rc::as_ptr(container) as *const u8 as usize
}

// endregion

// region Operations

/// Applies a binary arithmetic, bitwise or ordering opcode. The right operand was on top.
pub fn binary_operation(opcode: Opcode, left: &Value, right: &Value) -> Result<Value, Fault> {
  match (left, right) {

    (Value::Integer(l), Value::Integer(r)) => integer_operation(opcode, *l, *r),

    (Value::Str(l), Value::Str(r)) => {
      match opcode {
        Opcode::Add              => Ok(Value::string(&format!("{}{}", l, r))),
        Opcode::GreaterThan      => Ok(Value::Boolean(&**l >  &**r)),
        Opcode::GreaterThanEqual => Ok(Value::Boolean(&**l >= &**r)),
        _                        => Err(mismatch(left, right)),
      }
    }

    (Value::Array(l), Value::Array(r)) if opcode == Opcode::Add => {
      let mut elements = l.borrow().clone();
      elements.extend(r.borrow().iter().cloned());
      Ok(Value::array(elements))
    }

    _ => Err(mismatch(left, right)),
  }
}

fn integer_operation(opcode: Opcode, l: i64, r: i64) -> Result<Value, Fault> {
  let result = match opcode {
    Opcode::Add        => l.wrapping_add(r),
    Opcode::Sub        => l.wrapping_sub(r),
    Opcode::Mul        => l.wrapping_mul(r),
    Opcode::Div        => {
      if r == 0 {
        return Err(Fault::DivisionByZero);
      }
      l.wrapping_div(r)
    }
    Opcode::Mod        => {
      if r == 0 {
        return Err(Fault::DivisionByZero);
      }
      l.wrapping_rem(r)
    }
    Opcode::BitwiseOR  => l | r,
    Opcode::BitwiseXOR => l ^ r,
    Opcode::BitwiseAND => l & r,
    Opcode::LeftShift  => l << shift_amount(r)?,
    Opcode::RightShift => l >> shift_amount(r)?,

    Opcode::GreaterThan      => return Ok(Value::Boolean(l >  r)),
    Opcode::GreaterThanEqual => return Ok(Value::Boolean(l >= r)),

    _ => return Err(Fault::TypeMismatch { left: "INTEGER", right: "INTEGER" }),
  };
  Ok(Value::Integer(result))
}

fn shift_amount(r: i64) -> Result<u32, Fault> {
  match r {
    0..=63 => Ok(r as u32),
    _      => Err(Fault::InvalidShift(r)),
  }
}

fn mismatch(left: &Value, right: &Value) -> Fault {
  Fault::TypeMismatch { left: left.type_name(), right: right.type_name() }
}

/// Applies `Not`, `Minus` or `BitwiseNOT`.
pub fn unary_operation(opcode: Opcode, operand: &Value) -> Result<Value, Fault> {
  match (opcode, operand) {
    (Opcode::Not,        _)                  => Ok(Value::Boolean(!operand.is_truthy())),
    (Opcode::Minus,      Value::Integer(i))  => Ok(Value::Integer(i.wrapping_neg())),
    (Opcode::BitwiseNOT, Value::Integer(i))  => Ok(Value::Integer(!i)),
    _                                        => Err(Fault::UnsupportedOperand(operand.type_name())),
  }
}

/// `container[index]`. Missing elements read as `null`.
pub fn get_item(container: &Value, index: &Value) -> Result<Value, Fault> {
  match (container, index) {

    (Value::Array(elements), Value::Integer(i)) => {
      let elements = elements.borrow();
      let element  = usize_index(*i).and_then(|i| elements.get(i));
      Ok(element.cloned().unwrap_or(Value::Null))
    }

    (Value::Str(text), Value::Integer(i)) => {
      let character = usize_index(*i).and_then(|i| text.chars().nth(i));
      Ok(character.map_or(Value::Null, |c| Value::string(&c.to_string())))
    }

    (Value::Hash(pairs), key) => {
      let key = key.hash_key()?;
      Ok(pairs.borrow().get(&key).cloned().unwrap_or(Value::Null))
    }

    (Value::Module(module), Value::Str(name)) => {
      Ok(module.members.get(name).cloned().unwrap_or(Value::Null))
    }

    _ => Err(mismatch(container, index)),
  }
}

/// `container[index] = value`, in place.
pub fn set_item(container: &Value, index: &Value, value: Value) -> Result<(), Fault> {
  match (container, index) {

    (Value::Array(elements), Value::Integer(i)) => {
      let mut elements = elements.borrow_mut();
      let length       = elements.len();
      match usize_index(*i).filter(|slot| *slot < length) {
        Some(slot) => {
          elements[slot] = value;
          Ok(())
        }
        None => Err(Fault::IndexOutOfRange { index: *i, length }),
      }
    }

    (Value::Hash(pairs), key) => {
      let key = key.hash_key()?;
      pairs.borrow_mut().insert(key, value);
      Ok(())
    }

    _ => Err(mismatch(container, index)),
  }
}

fn usize_index(i: i64) -> Option<usize> {
  if i < 0 { None } else { Some(i as usize) }
}

// endregion

// region Display methods

impl Display for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Str(s) => write!(f, "{}", s),
      other         => write!(f, "{}", render(other, &mut vec![])),
    }
  }
}

/**
  Renders `value` with strings quoted, as they appear inside a container. `open` holds the
  containers currently being rendered: one that turns up inside itself prints as `[...]` or
  `{...}` instead of recursing forever.
*/
fn render(value: &Value, open: &mut Vec<usize>) -> String {
  match value {
    Value::Integer(i) => i.to_string(),
    Value::Boolean(b) => b.to_string(),
    Value::Null       => "null".to_string(),
    Value::Str(s)     => format!("{:?}", &**s),

    Value::Array(elements) => {
      let id = container_id(elements);
      if open.contains(&id) {
        return "[...]".to_string();
      }
      open.push(id);
      let text = elements
        .borrow()
        .iter()
        .map(|element| render(element, open))
        .collect::<Vec<String>>()
        .join(", ");
      open.pop();
      format!("[{}]", text)
    }

    Value::Hash(pairs) => {
      let id = container_id(pairs);
      if open.contains(&id) {
        return "{...}".to_string();
      }
      open.push(id);
      let text = pairs
        .borrow()
        .iter()
        .map(|(k, v)| format!("{}: {}", render(&Value::from(k.clone()), open), render(v, open)))
        .collect::<Vec<String>>()
        .join(", ");
      open.pop();
      format!("{{{}}}", text)
    }

    Value::Function(function) => format!("fn/{}", function.num_parameters),
    Value::Closure(closure)   => format!("closure/{}", closure.function.num_parameters),
    Value::Builtin(builtin)   => format!("builtin {}", builtin.name),
    Value::Module(module)     => format!("module {}", module.name),
  }
}

// Containers go through `render` so that self-referencing values still print.
impl Debug for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Integer(i)      => write!(f, "Integer({})", i),
      Value::Boolean(b)      => write!(f, "Boolean({})", b),
      Value::Null            => write!(f, "Null"),
      Value::Str(s)          => write!(f, "Str({:?})", &**s),
      Value::Array(_)        => write!(f, "Array({})", render(self, &mut vec![])),
      Value::Hash(_)         => write!(f, "Hash({})", render(self, &mut vec![])),
      Value::Function(func)  => write!(f, "Function({:?})", func),
      Value::Closure(c)      => write!(f, "{:?}", c),
      Value::Builtin(b)      => write!(f, "{:?}", b),
      Value::Module(module)  => write!(f, "Module({})", module.name),
    }
  }
}

// A closure can capture itself, so its captures are summarized rather than printed.
impl Debug for Closure {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Closure")
     .field("function", &self.function)
     .field("free", &self.free.borrow().len())
     .finish()
  }
}

impl Debug for Builtin {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Builtin({})", self.name)
  }
}

// endregion


#[cfg(test)]
mod tests {
  use super::*;

  fn int(i: i64) -> Value {
    Value::Integer(i)
  }

  #[test]
  fn truthiness() {
    assert!(!Value::Boolean(false).is_truthy());
    assert!(!Value::Null.is_truthy());
    assert!(Value::Boolean(true).is_truthy());
    assert!(int(0).is_truthy());
    assert!(Value::string("").is_truthy());
    assert!(Value::array(vec![]).is_truthy());
    assert!(Value::hash(IndexMap::new()).is_truthy());
  }

  #[test]
  fn integer_arithmetic() {
    assert_eq!(binary_operation(Opcode::Add, &int(2), &int(3)), Ok(int(5)));
    assert_eq!(binary_operation(Opcode::Sub, &int(2), &int(3)), Ok(int(-1)));
    assert_eq!(binary_operation(Opcode::Mul, &int(4), &int(3)), Ok(int(12)));
    assert_eq!(binary_operation(Opcode::Div, &int(7), &int(2)), Ok(int(3)));
    assert_eq!(binary_operation(Opcode::Mod, &int(7), &int(2)), Ok(int(1)));
    assert_eq!(binary_operation(Opcode::Add, &int(i64::MAX), &int(1)), Ok(int(i64::MIN)));
  }

  #[test]
  fn bitwise_and_shifts() {
    assert_eq!(binary_operation(Opcode::BitwiseOR, &int(0b1010), &int(0b0101)), Ok(int(0b1111)));
    assert_eq!(binary_operation(Opcode::BitwiseXOR, &int(0b1110), &int(0b0101)), Ok(int(0b1011)));
    assert_eq!(binary_operation(Opcode::BitwiseAND, &int(0b1110), &int(0b0101)), Ok(int(0b0100)));
    assert_eq!(binary_operation(Opcode::LeftShift, &int(1), &int(4)), Ok(int(16)));
    assert_eq!(binary_operation(Opcode::RightShift, &int(-16), &int(2)), Ok(int(-4)));
    assert_eq!(binary_operation(Opcode::LeftShift, &int(1), &int(64)), Err(Fault::InvalidShift(64)));
    assert_eq!(binary_operation(Opcode::RightShift, &int(1), &int(-1)), Err(Fault::InvalidShift(-1)));
  }

  #[test]
  fn division_by_zero() {
    assert_eq!(binary_operation(Opcode::Div, &int(1), &int(0)), Err(Fault::DivisionByZero));
    assert_eq!(binary_operation(Opcode::Mod, &int(1), &int(0)), Err(Fault::DivisionByZero));
  }

  #[test]
  fn strings() {
    let hello = Value::string("hello ");
    let world = Value::string("world");
    assert_eq!(binary_operation(Opcode::Add, &hello, &world), Ok(Value::string("hello world")));
    assert_eq!(binary_operation(Opcode::GreaterThan, &world, &hello), Ok(Value::Boolean(true)));
    assert_eq!(
      binary_operation(Opcode::Sub, &hello, &world),
      Err(Fault::TypeMismatch { left: "STRING", right: "STRING" })
    );
  }

  #[test]
  fn mixed_types_are_rejected() {
    assert_eq!(
      binary_operation(Opcode::Add, &int(1), &Value::Boolean(true)),
      Err(Fault::TypeMismatch { left: "INTEGER", right: "BOOLEAN" })
    );
    assert_eq!(
      binary_operation(Opcode::GreaterThan, &Value::Null, &int(1)),
      Err(Fault::TypeMismatch { left: "NULL", right: "INTEGER" })
    );
  }

  #[test]
  fn array_concatenation_makes_a_new_array() {
    let left  = Value::array(vec![int(1)]);
    let right = Value::array(vec![int(2)]);
    let both  = binary_operation(Opcode::Add, &left, &right).unwrap();
    assert_eq!(both, Value::array(vec![int(1), int(2)]));
    assert_eq!(left, Value::array(vec![int(1)]));
  }

  #[test]
  fn unary_operations() {
    assert_eq!(unary_operation(Opcode::Minus, &int(5)), Ok(int(-5)));
    assert_eq!(unary_operation(Opcode::BitwiseNOT, &int(0)), Ok(int(-1)));
    assert_eq!(unary_operation(Opcode::Not, &int(0)), Ok(Value::Boolean(false)));
    assert_eq!(unary_operation(Opcode::Not, &Value::Null), Ok(Value::Boolean(true)));
    assert_eq!(
      unary_operation(Opcode::Minus, &Value::Boolean(true)),
      Err(Fault::UnsupportedOperand("BOOLEAN"))
    );
  }

  #[test]
  fn equality_is_by_value_for_scalars_and_identity_for_containers() {
    assert!(int(3).equals(&int(3)));
    assert!(Value::string("a").equals(&Value::string("a")));
    assert!(!int(1).equals(&Value::Boolean(true)));

    let array = Value::array(vec![int(1)]);
    assert!(array.equals(&array.clone()));
    assert!(!array.equals(&Value::array(vec![int(1)])));
    assert_eq!(array, Value::array(vec![int(1)]));
  }

  #[test]
  fn indexing() {
    let array = Value::array(vec![int(10), int(20)]);
    assert_eq!(get_item(&array, &int(1)), Ok(int(20)));
    assert_eq!(get_item(&array, &int(2)), Ok(Value::Null));
    assert_eq!(get_item(&array, &int(-1)), Ok(Value::Null));
    assert_eq!(get_item(&Value::string("abc"), &int(1)), Ok(Value::string("b")));

    let mut pairs = IndexMap::new();
    pairs.insert(HashKey::Str(DefaultAtom::from("a")), int(1));
    let hash = Value::hash(pairs);
    assert_eq!(get_item(&hash, &Value::string("a")), Ok(int(1)));
    assert_eq!(get_item(&hash, &Value::string("b")), Ok(Value::Null));
    assert_eq!(get_item(&hash, &array), Err(Fault::UnhashableKey("ARRAY")));
    assert_eq!(
      get_item(&int(1), &int(0)),
      Err(Fault::TypeMismatch { left: "INTEGER", right: "INTEGER" })
    );
  }

  #[test]
  fn writes_mutate_in_place() {
    let array = Value::array(vec![int(10), int(20)]);
    let alias = array.clone();
    set_item(&array, &int(0), int(5)).unwrap();
    assert_eq!(alias, Value::array(vec![int(5), int(20)]));
    assert_eq!(
      set_item(&array, &int(2), int(0)),
      Err(Fault::IndexOutOfRange { index: 2, length: 2 })
    );

    let hash = Value::hash(IndexMap::new());
    set_item(&hash, &Value::Boolean(true), int(1)).unwrap();
    assert_eq!(get_item(&hash, &Value::Boolean(true)), Ok(int(1)));
  }

  #[test]
  fn display() {
    let mut pairs = IndexMap::new();
    pairs.insert(HashKey::Str(DefaultAtom::from("a")), Value::string("x"));
    pairs.insert(HashKey::Integer(2), Value::Null);

    assert_eq!(Value::array(vec![int(1), Value::string("b")]).to_string(), "[1, \"b\"]");
    assert_eq!(Value::hash(pairs).to_string(), "{\"a\": \"x\", 2: null}");
    assert_eq!(Value::string("plain").to_string(), "plain");

    let function = CompiledFunction::new(Instructions::new(), 2, 2);
    assert_eq!(Value::closure(function).to_string(), "closure/2");
  }

  #[test]
  fn containers_holding_themselves() {
    let array = Value::array(vec![int(1), Value::Null]);
    set_item(&array, &int(1), array.clone()).unwrap();
    assert_eq!(array.to_string(), "[1, [...]]");
    assert_eq!(format!("{:?}", array), "Array([1, [...]])");
    assert_eq!(array, array.clone());

    let twin = Value::array(vec![int(1), Value::Null]);
    set_item(&twin, &int(1), twin.clone()).unwrap();
    assert_eq!(array, twin);
    assert!(!array.equals(&twin));

    let hash = Value::hash(IndexMap::new());
    set_item(&hash, &Value::string("me"), hash.clone()).unwrap();
    set_item(&hash, &int(0), Value::array(vec![hash.clone()])).unwrap();
    assert_eq!(hash.to_string(), "{\"me\": {...}, 0: [{...}]}");
    assert_eq!(hash, hash.clone());
  }

  #[test]
  fn repeated_containers_are_not_cycles() {
    let inner = Value::array(vec![int(7)]);
    let outer = Value::array(vec![inner.clone(), inner.clone()]);
    assert_eq!(outer.to_string(), "[[7], [7]]");
    assert_ne!(outer, Value::array(vec![inner.clone(), Value::array(vec![int(8)])]));
  }
}
