use std::rc::Rc;

use bimap::BiMap;
use string_cache::DefaultAtom;
use thiserror::Error;

use crate::object::{Builtin, BuiltinFunction};

/// `LoadBuiltin` addresses builtins with a single byte.
pub const MAX_BUILTINS: usize = 256;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RegistrationError {
  #[error("builtin {0} is already registered")]
  Duplicate(String),
  #[error("no room for builtin {0}: at most 256 builtins can be registered")]
  Full(String),
}

/**
  The table of host functions. A builtin table is a mapping between builtin names and the
  one byte index a compiler emits for them in `LoadBuiltin`, plus the functions themselves. The
  name half exists for compilers, which resolve names, and for diagnostics, which print them.
*/
pub struct Builtins {
  names     : BiMap<DefaultAtom, u8>,
  functions : Vec<Rc<Builtin>>,
}

impl Builtins {

  pub fn new() -> Builtins {
    Builtins {
      names     : BiMap::new(),
      functions : vec![],
    }
  }

  /// Registers `function` under `name`, returning its index. Indices are handed out in order.
  pub fn register(&mut self, name: &str, function: BuiltinFunction)
    -> Result<u8, RegistrationError>
  {
    if self.functions.len() == MAX_BUILTINS {
      return Err(RegistrationError::Full(name.to_string()));
    }

    let index = self.functions.len() as u8;
    let name  = DefaultAtom::from(name);
    self.names
        .insert_no_overwrite(name.clone(), index)
        .map_err(|_| RegistrationError::Duplicate(name.to_string()))?;
    self.functions.push(Rc::new(Builtin { name, function }));

    Ok(index)
  }

  pub fn get(&self, index: usize) -> Option<Rc<Builtin>> {
    self.functions.get(index).cloned()
  }

  pub fn index_of(&self, name: &str) -> Option<u8> {
    self.names.get_by_left(&DefaultAtom::from(name)).copied()
  }

  pub fn name_of(&self, index: u8) -> Option<&str> {
    self.names.get_by_right(&index).map(|name| &**name)
  }

  pub fn len(&self) -> usize {
    self.functions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.functions.is_empty()
  }
}

impl Default for Builtins {
  fn default() -> Builtins {
    Builtins::new()
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Fault;
  use crate::object::Value;

  fn first(arguments: &[Value]) -> Result<Value, Fault> {
    Ok(arguments.first().cloned().unwrap_or(Value::Null))
  }

  #[test]
  fn indices_are_assigned_in_order() {
    let mut builtins = Builtins::new();
    assert_eq!(builtins.register("first", first), Ok(0));
    assert_eq!(builtins.register("second", first), Ok(1));

    assert_eq!(builtins.index_of("second"), Some(1));
    assert_eq!(builtins.name_of(0), Some("first"));
    assert_eq!(builtins.get(1).unwrap().name, DefaultAtom::from("second"));
    assert!(builtins.get(2).is_none());
  }

  #[test]
  fn names_are_unique() {
    let mut builtins = Builtins::new();
    builtins.register("first", first).unwrap();
    assert_eq!(
      builtins.register("first", first),
      Err(RegistrationError::Duplicate("first".to_string()))
    );
    assert_eq!(builtins.len(), 1);
  }

  #[test]
  fn the_table_is_bounded() {
    let mut builtins = Builtins::new();
    for i in 0..MAX_BUILTINS {
      assert_eq!(builtins.register(&format!("b{}", i), first), Ok(i as u8));
    }
    assert_eq!(
      builtins.register("one_too_many", first),
      Err(RegistrationError::Full("one_too_many".to_string()))
    );
  }
}
