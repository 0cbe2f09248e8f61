use std::path::PathBuf;
use std::process;

use clap::Parser;

use mvm::bytecode::{assemble, Bytecode};
use mvm::{Value, Vm};

/// Assembles a program and runs it on the virtual machine.
#[derive(Parser, Debug)]
#[command(name = "mvm", version, about)]
struct Arguments {
  /// Assembly source to run.
  file        : PathBuf,

  /// Print the listing of the main program and of every function constant before running.
  #[arg(long)]
  disassemble : bool,

  /// Print the machine state after the run.
  #[arg(long)]
  state       : bool,
}

fn print_listing(bytecode: &Bytecode) {
  println!("main:\n{}", bytecode.instructions);
  for (index, constant) in bytecode.constants.iter().enumerate() {
    if let Value::Function(function) = constant {
      println!("constant {} ({}):\n{}", index, constant, function.instructions);
    }
  }
}

fn main() {
  let arguments = Arguments::parse();

  #[cfg(feature = "trace_computation")]
  println!("Computation Tracing ENABLED");

  let text = match std::fs::read_to_string(&arguments.file) {
    Ok(text) => text,
    Err(e)   => {
      eprintln!("Cannot read {}: {}", arguments.file.display(), e);
      process::exit(1);
    }
  };

  let bytecode = match assemble(&text) {
    Ok(bytecode) => bytecode,
    Err(e)       => {
      eprintln!("{}", e);
      process::exit(1);
    }
  };

  if arguments.disassemble {
    print_listing(&bytecode);
  }

  let mut machine = Vm::new(bytecode);
  let outcome     = machine.run();

  if arguments.state {
    println!("{}", machine);
  }

  if let Err(e) = outcome {
    eprintln!("{}", e);
    process::exit(1);
  }

  match machine.stack_top() {
    Some(value) => println!("{}", value),
    None        => println!("{}", machine.last_popped()),
  }
}
