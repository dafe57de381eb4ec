//! Rox: a bytecode compiler and virtual machine for the Lox scripting
//! language.
//!
//! Source text is scanned and compiled in a single pass to a compact
//! bytecode stream, which a stack-based VM executes. All heap data
//! (strings, functions, closures, classes, instances) is managed by a
//! precise mark-sweep garbage collector, and every string is interned so
//! equality checks are handle comparisons.
//!
//! # Quick start
//!
//! ```
//! use rox::Vm;
//!
//! let mut vm = Vm::new();
//! vm.interpret("print (1 + 2) * 3;").unwrap();
//! assert_eq!(vm.take_output(), vec!["9".to_string()]);
//! ```
//!
//! A `Vm` keeps its globals between calls, so an interactive prompt can
//! feed it one line at a time:
//!
//! ```
//! use rox::Vm;
//!
//! let mut vm = Vm::new();
//! vm.interpret("var greeting = \"hello\";").unwrap();
//! vm.interpret("print greeting + \" world\";").unwrap();
//! assert_eq!(vm.take_output(), vec!["hello world".to_string()]);
//! ```
//!
//! # Language
//!
//! The language is dynamically typed and class-based: `var`, `fun`,
//! `class` with methods and `this`, closures with true capture-by-
//! reference, `if`/`else`, `while`, `for`, short-circuit `and`/`or`, the
//! ternary `?:` and comma operators, and a `print` statement. Values are
//! nil, booleans, 64-bit floats, and heap objects. One native function is
//! installed by default: `clock()`.
//!
//! # Cargo features
//!
//! - `trace-execution`: dump the value stack and disassemble each
//!   instruction while running (stderr).
//! - `print-code`: disassemble every chunk as its compilation finishes.
//! - `gc-stress`: collect at every collection-eligible allocation; useful
//!   for shaking out missing GC roots.
//!
//! GC activity is reported through [`tracing`] at `debug`/`trace` level
//! regardless of features; install a subscriber with an environment filter
//! to see it.

mod builtins;
mod bytecode;
mod compiler;
mod debug;
mod error;
mod heap;
mod object;
mod scanner;
mod table;
mod value;
mod vm;

pub use error::{CompileErrors, Error, Result};
pub use object::ObjRef;
pub use value::Value;
pub use vm::Vm;
