//! Quill: a small embeddable scripting language.
//!
//! The pipeline is source text -> [`Lexer`] -> [`parse_source`] -> AST ->
//! [`Interpreter::compile`] -> [`Code`] -> [`Vm`]. Most hosts only need
//! [`Interpreter`]:
//!
//! ```
//! use quill::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! let result = interp.run_source("fn double(x): x * 2 end\ndouble(21)", "demo.ql").unwrap();
//! assert_eq!(result.to_string(), "42");
//! ```
//!
//! The surface language has numbers, booleans, strings, arrays,
//! first-class functions, classes with member functions, iterators and
//! `for` loops, and native modules loaded from host dynamic libraries.
#![expect(clippy::cast_possible_truncation, reason = "operand narrowing is checked by the compiler")]
#![expect(clippy::cast_sign_loss, reason = "index operands are validated before casting")]
#![expect(clippy::cast_possible_wrap, reason = "jump deltas round-trip through u64 on purpose")]

mod ast;
mod builtins;
mod bytecode;
mod error;
mod heap;
mod io;
mod lexer;
mod object;
mod parser;
mod run;
mod token;
mod tracer;
mod types;
mod value;

pub use crate::{
    ast::Ast,
    bytecode::{Code, Const, Frame, Instr, Opcode, Vm},
    error::{Error, RunError, RunResult, Stage},
    heap::{Heap, HeapId, HeapStats},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    lexer::Lexer,
    object::Object,
    run::{Interpreter, parse_source},
    token::{Pos, Token, TokenKind},
    tracer::{NoopTracer, StderrTracer, VmTracer, disassemble},
    types::ModuleFn,
    value::{Kind, Value},
};
