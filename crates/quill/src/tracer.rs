//! Execution tracing hooks.
//!
//! The VM reports instruction dispatch and call boundaries through a
//! [`VmTracer`]; the default [`NoopTracer`] compiles down to nothing, and
//! [`StderrTracer`] logs every executed instruction for debugging.

use crate::bytecode::{Code, Instr};

/// Observer for VM execution events. All methods default to no-ops.
pub trait VmTracer {
    /// Called before each instruction is dispatched. `frame` is the name
    /// of the executing function (`<main>` at top level).
    fn on_instruction(&mut self, frame: &str, pc: usize, instr: &Instr) {
        let _ = (frame, pc, instr);
    }

    /// Called when a script function call pushes a frame.
    fn on_call(&mut self, name: &str, argc: usize) {
        let _ = (name, argc);
    }

    /// Called when a frame returns.
    fn on_return(&mut self, name: &str) {
        let _ = name;
    }
}

/// Tracer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that logs each executed instruction to stderr as
/// `frame\tpc\topcode operand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, frame: &str, pc: usize, instr: &Instr) {
        eprintln!("{frame}\t{pc}\t{} {}", instr.op, instr.operand);
    }

    fn on_call(&mut self, name: &str, argc: usize) {
        eprintln!("call {name}/{argc}");
    }

    fn on_return(&mut self, name: &str) {
        eprintln!("return from {name}");
    }
}

/// Disassembles a code object for diagnostics; re-exported convenience
/// over [`Code::disassemble`].
#[must_use]
pub fn disassemble(code: &Code) -> String {
    code.disassemble()
}
