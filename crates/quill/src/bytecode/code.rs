//! Compiled code objects.
//!
//! A [`Frame`] is the immutable bundle (instructions, name, arity) for one
//! function body. The top-level [`Code`] owns the program's instruction
//! vector plus the globals vector of constants: interned string literals
//! (one per distinct literal) and compiled function frames, nothing else.
//!
//! `Code` is plain data, so it serializes; hosts can cache compiled
//! programs with [`Code::dump`]/[`Code::load`]. The textual disassembly is
//! diagnostic only, not an interchange format.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::bytecode::op::{Instr, Opcode, decode_unary};

/// An immutable compiled function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub code: Vec<Instr>,
    pub name: String,
    pub arity: usize,
}

/// A constant in the code globals vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Str(String),
    Func(Frame),
}

impl Const {
    /// Short preview used by the disassembly.
    fn preview(&self) -> String {
        match self {
            Self::Str(s) => format!("{s:?}"),
            Self::Func(frame) => format!("Function {}", frame.name),
        }
    }
}

/// The top-level compiled program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub code: Vec<Instr>,
    pub globals: Vec<Const>,
}

impl Code {
    /// Serializes to a compact binary form for caching.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a program serialized with [`Code::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// Renders the whole program: the top-level instruction vector followed
    /// by every compiled function frame.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        disassemble_into(&mut out, &self.code, &self.globals);
        for (index, constant) in self.globals.iter().enumerate() {
            if let Const::Func(frame) = constant {
                let _ = writeln!(out, "\nfn {} (global {index}, arity {}):", frame.name, frame.arity);
                disassemble_into(&mut out, &frame.code, &self.globals);
            }
        }
        out
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble())
    }
}

/// Writes one `slot\topcode\toperand` line per instruction; jump operands
/// print as `delta -> absolute-target-slot`.
fn disassemble_into(out: &mut String, code: &[Instr], globals: &[Const]) {
    for (slot, instr) in code.iter().enumerate() {
        let _ = write!(out, "{slot}\t{}", instr.op);
        match instr.op {
            Opcode::Load
            | Opcode::Store
            | Opcode::LoadGlobal
            | Opcode::StoreGlobal
            | Opcode::MakeArray
            | Opcode::Call => {
                let _ = write!(out, " {}", instr.index());
            }
            Opcode::PushGlobal | Opcode::PushEmptyClass => {
                let preview = globals
                    .get(instr.index())
                    .map_or_else(|| "<invalid>".to_owned(), Const::preview);
                let _ = write!(out, " {} ({preview})", instr.index());
            }
            Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse | Opcode::ForLoop => {
                let delta = instr.delta();
                let target = slot as i64 + delta;
                let _ = write!(out, " {delta} -> {target}");
            }
            Opcode::PushReal => {
                let _ = write!(out, " {}", crate::value::format_number(instr.real()));
            }
            Opcode::UnaryOp => match decode_unary(instr.operand) {
                Some(op) => {
                    let _ = write!(out, " {op}");
                }
                None => {
                    let _ = write!(out, " <invalid>");
                }
            },
            _ => {}
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_code() -> Code {
        Code {
            code: vec![
                Instr::with_real(Opcode::PushReal, 2.0),
                Instr::with_delta(Opcode::JumpIfFalse, 3),
                Instr::with_index(Opcode::PushGlobal, 0),
                Instr::new(Opcode::Pop),
                Instr::new(Opcode::Halt),
            ],
            globals: vec![Const::Str("hi".to_owned())],
        }
    }

    #[test]
    fn test_disassembly_format() {
        let text = sample_code().disassemble();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0\tPushReal 2");
        assert_eq!(lines[1], "1\tJumpIfFalse 3 -> 4");
        assert_eq!(lines[2], "2\tPushGlobal 0 (\"hi\")");
        assert_eq!(lines[3], "3\tPop");
        assert_eq!(lines[4], "4\tHalt");
    }

    #[test]
    fn test_dump_load_round_trip() {
        let code = sample_code();
        let bytes = code.dump().unwrap();
        let restored = Code::load(&bytes).unwrap();
        assert_eq!(restored, code);
    }

    #[test]
    fn test_disassembly_includes_frames() {
        let code = Code {
            code: vec![Instr::new(Opcode::Halt)],
            globals: vec![Const::Func(Frame {
                code: vec![Instr::new(Opcode::Return)],
                name: "f".to_owned(),
                arity: 1,
            })],
        };
        let text = code.disassemble();
        assert!(text.contains("fn f (global 0, arity 1):"));
        assert!(text.contains("0\tReturn"));
    }
}
