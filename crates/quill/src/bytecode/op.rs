//! Opcode set and instruction encoding.
//!
//! Every instruction is an opcode plus one 64-bit operand; how the operand
//! is read (unsigned index, signed jump delta, or raw float bits) is a
//! function of the opcode. Jump deltas are relative to the slot of the jump
//! instruction itself: `target = jump_slot + delta`.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::ast::UnaryOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Opcode {
    // stack
    Halt,
    Pop,
    Dup,
    Noop,

    // constants and storage
    /// Push a number literal; operand holds the raw f64 bits.
    PushReal,
    PushNull,
    /// Push a constant from the code globals (a string or function frame).
    PushGlobal,
    /// Load/store a top-level variable in the VM's global storage.
    LoadGlobal,
    StoreGlobal,
    /// Load/store a local slot of the current call frame.
    Load,
    Store,

    // composites
    /// Pop n values into a fresh array; the topmost becomes the last element.
    MakeArray,
    /// Push a new empty class; operand names its class-name string constant.
    PushEmptyClass,
    /// Pop value, member name, target; install the member on the target.
    MakeMember,

    // indexing and member access
    /// `a[b]`: pop target then query, push the element.
    Access,
    /// `a[b] = c`: pop target, query, value.
    AccessAssign,
    /// `a.name`: pop target then name string, push the member.
    AccessMember,

    // control flow
    Jump,
    JumpIfTrue,
    JumpIfFalse,

    // calls
    /// Pop argc arguments then the callable; push the result.
    Call,
    /// Unwind the frame producing Null.
    Return,
    /// Unwind the frame preserving the top of stack as the result.
    ReturnExpr,

    // iteration
    GetIter,
    /// Advance the iterator on top of the stack; push the produced value,
    /// or pop the iterator and jump by the operand delta when exhausted.
    ForLoop,

    // modules
    /// Pop a string path, push the loaded module.
    ImportDll,

    // arithmetic and comparison
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NEq,
    LT,
    LET,
    GT,
    GET,

    /// Apply a unary operator; operand encodes which one.
    UnaryOp,
}

/// One instruction: opcode plus 64-bit operand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub op: Opcode,
    pub operand: u64,
}

impl Instr {
    #[must_use]
    pub fn new(op: Opcode) -> Self {
        Self { op, operand: 0 }
    }

    #[must_use]
    pub fn with_index(op: Opcode, index: usize) -> Self {
        Self {
            op,
            operand: index as u64,
        }
    }

    #[must_use]
    pub fn with_delta(op: Opcode, delta: i64) -> Self {
        Self {
            op,
            operand: delta as u64,
        }
    }

    #[must_use]
    pub fn with_real(op: Opcode, value: f64) -> Self {
        Self {
            op,
            operand: value.to_bits(),
        }
    }

    /// Operand as an unsigned index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.operand as usize
    }

    /// Operand as a signed jump delta.
    #[must_use]
    pub fn delta(&self) -> i64 {
        self.operand as i64
    }

    /// Operand as a float literal.
    #[must_use]
    pub fn real(&self) -> f64 {
        f64::from_bits(self.operand)
    }
}

/// Encodes a unary operator into an instruction operand.
#[must_use]
pub(crate) fn encode_unary(op: UnaryOp) -> u64 {
    match op {
        UnaryOp::Plus => 0,
        UnaryOp::Minus => 1,
        UnaryOp::Not => 2,
    }
}

/// Decodes a unary operator operand.
#[must_use]
pub(crate) fn decode_unary(operand: u64) -> Option<UnaryOp> {
    match operand {
        0 => Some(UnaryOp::Plus),
        1 => Some(UnaryOp::Minus),
        2 => Some(UnaryOp::Not),
        _ => None,
    }
}
