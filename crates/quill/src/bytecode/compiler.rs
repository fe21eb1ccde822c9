//! Single-pass AST to bytecode compiler.
//!
//! One `FrameCompiler` exists per function frame (the top level is frame
//! zero). All frames share a `Context` holding the global-name table, the
//! string-interning table, and the growing globals vector of the `Code`
//! object under construction.
//!
//! Binding rules: at depth 0 a `var`/`fn`/`import`/`class` binding lives in
//! the VM's global storage (`StoreGlobal`); inside a function it gets a
//! dense local slot (`Store`). Identifier references resolve local-first,
//! then fall back to the global-name table; anything else is a compile
//! error. There are no closures over intermediate scopes.
//!
//! Forward jumps are emitted with a placeholder operand and back-patched
//! once the target slot is known; deltas are relative to the slot of the
//! jump instruction itself.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::{Ast, BinaryOp, Block, Escape, EscapeSet, Expr, ExprKind, FnDecl, Stmt, StmtKind},
    builtins,
    bytecode::{
        code::{Code, Const, Frame},
        op::{Instr, Opcode, encode_unary},
    },
    error::{CompileError, CompileErrorKind},
    types::module::module_stem,
};

/// Compiles a parsed program into a `Code` object.
pub(crate) fn compile(ast: &Ast) -> Result<Code, CompileError> {
    let mut ctx = Context::new();
    let code = {
        let mut top = FrameCompiler::new(&mut ctx, 0);
        let last = ast.body.len().checked_sub(1);
        for (index, stmt) in ast.body.iter().enumerate() {
            top.compile_stmt(stmt, Some(index) == last)?;
        }
        top.emit(Instr::new(Opcode::Halt));
        top.code
    };
    Ok(Code {
        code,
        globals: ctx.globals,
    })
}

/// Compile-time state shared by all frames: the two name tables and the
/// globals vector being built. Neither table exists at run time.
struct Context {
    /// Top-level variable name to VM global-storage index.
    global_names: IndexMap<String, usize>,
    /// String literal to code-globals index, for deduplication.
    global_strings: AHashMap<String, usize>,
    globals: Vec<Const>,
}

impl Context {
    fn new() -> Self {
        // reserved builtins occupy the first global-storage slots; the VM
        // seeds its storage in the same order
        let mut global_names = IndexMap::new();
        for builtin in builtins::RESERVED {
            global_names.insert(builtin.name().to_owned(), global_names.len());
        }
        Self {
            global_names,
            global_strings: AHashMap::new(),
            globals: Vec::new(),
        }
    }

    /// Interns a string literal, returning its code-globals index.
    fn intern_str(&mut self, text: &str) -> usize {
        if let Some(&index) = self.global_strings.get(text) {
            return index;
        }
        let index = self.globals.len();
        self.globals.push(Const::Str(text.to_owned()));
        self.global_strings.insert(text.to_owned(), index);
        index
    }

    /// Stores a compiled frame, returning its code-globals index.
    fn add_frame(&mut self, frame: Frame) -> usize {
        let index = self.globals.len();
        self.globals.push(Const::Func(frame));
        index
    }

    /// Registers a new top-level name, or `None` if already taken.
    fn declare_global(&mut self, name: &str) -> Option<usize> {
        if self.global_names.contains_key(name) {
            return None;
        }
        let index = self.global_names.len();
        self.global_names.insert(name.to_owned(), index);
        Some(index)
    }
}

/// Per-loop compile state: where `continue` jumps back to, the `break`
/// jumps waiting for their target, and the body's escape whitelist.
struct LoopCtx {
    is_for: bool,
    continue_target: usize,
    breaks: Vec<usize>,
    escapes: EscapeSet,
}

enum Resolved {
    Local(usize),
    Global(usize),
}

struct FrameCompiler<'ctx> {
    ctx: &'ctx mut Context,
    code: Vec<Instr>,
    /// Local name to dense slot index for this frame.
    locals: IndexMap<String, usize>,
    /// 0 at top level; each function body compiles one deeper.
    depth: usize,
    loops: Vec<LoopCtx>,
}

impl<'ctx> FrameCompiler<'ctx> {
    fn new(ctx: &'ctx mut Context, depth: usize) -> Self {
        Self {
            ctx,
            code: Vec::new(),
            locals: IndexMap::new(),
            depth,
            loops: Vec::new(),
        }
    }

    fn emit(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    /// Back-patches the jump at `at` to land on the current slot.
    fn patch_to_here(&mut self, at: usize) {
        self.code[at].operand = (self.here() as i64 - at as i64) as u64;
    }

    fn resolve(&self, name: &str) -> Option<Resolved> {
        if let Some(&slot) = self.locals.get(name) {
            return Some(Resolved::Local(slot));
        }
        self.ctx.global_names.get(name).map(|&index| Resolved::Global(index))
    }

    fn declare_local(&mut self, name: &str, line: u32) -> Result<usize, CompileError> {
        if self.locals.contains_key(name) {
            return Err(CompileError::new(
                CompileErrorKind::RedeclaredVariable(name.to_owned()),
                line,
            ));
        }
        let slot = self.locals.len();
        self.locals.insert(name.to_owned(), slot);
        Ok(slot)
    }

    /// Declares `name` in the scope this frame binds into and emits the
    /// matching store, consuming the value on top of the stack.
    fn bind_new(&mut self, name: &str, line: u32) -> Result<(), CompileError> {
        if self.depth == 0 {
            let Some(index) = self.ctx.declare_global(name) else {
                return Err(CompileError::new(
                    CompileErrorKind::RedeclaredVariable(name.to_owned()),
                    line,
                ));
            };
            self.emit(Instr::with_index(Opcode::StoreGlobal, index));
        } else {
            let slot = self.declare_local(name, line)?;
            self.emit(Instr::with_index(Opcode::Store, slot));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    /// Compiles one statement. `tail` marks the final statement of the
    /// program or of a function body: a tail expression keeps its value on
    /// the stack as the implicit result, every other expression statement
    /// pops it so loop bodies stay stack-neutral.
    fn compile_stmt(&mut self, stmt: &Stmt, tail: bool) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::VarDecl { name, value } => {
                self.compile_expr(value)?;
                self.bind_new(name, stmt.line)?;
            }
            StmtKind::Expr(expr) => match &expr.kind {
                ExprKind::Assign { target, value } => {
                    self.compile_assign(target, value)?;
                }
                ExprKind::FnDecl(decl) if decl.name.is_some() => {
                    self.compile_fn_statement(decl, expr.line)?;
                }
                _ => {
                    self.compile_expr(expr)?;
                    if !tail {
                        self.emit(Instr::new(Opcode::Pop));
                    }
                }
            },
            StmtKind::If {
                test,
                consequent,
                alternative,
            } => {
                self.compile_expr(test)?;
                let exit = self.emit(Instr::new(Opcode::JumpIfFalse));
                self.compile_block(consequent, tail)?;
                match alternative {
                    Some(alternative) => {
                        let done = self.emit(Instr::new(Opcode::Jump));
                        self.patch_to_here(exit);
                        self.compile_stmt(alternative, tail)?;
                        self.patch_to_here(done);
                    }
                    None => self.patch_to_here(exit),
                }
            }
            StmtKind::Block(block) => self.compile_block(block, tail)?,
            StmtKind::While { test, body } => {
                let cond = self.here();
                self.compile_expr(test)?;
                let exit = self.emit(Instr::new(Opcode::JumpIfFalse));

                self.loops.push(LoopCtx {
                    is_for: false,
                    continue_target: cond,
                    breaks: Vec::new(),
                    escapes: body.escapes,
                });
                self.compile_block(body, false)?;
                let finished = self.loops.pop().expect("loop context pushed above");

                let back = self.here();
                self.emit(Instr::with_delta(Opcode::Jump, cond as i64 - back as i64));
                self.patch_to_here(exit);
                for jump in finished.breaks {
                    self.patch_to_here(jump);
                }
            }
            StmtKind::For { var, iterable, body } => {
                self.compile_expr(iterable)?;
                self.emit(Instr::new(Opcode::GetIter));
                let head = self.emit(Instr::new(Opcode::ForLoop));
                // the loop variable reuses an existing slot on re-runs
                let slot = match self.locals.get(var) {
                    Some(&slot) => slot,
                    None => {
                        let slot = self.locals.len();
                        self.locals.insert(var.clone(), slot);
                        slot
                    }
                };
                self.emit(Instr::with_index(Opcode::Store, slot));

                self.loops.push(LoopCtx {
                    is_for: true,
                    continue_target: head,
                    breaks: Vec::new(),
                    escapes: body.escapes,
                });
                self.compile_block(body, false)?;
                let finished = self.loops.pop().expect("loop context pushed above");

                let back = self.here();
                self.emit(Instr::with_delta(Opcode::Jump, head as i64 - back as i64));
                self.patch_to_here(head);
                for jump in finished.breaks {
                    self.patch_to_here(jump);
                }
            }
            StmtKind::Break => {
                let Some(current) = self.loops.last() else {
                    return Err(CompileError::new(
                        CompileErrorKind::EscapeOutsideLoop {
                            keyword: Escape::Break.keyword(),
                        },
                        stmt.line,
                    ));
                };
                if !current.escapes.contains(Escape::Break) {
                    return Err(CompileError::new(
                        CompileErrorKind::EscapeOutsideLoop {
                            keyword: Escape::Break.keyword(),
                        },
                        stmt.line,
                    ));
                }
                // a for-loop still has its iterator on the stack
                if current.is_for {
                    self.emit(Instr::new(Opcode::Pop));
                }
                let jump = self.emit(Instr::new(Opcode::Jump));
                self.loops.last_mut().expect("checked above").breaks.push(jump);
            }
            StmtKind::Continue => {
                let Some(current) = self.loops.last() else {
                    return Err(CompileError::new(
                        CompileErrorKind::EscapeOutsideLoop {
                            keyword: Escape::Continue.keyword(),
                        },
                        stmt.line,
                    ));
                };
                if !current.escapes.contains(Escape::Continue) {
                    return Err(CompileError::new(
                        CompileErrorKind::EscapeOutsideLoop {
                            keyword: Escape::Continue.keyword(),
                        },
                        stmt.line,
                    ));
                }
                let target = current.continue_target;
                let at = self.here();
                self.emit(Instr::with_delta(Opcode::Jump, target as i64 - at as i64));
            }
            StmtKind::Return(value) => {
                if self.depth == 0 {
                    return Err(CompileError::new(CompileErrorKind::ReturnOutsideFunction, stmt.line));
                }
                match value {
                    Some(expr) => {
                        self.compile_expr(expr)?;
                        self.emit(Instr::new(Opcode::ReturnExpr));
                    }
                    None => {
                        self.emit(Instr::new(Opcode::Return));
                    }
                }
            }
            StmtKind::Import { path, alias } => {
                let index = self.ctx.intern_str(path);
                self.emit(Instr::with_index(Opcode::PushGlobal, index));
                self.emit(Instr::new(Opcode::ImportDll));
                let binding = alias.clone().unwrap_or_else(|| module_stem(path));
                self.bind_new(&binding, stmt.line)?;
            }
            StmtKind::ClassDecl { name, members } => {
                let name_index = self.ctx.intern_str(name);
                self.emit(Instr::with_index(Opcode::PushEmptyClass, name_index));
                for member in members {
                    self.emit(Instr::new(Opcode::Dup));
                    let member_index = self.ctx.intern_str(&member.name);
                    self.emit(Instr::with_index(Opcode::PushGlobal, member_index));
                    match &member.value.kind {
                        // member functions compile straight to a frame
                        // constant; MakeMember binds them to the class
                        ExprKind::FnDecl(decl) => {
                            let frame_index = self.compile_function(decl, member.line)?;
                            self.emit(Instr::with_index(Opcode::PushGlobal, frame_index));
                        }
                        _ => self.compile_expr(&member.value)?,
                    }
                    self.emit(Instr::new(Opcode::MakeMember));
                }
                self.bind_new(name, stmt.line)?;
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block, tail: bool) -> Result<(), CompileError> {
        let last = block.body.len().checked_sub(1);
        for (index, stmt) in block.body.iter().enumerate() {
            self.compile_stmt(stmt, tail && Some(index) == last)?;
        }
        Ok(())
    }

    /// `fn name(...)` in statement position: the name is registered before
    /// the body compiles so the function can call itself.
    fn compile_fn_statement(&mut self, decl: &FnDecl, line: u32) -> Result<(), CompileError> {
        let name = decl.name.as_deref().expect("caller checked the name");
        if self.depth == 0 {
            let Some(global) = self.ctx.declare_global(name) else {
                return Err(CompileError::new(
                    CompileErrorKind::RedeclaredVariable(name.to_owned()),
                    line,
                ));
            };
            let frame_index = self.compile_function(decl, line)?;
            self.emit(Instr::with_index(Opcode::PushGlobal, frame_index));
            self.emit(Instr::with_index(Opcode::StoreGlobal, global));
        } else {
            let slot = self.declare_local(name, line)?;
            let frame_index = self.compile_function(decl, line)?;
            self.emit(Instr::with_index(Opcode::PushGlobal, frame_index));
            self.emit(Instr::with_index(Opcode::Store, slot));
        }
        Ok(())
    }

    /// Compiles a function body in a fresh inner frame compiler and stores
    /// the frame as a code-globals constant, returning its index.
    fn compile_function(&mut self, decl: &FnDecl, line: u32) -> Result<usize, CompileError> {
        let mut inner = FrameCompiler::new(&mut *self.ctx, self.depth + 1);
        for param in &decl.params {
            inner.declare_local(param, line)?;
        }
        inner.compile_block(&decl.body, true)?;
        inner.emit(Instr::new(Opcode::Halt));

        let frame = Frame {
            code: inner.code,
            name: decl.name.clone().unwrap_or_else(|| "lambda".to_owned()),
            arity: decl.params.len(),
        };
        Ok(self.ctx.add_frame(frame))
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Number(value) => {
                self.emit(Instr::with_real(Opcode::PushReal, *value));
            }
            ExprKind::Str(text) => {
                let index = self.ctx.intern_str(text);
                self.emit(Instr::with_index(Opcode::PushGlobal, index));
            }
            // boolean literals ride on the truth-negating unary operator,
            // which keeps the opcode set closed: !0 is True, !1 is False
            ExprKind::Bool(value) => {
                self.emit(Instr::with_real(Opcode::PushReal, if *value { 0.0 } else { 1.0 }));
                self.emit(Instr {
                    op: Opcode::UnaryOp,
                    operand: encode_unary(crate::ast::UnaryOp::Not),
                });
            }
            ExprKind::Null => {
                self.emit(Instr::new(Opcode::PushNull));
            }
            ExprKind::Identifier(name) => match self.resolve(name) {
                Some(Resolved::Local(slot)) => {
                    self.emit(Instr::with_index(Opcode::Load, slot));
                }
                Some(Resolved::Global(index)) => {
                    self.emit(Instr::with_index(Opcode::LoadGlobal, index));
                }
                None => {
                    return Err(CompileError::new(
                        CompileErrorKind::UnresolvedIdentifier(name.clone()),
                        expr.line,
                    ));
                }
            },
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.emit(Instr {
                    op: Opcode::UnaryOp,
                    operand: encode_unary(*op),
                });
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                self.emit(Instr::new(binary_opcode(*op)));
            }
            ExprKind::Index { target, index } => {
                self.compile_expr(index)?;
                self.compile_expr(target)?;
                self.emit(Instr::new(Opcode::Access));
            }
            ExprKind::Member { target, name } => {
                let index = self.ctx.intern_str(name);
                self.emit(Instr::with_index(Opcode::PushGlobal, index));
                self.compile_expr(target)?;
                self.emit(Instr::new(Opcode::AccessMember));
            }
            ExprKind::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(Instr::with_index(Opcode::MakeArray, items.len()));
            }
            ExprKind::Call { target, args } => {
                self.compile_expr(target)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(Instr::with_index(Opcode::Call, args.len()));
            }
            ExprKind::FnDecl(decl) => {
                if let Some(name) = &decl.name {
                    return Err(CompileError::new(
                        CompileErrorKind::NamedFunctionExpression(name.clone()),
                        expr.line,
                    ));
                }
                let frame_index = self.compile_function(decl, expr.line)?;
                self.emit(Instr::with_index(Opcode::PushGlobal, frame_index));
            }
            ExprKind::Assign { .. } => {
                return Err(CompileError::new(CompileErrorKind::AssignmentAsValue, expr.line));
            }
        }
        Ok(())
    }

    /// Assignments leave nothing on the stack.
    fn compile_assign(&mut self, target: &Expr, value: &Expr) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Identifier(name) => match self.resolve(name) {
                Some(Resolved::Local(slot)) => {
                    self.compile_expr(value)?;
                    self.emit(Instr::with_index(Opcode::Store, slot));
                }
                Some(Resolved::Global(index)) => {
                    self.compile_expr(value)?;
                    self.emit(Instr::with_index(Opcode::StoreGlobal, index));
                }
                None => {
                    return Err(CompileError::new(
                        CompileErrorKind::UnresolvedIdentifier(name.clone()),
                        target.line,
                    ));
                }
            },
            ExprKind::Index { target: seq, index } => {
                self.compile_expr(value)?;
                self.compile_expr(index)?;
                self.compile_expr(seq)?;
                self.emit(Instr::new(Opcode::AccessAssign));
            }
            ExprKind::Member { target: object, name } => {
                self.compile_expr(object)?;
                let index = self.ctx.intern_str(name);
                self.emit(Instr::with_index(Opcode::PushGlobal, index));
                self.compile_expr(value)?;
                self.emit(Instr::new(Opcode::MakeMember));
            }
            _ => unreachable!("the parser only produces lvalue assignment targets"),
        }
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::NotEq => Opcode::NEq,
        BinaryOp::Lt => Opcode::LT,
        BinaryOp::LtEq => Opcode::LET,
        BinaryOp::Gt => Opcode::GT,
        BinaryOp::GtEq => Opcode::GET,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse;

    fn compile_source(source: &str) -> Code {
        compile(&parse(source).unwrap()).unwrap()
    }

    fn compile_err(source: &str) -> CompileError {
        compile(&parse(source).unwrap()).unwrap_err()
    }

    /// Every jump's `slot + delta` must land inside the instruction vector.
    fn assert_jumps_in_range(code: &[Instr]) {
        for (slot, instr) in code.iter().enumerate() {
            if matches!(
                instr.op,
                Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse | Opcode::ForLoop
            ) {
                let target = slot as i64 + instr.delta();
                assert!(
                    target >= 0 && target <= code.len() as i64,
                    "jump at {slot} lands at {target} outside 0..={}",
                    code.len()
                );
            }
        }
    }

    #[test]
    fn test_jump_targets_in_range() {
        let code = compile_source(
            "var x = 0\nwhile x < 5:\n if x == 2: x = x + 2 else: x = x + 1 end\nend\nfor i in x: continue end\nx",
        );
        assert_jumps_in_range(&code.code);
        for constant in &code.globals {
            if let Const::Func(frame) = constant {
                assert_jumps_in_range(&frame.code);
            }
        }
    }

    #[test]
    fn test_if_without_else_jump() {
        let code = compile_source("if 1: 2 end");
        // PushReal, JumpIfFalse, PushReal, Pop?, Halt — the tail if keeps
        // the branch value, so: PushReal 1, JumpIfFalse -> Halt, PushReal 2, Halt
        assert_eq!(code.code[1].op, Opcode::JumpIfFalse);
        assert_eq!(1 + code.code[1].delta(), 3);
        assert_eq!(code.code[3].op, Opcode::Halt);
    }

    #[test]
    fn test_while_shape() {
        let code = compile_source("var i = 0\nwhile i < 3: i = i + 1 end\ni");
        let instrs = &code.code;
        // find the backward jump and check it targets the condition start
        let (back_slot, back) = instrs
            .iter()
            .enumerate()
            .find(|(_, i)| i.op == Opcode::Jump && i.delta() < 0)
            .expect("while loop emits a backward jump");
        let cond = back_slot as i64 + back.delta();
        // the condition test re-loads `i` via LoadGlobal
        assert_eq!(instrs[cond as usize].op, Opcode::LoadGlobal);
        // the exit jump lands just past the backward jump
        let (exit_slot, exit) = instrs
            .iter()
            .enumerate()
            .find(|(_, i)| i.op == Opcode::JumpIfFalse)
            .expect("while loop emits an exit jump");
        assert_eq!(exit_slot as i64 + exit.delta(), back_slot as i64 + 1);
    }

    #[test]
    fn test_break_patches_past_loop() {
        let code = compile_source("var x = 0\nwhile 1: break end\nx");
        let instrs = &code.code;
        let (back_slot, _) = instrs
            .iter()
            .enumerate()
            .find(|(_, i)| i.op == Opcode::Jump && i.delta() < 0)
            .expect("backward jump");
        let (break_slot, break_jump) = instrs
            .iter()
            .enumerate()
            .find(|(_, i)| i.op == Opcode::Jump && i.delta() > 0)
            .expect("break jump");
        assert_eq!(break_slot as i64 + break_jump.delta(), back_slot as i64 + 1);
    }

    #[test]
    fn test_for_loop_shape() {
        let code = compile_source("for i in [1, 2]: i end");
        let instrs = &code.code;
        let (head, for_loop) = instrs
            .iter()
            .enumerate()
            .find(|(_, i)| i.op == Opcode::ForLoop)
            .expect("ForLoop emitted");
        // ForLoop is followed by the loop-variable store
        assert_eq!(instrs[head + 1].op, Opcode::Store);
        // exhaustion jumps past the backward jump
        let (back_slot, back) = instrs
            .iter()
            .enumerate()
            .find(|(_, i)| i.op == Opcode::Jump && i.delta() < 0)
            .expect("backward jump");
        assert_eq!(back_slot as i64 + back.delta(), head as i64);
        assert_eq!(head as i64 + for_loop.delta(), back_slot as i64 + 1);
    }

    #[test]
    fn test_break_in_for_pops_iterator() {
        let code = compile_source("for i in [1]: break end");
        let instrs = &code.code;
        let head = instrs.iter().position(|i| i.op == Opcode::ForLoop).unwrap();
        // break compiles to Pop then Jump
        let pop = instrs[head..].iter().position(|i| i.op == Opcode::Pop).unwrap() + head;
        assert_eq!(instrs[pop + 1].op, Opcode::Jump);
    }

    #[test]
    fn test_string_interning_dedupes() {
        let code = compile_source("var a = \"x\"\nvar b = \"x\"\nvar c = \"y\"\nc");
        let strings: Vec<_> = code
            .globals
            .iter()
            .filter(|c| matches!(c, Const::Str(_)))
            .collect();
        assert_eq!(strings.len(), 2);
    }

    #[test]
    fn test_local_indices_dense() {
        let code = compile_source("fn f(a, b):\n var c = a + b\n c\nend\nf");
        let frame = code
            .globals
            .iter()
            .find_map(|c| match c {
                Const::Func(frame) => Some(frame),
                Const::Str(_) => None,
            })
            .expect("one frame compiled");
        assert_eq!(frame.arity, 2);
        // 3 locals: a, b, c; every Load/Store index lies in [0, 3)
        for instr in &frame.code {
            if matches!(instr.op, Opcode::Load | Opcode::Store) {
                assert!(instr.index() < 3, "local index {} out of range", instr.index());
            }
        }
    }

    #[test]
    fn test_top_level_bindings_are_global() {
        let code = compile_source("var a = 1\na = 2\na");
        assert!(code.code.iter().any(|i| i.op == Opcode::StoreGlobal));
        assert!(!code.code.iter().any(|i| i.op == Opcode::Store));
    }

    #[test]
    fn test_non_tail_expression_pops() {
        let code = compile_source("1\n2");
        let pops = code.code.iter().filter(|i| i.op == Opcode::Pop).count();
        assert_eq!(pops, 1);
        // the tail expression's value survives to Halt
        assert_eq!(code.code.last().unwrap().op, Opcode::Halt);
    }

    #[test]
    fn test_empty_source_compiles_to_halt() {
        let code = compile_source("");
        assert_eq!(code.code, vec![Instr::new(Opcode::Halt)]);
        assert!(code.globals.is_empty());
    }

    #[test]
    fn test_escape_errors() {
        assert!(matches!(
            compile_err("break").kind,
            CompileErrorKind::EscapeOutsideLoop { keyword: "break" }
        ));
        assert!(matches!(
            compile_err("continue").kind,
            CompileErrorKind::EscapeOutsideLoop { keyword: "continue" }
        ));
        assert!(matches!(
            compile_err("return 1").kind,
            CompileErrorKind::ReturnOutsideFunction
        ));
        // if-bodies accept nothing on their own
        assert!(matches!(
            compile_err("if 1: break end").kind,
            CompileErrorKind::EscapeOutsideLoop { keyword: "break" }
        ));
    }

    #[test]
    fn test_redeclaration_errors() {
        assert!(matches!(
            compile_err("var a = 1\nvar a = 2").kind,
            CompileErrorKind::RedeclaredVariable(_)
        ));
        assert!(matches!(
            compile_err("fn f(x, x): x end").kind,
            CompileErrorKind::RedeclaredVariable(_)
        ));
        // reserved names are already bound
        assert!(matches!(
            compile_err("var print = 1").kind,
            CompileErrorKind::RedeclaredVariable(_)
        ));
    }

    #[test]
    fn test_unresolved_identifier() {
        let err = compile_err("missing");
        assert!(matches!(err.kind, CompileErrorKind::UnresolvedIdentifier(ref n) if n == "missing"));
        assert_eq!(err.line, 1);

        // inner functions cannot see enclosing locals (no closures)
        let err = compile_err("fn outer():\n var x = 1\n fn inner(): x end\n inner()\nend\nouter()");
        assert!(matches!(err.kind, CompileErrorKind::UnresolvedIdentifier(ref n) if n == "x"));
    }

    #[test]
    fn test_assignment_as_operand_rejected() {
        assert!(matches!(
            compile_err("var a = 1\nvar b = (a = 2)").kind,
            CompileErrorKind::AssignmentAsValue
        ));
    }

    #[test]
    fn test_recursive_function_resolves_itself() {
        // fibo refers to itself; the global name is registered before the
        // body compiles
        let code = compile_source("fn fibo(n): if n > 1: return fibo(n - 1) end\n return n end\nfibo(7)");
        let frame = code
            .globals
            .iter()
            .find_map(|c| match c {
                Const::Func(frame) => Some(frame),
                Const::Str(_) => None,
            })
            .unwrap();
        assert!(frame.code.iter().any(|i| i.op == Opcode::LoadGlobal));
    }

    #[test]
    fn test_class_member_sequence() {
        let code = compile_source("class Point:\n var x = 1\nend");
        let ops: Vec<Opcode> = code.code.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::PushEmptyClass,
                Opcode::Dup,
                Opcode::PushGlobal,
                Opcode::PushReal,
                Opcode::MakeMember,
                Opcode::StoreGlobal,
                Opcode::Halt,
            ]
        );
    }
}
