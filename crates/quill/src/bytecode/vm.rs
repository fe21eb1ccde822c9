//! Stack virtual machine.
//!
//! Execution is one explicit fetch/decode/dispatch loop per call frame;
//! script calls recurse on the host stack, so each frame's locals and
//! operand stack are plain vectors owned by its `run_frame` activation.
//! A frame runs until its instruction pointer reaches the end (or `Halt`);
//! its top of stack becomes the caller's result, `Null` if the stack is
//! empty or the frame ended via `Return`.
//!
//! The VM owns the heap and its global storage and is reusable: errors
//! unwind every active frame, releasing their values, before `run_code`
//! returns. Global storage is reset at the start of the next run.

use std::rc::Rc;

use crate::{
    ast::BinaryOp,
    builtins::{self, Builtin},
    bytecode::{
        code::{Code, Const, Frame},
        op::{Instr, Opcode, decode_unary},
    },
    error::{RunError, RunResult},
    heap::{Heap, HeapData, HeapStats},
    io::PrintWriter,
    tracer::VmTracer,
    types::{Function, MethodCallee, ModuleFn, NativeModule, NativeMethod, iterator},
    value::{self, Value},
};

/// The virtual machine: heap, global variable storage, and the uploaded
/// constants of the last `run_code`.
#[derive(Debug, Default)]
pub struct Vm {
    heap: Heap,
    /// Mutable storage for top-level bindings, indexed by the compiler's
    /// global-name table. Distinct from the code globals, which are
    /// constants.
    globals: Vec<Value>,
    /// The current code object's globals, uploaded as heap values.
    code_globals: Vec<Value>,
}

/// Locals and operand stack of one call frame.
struct FrameState {
    locals: Vec<Value>,
    stack: Vec<Value>,
}

impl FrameState {
    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::internal("operand stack underflow"))
    }
}

impl Vm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of heap occupancy; see [`HeapStats`].
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Direct access to the heap, for hosts constructing argument values.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Executes a compiled program to completion.
    pub fn run_code(
        &mut self,
        code: &Code,
        print: &mut dyn PrintWriter,
        tracer: &mut dyn VmTracer,
    ) -> RunResult<Value> {
        self.reset_globals();
        self.upload_code_globals(code);
        self.run_frame(&code.code, "<main>", Vec::new(), print, tracer)
    }

    /// Drops the previous run's global bindings and reseeds the reserved
    /// builtins at the indices the compiler assigned them.
    fn reset_globals(&mut self) {
        for value in std::mem::take(&mut self.globals) {
            value.drop_with_heap(&mut self.heap);
        }
        for builtin in builtins::RESERVED {
            let id = self.heap.alloc(HeapData::Builtin(builtin));
            self.globals.push(Value::Ref(id));
        }
    }

    /// Replaces the uploaded code globals with this program's constants.
    fn upload_code_globals(&mut self, code: &Code) {
        for value in std::mem::take(&mut self.code_globals) {
            value.drop_with_heap(&mut self.heap);
        }
        for constant in &code.globals {
            let value = match constant {
                Const::Str(text) => self.heap.alloc_str(text.clone()),
                Const::Func(frame) => {
                    let function = Function::new(Rc::new(frame.clone()));
                    Value::Ref(self.heap.alloc(HeapData::Function(function)))
                }
            };
            self.code_globals.push(value);
        }
    }

    /// Runs one frame to completion, releasing its locals and stack before
    /// returning. Errors propagate after the frame is unwound, so the heap
    /// is consistent no matter how deep the failure happened.
    fn run_frame(
        &mut self,
        code: &[Instr],
        name: &str,
        locals: Vec<Value>,
        print: &mut dyn PrintWriter,
        tracer: &mut dyn VmTracer,
    ) -> RunResult<Value> {
        let mut state = FrameState {
            locals,
            stack: Vec::new(),
        };
        let result = self.exec(code, name, &mut state, print, tracer);
        for value in state.stack {
            value.drop_with_heap(&mut self.heap);
        }
        for value in state.locals {
            value.drop_with_heap(&mut self.heap);
        }
        result
    }

    fn exec(
        &mut self,
        code: &[Instr],
        name: &str,
        st: &mut FrameState,
        print: &mut dyn PrintWriter,
        tracer: &mut dyn VmTracer,
    ) -> RunResult<Value> {
        let end = code.len();
        let mut pc = 0usize;

        macro_rules! jump {
            ($delta:expr) => {{
                let target = pc as i64 + $delta;
                pc = usize::try_from(target)
                    .map_err(|_| RunError::internal("jump to a negative instruction slot"))?;
            }};
        }

        while pc < end {
            let instr = code[pc];
            tracer.on_instruction(name, pc, &instr);
            match instr.op {
                Opcode::Halt => break,
                Opcode::Noop => pc += 1,
                Opcode::Pop => {
                    let value = st.pop()?;
                    value.drop_with_heap(&mut self.heap);
                    pc += 1;
                }
                Opcode::Dup => {
                    let top = st
                        .stack
                        .last()
                        .ok_or_else(|| RunError::internal("Dup on an empty stack"))?
                        .raw_copy();
                    let copy = self.heap.clone_value(&top);
                    st.stack.push(copy);
                    pc += 1;
                }
                Opcode::PushReal => {
                    st.stack.push(Value::Number(instr.real()));
                    pc += 1;
                }
                Opcode::PushNull => {
                    st.stack.push(Value::Null);
                    pc += 1;
                }
                Opcode::PushGlobal => {
                    let raw = match self.code_globals.get(instr.index()) {
                        Some(value) => value.raw_copy(),
                        None => return Err(RunError::internal("PushGlobal index out of bounds")),
                    };
                    let value = self.heap.clone_value(&raw);
                    st.stack.push(value);
                    pc += 1;
                }
                Opcode::LoadGlobal => {
                    // a slot declared but not yet stored reads as Null
                    let raw = self.globals.get(instr.index()).map(Value::raw_copy);
                    let value = match raw {
                        Some(raw) => self.heap.clone_value(&raw),
                        None => Value::Null,
                    };
                    st.stack.push(value);
                    pc += 1;
                }
                Opcode::StoreGlobal => {
                    let value = st.pop()?;
                    let slot = instr.index();
                    if slot >= self.globals.len() {
                        self.globals.resize_with(slot + 1, || Value::Null);
                    }
                    let old = std::mem::replace(&mut self.globals[slot], value);
                    old.drop_with_heap(&mut self.heap);
                    pc += 1;
                }
                Opcode::Load => {
                    let raw = st.locals.get(instr.index()).map(Value::raw_copy);
                    let value = match raw {
                        Some(raw) => self.heap.clone_value(&raw),
                        None => Value::Null,
                    };
                    st.stack.push(value);
                    pc += 1;
                }
                Opcode::Store => {
                    let value = st.pop()?;
                    let slot = instr.index();
                    if slot >= st.locals.len() {
                        st.locals.resize_with(slot + 1, || Value::Null);
                    }
                    let old = std::mem::replace(&mut st.locals[slot], value);
                    old.drop_with_heap(&mut self.heap);
                    pc += 1;
                }
                Opcode::MakeArray => {
                    let count = instr.index();
                    if st.stack.len() < count {
                        return Err(RunError::internal("MakeArray with too few operands"));
                    }
                    let values = st.stack.split_off(st.stack.len() - count);
                    let array = self.heap.alloc_array(values);
                    st.stack.push(array);
                    pc += 1;
                }
                Opcode::PushEmptyClass => {
                    let raw = match self.code_globals.get(instr.index()) {
                        Some(value) => value.raw_copy(),
                        None => return Err(RunError::internal("PushEmptyClass index out of bounds")),
                    };
                    let Some(class_name) = self.heap.as_str(&raw).map(str::to_owned) else {
                        return Err(RunError::internal("PushEmptyClass expects a string constant"));
                    };
                    let id = self
                        .heap
                        .alloc(HeapData::Class(crate::types::ClassObject::new(class_name)));
                    st.stack.push(Value::Ref(id));
                    pc += 1;
                }
                Opcode::MakeMember => {
                    let value = st.pop()?;
                    let name_value = st.pop()?;
                    let target = st.pop()?;
                    let Some(member) = self.heap.as_str(&name_value).map(str::to_owned) else {
                        value.drop_with_heap(&mut self.heap);
                        name_value.drop_with_heap(&mut self.heap);
                        target.drop_with_heap(&mut self.heap);
                        return Err(RunError::internal("MakeMember expects a string member name"));
                    };
                    let result = value::member_set(&target, member, value, &mut self.heap);
                    name_value.drop_with_heap(&mut self.heap);
                    target.drop_with_heap(&mut self.heap);
                    result?;
                    pc += 1;
                }
                Opcode::Access => {
                    let target = st.pop()?;
                    let query = st.pop()?;
                    let result = value::index_get(&target, &query, &mut self.heap);
                    target.drop_with_heap(&mut self.heap);
                    query.drop_with_heap(&mut self.heap);
                    st.stack.push(result?);
                    pc += 1;
                }
                Opcode::AccessAssign => {
                    let target = st.pop()?;
                    let query = st.pop()?;
                    let value = st.pop()?;
                    let result = value::index_set(&target, &query, value, &mut self.heap);
                    target.drop_with_heap(&mut self.heap);
                    query.drop_with_heap(&mut self.heap);
                    result?;
                    pc += 1;
                }
                Opcode::AccessMember => {
                    let target = st.pop()?;
                    let name_value = st.pop()?;
                    let Some(member) = self.heap.as_str(&name_value).map(str::to_owned) else {
                        target.drop_with_heap(&mut self.heap);
                        name_value.drop_with_heap(&mut self.heap);
                        return Err(RunError::internal("AccessMember expects a string member name"));
                    };
                    let result = value::member_get(&target, &member, &mut self.heap);
                    target.drop_with_heap(&mut self.heap);
                    name_value.drop_with_heap(&mut self.heap);
                    st.stack.push(result?);
                    pc += 1;
                }
                Opcode::Jump => jump!(instr.delta()),
                Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
                    let condition = st.pop()?;
                    let truth = condition.truth(&self.heap);
                    condition.drop_with_heap(&mut self.heap);
                    let wanted = instr.op == Opcode::JumpIfTrue;
                    if truth? == wanted {
                        jump!(instr.delta());
                    } else {
                        pc += 1;
                    }
                }
                Opcode::Call => {
                    let argc = instr.index();
                    if st.stack.len() < argc + 1 {
                        return Err(RunError::internal("Call with too few operands"));
                    }
                    let args = st.stack.split_off(st.stack.len() - argc);
                    let callee = st.pop()?;
                    let result = self.call_value(&callee, args, print, tracer);
                    callee.drop_with_heap(&mut self.heap);
                    st.stack.push(result?);
                    pc += 1;
                }
                Opcode::Return => {
                    // empty return: discard the operand stack so the frame
                    // produces Null
                    return Ok(Value::Null);
                }
                Opcode::ReturnExpr => {
                    return st.pop();
                }
                Opcode::GetIter => {
                    let value = st.pop()?;
                    let iter = value::make_iter(value, &mut self.heap)?;
                    st.stack.push(iter);
                    pc += 1;
                }
                Opcode::ForLoop => {
                    let top = st
                        .stack
                        .last()
                        .ok_or_else(|| RunError::internal("ForLoop on an empty stack"))?
                        .raw_copy();
                    let Value::Ref(iter_id) = top else {
                        return Err(RunError::internal("ForLoop expects an iterator on top of the stack"));
                    };
                    let next = iterator::advance(&mut self.heap, iter_id)?;
                    if next == Value::Null {
                        let iter = st.pop()?;
                        iter.drop_with_heap(&mut self.heap);
                        jump!(instr.delta());
                    } else {
                        st.stack.push(next);
                        pc += 1;
                    }
                }
                Opcode::ImportDll => {
                    let path_value = st.pop()?;
                    let Some(path) = self.heap.as_str(&path_value).map(str::to_owned) else {
                        path_value.drop_with_heap(&mut self.heap);
                        return Err(RunError::internal("ImportDll expects a string path"));
                    };
                    path_value.drop_with_heap(&mut self.heap);
                    let module = NativeModule::load(&path)?;
                    let id = self.heap.alloc(HeapData::Module(module));
                    st.stack.push(Value::Ref(id));
                    pc += 1;
                }
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Eq
                | Opcode::NEq
                | Opcode::LT
                | Opcode::LET
                | Opcode::GT
                | Opcode::GET => {
                    // lhs was pushed first, so it sits beneath rhs
                    let rhs = st.pop()?;
                    let lhs = st.pop()?;
                    let result = value::binary_op(binary_op_of(instr.op), &lhs, &rhs, &mut self.heap);
                    lhs.drop_with_heap(&mut self.heap);
                    rhs.drop_with_heap(&mut self.heap);
                    st.stack.push(result?);
                    pc += 1;
                }
                Opcode::UnaryOp => {
                    let Some(op) = decode_unary(instr.operand) else {
                        return Err(RunError::internal("unknown unary operator operand"));
                    };
                    let operand = st.pop()?;
                    let result = value::unary_op(op, &operand, &self.heap);
                    operand.drop_with_heap(&mut self.heap);
                    st.stack.push(result?);
                    pc += 1;
                }
            }
        }

        // frame finished: its top of stack is the result
        Ok(st.stack.pop().unwrap_or(Value::Null))
    }

    /// Calls `callee` with `args`, taking ownership of the arguments.
    fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        print: &mut dyn PrintWriter,
        tracer: &mut dyn VmTracer,
    ) -> RunResult<Value> {
        let Value::Ref(id) = callee else {
            let kind = callee.kind_name(&self.heap);
            self.drop_all(args);
            return Err(RunError::NotCallable { kind });
        };

        // snapshot what the call needs so the heap borrow ends before any
        // frame runs
        enum Callee {
            Script(Rc<Frame>),
            Method(Rc<Frame>, Value),
            Native(NativeMethod, Value),
            Imported(ModuleFn),
            Builtin(Builtin),
        }
        let resolved = match self.heap.get(*id) {
            HeapData::Function(function) => Callee::Script(function.frame.clone()),
            HeapData::Method(method) => match &method.callee {
                MethodCallee::Frame(frame) => Callee::Method(frame.clone(), method.receiver.raw_copy()),
                MethodCallee::Native(native) => Callee::Native(*native, method.receiver.raw_copy()),
            },
            HeapData::Imported(imported) => Callee::Imported(imported.func),
            HeapData::Builtin(builtin) => Callee::Builtin(*builtin),
            _ => {
                let kind = callee.kind_name(&self.heap);
                self.drop_all(args);
                return Err(RunError::NotCallable { kind });
            }
        };

        match resolved {
            Callee::Script(frame) => {
                if args.len() != frame.arity {
                    let given = args.len();
                    self.drop_all(args);
                    return Err(RunError::Arity {
                        name: frame.name.clone(),
                        expected: frame.arity,
                        given,
                    });
                }
                tracer.on_call(&frame.name, frame.arity);
                let result = self.run_frame(&frame.code, &frame.name, args, print, tracer);
                tracer.on_return(&frame.name);
                result
            }
            Callee::Method(frame, receiver) => {
                // the bound receiver becomes argument 0 (local slot 0)
                if args.len() + 1 != frame.arity {
                    let given = args.len();
                    self.drop_all(args);
                    return Err(RunError::Arity {
                        name: frame.name.clone(),
                        expected: frame.arity.saturating_sub(1),
                        given,
                    });
                }
                let mut locals = Vec::with_capacity(args.len() + 1);
                locals.push(self.heap.clone_value(&receiver));
                locals.extend(args);
                tracer.on_call(&frame.name, frame.arity);
                let result = self.run_frame(&frame.code, &frame.name, locals, print, tracer);
                tracer.on_return(&frame.name);
                result
            }
            Callee::Native(native, receiver) => self.call_native(native, &receiver, args),
            Callee::Imported(func) => {
                // the argument slice is borrowed for the duration of the
                // call; return values come out of the allocator handle
                let result = func(&args, &mut self.heap);
                self.drop_all(args);
                result
            }
            Callee::Builtin(builtin) => builtins::call(builtin, args, &mut self.heap, print),
        }
    }

    /// Runtime-implemented member functions.
    fn call_native(&mut self, native: NativeMethod, receiver: &Value, args: Vec<Value>) -> RunResult<Value> {
        let Value::Ref(id) = receiver else {
            self.drop_all(args);
            return Err(RunError::internal("native method receiver is not a heap value"));
        };
        match native {
            NativeMethod::ArrayAppend => {
                let last = args.last().map(Value::raw_copy);
                {
                    let HeapData::Array(array) = self.heap.get_mut(*id) else {
                        self.drop_all(args);
                        return Err(RunError::internal("append receiver is not an array"));
                    };
                    array.values_mut().extend(args);
                }
                Ok(match last {
                    Some(value) => self.heap.clone_value(&value),
                    None => Value::Null,
                })
            }
            NativeMethod::ArraySize => {
                self.expect_no_args(native, args)?;
                let HeapData::Array(array) = self.heap.get(*id) else {
                    return Err(RunError::internal("size receiver is not an array"));
                };
                Ok(Value::Number(array.len() as f64))
            }
            NativeMethod::StrSize => {
                self.expect_no_args(native, args)?;
                let HeapData::Str(s) = self.heap.get(*id) else {
                    return Err(RunError::internal("size receiver is not a string"));
                };
                Ok(Value::Number(s.len() as f64))
            }
            NativeMethod::IterNext => {
                self.expect_no_args(native, args)?;
                iterator::advance(&mut self.heap, *id)
            }
        }
    }

    fn expect_no_args(&mut self, native: NativeMethod, args: Vec<Value>) -> RunResult<()> {
        if args.is_empty() {
            return Ok(());
        }
        let given = args.len();
        self.drop_all(args);
        Err(RunError::Arity {
            name: native.name().to_owned(),
            expected: 0,
            given,
        })
    }

    fn drop_all(&mut self, values: Vec<Value>) {
        for value in values {
            value.drop_with_heap(&mut self.heap);
        }
    }
}

fn binary_op_of(op: Opcode) -> BinaryOp {
    match op {
        Opcode::Add => BinaryOp::Add,
        Opcode::Sub => BinaryOp::Sub,
        Opcode::Mul => BinaryOp::Mul,
        Opcode::Div => BinaryOp::Div,
        Opcode::Eq => BinaryOp::Eq,
        Opcode::NEq => BinaryOp::NotEq,
        Opcode::LT => BinaryOp::Lt,
        Opcode::LET => BinaryOp::LtEq,
        Opcode::GT => BinaryOp::Gt,
        Opcode::GET => BinaryOp::GtEq,
        _ => unreachable!("opcode {op} is not a binary operator"),
    }
}
