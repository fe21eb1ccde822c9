//! Callable value families: compiled functions, bound methods, and
//! functions imported from native modules.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    bytecode::Frame,
    types::module::ModuleFn,
    value::Value,
};

/// A compiled script function: an immutable frame plus the function's
/// mutable static-variable table.
///
/// Static variables are created and read through dot access on the function
/// value itself:
///
/// ```text
/// fn counter(step):
///     counter.total + step
/// end
/// counter.total = 0
/// ```
#[derive(Debug)]
pub(crate) struct Function {
    pub frame: Rc<Frame>,
    pub attrs: AHashMap<String, Value>,
}

impl Function {
    pub fn new(frame: Rc<Frame>) -> Self {
        Self {
            frame,
            attrs: AHashMap::new(),
        }
    }
}

/// A callable bound to a receiver. When called, the VM prepends the
/// receiver as argument 0.
#[derive(Debug)]
pub(crate) struct BoundMethod {
    pub receiver: Value,
    pub callee: MethodCallee,
}

#[derive(Debug)]
pub(crate) enum MethodCallee {
    /// A compiled frame; the receiver lands in local slot 0.
    Frame(Rc<Frame>),
    /// A method implemented by the runtime itself.
    Native(NativeMethod),
}

/// Runtime-implemented member functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NativeMethod {
    ArrayAppend,
    ArraySize,
    StrSize,
    IterNext,
}

impl NativeMethod {
    pub fn name(self) -> &'static str {
        match self {
            Self::ArrayAppend => "append",
            Self::ArraySize | Self::StrSize => "size",
            Self::IterNext => "next",
        }
    }
}

/// A function resolved from a native module. The `module` handle keeps the
/// backing library loaded for as long as the function is reachable.
#[derive(Debug)]
pub(crate) struct ImportedFunction {
    pub name: String,
    pub module: Value,
    pub func: ModuleFn,
}
