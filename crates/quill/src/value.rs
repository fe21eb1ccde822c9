//! Runtime values and the polymorphic operations over them.
//!
//! `Value` is a hybrid: null, booleans and numbers are stored inline, while
//! heap-lived values (strings, arrays, functions, classes, modules,
//! iterators, ranges) are referenced through `Value::Ref`.
//!
//! NOTE: `Clone` is intentionally not derived. Duplicating a value must go
//! through [`Value::clone_with_heap`] so the reference count moves with it;
//! a plain clone would silently leak or double-free heap slots.
//!
//! Every capability here (textual form, operators, truth, indexing, member
//! access, iteration) is optional per kind, and unsupported combinations
//! surface as typed runtime errors.

use std::fmt::Write as _;

use strum::{Display, IntoStaticStr};

use crate::{
    ast::{BinaryOp, UnaryOp},
    error::{RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    types::{BoundMethod, Iter, IterState, MethodCallee, NativeMethod},
};

/// Nesting depth at which container rendering gives up with `...`; guards
/// against self-referential arrays.
const MAX_DISPLAY_DEPTH: usize = 32;

/// A runtime value.
#[derive(Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Ref(HeapId),
}

/// Type tag of a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum Kind {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Function,
    Module,
    Class,
    Iterator,
    Custom,
}

impl Value {
    /// Byte-for-byte copy that does NOT touch reference counts. Use only
    /// when the copy is immediately retained or only borrowed.
    pub(crate) fn raw_copy(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Number(n) => Self::Number(*n),
            Self::Ref(id) => Self::Ref(*id),
        }
    }

    /// Duplicates this value, retaining its heap slot if it has one.
    pub(crate) fn clone_with_heap(&self, heap: &mut Heap) -> Self {
        heap.clone_value(self)
    }

    /// Releases this value's heap reference, if it has one.
    pub(crate) fn drop_with_heap(self, heap: &mut Heap) {
        heap.drop_value(self);
    }

    #[must_use]
    pub fn kind(&self, heap: &Heap) -> Kind {
        match self {
            Self::Null => Kind::Null,
            Self::Bool(_) => Kind::Boolean,
            Self::Number(_) => Kind::Number,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => Kind::String,
                HeapData::Array(_) => Kind::Array,
                HeapData::Function(_) | HeapData::Method(_) | HeapData::Imported(_) | HeapData::Builtin(_) => {
                    Kind::Function
                }
                HeapData::Class(_) => Kind::Class,
                HeapData::Module(_) => Kind::Module,
                HeapData::Iter(_) => Kind::Iterator,
                HeapData::Range(_) => Kind::Custom,
            },
        }
    }

    /// Static name used in diagnostics.
    #[must_use]
    pub fn kind_name(&self, heap: &Heap) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Boolean",
            Self::Number(_) => "Number",
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => "String",
                HeapData::Array(_) => "Array",
                HeapData::Function(_) => "Function",
                HeapData::Method(_) => "MemberFunction",
                HeapData::Imported(_) | HeapData::Builtin(_) => "Function",
                HeapData::Class(_) => "Class",
                HeapData::Module(_) => "Module",
                HeapData::Iter(_) => "Iterator",
                HeapData::Range(_) => "Range",
            },
        }
    }

    /// Name reported by the `type` builtin. Class instances answer with
    /// their declared class name.
    #[must_use]
    pub fn type_name(&self, heap: &Heap) -> String {
        if let Self::Ref(id) = self
            && let HeapData::Class(class) = heap.get(*id)
        {
            return class.name.clone();
        }
        self.kind_name(heap).to_owned()
    }

    /// Native truth of this value. Defined for null, booleans, numbers and
    /// strings; everything else has no truth value.
    pub fn truth(&self, heap: &Heap) -> RunResult<bool> {
        match self {
            Self::Null => Ok(false),
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n != 0.0),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Ok(!s.is_empty()),
                _ => Err(RunError::NoTruthValue {
                    kind: self.kind_name(heap),
                }),
            },
        }
    }

    /// Numeric view used by arithmetic: numbers as-is, booleans widened.
    fn numeric(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(f64::from(*b)),
            _ => None,
        }
    }
}

/// Textual form of a value, used by `print`, `String(x)` and the REPL.
#[must_use]
pub(crate) fn display(value: &Value, heap: &Heap) -> String {
    let mut out = String::new();
    write_value(&mut out, value, heap, 0);
    out
}

fn write_value(out: &mut String, value: &Value, heap: &Heap, depth: usize) {
    if depth > MAX_DISPLAY_DEPTH {
        out.push_str("...");
        return;
    }
    match value {
        Value::Null => out.push_str("Null"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::Ref(id) => match heap.get(*id) {
            HeapData::Str(s) => out.push_str(s.as_str()),
            HeapData::Array(array) => {
                out.push('[');
                for (i, item) in array.values().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_value(out, item, heap, depth + 1);
                }
                out.push(']');
            }
            HeapData::Function(function) => {
                let _ = write!(out, "Function {}", function.frame.name);
            }
            HeapData::Method(_) => out.push_str("MemberFunction"),
            HeapData::Imported(imported) => {
                let _ = write!(out, "Function {}", imported.name);
            }
            HeapData::Builtin(builtin) => {
                let _ = write!(out, "Function {builtin}");
            }
            HeapData::Class(class) => {
                let _ = write!(out, "Class {}", class.name);
            }
            HeapData::Module(module) => {
                let _ = write!(out, "Module '{}'", module.name);
            }
            HeapData::Iter(_) => out.push_str("Iterator"),
            HeapData::Range(range) => {
                let _ = write!(
                    out,
                    "Range({}, {}, {})",
                    format_number(range.start),
                    format_number(range.end),
                    format_number(range.step)
                );
            }
        },
    }
}

/// Formats a number the way the surface language prints it: integral values
/// without a fractional part, everything else in shortest round-trip form.
#[must_use]
pub(crate) fn format_number(value: f64) -> String {
    if value.is_finite() && value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        ryu::Buffer::new().format(value).to_owned()
    }
}

/// Applies a binary operator. Numbers and booleans share the numeric path
/// (booleans widen); strings support `+`, `==` and `!=`; everything else is
/// a type error.
pub(crate) fn binary_op(op: BinaryOp, lhs: &Value, rhs: &Value, heap: &mut Heap) -> RunResult<Value> {
    if let (Some(l), Some(r)) = (lhs.numeric(), rhs.numeric()) {
        let value = match op {
            BinaryOp::Add => Value::Number(l + r),
            BinaryOp::Sub => Value::Number(l - r),
            BinaryOp::Mul => Value::Number(l * r),
            // division by zero follows IEEE-754: Inf/NaN, not an error
            BinaryOp::Div => Value::Number(l / r),
            BinaryOp::Eq => Value::Bool(l == r),
            BinaryOp::NotEq => Value::Bool(l != r),
            BinaryOp::Lt => Value::Bool(l < r),
            BinaryOp::LtEq => Value::Bool(l <= r),
            BinaryOp::Gt => Value::Bool(l > r),
            BinaryOp::GtEq => Value::Bool(l >= r),
        };
        return Ok(value);
    }

    if let (Some(l), Some(r)) = (heap.as_str(lhs), heap.as_str(rhs)) {
        match op {
            BinaryOp::Add => {
                let mut joined = String::with_capacity(l.len() + r.len());
                joined.push_str(l);
                joined.push_str(r);
                return Ok(heap.alloc_str(joined));
            }
            BinaryOp::Eq => return Ok(Value::Bool(l == r)),
            BinaryOp::NotEq => return Ok(Value::Bool(l != r)),
            _ => {}
        }
    }

    Err(RunError::InvalidBinaryOp {
        op: op_str(op),
        lhs: lhs.kind_name(heap),
        rhs: rhs.kind_name(heap),
    })
}

fn op_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
    }
}

/// Applies a unary operator: `+`/`-` are numeric, `!` negates truth.
pub(crate) fn unary_op(op: UnaryOp, operand: &Value, heap: &Heap) -> RunResult<Value> {
    match op {
        UnaryOp::Plus | UnaryOp::Minus => {
            let Some(n) = operand.numeric() else {
                return Err(RunError::InvalidUnaryOp {
                    op: if op == UnaryOp::Plus { "+" } else { "-" },
                    operand: operand.kind_name(heap),
                });
            };
            Ok(Value::Number(if op == UnaryOp::Minus { -n } else { n }))
        }
        UnaryOp::Not => Ok(Value::Bool(!operand.truth(heap)?)),
    }
}

/// Validates `index` as an exact non-negative integer below `len`.
pub(crate) fn to_index(index: &Value, len: usize, heap: &Heap) -> RunResult<usize> {
    let Value::Number(raw) = index else {
        return Err(RunError::InvalidIndex {
            target: "a sequence",
            index: index.kind_name(heap),
        });
    };
    if raw.floor() != *raw || !raw.is_finite() {
        return Err(RunError::NonIntegerIndex { value: *raw });
    }
    if *raw < 0.0 || *raw >= len as f64 {
        return Err(RunError::IndexOutOfRange {
            index: *raw as i64,
            len,
        });
    }
    Ok(*raw as usize)
}

/// Implements `target[index]`.
pub(crate) fn index_get(target: &Value, index: &Value, heap: &mut Heap) -> RunResult<Value> {
    let Value::Ref(id) = target else {
        return Err(RunError::InvalidIndex {
            target: target.kind_name(heap),
            index: index.kind_name(heap),
        });
    };
    match heap.get(*id) {
        HeapData::Array(array) => {
            let slot = to_index(index, array.len(), heap)?;
            let item = array.values()[slot].raw_copy();
            Ok(heap.clone_value(&item))
        }
        HeapData::Str(s) => {
            let slot = to_index(index, s.len(), heap)?;
            let byte = s.byte_at(slot).expect("index validated against length");
            Ok(heap.alloc_str(byte))
        }
        // function static variables are readable through either `[]` or `.`
        HeapData::Function(function) => {
            let Some(name) = heap.as_str(index) else {
                return Err(RunError::InvalidIndex {
                    target: "Function",
                    index: index.kind_name(heap),
                });
            };
            match function.attrs.get(name) {
                Some(value) => {
                    let value = value.raw_copy();
                    Ok(heap.clone_value(&value))
                }
                None => Err(RunError::UnknownMember {
                    target: "Function".to_owned(),
                    member: name.to_owned(),
                }),
            }
        }
        _ => Err(RunError::InvalidIndex {
            target: target.kind_name(heap),
            index: index.kind_name(heap),
        }),
    }
}

/// Implements `target[index] = value`, taking ownership of `value`.
pub(crate) fn index_set(target: &Value, index: &Value, value: Value, heap: &mut Heap) -> RunResult<()> {
    let Value::Ref(id) = target else {
        let err = RunError::InvalidIndex {
            target: target.kind_name(heap),
            index: index.kind_name(heap),
        };
        heap.drop_value(value);
        return Err(err);
    };
    match heap.get(*id) {
        HeapData::Array(array) => {
            let slot = match to_index(index, array.len(), heap) {
                Ok(slot) => slot,
                Err(err) => {
                    heap.drop_value(value);
                    return Err(err);
                }
            };
            let old = {
                let HeapData::Array(array) = heap.get_mut(*id) else {
                    unreachable!("checked above");
                };
                std::mem::replace(&mut array.values_mut()[slot], value)
            };
            heap.drop_value(old);
            Ok(())
        }
        HeapData::Str(_) => {
            heap.drop_value(value);
            Err(RunError::ImmutableIndex { target: "String" })
        }
        HeapData::Function(_) => {
            let Some(name) = heap.as_str(index).map(str::to_owned) else {
                let err = RunError::InvalidIndex {
                    target: "Function",
                    index: index.kind_name(heap),
                };
                heap.drop_value(value);
                return Err(err);
            };
            set_function_attr(heap, *id, name, value);
            Ok(())
        }
        HeapData::Class(class) => {
            let Some(name) = heap.as_str(index).map(str::to_owned) else {
                let err = RunError::InvalidIndex {
                    target: "Class",
                    index: index.kind_name(heap),
                };
                heap.drop_value(value);
                return Err(err);
            };
            if !class.members.contains_key(&name) {
                let err = RunError::UnknownMember {
                    target: class.name.clone(),
                    member: name,
                };
                heap.drop_value(value);
                return Err(err);
            }
            let old = {
                let HeapData::Class(class) = heap.get_mut(*id) else {
                    unreachable!("checked above");
                };
                class.members.insert(name, value)
            };
            if let Some(old) = old {
                heap.drop_value(old);
            }
            Ok(())
        }
        _ => {
            let err = RunError::InvalidIndex {
                target: target.kind_name(heap),
                index: index.kind_name(heap),
            };
            heap.drop_value(value);
            Err(err)
        }
    }
}

/// Implements `target.name` reads.
pub(crate) fn member_get(target: &Value, member: &str, heap: &mut Heap) -> RunResult<Value> {
    let Value::Ref(id) = target else {
        return Err(RunError::UnknownMember {
            target: target.kind_name(heap).to_owned(),
            member: member.to_owned(),
        });
    };
    match heap.get(*id) {
        HeapData::Class(class) => match class.members.get(member) {
            Some(value) => {
                let value = value.raw_copy();
                Ok(heap.clone_value(&value))
            }
            None => Err(RunError::UnknownMember {
                target: class.name.clone(),
                member: member.to_owned(),
            }),
        },
        HeapData::Function(function) => match function.attrs.get(member) {
            Some(value) => {
                let value = value.raw_copy();
                Ok(heap.clone_value(&value))
            }
            None => Err(RunError::UnknownMember {
                target: "Function".to_owned(),
                member: member.to_owned(),
            }),
        },
        HeapData::Module(module) => {
            if let Some(cached) = module.cache.get(member) {
                let cached = cached.raw_copy();
                return Ok(heap.clone_value(&cached));
            }
            let func = module.symbol(member)?;
            let module_handle = heap.clone_value(target);
            let imported = heap.alloc(HeapData::Imported(crate::types::ImportedFunction {
                name: member.to_owned(),
                module: module_handle,
                func,
            }));
            heap.inc_ref(imported);
            let HeapData::Module(module) = heap.get_mut(*id) else {
                unreachable!("checked above");
            };
            module.cache.insert(member.to_owned(), Value::Ref(imported));
            Ok(Value::Ref(imported))
        }
        HeapData::Array(_) => {
            let native = match member {
                "append" => NativeMethod::ArrayAppend,
                "size" => NativeMethod::ArraySize,
                _ => {
                    return Err(RunError::UnknownMember {
                        target: "Array".to_owned(),
                        member: member.to_owned(),
                    });
                }
            };
            Ok(bind_native(heap, target, native))
        }
        HeapData::Str(_) => match member {
            "size" => Ok(bind_native(heap, target, NativeMethod::StrSize)),
            _ => Err(RunError::UnknownMember {
                target: "String".to_owned(),
                member: member.to_owned(),
            }),
        },
        HeapData::Iter(_) => match member {
            "next" => Ok(bind_native(heap, target, NativeMethod::IterNext)),
            _ => Err(RunError::UnknownMember {
                target: "Iterator".to_owned(),
                member: member.to_owned(),
            }),
        },
        _ => Err(RunError::UnknownMember {
            target: target.kind_name(heap).to_owned(),
            member: member.to_owned(),
        }),
    }
}

fn bind_native(heap: &mut Heap, receiver: &Value, native: NativeMethod) -> Value {
    let receiver = heap.clone_value(receiver);
    Value::Ref(heap.alloc(HeapData::Method(BoundMethod {
        receiver,
        callee: MethodCallee::Native(native),
    })))
}

/// Implements member installation (`MakeMember`): class bodies, member
/// assignment, and function static variables. Takes ownership of `value`.
pub(crate) fn member_set(target: &Value, name: String, value: Value, heap: &mut Heap) -> RunResult<()> {
    let Value::Ref(id) = target else {
        let err = RunError::InvalidMemberAssign {
            target: target.kind_name(heap),
        };
        heap.drop_value(value);
        return Err(err);
    };
    match heap.get(*id) {
        HeapData::Class(_) => {
            // a function member becomes a method bound to this class
            let function_frame = match &value {
                Value::Ref(fid) => match heap.get(*fid) {
                    HeapData::Function(function) => Some(function.frame.clone()),
                    _ => None,
                },
                _ => None,
            };
            let value = match function_frame {
                Some(frame) => {
                    let receiver = heap.clone_value(target);
                    let method = Value::Ref(heap.alloc(HeapData::Method(BoundMethod {
                        receiver,
                        callee: MethodCallee::Frame(frame),
                    })));
                    heap.drop_value(value);
                    method
                }
                None => value,
            };
            let old = {
                let HeapData::Class(class) = heap.get_mut(*id) else {
                    unreachable!("checked above");
                };
                class.members.insert(name, value)
            };
            if let Some(old) = old {
                heap.drop_value(old);
            }
            Ok(())
        }
        HeapData::Function(_) => {
            set_function_attr(heap, *id, name, value);
            Ok(())
        }
        _ => {
            let err = RunError::InvalidMemberAssign {
                target: target.kind_name(heap),
            };
            heap.drop_value(value);
            Err(err)
        }
    }
}

fn set_function_attr(heap: &mut Heap, id: HeapId, name: String, value: Value) {
    let old = {
        let HeapData::Function(function) = heap.get_mut(id) else {
            unreachable!("caller checked the payload kind");
        };
        function.attrs.insert(name, value)
    };
    if let Some(old) = old {
        heap.drop_value(old);
    }
}

/// Produces an iterator over `value`, consuming it. Iterating an iterator
/// returns it unchanged.
pub(crate) fn make_iter(value: Value, heap: &mut Heap) -> RunResult<Value> {
    let Value::Ref(id) = &value else {
        let err = RunError::NotIterable {
            kind: value.kind_name(heap),
        };
        heap.drop_value(value);
        return Err(err);
    };
    let state = match heap.get(*id) {
        HeapData::Array(_) => IterState::Array { index: 0 },
        HeapData::Str(_) => IterState::Str { index: 0 },
        HeapData::Range(_) => IterState::Range { count: 0.0 },
        HeapData::Iter(_) => return Ok(value),
        _ => {
            let err = RunError::NotIterable {
                kind: value.kind_name(heap),
            };
            heap.drop_value(value);
            return Err(err);
        }
    };
    Ok(Value::Ref(heap.alloc(HeapData::Iter(Iter { receiver: value, state }))))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(50.0), "50");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn test_truth() {
        let mut heap = Heap::new();
        assert!(!Value::Null.truth(&heap).unwrap());
        assert!(Value::Number(2.0).truth(&heap).unwrap());
        assert!(!Value::Number(0.0).truth(&heap).unwrap());
        let s = heap.alloc_str("x");
        assert!(s.truth(&heap).unwrap());
        let empty = heap.alloc_str("");
        assert!(!empty.truth(&heap).unwrap());
        let arr = heap.alloc_array(vec![]);
        assert!(arr.truth(&heap).is_err());
    }

    #[test]
    fn test_numeric_ops_widen_booleans() {
        let mut heap = Heap::new();
        let sum = binary_op(BinaryOp::Add, &Value::Bool(true), &Value::Number(2.0), &mut heap).unwrap();
        assert_eq!(sum, Value::Number(3.0));
        let cmp = binary_op(BinaryOp::Lt, &Value::Bool(false), &Value::Bool(true), &mut heap).unwrap();
        assert_eq!(cmp, Value::Bool(true));
    }

    #[test]
    fn test_division_by_zero_is_ieee() {
        let mut heap = Heap::new();
        let q = binary_op(BinaryOp::Div, &Value::Number(1.0), &Value::Number(0.0), &mut heap).unwrap();
        assert_eq!(q, Value::Number(f64::INFINITY));
    }

    #[test]
    fn test_string_ops() {
        let mut heap = Heap::new();
        let a = heap.alloc_str("foo");
        let b = heap.alloc_str("bar");
        let joined = binary_op(BinaryOp::Add, &a, &b, &mut heap).unwrap();
        assert_eq!(heap.as_str(&joined), Some("foobar"));
        let eq = binary_op(BinaryOp::Eq, &a, &b, &mut heap).unwrap();
        assert_eq!(eq, Value::Bool(false));
        let err = binary_op(BinaryOp::Mul, &a, &b, &mut heap).unwrap_err();
        assert!(matches!(err, RunError::InvalidBinaryOp { op: "*", .. }));
    }

    #[test]
    fn test_mixed_operands_error() {
        let mut heap = Heap::new();
        let s = heap.alloc_str("foo");
        let err = binary_op(BinaryOp::Add, &Value::Number(1.0), &s, &mut heap).unwrap_err();
        assert!(matches!(
            err,
            RunError::InvalidBinaryOp {
                lhs: "Number",
                rhs: "String",
                ..
            }
        ));
    }

    #[test]
    fn test_index_bounds() {
        let mut heap = Heap::new();
        let one = heap.alloc_str("1");
        let arr = heap.alloc_array(vec![one]);
        let got = index_get(&arr, &Value::Number(0.0), &mut heap).unwrap();
        assert_eq!(heap.as_str(&got), Some("1"));

        // index equal to size is out of range
        let err = index_get(&arr, &Value::Number(1.0), &mut heap).unwrap_err();
        assert!(matches!(err, RunError::IndexOutOfRange { index: 1, len: 1 }));

        let err = index_get(&arr, &Value::Number(0.5), &mut heap).unwrap_err();
        assert!(matches!(err, RunError::NonIntegerIndex { .. }));
    }

    #[test]
    fn test_string_index_returns_byte_string() {
        let mut heap = Heap::new();
        let s = heap.alloc_str("Am i");
        let first = index_get(&s, &Value::Number(0.0), &mut heap).unwrap();
        assert_eq!(heap.as_str(&first), Some("A"));
        let err = index_set(&s, &Value::Number(0.0), Value::Null, &mut heap).unwrap_err();
        assert!(matches!(err, RunError::ImmutableIndex { target: "String" }));
    }

    #[test]
    fn test_display_array() {
        let mut heap = Heap::new();
        let arr = heap.alloc_array(vec![Value::Bool(true), Value::Number(2.0), Value::Null]);
        assert_eq!(display(&arr, &heap), "[True, 2, Null]");
    }
}
