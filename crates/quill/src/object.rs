//! Owned, heap-independent snapshots of runtime values.
//!
//! The public pipeline returns an [`Object`] so hosts never touch the VM's
//! heap or reference counts. Data values convert structurally; opaque
//! values (functions, classes, modules, iterators) keep only their textual
//! form.

use std::fmt;

use crate::{
    heap::{Heap, HeapData},
    value::{Value, display, format_number},
};

/// Depth cap for structural conversion, guarding self-referential arrays.
const MAX_CONVERT_DEPTH: usize = 32;

/// An owned snapshot of a runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Object>),
    /// Textual form of a value with no structural representation.
    Opaque(String),
}

impl Object {
    pub(crate) fn from_value(value: &Value, heap: &Heap) -> Self {
        Self::convert(value, heap, 0)
    }

    fn convert(value: &Value, heap: &Heap, depth: usize) -> Self {
        if depth > MAX_CONVERT_DEPTH {
            return Self::Opaque("...".to_owned());
        }
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(*n),
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => Self::Str(s.as_str().to_owned()),
                HeapData::Array(array) => Self::Array(
                    array
                        .values()
                        .iter()
                        .map(|item| Self::convert(item, heap, depth + 1))
                        .collect(),
                ),
                _ => Self::Opaque(display(value, heap)),
            },
        }
    }
}

impl fmt::Display for Object {
    /// Matches the runtime textual form, so `Object::to_string` equals what
    /// `String(x)` would have produced.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Str(s) => f.write_str(s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt(f)?;
                }
                f.write_str("]")
            }
            Self::Opaque(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_display_matches_runtime_form() {
        let object = Object::Array(vec![
            Object::Bool(true),
            Object::Number(5.0),
            Object::Str("hi".to_owned()),
            Object::Null,
        ]);
        assert_eq!(object.to_string(), "[True, 5, hi, Null]");
    }
}
