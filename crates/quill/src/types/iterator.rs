//! Single-pass iterators over arrays, strings, and ranges.
//!
//! An iterator captures a strong handle to its owner plus a small cursor.
//! `advance` produces the next value or `Null` at exhaustion; iterators are
//! not restartable and keep yielding `Null` once finished.

use crate::{
    error::{RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    value::Value,
};

/// Iterator value: owner handle plus cursor state.
#[derive(Debug)]
pub(crate) struct Iter {
    pub receiver: Value,
    pub state: IterState,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum IterState {
    Array { index: usize },
    Str { index: usize },
    Range { count: f64 },
}

/// Produces the iterator's next value, or `Value::Null` when exhausted.
///
/// Returned heap values carry a fresh reference for the caller.
pub(crate) fn advance(heap: &mut Heap, iter_id: HeapId) -> RunResult<Value> {
    let (owner, state) = match heap.get(iter_id) {
        HeapData::Iter(iter) => match &iter.receiver {
            Value::Ref(owner) => (*owner, iter.state),
            _ => return Err(RunError::internal("iterator owner is not a heap value")),
        },
        _ => return Err(RunError::internal("ForLoop expects an iterator on top of the stack")),
    };

    let (next, new_state) = match state {
        IterState::Array { index } => {
            let item = match heap.get(owner) {
                HeapData::Array(array) => array.values().get(index).map(Value::raw_copy),
                _ => return Err(RunError::internal("array iterator owner is not an array")),
            };
            match item {
                Some(value) => (heap.clone_value(&value), IterState::Array { index: index + 1 }),
                None => (Value::Null, state),
            }
        }
        IterState::Str { index } => {
            let byte = match heap.get(owner) {
                HeapData::Str(s) => s.byte_at(index),
                _ => return Err(RunError::internal("string iterator owner is not a string")),
            };
            match byte {
                Some(text) => (heap.alloc_str(text), IterState::Str { index: index + 1 }),
                None => (Value::Null, state),
            }
        }
        IterState::Range { count } => {
            let range = match heap.get(owner) {
                HeapData::Range(range) => *range,
                _ => return Err(RunError::internal("range iterator owner is not a range")),
            };
            let current = range.start + range.step * count;
            if range.finished(current) {
                (Value::Null, state)
            } else {
                (Value::Number(current), IterState::Range { count: count + 1.0 })
            }
        }
    };

    if let HeapData::Iter(iter) = heap.get_mut(iter_id) {
        iter.state = new_state;
    }
    Ok(next)
}
