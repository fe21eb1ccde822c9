//! Implementation of the `Range` builtin.

use crate::{
    error::{RunError, RunResult},
    heap::{Heap, HeapData},
    types::Range,
    value::Value,
};

/// `Range(end)`, `Range(start, end)` or `Range(start, end, step)`.
///
/// `step` must be non-zero; iteration counts in its direction.
pub(super) fn builtin_range(args: Vec<Value>, heap: &mut Heap) -> RunResult<Value> {
    let numbers: Result<Vec<f64>, RunError> = args
        .iter()
        .map(|value| match value {
            Value::Number(n) => Ok(*n),
            other => Err(RunError::TypeMismatch {
                context: "Range()",
                expected: "Number",
                got: other.kind_name(heap),
            }),
        })
        .collect();
    let given = args.len();
    for value in args {
        value.drop_with_heap(heap);
    }

    let range = match numbers?.as_slice() {
        [end] => Range::new(0.0, *end, 1.0),
        [start, end] => Range::new(*start, *end, 1.0),
        [start, end, step] => Range::new(*start, *end, *step),
        _ => {
            return Err(RunError::Arity {
                name: "Range".to_owned(),
                expected: 3,
                given,
            });
        }
    };
    if range.step == 0.0 {
        return Err(RunError::InvalidRangeStep);
    }
    Ok(Value::Ref(heap.alloc(HeapData::Range(range))))
}
