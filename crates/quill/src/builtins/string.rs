//! Implementation of the `String` builtin.

use crate::{
    error::RunResult,
    heap::Heap,
    value::{Value, display},
};

/// `String(x)` is x's textual form, the same text `print` would emit.
pub(super) fn builtin_string(args: Vec<Value>, heap: &mut Heap) -> RunResult<Value> {
    let [value] = super::take_exactly::<1>("String", args, heap)?;
    let text = display(&value, heap);
    value.drop_with_heap(heap);
    Ok(heap.alloc_str(text))
}
