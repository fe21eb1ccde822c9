//! Implementation of the `type` builtin.

use crate::{error::RunResult, heap::Heap, value::Value};

/// `type(x)` returns x's type name as a string; class instances answer
/// with their declared class name.
pub(super) fn builtin_type(args: Vec<Value>, heap: &mut Heap) -> RunResult<Value> {
    let [value] = super::take_exactly::<1>("type", args, heap)?;
    let name = value.type_name(heap);
    value.drop_with_heap(heap);
    Ok(heap.alloc_str(name))
}
