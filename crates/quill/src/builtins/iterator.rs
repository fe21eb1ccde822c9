//! Implementation of the `Iterator` builtin.

use crate::{
    error::RunResult,
    heap::Heap,
    value::{Value, make_iter},
};

/// `Iterator(x)` is x's iterator, the same one a `for` loop would use.
pub(super) fn builtin_iterator(args: Vec<Value>, heap: &mut Heap) -> RunResult<Value> {
    let [value] = super::take_exactly::<1>("Iterator", args, heap)?;
    make_iter(value, heap)
}
