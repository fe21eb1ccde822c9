//! Implementation of the `print` builtin.

use crate::{
    error::RunResult,
    heap::Heap,
    io::PrintWriter,
    value::{Value, display},
};

/// Writes each argument's textual form, space-separated, newline-terminated.
/// The output is built first so a print is atomic in the writer.
pub(super) fn builtin_print(args: Vec<Value>, heap: &mut Heap, out: &mut dyn PrintWriter) -> RunResult<Value> {
    let mut text = String::new();
    for (index, value) in args.iter().enumerate() {
        if index > 0 {
            text.push(' ');
        }
        text.push_str(&display(value, heap));
    }
    text.push('\n');
    out.write(&text);

    for value in args {
        value.drop_with_heap(heap);
    }
    Ok(Value::Null)
}
