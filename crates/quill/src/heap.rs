//! Reference-counted slot arena backing all heap-lived runtime values.
//!
//! The arena is a vector of uniform slots with the free list threaded
//! through the vacant slots themselves: each free slot stores the index of
//! the next free slot, allocation pops the head, release pushes onto it.
//! Slots are never compacted, so a `HeapId` stays valid for the lifetime of
//! the value it names.
//!
//! Ownership is explicit: values are duplicated with
//! [`Heap::clone_value`] and released with [`Heap::drop_value`]. When the
//! last reference drops, the payload's destructor runs (releasing children
//! and, for modules, unloading the library) before the slot joins the free
//! list and can be reused.

use std::collections::BTreeMap;

use smallvec::{SmallVec, smallvec};

use crate::{
    types::{Array, BoundMethod, ClassObject, Function, ImportedFunction, Iter, NativeModule, Range, Str},
    value::Value,
};

/// Handle naming a value stored inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    /// The raw slot index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload of a heap slot; one variant per heap-lived value family.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(Str),
    Array(Array),
    Function(Function),
    Method(BoundMethod),
    Imported(ImportedFunction),
    Builtin(crate::builtins::Builtin),
    Class(ClassObject),
    Module(NativeModule),
    Iter(Iter),
    Range(Range),
}

impl HeapData {
    fn kind_label(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::Array(_) => "Array",
            Self::Function(_) => "Function",
            Self::Method(_) => "Method",
            Self::Imported(_) => "Imported",
            Self::Builtin(_) => "Builtin",
            Self::Class(_) => "Class",
            Self::Module(_) => "Module",
            Self::Iter(_) => "Iter",
            Self::Range(_) => "Range",
        }
    }

    /// Child values owned by this payload, handed back when it is released.
    fn into_children(self) -> SmallVec<[Value; 4]> {
        match self {
            Self::Str(_) | Self::Builtin(_) | Self::Range(_) => SmallVec::new(),
            Self::Array(array) => array.into_values().into_iter().collect(),
            Self::Function(function) => function.attrs.into_values().collect(),
            Self::Method(method) => smallvec![method.receiver],
            Self::Imported(imported) => smallvec![imported.module],
            Self::Class(class) => class.members.into_values().collect(),
            Self::Module(module) => module.cache.into_values().collect(),
            Self::Iter(iter) => smallvec![iter.receiver],
        }
    }
}

#[derive(Debug)]
struct HeapValue {
    refs: usize,
    data: HeapData,
}

#[derive(Debug)]
enum Slot {
    Live(HeapValue),
    Free { next: Option<u32> },
}

/// The arena itself.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
}

/// Counts of live and recyclable slots, by payload kind.
///
/// Used by tests and embedders to check that programs release what they
/// allocate: after a run, the live count equals what is reachable from the
/// result plus the retained global tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub free_slots: usize,
    pub total_slots: usize,
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` in a fresh or recycled slot with one reference.
    pub(crate) fn alloc(&mut self, data: HeapData) -> HeapId {
        let value = HeapValue { refs: 1, data };
        self.live += 1;
        match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                let Slot::Free { next } = *slot else {
                    unreachable!("free list head points at a live slot");
                };
                self.free_head = next;
                *slot = Slot::Live(value);
                HeapId(index)
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("heap exceeds u32 slots");
                self.slots.push(Slot::Live(value));
                HeapId(index)
            }
        }
    }

    pub(crate) fn get(&self, id: HeapId) -> &HeapData {
        match &self.slots[id.index()] {
            Slot::Live(value) => &value.data,
            Slot::Free { .. } => unreachable!("read through a dangling heap handle"),
        }
    }

    pub(crate) fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        match &mut self.slots[id.index()] {
            Slot::Live(value) => &mut value.data,
            Slot::Free { .. } => unreachable!("write through a dangling heap handle"),
        }
    }

    pub(crate) fn inc_ref(&mut self, id: HeapId) {
        match &mut self.slots[id.index()] {
            Slot::Live(value) => value.refs += 1,
            Slot::Free { .. } => unreachable!("retain of a dangling heap handle"),
        }
    }

    /// Releases one reference; at zero the payload is destroyed, children
    /// are released in turn, and the slot joins the free list.
    pub(crate) fn dec_ref(&mut self, id: HeapId) {
        let mut pending: SmallVec<[HeapId; 8]> = smallvec![id];
        while let Some(id) = pending.pop() {
            let slot = &mut self.slots[id.index()];
            let Slot::Live(value) = slot else {
                unreachable!("release of a dangling heap handle");
            };
            debug_assert!(value.refs > 0);
            value.refs -= 1;
            if value.refs > 0 {
                continue;
            }

            let released = std::mem::replace(slot, Slot::Free { next: self.free_head });
            self.free_head = Some(u32::try_from(id.index()).expect("heap id fits u32"));
            self.live -= 1;
            let Slot::Live(value) = released else {
                unreachable!("released slot was live above");
            };
            for child in value.data.into_children() {
                if let Value::Ref(child_id) = child {
                    pending.push(child_id);
                }
            }
            // value.data is dropped here, before the slot can be reused
        }
    }

    /// Duplicates a value, retaining its heap slot if it has one.
    pub(crate) fn clone_value(&mut self, value: &Value) -> Value {
        let copy = value.raw_copy();
        if let Value::Ref(id) = copy {
            self.inc_ref(id);
        }
        copy
    }

    /// Releases a value, dropping its heap slot reference if it has one.
    pub(crate) fn drop_value(&mut self, value: Value) {
        if let Value::Ref(id) = value {
            self.dec_ref(id);
        }
    }

    /// Allocates an owned string value.
    pub fn alloc_str(&mut self, text: impl Into<String>) -> Value {
        Value::Ref(self.alloc(HeapData::Str(Str::new(text))))
    }

    /// Allocates an array value taking ownership of `values`.
    pub fn alloc_array(&mut self, values: Vec<Value>) -> Value {
        Value::Ref(self.alloc(HeapData::Array(Array::new(values))))
    }

    /// Borrows the text of a string value, if `value` is one.
    #[must_use]
    pub fn as_str<'heap>(&'heap self, value: &Value) -> Option<&'heap str> {
        match value {
            Value::Ref(id) => match self.get(*id) {
                HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        for slot in &self.slots {
            if let Slot::Live(value) = slot {
                *objects_by_type.entry(value.data.kind_label()).or_insert(0) += 1;
            }
        }
        HeapStats {
            live_objects: self.live,
            free_slots: self.slots.len() - self.live,
            total_slots: self.slots.len(),
            objects_by_type,
        }
    }
}
