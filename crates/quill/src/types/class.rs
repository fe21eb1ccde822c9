//! User classes: a name plus an insertion-ordered member table.

use indexmap::IndexMap;

use crate::value::Value;

/// A user-declared class. Function-valued members are rebound as bound
/// methods when installed, so calling them passes the class as receiver.
#[derive(Debug)]
pub(crate) struct ClassObject {
    pub name: String,
    pub members: IndexMap<String, Value>,
}

impl ClassObject {
    pub fn new(name: String) -> Self {
        Self {
            name,
            members: IndexMap::new(),
        }
    }
}
