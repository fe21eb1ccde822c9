//! Native modules loaded from host dynamic libraries.
//!
//! `import "libquill_io.so" as io` resolves the path through the platform
//! loader and binds a Module value. Member access on the module resolves the
//! symbol lazily, wraps it as an imported function, and caches it.
//!
//! Exported symbols must have the [`ModuleFn`] signature and must be built
//! against the same `quill` version and toolchain as the embedding host; the
//! argument slice is borrowed for the duration of the call and return values
//! are constructed through the allocator handle.

use std::path::Path;

use ahash::AHashMap;

use libloading::Library;

use crate::{
    error::{RunError, RunResult},
    heap::Heap,
    value::Value,
};

/// Signature of a function exported by a native module.
pub type ModuleFn = fn(args: &[Value], heap: &mut Heap) -> RunResult<Value>;

/// A loaded dynamic library plus its symbol cache.
///
/// The cache maps symbol names to imported-function values; cached entries
/// hold the module alive in turn, which is fine because both ends of that
/// cycle live for the whole program.
#[derive(Debug)]
pub(crate) struct NativeModule {
    pub name: String,
    library: Library,
    pub cache: AHashMap<String, Value>,
}

impl NativeModule {
    /// Loads the library at `path` through the platform loader.
    pub fn load(path: &str) -> RunResult<Self> {
        // SAFETY: loading a library runs its initializers. The module ABI
        // contract (same crate version, same toolchain) is documented at the
        // module level; a library violating it is outside our control.
        let library = unsafe { Library::new(path) }.map_err(|err| RunError::ModuleLoad {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            name: module_stem(path),
            library,
            cache: AHashMap::new(),
        })
    }

    /// Resolves `symbol` to a raw function pointer.
    ///
    /// The pointer stays valid for as long as the library is loaded, which
    /// the caller guarantees by keeping a handle to this module.
    pub fn symbol(&self, symbol: &str) -> RunResult<ModuleFn> {
        // SAFETY: the symbol is declared with the documented `ModuleFn`
        // signature; resolving it with any other signature is a breach of
        // the module ABI contract.
        let found = unsafe { self.library.get::<ModuleFn>(symbol.as_bytes()) };
        match found {
            Ok(func) => Ok(*func),
            Err(_) => Err(RunError::SymbolNotFound {
                module: self.name.clone(),
                symbol: symbol.to_owned(),
            }),
        }
    }
}

/// Binding name for an un-aliased import: the file stem of the path.
#[must_use]
pub fn module_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map_or_else(|| path.to_owned(), |stem| stem.to_string_lossy().into_owned())
}
