//! Public interface for running Quill code.
//!
//! The pipeline stages are exposed separately (`parse_source`,
//! [`Interpreter::compile`], [`Interpreter::run_code`]) and composed by
//! [`Interpreter::run_source`]. The interpreter owns a reusable [`Vm`]:
//! after a runtime error every frame has been unwound, and the next run
//! starts from reset global storage on the same heap.

use crate::{
    ast::Ast,
    bytecode::{self, Code, Vm},
    error::Error,
    heap::HeapStats,
    io::{PrintWriter, StdPrint},
    object::Object,
    parser,
    tracer::NoopTracer,
};

/// Parses source text into an AST.
pub fn parse_source(source: &str) -> Result<Ast, Error> {
    parser::parse(source).map_err(Error::from)
}

/// A reusable execution context: compile pipeline plus an owned VM.
///
/// # Example
/// ```
/// use quill::Interpreter;
///
/// let mut interp = Interpreter::new();
/// let result = interp.run_source("var a = 50\na", "example.ql").unwrap();
/// assert_eq!(result.to_string(), "50");
/// ```
#[derive(Debug, Default)]
pub struct Interpreter {
    vm: Vm,
}

impl Interpreter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles a parsed program.
    pub fn compile(ast: &Ast) -> Result<Code, Error> {
        bytecode::compile(ast).map_err(Error::from)
    }

    /// Compiles and executes `source`, printing through stdout.
    ///
    /// `name` labels the compilation unit in parse diagnostics.
    pub fn run_source(&mut self, source: &str, name: &str) -> Result<Object, Error> {
        self.run_source_with(source, name, &mut StdPrint)
    }

    /// Like [`Interpreter::run_source`] with a custom print destination.
    pub fn run_source_with(
        &mut self,
        source: &str,
        name: &str,
        print: &mut dyn PrintWriter,
    ) -> Result<Object, Error> {
        let ast = match parser::parse(source) {
            Ok(ast) => ast,
            Err(err) => {
                let mut err = Error::from(err);
                err.message.push_str(&format!(" in '{name}'"));
                return Err(err);
            }
        };
        self.run_ast_with(&ast, print)
    }

    /// Compiles and executes an already-parsed program.
    pub fn run_ast(&mut self, ast: &Ast) -> Result<Object, Error> {
        self.run_ast_with(ast, &mut StdPrint)
    }

    /// Like [`Interpreter::run_ast`] with a custom print destination.
    pub fn run_ast_with(&mut self, ast: &Ast, print: &mut dyn PrintWriter) -> Result<Object, Error> {
        let code = Self::compile(ast)?;
        self.run_code_with(&code, print)
    }

    /// Executes a compiled program.
    pub fn run_code(&mut self, code: &Code) -> Result<Object, Error> {
        self.run_code_with(code, &mut StdPrint)
    }

    /// Like [`Interpreter::run_code`] with a custom print destination.
    pub fn run_code_with(&mut self, code: &Code, print: &mut dyn PrintWriter) -> Result<Object, Error> {
        let value = self.vm.run_code(code, print, &mut NoopTracer)?;
        let heap = self.vm.heap_mut();
        let object = Object::from_value(&value, heap);
        value.drop_with_heap(heap);
        Ok(object)
    }

    /// Heap occupancy of the owned VM.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.vm.heap_stats()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{error::Stage, io::CollectStringPrint};

    #[test]
    fn test_pipeline_stages_compose() {
        let ast = parse_source("1 + 2").unwrap();
        let code = Interpreter::compile(&ast).unwrap();
        let mut interp = Interpreter::new();
        assert_eq!(interp.run_code(&code).unwrap(), Object::Number(3.0));
    }

    #[test]
    fn test_stage_tags() {
        let mut interp = Interpreter::new();
        let err = interp.run_source("var = 1", "t").unwrap_err();
        assert_eq!(err.stage, Stage::Parse);
        assert!(err.to_string().starts_with("[PARSE ERROR]"));
        assert!(err.message.ends_with("in 't'"));

        let err = interp.run_source("missing", "t").unwrap_err();
        assert_eq!(err.stage, Stage::Compile);

        let err = interp.run_source("1()", "t").unwrap_err();
        assert_eq!(err.stage, Stage::Runtime);
        assert_eq!(err.to_string(), "[RUNTIME ERROR] Number cannot be called");
    }

    #[test]
    fn test_print_capture() {
        let mut interp = Interpreter::new();
        let mut out = CollectStringPrint::new();
        interp
            .run_source_with("print(1, \"two\", [3])", "t", &mut out)
            .unwrap();
        assert_eq!(out.output(), "1 two [3]\n");
    }

    #[test]
    fn test_code_cache_round_trip() {
        let ast = parse_source("var xs = [1, 2]\nxs[0] + xs[1]").unwrap();
        let code = Interpreter::compile(&ast).unwrap();
        let restored = Code::load(&code.dump().unwrap()).unwrap();
        let mut interp = Interpreter::new();
        assert_eq!(interp.run_code(&restored).unwrap(), Object::Number(3.0));
    }
}
