//! End-to-end language tests: source in, final value (and print output) out.

use pretty_assertions::assert_eq;
use quill::{CollectStringPrint, Error, Interpreter, NoPrint, Object, Stage};

/// Runs `source` and returns the textual form of its result.
fn eval(source: &str) -> String {
    let mut interp = Interpreter::new();
    interp
        .run_source_with(source, "test.ql", &mut NoPrint)
        .unwrap_or_else(|err| panic!("{err}\nsource:\n{source}"))
        .to_string()
}

fn eval_err(source: &str) -> Error {
    let mut interp = Interpreter::new();
    match interp.run_source_with(source, "test.ql", &mut NoPrint) {
        Ok(value) => panic!("expected an error, got {value}"),
        Err(err) => err,
    }
}

fn eval_output(source: &str) -> String {
    let mut interp = Interpreter::new();
    let mut out = CollectStringPrint::new();
    interp
        .run_source_with(source, "test.ql", &mut out)
        .unwrap_or_else(|err| panic!("{err}\nsource:\n{source}"));
    out.into_output()
}

#[test]
fn test_variable_assignment() {
    assert_eq!(eval("var a = 50\na"), "50");
}

#[test]
fn test_relational_operators() {
    assert_eq!(
        eval("[ 5 > 0, 5 >= 5, 5 >= 4, 5 < 6, 5 <= 5, 5 == 5, 5 != 6 ]"),
        "[True, True, True, True, True, True, True]"
    );
}

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(eval("1 + 2 * 3 - 4 / 2"), "5");
    assert_eq!(eval("(1 + 2) * 3"), "9");
    assert_eq!(eval("10 - 2 - 3"), "5");
}

#[test]
fn test_unary_operators() {
    assert_eq!(eval("-3 + 1"), "-2");
    assert_eq!(eval("--3"), "3");
    assert_eq!(eval("+5"), "5");
    assert_eq!(eval("[!0, !1, !\"\", !\"x\"]"), "[True, False, True, False]");
}

#[test]
fn test_boolean_literals_widen() {
    assert_eq!(eval("true + true"), "2");
    assert_eq!(eval("[true, false]"), "[True, False]");
}

#[test]
fn test_if_statements() {
    let source = "
var a = \"Am i the best?\"
if a[0] == \"A\":
    a = \"Yes i am\"
else:
    a = \"No i am not\"
end
a";
    assert_eq!(eval(source), "Yes i am");
}

#[test]
fn test_if_statements_alternative() {
    let source = "
var a = \"Am i the best?\"
if a[0] != \"A\":
    a = \"Yes i am\"
else:
    a = \"No i am not\"
end
a";
    assert_eq!(eval(source), "No i am not");
}

#[test]
fn test_if_statements_elif() {
    let source = "
var a = \"Am i the best?\"
if a[0] != \"A\":
    a = \"Yes i am\"
elif a == \"Am i the best?\":
    a = \"Equality operators!\"
else:
    a = \"No i am not\"
end
a";
    assert_eq!(eval(source), "Equality operators!");
}

#[test]
fn test_nested_if_statements() {
    let source = "
var a = \"quil\"
if a[0] == \"q\":
    if a[1] == \"u\":
        if a[2] == \"i\":
            if a[3] == \"l\":
                a = 5
            end
        end
    end
end
a";
    assert_eq!(eval(source), "5");
}

#[test]
fn test_while_loop() {
    let source = "
var iteration = 0
while iteration < 10:
    iteration = iteration + 1
end
iteration";
    assert_eq!(eval(source), "10");
}

#[test]
fn test_nested_while_loop() {
    let source = "
var iteration = 0
var iteration2 = 0
while iteration < 10:
    while iteration2 < 10:
        iteration2 = iteration2 + 1
    end
    iteration = iteration + 1
end
iteration + iteration2";
    assert_eq!(eval(source), "20");
}

#[test]
fn test_scopes() {
    let source = "
var arg = 13
var arg1 = 15
fn func(arg1):
    var arg = arg1 + 5
    arg + 10
end

arg + func(10) + arg1";
    assert_eq!(eval(source), "53");
}

#[test]
fn test_fibonacci() {
    let source = "
fn fibo(n):
    if n > 1:
        return fibo(n - 1) + fibo(n - 2) end
    return n
end

fibo(7)";
    assert_eq!(eval(source), "13");
}

#[test]
fn test_return_paths() {
    let source = "
fn func(n):
    if n > 0:
        return n
    end
    return n
end

func(7)";
    assert_eq!(eval(source), "7");
}

#[test]
fn test_nested_while_break() {
    let source = "
var x = 0
var i = 5
var j = 5

while i > 0:
    i = i - 1
    while 1:
        j = j - 1
        x = x + 1
        if x > 5:
            break
        end
    end
    x = x + 1
end
x";
    assert_eq!(eval(source), "15");
}

#[test]
fn test_function_static_variables() {
    let source = "
fn function(arg):
    function.static_var + arg
end
function.static_var = 10
function(3)";
    assert_eq!(eval(source), "13");
}

#[test]
fn test_static_variables_via_index() {
    assert_eq!(eval("fn f(): 1 end\nf[\"tag\"] = 3\nf[\"tag\"]"), "3");
}

#[test]
fn test_lambdas_are_first_class() {
    assert_eq!(eval("var f = fn(x): x * 2 end\nf(4)"), "8");
    assert_eq!(
        eval("fn make(): return fn(x): x + 1 end end\nvar g = make()\ng(1)"),
        "2"
    );
}

#[test]
fn test_call_chaining() {
    let source = "
fn make(): return fn(x): x + 1 end end
make()(41)";
    assert_eq!(eval(source), "42");
}

#[test]
fn test_arrays() {
    assert_eq!(eval("var a = [1, 2, 3]\na[1]"), "2");
    assert_eq!(eval("var a = [1, 2]\na[0] = 9\na"), "[9, 2]");
    assert_eq!(eval("var a = [1]\na.append(2)\na.size()"), "2");
    assert_eq!(eval("var a = []\na.append(1, 2)\na"), "[1, 2]");
    assert_eq!(eval("var m = [[1, 2], [3]]\nm[1][0]"), "3");
    assert_eq!(eval("var m = [[1, 2], [3]]\nm[0].size()"), "2");
}

#[test]
fn test_strings() {
    assert_eq!(eval("\"foo\" + \"bar\""), "foobar");
    assert_eq!(eval("\"abc\"[1]"), "b");
    assert_eq!(eval("\"abc\".size()"), "3");
    assert_eq!(eval("[\"a\" == \"a\", \"a\" != \"b\"]"), "[True, True]");
}

#[test]
fn test_for_over_array() {
    let source = "
var sum = 0
for x in [1, 2, 3]:
    sum = sum + x
end
sum";
    assert_eq!(eval(source), "6");
}

#[test]
fn test_for_over_string() {
    let source = "
var out = \"\"
for c in \"abc\":
    out = out + c
end
out";
    assert_eq!(eval(source), "abc");
}

#[test]
fn test_for_over_range() {
    assert_eq!(
        eval("var total = 0\nfor i in Range(5): total = total + i end\ntotal"),
        "10"
    );
    assert_eq!(
        eval("var total = 0\nfor i in Range(2, 5): total = total + i end\ntotal"),
        "9"
    );
    assert_eq!(
        eval("var total = 0\nfor i in Range(10, 0, -2): total = total + i end\ntotal"),
        "30"
    );
}

#[test]
fn test_for_break_and_continue() {
    let source = "
var s = 0
for i in Range(10):
    if i == 3:
        break
    end
    s = s + i
end
s";
    assert_eq!(eval(source), "3");

    let source = "
var s = 0
for i in Range(6):
    if i == 2:
        continue
    end
    s = s + i
end
s";
    assert_eq!(eval(source), "13");
}

#[test]
fn test_nested_for_loops() {
    let source = "
var pairs = 0
for i in Range(3):
    for j in Range(3):
        pairs = pairs + 1
    end
end
pairs";
    assert_eq!(eval(source), "9");
}

#[test]
fn test_return_from_loop() {
    let source = "
fn find():
    for i in Range(10):
        if i == 4:
            return i
        end
    end
    return 0 - 1
end
find()";
    assert_eq!(eval(source), "4");
}

#[test]
fn test_iterator_protocol() {
    assert_eq!(eval("var it = Iterator([7, 8])\nit.next()"), "7");
    let source = "
var it = Iterator([7])
it.next()
it.next()";
    // single-pass: exhaustion produces Null
    assert_eq!(eval(source), "Null");
    assert_eq!(eval("Iterator(\"hi\").next()"), "h");
}

#[test]
fn test_type_builtin() {
    assert_eq!(eval("type(5)"), "Number");
    assert_eq!(eval("type(\"x\")"), "String");
    assert_eq!(eval("type([1])"), "Array");
    assert_eq!(eval("type(5 == 5)"), "Boolean");
    assert_eq!(eval("type(null)"), "Null");
    assert_eq!(eval("type(print)"), "Function");
    assert_eq!(eval("type(Range(3))"), "Range");
    assert_eq!(eval("type(Iterator([1]))"), "Iterator");
}

#[test]
fn test_string_builtin() {
    assert_eq!(eval("String(5)"), "5");
    assert_eq!(eval("String([1, 2]) + \"!\""), "[1, 2]!");
    assert_eq!(eval("String(null)"), "Null");
}

#[test]
fn test_classes() {
    let source = "
class Counter:
    var count = 0
    fn bump(self, n):
        self.count = self.count + n
    end
end
Counter.bump(5)
Counter.bump(2)
Counter.count";
    assert_eq!(eval(source), "7");
}

#[test]
fn test_class_type_name() {
    let source = "
class Point:
    var x = 0
end
type(Point)";
    assert_eq!(eval(source), "Point");
}

#[test]
fn test_class_member_assignment() {
    let source = "
class Config:
    var debug = false
end
Config.debug = true
Config.debug";
    assert_eq!(eval(source), "True");
}

#[test]
fn test_print_output() {
    assert_eq!(eval_output("print(\"a\", 1)\nprint([true])"), "a 1\n[True]\n");
    assert_eq!(eval_output("print()"), "\n");
}

#[test]
fn test_empty_source_is_null() {
    assert_eq!(eval(""), "Null");
}

#[test]
fn test_zero_arg_function_returns_null() {
    assert_eq!(eval("fn f(): return end\nf()"), "Null");
}

#[test]
fn test_division_by_zero_propagates() {
    assert_eq!(eval("1 / 0"), "inf");
    assert_eq!(eval("(1 / 0) > 100"), "True");
}

#[test]
fn test_index_out_of_range() {
    let err = eval_err("[1][1]");
    assert_eq!(err.to_string(), "[RUNTIME ERROR] index 1 is out of range for length 1");
    let err = eval_err("\"ab\"[5]");
    assert_eq!(err.stage, Stage::Runtime);
    let err = eval_err("[1][0.5]");
    assert!(err.message.contains("non integral"));
}

#[test]
fn test_runtime_type_errors() {
    let err = eval_err("\"a\" + 1");
    assert_eq!(
        err.to_string(),
        "[RUNTIME ERROR] operator '+' is not supported between String and Number"
    );
    assert_eq!(eval_err("5()").to_string(), "[RUNTIME ERROR] Number cannot be called");
    assert!(eval_err("while [1]: break end").message.contains("truth value"));
    assert!(eval_err("[1].frob").message.contains("no member 'frob'"));
    assert!(eval_err("for x in 5: x end").message.contains("iterator"));
}

#[test]
fn test_arity_errors() {
    let err = eval_err("fn f(a): a end\nf()");
    assert_eq!(err.to_string(), "[RUNTIME ERROR] function 'f' expects 1 argument(s), got 0");
    assert!(eval_err("type(1, 2)").message.contains("'type'"));
}

#[test]
fn test_compile_errors() {
    assert_eq!(eval_err("break").stage, Stage::Compile);
    assert_eq!(eval_err("continue").stage, Stage::Compile);
    assert_eq!(eval_err("return 1").stage, Stage::Compile);
    let err = eval_err("var a = 1\nvar a = 2");
    assert!(err.message.contains("already been declared"));
    assert!(err.message.contains("line 2"));
    let err = eval_err("missing");
    assert_eq!(err.to_string(), "[COMPILE ERROR] unresolved identifier 'missing' (line 1)");
}

#[test]
fn test_parse_errors() {
    let err = eval_err("var = 1");
    assert_eq!(err.stage, Stage::Parse);
    assert!(err.to_string().starts_with("[PARSE ERROR]"));
    assert!(eval_err("1 + 2 = 3").message.contains("cannot assign"));
    assert!(eval_err("\"unterminated").message.contains("unclosed string"));
}

#[test]
fn test_module_load_failure() {
    let err = eval_err("import \"no_such_quill_module.so\"");
    assert_eq!(err.stage, Stage::Runtime);
    assert!(err.message.contains("failed to load module 'no_such_quill_module.so'"));
}

#[test]
fn test_range_validation() {
    assert!(eval_err("Range(0, 5, 0)").message.contains("non-zero"));
    assert!(eval_err("Range(\"x\")").message.contains("expects Number"));
    assert!(eval_err("Range(1, 2, 3, 4)").message.contains("'Range'"));
}

#[test]
fn test_interpreter_survives_errors() {
    let mut interp = Interpreter::new();
    let err = interp.run_source_with("[1][9]", "t", &mut NoPrint).unwrap_err();
    assert_eq!(err.stage, Stage::Runtime);
    let result = interp.run_source_with("var a = 50\na", "t", &mut NoPrint).unwrap();
    assert_eq!(result, Object::Number(50.0));
}

#[test]
fn test_heap_released_after_run() {
    let mut interp = Interpreter::new();
    // every iteration rebinds `scratch`, releasing the previous arrays
    let source = "
var keep = \"kept\"
var i = 0
while i < 20:
    var scratch = [i, [i]]
    i = i + 1
end
keep";
    let result = interp.run_source_with(source, "t", &mut NoPrint).unwrap();
    assert_eq!(result, Object::Str("kept".to_owned()));
    // live objects: the 5 seeded builtins, the interned 'kept' literal
    // (shared by the `keep` binding), and the last iteration's two arrays
    assert_eq!(interp.heap_stats().live_objects, 5 + 1 + 2);
}

#[test]
fn test_result_snapshot_is_structural() {
    let mut interp = Interpreter::new();
    let result = interp.run_source_with("[1, [true, \"x\"], null]", "t", &mut NoPrint).unwrap();
    assert_eq!(
        result,
        Object::Array(vec![
            Object::Number(1.0),
            Object::Array(vec![Object::Bool(true), Object::Str("x".to_owned())]),
            Object::Null,
        ])
    );
}
