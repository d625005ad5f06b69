//! End-to-end coverage of spec §8's scenario table: the six stdout
//! scenarios and the three compile/runtime error scenarios, run through
//! the public `ember_vm::Vm` API exactly as the CLI or a REPL would.

use std::sync::{Arc, Mutex};

use ember_vm::{InterpretResult, Vm, VmConfig};

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run(source: &str) -> (InterpretResult, String) {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let mut vm = Vm::with_writer(VmConfig::default(), Box::new(SharedWriter(buf.clone())));
    let result = vm.interpret(source);
    let out = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    (result, out)
}

#[test]
fn scenario_1_arithmetic_precedence() {
    let (result, out) = run("print 1 + 2 * 3;");
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(out, "7\n");
}

#[test]
fn scenario_2_string_concatenation() {
    let (result, out) = run(r#"var a = "foo"; var b = "bar"; print a + b;"#);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(out, "foobar\n");
}

#[test]
fn scenario_3_recursive_fibonacci() {
    let source =
        "fun fib(n){ if (n<2) return n; return fib(n-1)+fib(n-2);} print fib(10);";
    let (result, out) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(out, "55\n");
}

#[test]
fn scenario_4_closure_over_mutable_local() {
    let source = "fun outer(){ var x=1; fun inner(){ x=x+1; print x;} return inner;} \
                   var f=outer(); f(); f(); f();";
    let (result, out) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(out, "2\n3\n4\n");
}

#[test]
fn scenario_5_super_call_through_inheritance() {
    let source = r#"class A { greet(){ print "hi"; } } class B < A { greet(){ super.greet(); print "B"; } } B().greet();"#;
    let (result, out) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(out, "hi\nB\n");
}

#[test]
fn scenario_6_initializer_sets_field() {
    let source = r#"class C { init(n){ this.n=n; } } var c = C(5); print c.n;"#;
    let (result, out) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(out, "5\n");
}

#[test]
fn scenario_7_negating_a_string_is_a_runtime_error() {
    let (result, _) = run(r#"print -"x";"#);
    match result {
        InterpretResult::RuntimeError(err) => {
            assert!(err.message.contains("Operand must be a number."));
        }
        _ => panic!("expected a runtime error, got a different result"),
    }
}

#[test]
fn scenario_8_redeclared_local_is_a_compile_error() {
    let (result, _) = run("{ var a; var a; }");
    match result {
        InterpretResult::CompileError(errors) => {
            assert!(errors
                .iter()
                .any(|e| e.message.contains("Already a variable with this name in this scope.")));
        }
        _ => panic!("expected a compile error, got a different result"),
    }
}

#[test]
fn scenario_9_top_level_return_is_a_compile_error() {
    let (result, _) = run("return 1;");
    match result {
        InterpretResult::CompileError(errors) => {
            assert!(errors
                .iter()
                .any(|e| e.message.contains("Can't return from top-level code.")));
        }
        _ => panic!("expected a compile error, got a different result"),
    }
}

#[test]
fn interpret_is_deterministic() {
    let source = "fun fib(n){ if (n<2) return n; return fib(n-1)+fib(n-2);} print fib(15);";
    let (_, first) = run(source);
    let (_, second) = run(source);
    assert_eq!(first, second);
}

#[test]
fn reading_a_method_without_calling_it_yields_a_bound_method() {
    let source = r#"
        class Greeter {
            hello() { print "hello"; }
        }
        var g = Greeter();
        var m = g.hello;
        m();
    "#;
    let (result, out) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(out, "hello\n");
}
