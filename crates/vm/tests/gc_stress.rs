//! Spec §8 invariant 5: running under a GC-stress mode (collect before
//! every allocation) must not change a program's observable output.
//! Each scenario here runs twice — default config, then `stress_gc: true`
//! with a tiny initial threshold — and asserts identical stdout.

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

fn run_with(config: VmConfig, source: &str) -> String {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let mut vm = Vm::with_writer(config, Box::new(SharedWriter(buf.clone())));
    let result = vm.interpret(source);
    assert!(matches!(result, InterpretResult::Ok), "program failed to run under this config");
    String::from_utf8(buf.lock().unwrap().clone()).unwrap()
}

fn assert_output_parity(source: &str) {
    let default_out = run_with(VmConfig::default(), source);
    let stress_config = VmConfig {
        initial_gc_threshold: 1,
        gc_heap_grow_factor: 2,
        stress_gc: true,
        trace_execution: false,
    };
    let stress_out = run_with(stress_config, source);
    assert_eq!(default_out, stress_out);
}

#[test]
fn arithmetic_is_stable_under_stress_gc() {
    assert_output_parity("print 1 + 2 * 3;");
}

#[test]
fn string_concatenation_is_stable_under_stress_gc() {
    assert_output_parity(r#"var a = "foo"; var b = "bar"; print a + b;"#);
}

#[test]
fn recursion_is_stable_under_stress_gc() {
    assert_output_parity(
        "fun fib(n){ if (n<2) return n; return fib(n-1)+fib(n-2);} print fib(12);",
    );
}

#[test]
fn closures_are_stable_under_stress_gc() {
    assert_output_parity(
        "fun outer(){ var x=1; fun inner(){ x=x+1; print x;} return inner;} \
         var f=outer(); f(); f(); f();",
    );
}

#[test]
fn classes_and_inheritance_are_stable_under_stress_gc() {
    assert_output_parity(
        r#"class A { greet(){ print "hi"; } } class B < A { greet(){ super.greet(); print "B"; } } B().greet();"#,
    );
}

#[test]
fn initializers_are_stable_under_stress_gc() {
    assert_output_parity(r#"class C { init(n){ this.n=n; } } var c = C(5); print c.n;"#);
}

#[test]
fn deep_allocation_churn_is_stable_under_stress_gc() {
    let source = r#"
        class Node {
            init(value) {
                this.value = value;
            }
        }
        var sum = 0;
        var i = 0;
        while (i < 200) {
            var n = Node(i);
            sum = sum + n.value;
            i = i + 1;
        }
        print sum;
    "#;
    assert_output_parity(source);
}
