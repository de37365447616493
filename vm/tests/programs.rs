//! End-to-end behaviour of whole programs.

use fox_vm::{Config, FoxError, Runtime, Value};
use pretty_assertions::assert_eq;

fn run(source: &str) -> (Runtime, Result<Value, FoxError>) {
    let mut rt = Runtime::default();
    rt.capture_output();
    let result = rt.run_source("main", source);
    (rt, result)
}

fn output(source: &str) -> String {
    let (mut rt, result) = run(source);
    if let Err(err) = result {
        panic!("script failed: {err}\n{}", rt.take_output());
    }
    rt.take_output()
}

#[test]
fn precedence() {
    assert_eq!(output("print(2 + 3 * 4)\nprint((2 + 3) * 4)"), "14\n20\n");
}

#[test]
fn class_used_before_definition() {
    assert_eq!(
        output("def make() { return Later(2) }\nprint(make().twice())\nclass Later(v) {\n  var v = v\n  def twice() { return this.v * 2 }\n}"),
        "4\n"
    );
}

#[test]
fn never_defined_name_is_a_name_error() {
    let (_, result) = run("def f() {\n  return Ghost()\n}");
    match result {
        Err(FoxError::Link(ds)) => {
            assert_eq!(ds.len(), 1);
            assert_eq!(ds[0].message, "undefined name 'Ghost'");
            assert_eq!(ds[0].line, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn generator_exhaustion_repeats() {
    let mut rt = Runtime::default();
    rt.capture_output();
    let m = rt.new_module("main", None);
    rt.load_source(m, "def three() {\n  yield 1\n  yield 2\n  yield 3\n}\nlet g = three()")
        .expect("compiles");
    rt.init_module(m).expect("runs");
    let g = rt.global(m, "g").expect("bound");
    let next = rt.eval(m, "g.next").expect("bound method");
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rt.call(next, &[]).expect("yields"));
    }
    assert_eq!(seen, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    for _ in 0..2 {
        let err = rt.call(next, &[]).expect_err("exhausted");
        assert_eq!(err.class_name(), "StopIteration");
    }
    rt.release(next);
    assert!(matches!(g, Value::Object(_)));
}

#[test]
fn generator_keeps_locals_between_resumptions() {
    assert_eq!(
        output("def fib() {\n  var a = 0\n  var b = 1\n  while true {\n    yield a\n    let t = a + b\n    a = b\n    b = t\n  }\n}\nlet g = fib()\nvar out = []\nfor i in 0..8 { out.push(g.next()) }\nprint(out)"),
        "[0, 1, 1, 2, 3, 5, 8, 13]\n"
    );
}

#[test]
fn catch_routes_by_class() {
    assert_eq!(
        output("class A extends Error {}\nclass B extends A {}\nclass C extends Error {}\ndef route(e) {\n  try { throw e }\n  catch C { return \"C\" }\n  catch A { return \"A\" }\n}\nprint(route(B(\"b\")), route(C(\"c\")))"),
        "A C\n"
    );
}

#[test]
fn unwinding_releases_exactly_once() {
    let mut rt = Runtime::default();
    rt.capture_output();
    let baseline = rt.heap.stats().live;
    rt.run_source(
        "main",
        "class A extends Error {}\ndef deep(n, acc) {\n  let mine = [n, acc]\n  if n == 0 { throw A(\"bottom\") }\n  return deep(n - 1, mine)\n}\nvar caught = 0\nfor i in 0..30 {\n  try { deep(10, [i]) } catch A { caught += 1 }\n}\nprint(caught)",
    )
    .expect("runs");
    assert_eq!(rt.take_output(), "30\n");
    assert_eq!(rt.stack_depth(), 0);
    let stats = rt.heap.stats();
    // Only compile-time constants may remain.
    assert!(stats.live < baseline + 8, "{stats:?}");
    assert_eq!(stats.allocated - stats.freed, stats.live as u64);
}

#[test]
fn recursion_guard_restores_the_stack() {
    let config = Config { max_call_depth: 64, ..Config::default() };
    let mut rt = Runtime::new(config);
    rt.capture_output();
    let err = rt
        .run_source("main", "def spin(n) { return spin(n + 1) }\nspin(0)")
        .expect_err("overflows");
    assert_eq!(err.class_name(), "StackOverflowError");
    assert!(!err.trace().is_empty());
    assert_eq!(rt.stack_depth(), 0);
    assert_eq!(rt.call_depth(), 0);
    rt.run_source("after", "print(\"still fine\")").expect("runtime usable");
    assert_eq!(rt.take_output(), "still fine\n");
}

#[test]
fn inheritance_snapshot_is_kept() {
    assert_eq!(
        output("class Base {\n  def greet() { return \"v1\" }\n}\nclass Derived extends Base {}\ndef Base.greet() { return \"v2\" }\nclass Late extends Base {}\nprint(Base().greet(), Derived().greet(), Late().greet())"),
        "v2 v1 v2\n"
    );
}

#[test]
fn numeric_tower() {
    assert_eq!(
        output("let big = 9223372036854775807 + 1\nprint(big, big - 1 == 9223372036854775807)\nprint(7 / 2, 1r / 3 + 1r / 6, 1 / 2.0)"),
        "9223372036854775808 true\n3 1/2 0.5\n"
    );
}

#[test]
fn destructor_chain_runs_on_release() {
    assert_eq!(
        output("class R {\n  def __del__() { print(\"base del\") }\n}\nclass S extends R {\n  def __del__() { print(\"sub del\") }\n}\ndef scope() {\n  let s = S()\n  print(\"in scope\")\n}\nscope()\nprint(\"done\")"),
        "in scope\nsub del\nbase del\ndone\n"
    );
}

#[test]
fn memory_quota_is_catchable() {
    let mut config = Config::default();
    config.heap.max_objects = 5_000;
    let mut rt = Runtime::new(config);
    rt.capture_output();
    rt.run_source(
        "main",
        "var keep = []\ntry {\n  while true { keep.push([1]) }\n} catch MemoryError { print(\"full\") }\nkeep = nil\nprint(len([1, 2, 3]))",
    )
    .expect("runs");
    assert_eq!(rt.take_output(), "full\n3\n");
}

#[test]
fn runtime_error_trace_names_frames() {
    let (_, result) = run("def inner() {\n  return [][3]\n}\ndef outer() {\n  return inner()\n}\nouter()");
    let err = result.expect_err("index error");
    assert_eq!(err.class_name(), "IndexError");
    let frames: Vec<(&str, u32)> = err.trace().iter().map(|t| (t.function.as_str(), t.line)).collect();
    assert_eq!(frames[..2], [("inner", 2), ("outer", 5)]);
}
