use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fox_vm::{Runtime, Value};

const FIB: &str = "def run(n) {\n  if n < 2 { return n }\n  return run(n - 1) + run(n - 2)\n}";

const DISPATCH: &str = "class Counter {\n  var n = 0\n  def bump(k) { this.n += k }\n}\ndef run(n) {\n  let c = Counter()\n  for i in 0..n { c.bump(i) }\n  return c.n\n}";

const GENERATOR: &str = "def evens(n) {\n  var i = 0\n  while i < n {\n    yield i\n    i += 2\n  }\n}\ndef run(n) {\n  var total = 0\n  for v in evens(n) { total += v }\n  return total\n}";

/// Compile `src` once and return the runtime with its `run` function.
fn build(src: &str) -> (Runtime, Value) {
    let mut rt = Runtime::default();
    rt.capture_output();
    let module = rt.new_module("bench", None);
    rt.load_source(module, src).expect("compile");
    rt.init_module(module).expect("init");
    let run = rt.global(module, "run").expect("missing run");
    (rt, run)
}

fn run_case(c: &mut Criterion, name: &str, src: &str, arg: i64) {
    let (mut rt, run) = build(src);
    let warmup = rt.call(run, &[Value::Int(arg)]).expect("warmup");
    black_box(warmup);

    c.bench_function(name, |b| {
        b.iter(|| {
            let value = rt.call(run, &[Value::Int(black_box(arg))]).expect("interpret");
            rt.release(value);
        })
    });
}

fn bench_interp(c: &mut Criterion) {
    run_case(c, "fib_20", FIB, 20);
    run_case(c, "method_dispatch_1000", DISPATCH, 1000);
    run_case(c, "generator_1000", GENERATOR, 1000);
}

criterion_group!(benches, bench_interp);
criterion_main!(benches);
