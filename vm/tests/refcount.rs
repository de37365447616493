//! Randomized alias/release sequences run as scripts must keep every
//! refcount equal to the number of holders and free each list once.

use fox_vm::Runtime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const VARS: usize = 6;

/// Holder counts the script should produce.
#[derive(Default)]
struct Model {
    counts: Vec<u32>,
    children: Vec<Vec<usize>>,
    vars: [Option<usize>; VARS],
    freed: usize,
}

impl Model {
    fn alloc(&mut self, children: Vec<usize>) -> usize {
        for &c in &children {
            self.counts[c] += 1;
        }
        self.counts.push(1);
        self.children.push(children);
        self.counts.len() - 1
    }

    fn release(&mut self, obj: usize) {
        let mut work = vec![obj];
        while let Some(o) = work.pop() {
            assert!(self.counts[o] > 0, "model released a dead object");
            self.counts[o] -= 1;
            if self.counts[o] == 0 {
                self.freed += 1;
                work.extend(self.children[o].iter().copied());
            }
        }
    }

    fn store(&mut self, var: usize, value: Option<usize>) {
        if let Some(old) = std::mem::replace(&mut self.vars[var], value) {
            self.release(old);
        }
    }
}

fn script_for(seed: u64, steps: usize) -> (String, String, usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = Model::default();
    let mut src = String::new();
    let mut expected = String::new();
    for v in 0..VARS {
        src.push_str(&format!("var v{v} = nil\n"));
    }
    for step in 0..steps {
        let k = rng.gen_range(0..VARS);
        let j = rng.gen_range(0..VARS);
        match rng.gen_range(0..5) {
            0 => {
                src.push_str(&format!("v{k} = [{step}]\n"));
                let obj = model.alloc(Vec::new());
                model.store(k, Some(obj));
            }
            1 => {
                src.push_str(&format!("v{k} = v{j}\n"));
                if let Some(obj) = model.vars[j] {
                    model.counts[obj] += 1;
                }
                model.store(k, model.vars[j]);
            }
            2 => {
                src.push_str(&format!("v{k} = nil\n"));
                model.store(k, None);
            }
            3 => {
                src.push_str(&format!("v{k} = [v{j}, {step}]\n"));
                let children = model.vars[j].into_iter().collect();
                let obj = model.alloc(children);
                model.store(k, Some(obj));
            }
            _ => {
                // The argument slot holds one more count while refcount runs.
                src.push_str(&format!("print(refcount(v{k}))\n"));
                let count = model.vars[k].map_or(0, |o| model.counts[o] + 1);
                expected.push_str(&format!("{count}\n"));
            }
        }
    }
    for v in 0..VARS {
        src.push_str(&format!("v{v} = nil\n"));
        model.store(v, None);
    }
    assert!(model.counts.iter().all(|&c| c == 0));
    (src, expected, model.freed)
}

#[test]
fn random_alias_sequences_balance() {
    for seed in 0..24u64 {
        let (src, expected, allocated) = script_for(seed, 120);
        let mut rt = Runtime::default();
        rt.capture_output();
        let before = rt.heap.stats();
        rt.run_source("main", &src).unwrap_or_else(|err| panic!("seed {seed}: {err}\n{src}"));
        let after = rt.heap.stats();
        assert_eq!(rt.take_output(), expected, "seed {seed}\n{src}");
        assert_eq!(after.live, before.live, "seed {seed}: leaked instances");
        assert_eq!(
            (after.freed - before.freed) as usize,
            allocated,
            "seed {seed}: every list is freed exactly once"
        );
    }
}

#[test]
fn nested_lists_free_their_items() {
    let mut rt = Runtime::default();
    rt.capture_output();
    let before = rt.heap.stats().live;
    rt.run_source(
        "main",
        "var outer = [[1], [2, [3]]]\nlet inner = outer[1]\nprint(refcount(inner))\nouter = nil\nprint(refcount(inner))",
    )
    .expect("runs");
    assert_eq!(rt.take_output(), "3\n2\n");
    // `inner` is an immutable global and keeps [2, [3]] alive.
    assert_eq!(rt.heap.stats().live, before + 2);
}
