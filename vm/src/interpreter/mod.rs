//! Bytecode execution engine.
//!
//! One explicit frame stack over one shared operand stack. Calls between
//! bytecode functions push a [`Frame`] and keep dispatching in the same
//! loop; nested [`run`] loops only start where native code calls back into
//! bytecode.

mod call;
mod generator;
mod unwind;

use fox_bytecode::{
    CHECK_NULLABLE, CHECK_TOP, Instruction, NameKind, UNRESOLVED_CLASS, decode_at,
};
use fox_object::{
    CatchMarker, ClassId, FuncId, ModuleId, ObjRef, Payload, StackEntry, Symbol,
    Value, fatal,
};
use log::trace;

use crate::builtins;
use crate::descriptor::{ConstId, ConstState, ModuleState};
use crate::error::{ErrorKind, Raised, VmResult};
use crate::Runtime;

pub use call::{call_method, call_value};
pub(crate) use generator::next_nested;
pub(crate) use unwind::run_finalizers;

/// How a generator frame hands back its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    /// `g.next()`: the value replaces the generator entry below the frame.
    Replace,
    /// `for` loop: the value is pushed above the iterator; exhaustion
    /// jumps to `exit` in the caller.
    Push { exit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Normal,
    /// Constructor body; the result is the instance in slot 0.
    Ctor,
    Generator { generator: ObjRef, resume: Resume },
    /// User `next()` called by `ForNext`; StopIteration leaving it jumps to
    /// `exit` in the caller.
    ForIter { exit: usize },
    Constant(ConstId),
    ModuleInit(ModuleId),
}

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub func: FuncId,
    pub pc: usize,
    /// Stack index of slot 0.
    pub base: usize,
    pub kind: FrameKind,
    pub trace: bool,
}

// ── Operand stack ──────────────────────────────────────────────────

impl Runtime {
    #[inline(always)]
    pub(crate) fn push(&mut self, v: Value) {
        self.stack.push(StackEntry::Value(v));
    }

    /// Pop a value; the count moves to the caller.
    #[inline]
    pub(crate) fn pop(&mut self) -> Value {
        match self.stack.pop() {
            Some(StackEntry::Value(v)) => v,
            Some(StackEntry::Catch(_)) => fatal!("popped a catch marker as a value"),
            None => fatal!("operand stack underflow"),
        }
    }

    #[inline]
    pub(crate) fn value_at(&self, index: usize) -> Value {
        match self.stack.get(index) {
            Some(StackEntry::Value(v)) => *v,
            Some(StackEntry::Catch(_)) => fatal!("catch marker read as a value at {index}"),
            None => fatal!("stack read past top at {index}"),
        }
    }

    #[inline]
    pub(crate) fn peek(&self, depth: usize) -> Value {
        self.value_at(self.stack.len() - 1 - depth)
    }

    /// Overwrite a stack entry, releasing what it held.
    pub(crate) fn replace_at(&mut self, index: usize, v: Value) {
        let old = std::mem::replace(&mut self.stack[index], StackEntry::Value(v));
        if let StackEntry::Value(old) = old {
            self.release(old);
        }
    }

    /// Pop entries down to `len`, releasing values and dropping markers.
    pub(crate) fn truncate_stack(&mut self, len: usize) {
        while self.stack.len() > len {
            if let Some(StackEntry::Value(v)) = self.stack.pop() {
                self.release(v);
            }
        }
    }

    /// Remove the top `n` values, keeping their counts.
    pub(crate) fn pop_values(&mut self, n: usize) -> Vec<Value> {
        let start = self.stack.len() - n;
        self.stack
            .split_off(start)
            .into_iter()
            .map(|e| match e {
                StackEntry::Value(v) => v,
                StackEntry::Catch(_) => fatal!("catch marker among operands"),
            })
            .collect()
    }

    pub(crate) fn error_is(&self, kind: ErrorKind) -> bool {
        self.current_error
            .is_some_and(|e| self.is_instance(e, builtins::error_class(kind)))
    }
}

// ── Dispatch ───────────────────────────────────────────────────────

/// Run until the frame at `stop_depth` returns (its result is handed back)
/// or an exception leaves it.
pub(crate) fn run(rt: &mut Runtime, stop_depth: usize) -> VmResult<Value> {
    loop {
        match execute(rt, stop_depth) {
            Ok(v) => return Ok(v),
            Err(Raised) => unwind::unwind(rt, stop_depth)?,
        }
    }
}

fn execute(rt: &mut Runtime, stop_depth: usize) -> VmResult<Value> {
    loop {
        let fi = rt.frames.len() - 1;
        let Frame { func, pc, base, trace, .. } = rt.frames[fi];
        let code = &rt.functions[func.index()].code;
        let (instr, next) = match decode_at(code, pc) {
            Ok(decoded) => decoded,
            Err(err) => fatal!(
                "corrupted bytecode in {}: {err}",
                rt.functions[func.index()].name
            ),
        };
        if trace {
            let f = &rt.functions[func.index()];
            trace!("{}.{} {pc:04} {instr} [{}]", rt.modules[f.module.index()].name, f.name, rt.stack.len());
        }
        rt.frames[fi].pc = next;

        match instr {
            Instruction::Nop => {}
            Instruction::PushNil => rt.push(Value::Nil),
            Instruction::PushTrue => rt.push(Value::Bool(true)),
            Instruction::PushFalse => rt.push(Value::Bool(false)),
            Instruction::PushInt { value } => rt.push(Value::Int(value as i64)),
            Instruction::Pop => {
                let v = rt.pop();
                rt.release(v);
            }
            Instruction::PopN { count } => {
                let len = rt.stack.len() - count as usize;
                rt.truncate_stack(len);
            }
            Instruction::Dup => {
                let v = rt.peek(0);
                rt.retain(v);
                rt.push(v);
            }
            Instruction::Dup2 => {
                let (a, b) = (rt.peek(1), rt.peek(0));
                rt.retain(a);
                rt.retain(b);
                rt.push(a);
                rt.push(b);
            }
            Instruction::Swap => {
                let n = rt.stack.len();
                rt.stack.swap(n - 1, n - 2);
            }
            Instruction::LoadLocal { slot } => {
                let v = rt.value_at(base + slot as usize);
                rt.retain(v);
                rt.push(v);
            }
            Instruction::StoreLocal { slot } => {
                let v = rt.pop();
                rt.replace_at(base + slot as usize, v);
            }
            Instruction::Return { has_value } => {
                let result = if has_value { rt.pop() } else { Value::Nil };
                if let Some(v) = call::return_from(rt, result, stop_depth) {
                    return Ok(v);
                }
            }
            Instruction::GenReturn => generator::finish(rt)?,
            Instruction::Yield => {
                if let Some(v) = generator::suspend(rt, stop_depth) {
                    return Ok(v);
                }
            }
            Instruction::Call { argc } => {
                let argc = argc as usize;
                let at = rt.stack.len() - argc - 1;
                let callee = rt.value_at(at);
                call::invoke(rt, callee, at, argc, FrameKind::Normal)?;
            }
            Instruction::Not => {
                let v = rt.pop();
                rt.release(v);
                rt.push(Value::Bool(!v.is_truthy()));
            }
            Instruction::BuildString { count } => {
                let parts = rt.pop_values(count as usize);
                let mut text = String::new();
                let mut failed = None;
                for &part in &parts {
                    if failed.is_none() {
                        match builtins::display(rt, part) {
                            Ok(s) => text.push_str(&s),
                            Err(raised) => failed = Some(raised),
                        }
                    }
                }
                for part in parts {
                    rt.release(part);
                }
                if let Some(raised) = failed {
                    return Err(raised);
                }
                let s = rt.new_string(text)?;
                rt.push(s);
            }
            Instruction::BuildList { count } => {
                let items = rt.pop_values(count as usize);
                let list = rt.new_list(items)?;
                rt.push(list);
            }
            Instruction::GetIter => call::get_iter(rt)?,
            Instruction::Throw => {
                let v = rt.pop();
                if !rt.is_instance(v, builtins::ERROR) {
                    let name = rt.class_name_of(v).to_string();
                    rt.release(v);
                    return Err(rt.raise(
                        ErrorKind::Type,
                        format!("can only throw Error instances, not {name}"),
                    ));
                }
                return Err(rt.set_error(v));
            }
            Instruction::Rethrow => {
                let v = rt.pop();
                if let Some(old) = rt.current_error.replace(v) {
                    rt.release(old);
                }
                return Err(Raised);
            }
            Instruction::PopHandler => match rt.stack.pop() {
                Some(StackEntry::Catch(_)) => {}
                other => fatal!("PopHandler found {other:?} instead of a catch marker"),
            },

            Instruction::PushConst { idx } => {
                let v = rt.functions[func.index()].constants[idx as usize];
                rt.retain(v);
                rt.push(v);
            }
            Instruction::Jump { offset } => jump(rt, fi, next, offset),
            Instruction::JumpIfFalse { offset } => {
                let v = rt.pop();
                rt.release(v);
                if !v.is_truthy() {
                    jump(rt, fi, next, offset);
                }
            }
            Instruction::JumpIfTrue { offset } => {
                let v = rt.pop();
                rt.release(v);
                if v.is_truthy() {
                    jump(rt, fi, next, offset);
                }
            }
            Instruction::JumpIfFalseOrPop { offset } => {
                if rt.peek(0).is_truthy() {
                    let v = rt.pop();
                    rt.release(v);
                } else {
                    jump(rt, fi, next, offset);
                }
            }
            Instruction::JumpIfTrueOrPop { offset } => {
                if rt.peek(0).is_truthy() {
                    jump(rt, fi, next, offset);
                } else {
                    let v = rt.pop();
                    rt.release(v);
                }
            }
            Instruction::JumpIfNotNil { offset } => {
                let v = rt.pop();
                rt.release(v);
                if !v.is_nil() {
                    jump(rt, fi, next, offset);
                }
            }
            Instruction::PushHandler { offset } => {
                let handler_pc = target(next, offset) as u32;
                rt.stack.push(StackEntry::Catch(CatchMarker { handler_pc }));
            }
            Instruction::ForNext { offset } => call::for_next(rt, target(next, offset))?,
            Instruction::CallMethod { argc, symbol } => {
                let at = rt.stack.len() - argc as usize - 1;
                call::call_method_at(rt, at, Symbol(symbol), argc as usize, FrameKind::Normal)?;
            }
            Instruction::GetAttr { symbol } => call::get_attr(rt, Symbol(symbol))?,
            Instruction::SetAttr { symbol } => call::set_attr(rt, Symbol(symbol))?,
            Instruction::MakeClosure { captures, func } => {
                let fields = rt.pop_values(captures as usize);
                let closure = rt.alloc(
                    builtins::FUNCTION,
                    fields,
                    Payload::Closure(FuncId(func)),
                )?;
                rt.push(closure);
            }
            Instruction::InitModule { module } => start_module_init(rt, ModuleId(module))?,
            Instruction::CallSuperCtor { argc, class } => {
                call::call_super_ctor(rt, ClassId(class), argc as usize)?
            }
            Instruction::CheckType { class: UNRESOLVED_CLASS, .. }
            | Instruction::CatchTest { class: UNRESOLVED_CLASS, .. } => {
                return Err(unresolved(rt, func, pc, None));
            }
            Instruction::CheckType { slot, class } => {
                check_type(rt, base, slot, ClassId(class))?
            }

            Instruction::LoadName { kind, a, b } => load_name(rt, func, pc, kind, a, b)?,
            Instruction::StoreName { kind, a, b } => match kind {
                NameKind::Global => {
                    let v = rt.pop();
                    let slot = &mut rt.modules[a as usize].globals[b as usize];
                    let old = std::mem::replace(slot, v);
                    rt.release(old);
                }
                NameKind::Unresolved => return Err(unresolved(rt, func, pc, Some(Symbol(a)))),
                other => fatal!("StoreName into a {} binding", other.name()),
            },
            Instruction::CatchTest { class, offset } => {
                let error = rt.peek(0);
                if !rt.is_instance(error, ClassId(class)) {
                    jump(rt, fi, next, offset);
                }
            }
            Instruction::CallSuper { argc, symbol, class } => {
                call::call_super(rt, ClassId(class), Symbol(symbol), argc as usize)?
            }
        }
    }
}

#[inline(always)]
fn target(next: usize, offset: i32) -> usize {
    (next as i64 + offset as i64) as usize
}

#[inline(always)]
fn jump(rt: &mut Runtime, fi: usize, next: usize, offset: i32) {
    rt.frames[fi].pc = target(next, offset);
}

fn check_type(rt: &mut Runtime, base: usize, slot: u16, class: ClassId) -> VmResult<()> {
    let nullable = slot & CHECK_NULLABLE != 0;
    let slot = slot & !CHECK_NULLABLE;
    let v = if slot == CHECK_TOP {
        rt.peek(0)
    } else {
        rt.value_at(base + slot as usize)
    };
    if (nullable && v.is_nil()) || rt.is_instance(v, class) {
        return Ok(());
    }
    let expected = rt.classes[class.index()].name.clone();
    let got = rt.class_name_of(v).to_string();
    Err(rt.raise(ErrorKind::Type, format!("expected {expected}, got {got}")))
}

/// Raise the error a failed link recorded for the site at `pc`.
fn unresolved(rt: &mut Runtime, func: FuncId, pc: usize, name: Option<Symbol>) -> Raised {
    if let Some((kind, message)) = rt.unresolved.get(&(func, pc)).cloned() {
        return rt.raise(kind, message);
    }
    match name {
        Some(sym) => {
            let name = rt.symbols.resolve(sym).to_string();
            rt.raise(ErrorKind::Name, format!("undefined name '{name}'"))
        }
        None => rt.raise(ErrorKind::Name, "unresolved class"),
    }
}

fn load_name(
    rt: &mut Runtime,
    func: FuncId,
    pc: usize,
    kind: NameKind,
    a: u32,
    b: u32,
) -> VmResult<()> {
    let v = match kind {
        NameKind::Unresolved => return Err(unresolved(rt, func, pc, Some(Symbol(a)))),
        NameKind::Global => rt.modules[a as usize].globals[b as usize],
        NameKind::Function => Value::Function(FuncId(a)),
        NameKind::Native => Value::Native(fox_object::NativeId(a)),
        NameKind::Class => Value::Class(ClassId(a)),
        NameKind::Module => Value::Module(ModuleId(a)),
        NameKind::Constant => return load_constant(rt, ConstId(a)),
    };
    rt.retain(v);
    rt.push(v);
    Ok(())
}

/// Push the value of a constant, starting its initializer on first use.
pub(crate) fn load_constant(rt: &mut Runtime, id: ConstId) -> VmResult<()> {
    match rt.constants[id.index()].state {
        ConstState::Ready(v) => {
            rt.retain(v);
            rt.push(v);
            Ok(())
        }
        ConstState::Pending(f) => {
            rt.constants[id.index()].state = ConstState::Evaluating(f);
            let at = rt.stack.len();
            rt.push(Value::Function(f));
            call::enter(rt, f, at, 0, FrameKind::Constant(id)).inspect_err(|_| {
                rt.constants[id.index()].state = ConstState::Pending(f);
            })
        }
        ConstState::Evaluating(_) => {
            let name = rt.constants[id.index()].name.clone();
            Err(rt.raise(
                ErrorKind::LoopReference,
                format!("constant {name} refers to itself"),
            ))
        }
    }
}

/// `InitModule`: push the init frame of `module` if it has not run yet.
fn start_module_init(rt: &mut Runtime, module: ModuleId) -> VmResult<()> {
    let Some(f) = module_init_due(rt, module)? else {
        return Ok(());
    };
    rt.modules[module.index()].state = ModuleState::Initializing;
    let at = rt.stack.len();
    rt.push(Value::Function(f));
    call::enter(rt, f, at, 0, FrameKind::ModuleInit(module)).inspect_err(|_| {
        rt.modules[module.index()].state = ModuleState::Failed;
    })
}

fn module_init_due(rt: &mut Runtime, module: ModuleId) -> VmResult<Option<FuncId>> {
    let m = &rt.modules[module.index()];
    match m.state {
        ModuleState::Compiled => Ok(m.init),
        ModuleState::Failed => {
            let name = m.name.clone();
            Err(rt.raise(
                ErrorKind::Import,
                format!("module {name} failed to initialize"),
            ))
        }
        _ => Ok(None),
    }
}

/// Run the init function of `module` to completion (host entry point).
pub(crate) fn init_module(rt: &mut Runtime, module: ModuleId) -> VmResult<Value> {
    let Some(f) = module_init_due(rt, module)? else {
        return Ok(Value::Nil);
    };
    let stop = rt.frames.len();
    let at = rt.stack.len();
    rt.modules[module.index()].state = ModuleState::Initializing;
    rt.push(Value::Function(f));
    if let Err(raised) = call::enter(rt, f, at, 0, FrameKind::ModuleInit(module)) {
        rt.modules[module.index()].state = ModuleState::Failed;
        rt.truncate_stack(at);
        return Err(raised);
    }
    run(rt, stop)
}

#[cfg(test)]
mod tests {
    use crate::test_util::{run_failing, run_source};
    use crate::{FoxError, Runtime};

    fn failing_class(source: &str) -> String {
        match run_failing(source).0 {
            FoxError::Runtime { class, .. } => class,
            other => panic!("expected a runtime error, got {other}"),
        }
    }

    #[test]
    fn arithmetic_and_locals() {
        let out = run_source(
            "def f(a, b) {\n  let c = a * b\n  var d = c - 1\n  d += 10\n  return d\n}\nprint(f(3, 4))",
        );
        assert_eq!(out, "21\n");
    }

    #[test]
    fn while_with_break_and_continue() {
        let out = run_source(
            "var i = 0\nvar s = 0\nwhile true {\n  i += 1\n  if i > 10 { break }\n  if i % 2 == 0 { continue }\n  s += i\n}\nprint(s)",
        );
        assert_eq!(out, "25\n");
    }

    #[test]
    fn for_over_list_and_range() {
        let out = run_source(
            "var s = 0\nfor x in [1, 2, 3] { s += x }\nfor i in 0..4 { s += i }\nprint(s)",
        );
        assert_eq!(out, "12\n");
    }

    #[test]
    fn closures_capture_by_copy() {
        let out = run_source(
            "def make(n) {\n  let k = n * 2\n  return fn(x) => x + k\n}\nlet add = make(5)\nprint(add(1))\nprint(add(2))",
        );
        assert_eq!(out, "11\n12\n");
    }

    #[test]
    fn methods_see_this_through_closures() {
        let out = run_source(
            "class Counter(start) {\n  var n = start\n  def adder() { return fn(d) => this.n + d }\n}\nlet c = Counter(10)\nlet f = c.adder()\nprint(f(5))",
        );
        assert_eq!(out, "15\n");
    }

    #[test]
    fn generator_yields_in_order_then_stops() {
        let out = run_source(
            "def gen() {\n  yield 1\n  yield 2\n  yield 3\n}\nlet g = gen()\nprint(g.next())\nprint(g.next())\nprint(g.next())\nfor attempt in 0..2 {\n  try { g.next() } catch StopIteration { print(\"stop\") }\n}",
        );
        assert_eq!(out, "1\n2\n3\nstop\nstop\n");
    }

    #[test]
    fn generator_in_for_loop() {
        let out = run_source(
            "def upto(n) {\n  var i = 0\n  while i < n {\n    yield i\n    i += 1\n  }\n}\nvar s = 0\nfor v in upto(5) { s += v }\nprint(s)",
        );
        assert_eq!(out, "10\n");
    }

    #[test]
    fn catch_by_superclass() {
        let out = run_source(
            "class A extends Error {}\nclass B extends A {}\nclass C extends Error {}\ntry {\n  try { throw B(\"boom\") } catch C { print(\"wrong\") }\n} catch A as e {\n  print(\"caught \" + e.message)\n}",
        );
        assert_eq!(out, "caught boom\n");
    }

    #[test]
    fn handler_releases_values_created_in_try() {
        let mut rt = Runtime::default();
        rt.capture_output();
        rt.run_source(
            "main",
            "def work() {\n  let a = [1, 2]\n  let b = \"text\" + \"more\"\n  throw ValueError(\"x\")\n}\nfor i in 0..50 {\n  try { work() } catch ValueError { }\n}",
        )
        .expect("runs");
        assert_eq!(rt.stack_depth(), 0);
        let live_after_first = rt.heap.stats().live;
        rt.run_source(
            "again",
            "def work() {\n  let a = [1, 2]\n  throw ValueError(\"x\")\n}\nfor i in 0..50 {\n  try { work() } catch ValueError { }\n}",
        )
        .expect("runs");
        assert!(rt.heap.stats().live <= live_after_first + 8);
    }

    #[test]
    fn unbounded_recursion_overflows() {
        let mut rt = Runtime::default();
        rt.capture_output();
        let err = rt
            .run_source("main", "def down(n) { return down(n + 1) + 1 }\ndown(0)")
            .expect_err("overflows");
        assert_eq!(err.class_name(), "StackOverflowError");
        assert_eq!(rt.stack_depth(), 0);
        assert_eq!(rt.call_depth(), 0);
    }

    #[test]
    fn overflow_is_catchable() {
        let out = run_source(
            "def down(n) { return down(n + 1) }\ntry { down(0) } catch StackOverflowError { print(\"deep\") }\nprint(\"after\")",
        );
        assert_eq!(out, "deep\nafter\n");
    }

    #[test]
    fn constants_are_lazy() {
        let out = run_source(
            "let LIMIT = compute()\ndef compute() {\n  print(\"computing\")\n  return 42\n}\nprint(\"start\")\nprint(LIMIT)\nprint(LIMIT)",
        );
        assert_eq!(out, "start\ncomputing\n42\n42\n");
    }

    #[test]
    fn self_referential_constant() {
        assert_eq!(failing_class("let LOOP = LOOP + 1\nprint(LOOP)"), "LoopReferenceError");
    }

    #[test]
    fn wrong_arity() {
        assert_eq!(failing_class("def f(a, b) { return a }\nf(1)"), "ArgumentError");
    }

    #[test]
    fn optional_and_variadic_parameters() {
        let out = run_source(
            "def f(a, b?, c = 7, *rest) {\n  print(a, b, c, len(rest))\n}\nf(1)\nf(1, 2, 3, 4, 5)",
        );
        assert_eq!(out, "1 nil 7 0\n1 2 3 2\n");
    }

    #[test]
    fn annotated_parameter_is_checked() {
        assert_eq!(failing_class("def f(n: Int) { return n }\nf(\"x\")"), "TypeError");
    }

    #[test]
    fn switch_matches_cases() {
        let out = run_source(
            "def name(n) {\n  switch n {\n    case 1, 2 { return \"small\" }\n    case 3 { return \"three\" }\n    default { return \"other\" }\n  }\n}\nprint(name(2), name(3), name(9))",
        );
        assert_eq!(out, "small three other\n");
    }

    #[test]
    fn destructors_run_most_derived_first() {
        let out = run_source(
            "class Base {\n  def __del__() { print(\"base\") }\n}\nclass Leaf extends Base {\n  def __del__() { print(\"leaf\") }\n}\ndef scope() {\n  let x = Leaf()\n}\nscope()\nprint(\"done\")",
        );
        assert_eq!(out, "leaf\nbase\ndone\n");
    }

    #[test]
    fn ternary_and_logic() {
        let out = run_source("let a = nil\nprint(a or 3, 1 and 2, a ? 1 : 2, !a, not true)");
        assert_eq!(out, "3 2 2 true false\n");
    }
}
