//! Call protocol: frame entry and exit, natives, construction, method
//! dispatch, attributes and iteration.

use fox_object::{ClassId, FuncId, ModuleId, NativeId, ObjRef, Payload, Symbol, Value, fatal};

use super::{FrameKind, Resume, generator, run};
use crate::builtins;
use crate::descriptor::{Binding, Ctor, Method, NativeFn};
use crate::error::{ErrorKind, Raised, VmResult};
use crate::{Runtime, native};

// ── Frames ─────────────────────────────────────────────────────────

/// Push a frame for `f` whose callee and `argc` arguments start at `at`.
pub(super) fn enter(
    rt: &mut Runtime,
    f: FuncId,
    at: usize,
    argc: usize,
    kind: FrameKind,
) -> VmResult<()> {
    if rt.frames.len() >= rt.config.max_call_depth {
        let limit = rt.config.max_call_depth;
        return Err(rt.raise(
            ErrorKind::StackOverflow,
            format!("maximum call depth of {limit} exceeded"),
        ));
    }
    let needed = at + rt.functions[f.index()].max_stack as usize;
    if needed > rt.config.stack_limit {
        let limit = rt.config.stack_limit;
        return Err(rt.raise(
            ErrorKind::StackOverflow,
            format!("operand stack limit of {limit} entries exceeded"),
        ));
    }
    prepare_args(rt, f, at, argc)?;
    let module = rt.functions[f.index()].module;
    let trace = rt.config.trace_all || rt.modules[module.index()].trace;
    rt.frames.push(super::Frame {
        func: f,
        pc: 0,
        base: at,
        kind,
        trace,
    });
    Ok(())
}

/// Check the argument count and complete the parameter and capture slots.
pub(super) fn prepare_args(rt: &mut Runtime, f: FuncId, at: usize, argc: usize) -> VmResult<()> {
    let desc = &rt.functions[f.index()];
    let fixed = desc.fixed_params() as usize;
    let required = desc.required as usize;
    let variadic = desc.is_variadic();
    let captures = desc.captures as usize;
    if argc < required || (!variadic && argc > fixed) {
        let expected = match (variadic, required == fixed) {
            (true, _) => format!("at least {required}"),
            (false, true) => required.to_string(),
            (false, false) => format!("{required} to {fixed}"),
        };
        let plural = if expected == "1" { "" } else { "s" };
        let msg = format!(
            "{}() takes {expected} argument{plural} ({argc} given)",
            desc.name
        );
        return Err(rt.raise(ErrorKind::Argument, msg));
    }
    for _ in argc..fixed {
        rt.push(Value::Nil);
    }
    if variadic {
        let rest = if argc > fixed { rt.pop_values(argc - fixed) } else { Vec::new() };
        let list = rt.new_list(rest)?;
        rt.push(list);
    }
    if captures > 0 {
        let callee = rt.value_at(at);
        let captured = rt.instance(callee).map(|i| i.fields.clone()).unwrap_or_default();
        if captured.len() != captures {
            fatal!(
                "closure of {} carries {} captures, expected {captures}",
                rt.functions[f.index()].name,
                captured.len()
            );
        }
        for v in captured {
            rt.retain(v);
            rt.push(v);
        }
    }
    Ok(())
}

/// Pop the current frame, leaving `result` where its callee was. Returns
/// the result when the frame was the one `run` was started for.
pub(super) fn return_from(rt: &mut Runtime, result: Value, stop_depth: usize) -> Option<Value> {
    let Some(frame) = rt.frames.pop() else {
        fatal!("return without a frame");
    };
    let at_stop = rt.frames.len() == stop_depth;
    match frame.kind {
        FrameKind::Normal | FrameKind::ForIter { .. } => {
            rt.truncate_stack(frame.base);
            if at_stop {
                return Some(result);
            }
            rt.push(result);
        }
        FrameKind::Ctor => {
            rt.release(result);
            rt.truncate_stack(frame.base + 1);
            if at_stop {
                return Some(rt.pop());
            }
        }
        FrameKind::Constant(id) => {
            rt.truncate_stack(frame.base);
            rt.retain(result);
            rt.constants[id.index()].state = crate::descriptor::ConstState::Ready(result);
            if at_stop {
                return Some(result);
            }
            rt.push(result);
        }
        FrameKind::ModuleInit(m) => {
            rt.truncate_stack(frame.base);
            rt.modules[m.index()].state = crate::descriptor::ModuleState::Initialized;
            if at_stop {
                return Some(result);
            }
            rt.release(result);
        }
        FrameKind::Generator { .. } => fatal!("plain return out of a generator frame"),
    }
    None
}

// ── Calls ──────────────────────────────────────────────────────────

/// Call `callee`, which sits at `at` with `argc` arguments above it. Either
/// pushes a frame or completes the call leaving the result at `at`.
pub(super) fn invoke(
    rt: &mut Runtime,
    callee: Value,
    at: usize,
    argc: usize,
    kind: FrameKind,
) -> VmResult<()> {
    match callee {
        Value::Function(f) => call_function(rt, f, at, argc, kind),
        Value::Native(n) => call_native(rt, n, callee, at, argc, false),
        Value::Class(c) => construct(rt, c, at, argc),
        Value::Object(r) => {
            let (payload, fields) = match rt.heap.get(r) {
                Some(i) => (&i.payload, &i.fields),
                None => fatal!("call of freed instance"),
            };
            match payload {
                Payload::Closure(f) => {
                    let f = *f;
                    call_function(rt, f, at, argc, kind)
                }
                Payload::BoundMethod => {
                    let (receiver, method) = (fields[0], fields[1]);
                    rt.retain(receiver);
                    rt.replace_at(at, receiver);
                    match method {
                        Value::Function(f) => call_function(rt, f, at, argc, kind),
                        Value::Native(n) => call_native(rt, n, receiver, at, argc, false),
                        other => fatal!("bound method over {other:?}"),
                    }
                }
                _ => Err(not_callable(rt, callee)),
            }
        }
        _ => Err(not_callable(rt, callee)),
    }
}

fn not_callable(rt: &mut Runtime, callee: Value) -> Raised {
    let name = rt.class_name_of(callee).to_string();
    rt.raise(ErrorKind::Type, format!("'{name}' object is not callable"))
}

fn call_function(
    rt: &mut Runtime,
    f: FuncId,
    at: usize,
    argc: usize,
    kind: FrameKind,
) -> VmResult<()> {
    if rt.functions[f.index()].is_generator() {
        return generator::create(rt, f, at, argc);
    }
    enter(rt, f, at, argc, kind)
}

/// Run a native with the arguments above `at`. The result replaces the
/// callee, or is dropped when `keep_receiver` leaves the receiver at `at`.
fn call_native(
    rt: &mut Runtime,
    n: NativeId,
    receiver: Value,
    at: usize,
    argc: usize,
    keep_receiver: bool,
) -> VmResult<()> {
    let (arity, func) = {
        let desc = &rt.natives[n.index()];
        (desc.arity, desc.func)
    };
    if !arity.accepts(argc) {
        let desc = &rt.natives[n.index()];
        let expected = match arity.max {
            Some(max) if max == arity.min => max.to_string(),
            Some(max) => format!("{} to {max}", arity.min),
            None => format!("at least {}", arity.min),
        };
        let msg = format!("{}() takes {expected} arguments ({argc} given)", desc.name);
        return Err(rt.raise(ErrorKind::Argument, msg));
    }
    let args: Vec<Value> = (at + 1..at + 1 + argc).map(|i| rt.value_at(i)).collect();
    let result = match func {
        NativeFn::Rust(f) => f(rt, receiver, &args)?,
        NativeFn::Foreign(f) => native::call_foreign(rt, f, &args)?,
    };
    if keep_receiver {
        rt.release(result);
        rt.truncate_stack(at + 1);
    } else {
        rt.truncate_stack(at);
        rt.push(result);
    }
    Ok(())
}

/// Calling a class: allocate the instance and run its constructor.
fn construct(rt: &mut Runtime, class: ClassId, at: usize, argc: usize) -> VmResult<()> {
    let desc = &rt.classes[class.index()];
    let ctor = desc.ctor;
    let field_count = desc.fields.len();
    match ctor {
        Ctor::Factory(n) => call_native(rt, n, Value::Class(class), at, argc, false),
        Ctor::None => {
            if argc > 0 {
                let name = rt.classes[class.index()].name.clone();
                return Err(rt.raise(
                    ErrorKind::Argument,
                    format!("{name}() takes no arguments ({argc} given)"),
                ));
            }
            let instance = rt.alloc(class, vec![Value::Nil; field_count], Payload::None)?;
            rt.truncate_stack(at);
            rt.push(instance);
            Ok(())
        }
        Ctor::Init(method) => {
            let instance = rt.alloc(class, vec![Value::Nil; field_count], Payload::None)?;
            rt.replace_at(at, instance);
            match method {
                Method::Bytecode(f) => enter(rt, f, at, argc, FrameKind::Ctor),
                Method::Native(n) => call_native(rt, n, instance, at, argc, true),
            }
        }
    }
}

/// Run `method` on the receiver at `at`.
fn dispatch(
    rt: &mut Runtime,
    method: Method,
    at: usize,
    argc: usize,
    kind: FrameKind,
) -> VmResult<()> {
    match method {
        Method::Bytecode(f) => call_function(rt, f, at, argc, kind),
        Method::Native(n) => {
            let receiver = rt.value_at(at);
            call_native(rt, n, receiver, at, argc, false)
        }
    }
}

/// `CallMethod`: receiver at `at`, `argc` arguments above it.
pub(super) fn call_method_at(
    rt: &mut Runtime,
    at: usize,
    name: Symbol,
    argc: usize,
    kind: FrameKind,
) -> VmResult<()> {
    let receiver = rt.value_at(at);
    if argc == 1 {
        let arg = rt.value_at(at + 1);
        if let Some(v) = builtins::numbers::fast_binary(rt, name, receiver, arg)? {
            rt.truncate_stack(at);
            rt.push(v);
            return Ok(());
        }
    }
    match receiver {
        Value::Object(r) if name == rt.syms.next && is_generator(rt, r) => {
            if argc > 0 {
                return Err(rt.raise(
                    ErrorKind::Argument,
                    format!("next() takes 0 arguments ({argc} given)"),
                ));
            }
            return generator::resume(rt, r, Resume::Replace);
        }
        Value::Module(m) => {
            let member = module_member(rt, m, name)?;
            rt.replace_at(at, member);
            return invoke(rt, member, at, argc, kind);
        }
        _ => {}
    }
    let class = rt.class_of(receiver);
    if let Some(&method) = rt.classes[class.index()].methods.get(&name) {
        return dispatch(rt, method, at, argc, kind);
    }
    if let Some(field) = field_value(rt, receiver, name) {
        rt.retain(field);
        rt.replace_at(at, field);
        return invoke(rt, field, at, argc, kind);
    }
    let class_name = rt.classes[class.index()].name.clone();
    let method = rt.symbols.resolve(name).to_string();
    Err(rt.raise(
        ErrorKind::Type,
        format!("'{class_name}' object has no method '{method}'"),
    ))
}

fn is_generator(rt: &Runtime, r: ObjRef) -> bool {
    matches!(rt.heap.get(r).map(|i| &i.payload), Some(Payload::Generator(_)))
}

fn field_value(rt: &Runtime, receiver: Value, name: Symbol) -> Option<Value> {
    let r = receiver.as_object()?;
    let instance = rt.heap.get(r)?;
    let index = rt.classes[instance.header.class.index()].field(name)?;
    instance.fields.get(index).copied()
}

/// `super.name(args)` inside a method of `class`.
pub(super) fn call_super(
    rt: &mut Runtime,
    class: ClassId,
    name: Symbol,
    argc: usize,
) -> VmResult<()> {
    let at = rt.stack.len() - argc - 1;
    let method = rt.classes[class.index()]
        .base
        .and_then(|base| rt.classes[base.index()].methods.get(&name).copied());
    match method {
        Some(method) => dispatch(rt, method, at, argc, FrameKind::Normal),
        None => {
            let class_name = rt.classes[class.index()].name.clone();
            let method = rt.symbols.resolve(name).to_string();
            Err(rt.raise(
                ErrorKind::Type,
                format!("no method '{method}' above {class_name}"),
            ))
        }
    }
}

/// Base constructor call at the start of a subclass constructor; leaves
/// one value for the following `Pop`.
pub(super) fn call_super_ctor(rt: &mut Runtime, class: ClassId, argc: usize) -> VmResult<()> {
    let at = rt.stack.len() - argc - 1;
    let Some(base) = rt.classes[class.index()].base else {
        fatal!("CallSuperCtor in {} without a base", rt.classes[class.index()].name);
    };
    match rt.classes[base.index()].ctor {
        Ctor::Init(method) => dispatch(rt, method, at, argc, FrameKind::Normal),
        Ctor::None if argc == 0 => {
            rt.truncate_stack(at);
            rt.push(Value::Nil);
            Ok(())
        }
        Ctor::None => {
            let name = rt.classes[base.index()].name.clone();
            Err(rt.raise(
                ErrorKind::Argument,
                format!("{name}() takes no arguments ({argc} given)"),
            ))
        }
        Ctor::Factory(_) => {
            let name = rt.classes[base.index()].name.clone();
            Err(rt.raise(ErrorKind::Type, format!("cannot extend builtin class {name}")))
        }
    }
}

// ── Attributes ─────────────────────────────────────────────────────

/// Value of `module.name`, carrying a count.
pub(crate) fn module_member(rt: &mut Runtime, m: ModuleId, name: Symbol) -> VmResult<Value> {
    let Some(binding) = rt.modules[m.index()].lookup(name) else {
        let module = rt.modules[m.index()].name.clone();
        let member = rt.symbols.resolve(name).to_string();
        return Err(rt.raise(
            ErrorKind::Name,
            format!("module {module} has no member '{member}'"),
        ));
    };
    let v = match binding {
        Binding::Global { slot, .. } => rt.modules[m.index()].globals[slot as usize],
        Binding::Function(f) => Value::Function(f),
        Binding::Native(n) => Value::Native(n),
        Binding::Class(c) => Value::Class(c),
        Binding::Module(m) => Value::Module(m),
        Binding::Constant(c) => return force_constant(rt, c),
    };
    rt.retain(v);
    Ok(v)
}

/// Value of a constant, evaluating it now if needed.
pub(crate) fn force_constant(rt: &mut Runtime, id: crate::descriptor::ConstId) -> VmResult<Value> {
    let stop = rt.frames.len();
    let at = rt.stack.len();
    if let Err(raised) = super::load_constant(rt, id) {
        rt.truncate_stack(at);
        return Err(raised);
    }
    if rt.frames.len() == stop {
        return Ok(rt.pop());
    }
    run(rt, stop)
}

pub(super) fn get_attr(rt: &mut Runtime, name: Symbol) -> VmResult<()> {
    let top = rt.stack.len() - 1;
    let receiver = rt.value_at(top);
    if let Value::Module(m) = receiver {
        let v = module_member(rt, m, name)?;
        rt.replace_at(top, v);
        return Ok(());
    }
    if let Some(v) = field_value(rt, receiver, name) {
        rt.retain(v);
        rt.replace_at(top, v);
        return Ok(());
    }
    let class = rt.class_of(receiver);
    if let Some(&method) = rt.classes[class.index()].methods.get(&name) {
        let receiver = rt.pop();
        let bound = rt.alloc(
            builtins::FUNCTION,
            vec![receiver, method.value()],
            Payload::BoundMethod,
        )?;
        rt.push(bound);
        return Ok(());
    }
    let class_name = rt.classes[class.index()].name.clone();
    let attr = rt.symbols.resolve(name).to_string();
    Err(rt.raise(
        ErrorKind::Type,
        format!("'{class_name}' object has no attribute '{attr}'"),
    ))
}

pub(super) fn set_attr(rt: &mut Runtime, name: Symbol) -> VmResult<()> {
    let value = rt.pop();
    let target = rt.pop();
    match target {
        Value::Object(r) => {
            let index = rt
                .heap
                .get(r)
                .and_then(|i| rt.classes[i.header.class.index()].field(name));
            if let Some(index) = index
                && let Some(slot) = rt.heap.get_mut(r).and_then(|i| i.fields.get_mut(index))
            {
                let old = std::mem::replace(slot, value);
                rt.release(old);
                rt.release(target);
                return Ok(());
            }
        }
        Value::Module(m) => {
            if let Some(Binding::Global { slot, mutable: true }) = rt.modules[m.index()].lookup(name) {
                let old = std::mem::replace(&mut rt.modules[m.index()].globals[slot as usize], value);
                rt.release(old);
                return Ok(());
            }
        }
        _ => {}
    }
    let class_name = rt.class_name_of(target).to_string();
    let attr = rt.symbols.resolve(name).to_string();
    rt.release(value);
    rt.release(target);
    Err(rt.raise(
        ErrorKind::Type,
        format!("cannot set attribute '{attr}' of '{class_name}' object"),
    ))
}

// ── Iteration ──────────────────────────────────────────────────────

/// `GetIter`: replace the top of stack with an iterator over it.
pub(super) fn get_iter(rt: &mut Runtime) -> VmResult<()> {
    let top = rt.stack.len() - 1;
    let v = rt.value_at(top);
    if let Value::Object(r) = v {
        match rt.heap.get(r).map(|i| &i.payload) {
            Some(Payload::List(_)) => {
                let list = rt.pop();
                let it = rt.alloc(builtins::ITERATOR, vec![list], Payload::ListIter { index: 0 })?;
                rt.push(it);
                return Ok(());
            }
            Some(&Payload::Range { start, end }) => {
                let it = rt.alloc_payload(builtins::ITERATOR, Payload::RangeIter { next: start, end })?;
                rt.replace_at(top, it);
                return Ok(());
            }
            Some(Payload::Generator(_) | Payload::ListIter { .. } | Payload::RangeIter { .. }) => {
                return Ok(());
            }
            _ => {}
        }
    }
    let class = rt.class_of(v);
    let (iter, next) = (rt.syms.iter, rt.syms.next);
    let methods = &rt.classes[class.index()].methods;
    if methods.contains_key(&iter) {
        return call_method_at(rt, top, iter, 0, FrameKind::Normal);
    }
    if methods.contains_key(&next) {
        return Ok(());
    }
    let name = rt.classes[class.index()].name.clone();
    Err(rt.raise(ErrorKind::Type, format!("'{name}' object is not iterable")))
}

enum Step {
    Item(Value),
    Done,
    Generator(ObjRef),
    Generic,
}

/// `ForNext`: push the next item of the iterator on top, or jump to `exit`.
pub(super) fn for_next(rt: &mut Runtime, exit: usize) -> VmResult<()> {
    let top = rt.stack.len() - 1;
    let it = rt.value_at(top);
    let step = match it {
        Value::Object(r) => next_builtin(rt, r),
        _ => Step::Generic,
    };
    match step {
        Step::Item(v) => {
            rt.push(v);
            Ok(())
        }
        Step::Done => {
            set_pc(rt, exit);
            Ok(())
        }
        Step::Generator(r) => generator::resume(rt, r, Resume::Push { exit }),
        Step::Generic => {
            let at = rt.stack.len();
            let depth = rt.frames.len();
            let next = rt.syms.next;
            rt.retain(it);
            rt.push(it);
            match call_method_at(rt, at, next, 0, FrameKind::ForIter { exit }) {
                Err(Raised) if rt.frames.len() == depth && rt.error_is(ErrorKind::StopIteration) => {
                    rt.clear_error();
                    rt.truncate_stack(at);
                    set_pc(rt, exit);
                    Ok(())
                }
                other => other,
            }
        }
    }
}

fn set_pc(rt: &mut Runtime, pc: usize) {
    if let Some(frame) = rt.frames.last_mut() {
        frame.pc = pc;
    }
}

/// Advance the builtin iterators without leaving the dispatch loop.
fn next_builtin(rt: &mut Runtime, r: ObjRef) -> Step {
    let Some(instance) = rt.heap.get_mut(r) else {
        fatal!("iteration over a freed instance");
    };
    let list = instance.fields.first().copied();
    let index = match &mut instance.payload {
        Payload::RangeIter { next, end } => {
            return if *next < *end {
                *next += 1;
                Step::Item(Value::Int(*next - 1))
            } else {
                Step::Done
            };
        }
        Payload::ListIter { index } => {
            *index += 1;
            *index - 1
        }
        Payload::Generator(_) => return Step::Generator(r),
        _ => return Step::Generic,
    };
    let item = list
        .and_then(|l| rt.instance(l))
        .and_then(|l| l.as_list())
        .and_then(|items| items.get(index).copied());
    match item {
        Some(v) => {
            rt.retain(v);
            Step::Item(v)
        }
        None => Step::Done,
    }
}

// ── Nested entry points ────────────────────────────────────────────

/// Call `callee` with borrowed `args` from native code or the host.
pub fn call_value(rt: &mut Runtime, callee: Value, args: &[Value]) -> VmResult<Value> {
    let stop = rt.frames.len();
    let at = rt.stack.len();
    rt.retain(callee);
    rt.push(callee);
    for &arg in args {
        rt.retain(arg);
        rt.push(arg);
    }
    if let Err(raised) = invoke(rt, callee, at, args.len(), FrameKind::Normal) {
        rt.truncate_stack(at);
        return Err(raised);
    }
    finish_nested(rt, stop)
}

/// Call method `name` of `receiver` with borrowed `args`.
pub fn call_method(
    rt: &mut Runtime,
    receiver: Value,
    name: Symbol,
    args: &[Value],
) -> VmResult<Value> {
    let stop = rt.frames.len();
    let at = rt.stack.len();
    rt.retain(receiver);
    rt.push(receiver);
    for &arg in args {
        rt.retain(arg);
        rt.push(arg);
    }
    if let Err(raised) = call_method_at(rt, at, name, args.len(), FrameKind::Normal) {
        rt.truncate_stack(at);
        return Err(raised);
    }
    finish_nested(rt, stop)
}

/// Run a specific method body (destructors) on `this`.
pub(crate) fn invoke_method(
    rt: &mut Runtime,
    this: Value,
    method: Method,
    args: &[Value],
) -> VmResult<Value> {
    let stop = rt.frames.len();
    let at = rt.stack.len();
    rt.retain(this);
    rt.push(this);
    for &arg in args {
        rt.retain(arg);
        rt.push(arg);
    }
    if let Err(raised) = dispatch(rt, method, at, args.len(), FrameKind::Normal) {
        rt.truncate_stack(at);
        return Err(raised);
    }
    finish_nested(rt, stop)
}

fn finish_nested(rt: &mut Runtime, stop: usize) -> VmResult<Value> {
    if rt.frames.len() == stop {
        Ok(rt.pop())
    } else {
        run(rt, stop)
    }
}
