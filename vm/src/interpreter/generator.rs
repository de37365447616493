//! Generators: the whole frame window moves into the generator instance on
//! `yield` and back onto the operand stack on resumption.

use fox_object::{FuncId, GenStatus, GeneratorFrame, ObjRef, Payload, Value, fatal};
use log::trace;

use super::{Frame, FrameKind, Resume, call, run};
use crate::builtins;
use crate::error::{ErrorKind, VmResult};
use crate::Runtime;

/// Calling a generator function: set up its frame window and suspend it at
/// pc 0 inside a new generator instance, which replaces the callee.
pub(super) fn create(rt: &mut Runtime, f: FuncId, at: usize, argc: usize) -> VmResult<()> {
    call::prepare_args(rt, f, at, argc)?;
    if let Err(err) = rt.heap.check_alloc(0) {
        log::debug!("generator allocation failed: {err}");
        return Err(rt.raise_memory_error());
    }
    let window = rt.stack.split_off(at);
    let generator = rt.alloc_payload(
        builtins::GENERATOR,
        Payload::Generator(Box::new(GeneratorFrame {
            func: f,
            pc: 0,
            window,
            status: GenStatus::Suspended,
        })),
    )?;
    rt.push(generator);
    Ok(())
}

/// Restore the window of `generator` on top of the stack and continue it.
pub(super) fn resume(rt: &mut Runtime, generator: ObjRef, mode: Resume) -> VmResult<()> {
    let status = match rt.heap.get(generator).map(|i| &i.payload) {
        Some(Payload::Generator(g)) => g.status,
        _ => fatal!("resume of a non-generator"),
    };
    match status {
        GenStatus::Exhausted => {
            return match mode {
                Resume::Replace => Err(rt.raise(ErrorKind::StopIteration, "generator exhausted")),
                Resume::Push { exit } => {
                    if let Some(frame) = rt.frames.last_mut() {
                        frame.pc = exit;
                    }
                    Ok(())
                }
            };
        }
        GenStatus::Running => {
            return Err(rt.raise(ErrorKind::Value, "generator already running"));
        }
        GenStatus::Suspended => {}
    }
    if rt.frames.len() >= rt.config.max_call_depth {
        let limit = rt.config.max_call_depth;
        return Err(rt.raise(
            ErrorKind::StackOverflow,
            format!("maximum call depth of {limit} exceeded"),
        ));
    }

    let Some(Payload::Generator(g)) = rt.heap.get_mut(generator).map(|i| &mut i.payload) else {
        fatal!("generator payload vanished");
    };
    let (func, pc) = (g.func, g.pc as usize);
    let window = std::mem::take(&mut g.window);
    g.status = GenStatus::Running;

    let base = rt.stack.len();
    let max_stack = rt.functions[func.index()].max_stack as usize;
    if base + max_stack.max(window.len()) > rt.config.stack_limit {
        put_back(rt, generator, window, pc, GenStatus::Suspended);
        let limit = rt.config.stack_limit;
        return Err(rt.raise(
            ErrorKind::StackOverflow,
            format!("operand stack limit of {limit} entries exceeded"),
        ));
    }
    rt.stack.extend(window);
    let module = rt.functions[func.index()].module;
    let trace_frame = rt.config.trace_all || rt.modules[module.index()].trace;
    trace!("resume {} at {pc}", rt.functions[func.index()].name);
    rt.frames.push(Frame {
        func,
        pc,
        base,
        kind: FrameKind::Generator { generator, resume: mode },
        trace: trace_frame,
    });
    Ok(())
}

fn put_back(
    rt: &mut Runtime,
    generator: ObjRef,
    window: Vec<fox_object::StackEntry>,
    pc: usize,
    status: GenStatus,
) {
    if let Some(Payload::Generator(g)) = rt.heap.get_mut(generator).map(|i| &mut i.payload) {
        g.window = window;
        g.pc = pc as u32;
        g.status = status;
    }
}

/// `Yield`: move the frame window back into the generator and hand the
/// value to whoever resumed it.
pub(super) fn suspend(rt: &mut Runtime, stop_depth: usize) -> Option<Value> {
    let value = rt.pop();
    let Some(frame) = rt.frames.pop() else {
        fatal!("yield without a frame");
    };
    let FrameKind::Generator { generator, resume: mode } = frame.kind else {
        fatal!("yield outside a generator frame");
    };
    let window = rt.stack.split_off(frame.base);
    put_back(rt, generator, window, frame.pc, GenStatus::Suspended);
    if rt.frames.len() == stop_depth {
        // Nested resume: the generator entry below the frame is dropped by
        // `next_nested`.
        return Some(value);
    }
    match mode {
        Resume::Replace => {
            let top = rt.stack.len() - 1;
            rt.replace_at(top, value);
        }
        Resume::Push { .. } => rt.push(value),
    }
    None
}

/// `GenReturn`: the generator is exhausted. A `for` loop continues at its
/// exit; anything else gets StopIteration.
pub(super) fn finish(rt: &mut Runtime) -> VmResult<()> {
    let Some(frame) = rt.frames.pop() else {
        fatal!("generator return without a frame");
    };
    let FrameKind::Generator { generator, resume: mode } = frame.kind else {
        fatal!("GenReturn outside a generator frame");
    };
    rt.truncate_stack(frame.base);
    put_back(rt, generator, Vec::new(), frame.pc, GenStatus::Exhausted);
    match mode {
        Resume::Replace => Err(rt.raise(ErrorKind::StopIteration, "generator exhausted")),
        Resume::Push { exit } => {
            if let Some(caller) = rt.frames.last_mut() {
                caller.pc = exit;
            }
            Ok(())
        }
    }
}

/// Mark a generator whose frame an exception unwound through.
pub(super) fn abandon(rt: &mut Runtime, generator: ObjRef) {
    put_back(rt, generator, Vec::new(), 0, GenStatus::Exhausted);
}

/// `generator.next()` from native code: resume in a nested loop.
pub(crate) fn next_nested(rt: &mut Runtime, generator: ObjRef) -> VmResult<Value> {
    let stop = rt.frames.len();
    let at = rt.stack.len();
    rt.heap.retain_ref(generator);
    rt.push(Value::Object(generator));
    let result = resume(rt, generator, Resume::Replace).and_then(|()| run(rt, stop));
    rt.truncate_stack(at);
    result
}
