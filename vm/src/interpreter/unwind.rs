//! Exception propagation and destructor runs.

use fox_object::{StackEntry, Value, fatal};
use log::warn;

use super::{FrameKind, call, generator};
use crate::descriptor::{ConstState, ModuleState};
use crate::error::{ErrorKind, Raised, TraceEntry, VmResult};
use crate::Runtime;

/// Pop the operand stack looking for a catch marker of a frame above
/// `stop_depth`. On success the exception is pushed for the handler and
/// execution continues there; otherwise every frame down to `stop_depth` is
/// gone and the exception stays in flight.
pub(super) fn unwind(rt: &mut Runtime, stop_depth: usize) -> VmResult<()> {
    while rt.frames.len() > stop_depth {
        let fi = rt.frames.len() - 1;
        let base = rt.frames[fi].base;
        while rt.stack.len() > base {
            match rt.stack.pop() {
                Some(StackEntry::Catch(marker)) => {
                    let Some(error) = rt.current_error.take() else {
                        fatal!("unwinding without an exception in flight");
                    };
                    rt.trace.clear();
                    rt.push(error);
                    rt.frames[fi].pc = marker.handler_pc as usize;
                    return Ok(());
                }
                Some(StackEntry::Value(v)) => rt.release(v),
                None => break,
            }
        }

        let Some(frame) = rt.frames.pop() else { break };
        let desc = &rt.functions[frame.func.index()];
        // The pc already points past the failing instruction.
        let line = desc.line_at(frame.pc.saturating_sub(1));
        let entry = TraceEntry {
            module: rt.modules[desc.module.index()].name.clone(),
            function: desc.name.clone(),
            line,
        };
        rt.trace.push(entry);

        match frame.kind {
            FrameKind::Generator { generator, .. } => generator::abandon(rt, generator),
            FrameKind::Constant(id) => {
                if let ConstState::Evaluating(f) = rt.constants[id.index()].state {
                    rt.constants[id.index()].state = ConstState::Pending(f);
                }
            }
            FrameKind::ModuleInit(m) => rt.modules[m.index()].state = ModuleState::Failed,
            FrameKind::ForIter { exit } if rt.error_is(ErrorKind::StopIteration) => {
                rt.clear_error();
                if let Some(caller) = rt.frames.last_mut() {
                    caller.pc = exit;
                }
                if rt.frames.len() > stop_depth {
                    return Ok(());
                }
                fatal!("iterator frame returned below its loop");
            }
            _ => {}
        }
    }
    Err(Raised)
}

/// Run the destructor chains of every instance whose count reached zero.
///
/// Destructors run with the exception in flight set aside; an error leaving
/// a destructor is logged and dropped.
pub(crate) fn run_finalizers(rt: &mut Runtime) {
    rt.finalizing = true;
    let saved_error = rt.current_error.take();
    let saved_trace = std::mem::take(&mut rt.trace);
    while let Some(r) = rt.heap.next_finalizable() {
        let this = Value::Object(r);
        let mut class = rt.heap.class_of(r);
        while let Some(c) = class {
            let desc = &rt.classes[c.index()];
            class = desc.base;
            let Some(method) = desc.destructor else { continue };
            match call::invoke_method(rt, this, method, &[]) {
                Ok(result) => rt.release(result),
                Err(Raised) => {
                    let err = rt.take_error();
                    warn!("error in destructor of {}: {err}", rt.classes[c.index()].name);
                }
            }
        }
        rt.heap.finish_finalize(r);
    }
    rt.current_error = saved_error;
    rt.trace = saved_trace;
    rt.finalizing = false;
}

#[cfg(test)]
mod tests {
    use crate::test_util::{run_failing, run_source};

    #[test]
    fn trace_lists_frames_innermost_first() {
        let (err, _) = run_failing(
            "def inner() {\n  throw ValueError(\"bad\")\n}\ndef outer() {\n  inner()\n}\nouter()",
        );
        let functions: Vec<_> = err.trace().iter().map(|t| t.function.as_str()).collect();
        assert_eq!(functions, ["inner", "outer", "main"]);
        assert_eq!(err.trace()[0].line, 2);
    }

    #[test]
    fn error_in_destructor_is_dropped() {
        let out = run_source(
            "class Bad {\n  def __del__() { throw ValueError(\"in del\") }\n}\ndef f() { let b = Bad() }\nf()\nprint(\"still running\")",
        );
        assert_eq!(out, "still running\n");
    }

    #[test]
    fn rethrow_from_unmatched_catch() {
        let out = run_source(
            "def f() {\n  try { throw IndexError(\"i\") } catch ValueError { print(\"no\") }\n}\ntry { f() } catch IndexError as e { print(\"outer \" + e.message) }",
        );
        assert_eq!(out, "outer i\n");
    }

    #[test]
    fn handler_inside_loop_survives_many_iterations() {
        let out = run_source(
            "var caught = 0\nfor i in 0..100 {\n  try {\n    if i % 3 == 0 { throw ValueError(\"x\") }\n  } catch ValueError { caught += 1 }\n}\nprint(caught)",
        );
        assert_eq!(out, "34\n");
    }

    #[test]
    fn user_iterator_stops_for_loop() {
        let out = run_source(
            "class Count(n) {\n  var i = 0\n  var n = n\n  def next() {\n    if this.i >= this.n { throw StopIteration(\"done\") }\n    this.i += 1\n    return this.i\n  }\n}\nfor v in Count(3) { print(v) }\nprint(\"end\")",
        );
        assert_eq!(out, "1\n2\n3\nend\n");
    }
}
