//! Per-function compile state: locals, scopes, captures and the stack
//! depth bookkeeping that sizes each frame.

use fox_bytecode::{BytecodeBuilder, JumpList, LineTableBuilder, Op};
use fox_object::{ClassId, FuncId, ModuleId, Symbol, Value};
use rustc_hash::FxHashMap;

use super::{CResult, Compiler};
use crate::descriptor::{Binding, FuncDesc, FuncFlags};
use crate::error::ErrorKind;
use crate::link::{PatchKind, PatchRecord, PatchSite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FuncKind {
    /// Module init function or interactive fragment.
    Module,
    Function,
    Method,
    Ctor,
    Closure,
    /// Initializer of a lazy module constant.
    Constant,
}

impl FuncKind {
    pub(super) fn has_receiver(self) -> bool {
        matches!(self, FuncKind::Method | FuncKind::Ctor)
    }
}

#[derive(Debug)]
pub(super) struct Local {
    pub name: String,
    pub slot: u16,
    pub mutable: bool,
}

#[derive(Debug)]
pub(super) struct Scope {
    /// Stack depth when the scope opened.
    pub depth: i32,
    pub locals_len: usize,
}

/// Where a closure copies a captured value from when it is created.
#[derive(Debug, Clone, Copy)]
pub(super) enum CaptureSource {
    Slot(u16),
    Capture(u16),
}

#[derive(Debug)]
pub(super) struct Capture {
    pub name: String,
    pub source: CaptureSource,
}

#[derive(Debug)]
pub(super) struct LoopCtx {
    /// Depth the loop body starts from; `break` and `continue` pop to it.
    pub base_depth: i32,
    pub continue_target: usize,
    pub breaks: JumpList,
}

/// A name use left for the link pass.
#[derive(Debug)]
pub(super) struct Pending {
    pub pos: usize,
    pub name: Symbol,
    pub kind: PatchKind,
    pub target: Option<ModuleId>,
    pub line: u32,
}

/// A type annotation, resolved when the check is emitted.
#[derive(Debug, Clone)]
pub(super) struct TypeRef {
    pub name: String,
    pub target: Option<ModuleId>,
    pub nullable: bool,
}

/// Variable reference found by [`Compiler::resolve_var`].
#[derive(Debug, Clone, Copy)]
pub(super) enum VarRef {
    Local { slot: u16, mutable: bool },
    Capture(u16),
}

/// What the expression just compiled was, if it can be assigned to.
#[derive(Debug, Clone)]
pub(super) enum Access {
    Local { slot: u16, mutable: bool },
    Capture,
    Global { binding: Binding },
    /// Function, class, constant or module binding.
    Fixed(Binding),
    Unresolved(Symbol),
    Attr(Symbol),
    Index,
}

#[derive(Debug, Clone)]
pub(super) struct LastAccess {
    pub access: Access,
    pub name: String,
    /// Code range of the access; it must end at the current offset to be
    /// an assignment target.
    pub start: usize,
    pub end: usize,
    pub depth_before: i32,
}

pub(super) struct FuncState {
    pub name: String,
    pub kind: FuncKind,
    pub class: Option<ClassId>,
    pub builder: BytecodeBuilder,
    pub lines: LineTableBuilder,
    pub constants: Vec<Value>,
    strings: FxHashMap<String, u32>,
    pub locals: Vec<Local>,
    pub scopes: Vec<Scope>,
    pub captures: Vec<Capture>,
    pub params: u16,
    pub required: u16,
    pub seen_optional: bool,
    pub flags: FuncFlags,
    /// Entries above the frame base, slot 0 included.
    pub depth: i32,
    pub max_depth: i32,
    pub loops: Vec<LoopCtx>,
    /// `Return` instructions, rewritten to `GenReturn` in generators.
    pub returns: Vec<usize>,
    /// `LoadLocal`/`StoreLocal` of locals, shifted past the captures.
    pub local_refs: Vec<usize>,
    /// `LoadLocal` of captures, patched once the capture count is known.
    pub capture_refs: Vec<(usize, u16)>,
    pub pending: Vec<Pending>,
    pub return_type: Option<TypeRef>,
    pub last_access: Option<LastAccess>,
    pub line: u32,
}

impl FuncState {
    pub(super) fn new(name: impl Into<String>, kind: FuncKind, class: Option<ClassId>, line: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            class,
            builder: BytecodeBuilder::new(),
            lines: LineTableBuilder::new(),
            constants: Vec::new(),
            strings: FxHashMap::default(),
            locals: Vec::new(),
            scopes: Vec::new(),
            captures: Vec::new(),
            params: 0,
            required: 0,
            seen_optional: false,
            flags: FuncFlags::empty(),
            depth: 1,
            max_depth: 1,
            loops: Vec::new(),
            returns: Vec::new(),
            local_refs: Vec::new(),
            capture_refs: Vec::new(),
            pending: Vec::new(),
            return_type: None,
            last_access: None,
            line,
        }
    }

    pub(super) fn note(&mut self, pos: usize, line: u32, effect: i32) {
        self.lines.add(pos as u32, line);
        self.adjust(effect);
    }

    pub(super) fn adjust(&mut self, effect: i32) {
        self.depth += effect;
        self.max_depth = self.max_depth.max(self.depth);
    }

    /// Slot numbers below this belong to the receiver and parameters.
    pub(super) fn first_local(&self) -> u16 {
        self.params + 1
    }

    pub(super) fn add_constant(&mut self, v: Value) -> u32 {
        self.constants.push(v);
        (self.constants.len() - 1) as u32
    }

    pub(super) fn string_constant(&mut self, s: &str) -> Option<u32> {
        self.strings.get(s).copied()
    }

    pub(super) fn remember_string(&mut self, s: &str, idx: u32) {
        self.strings.insert(s.to_string(), idx);
    }

    /// Drop the code from `pos` on, with everything recorded about it.
    pub(super) fn truncate(&mut self, pos: usize, depth: i32) {
        self.builder.truncate(pos);
        self.lines.truncate(pos as u32);
        self.local_refs.retain(|&p| p < pos);
        self.capture_refs.retain(|&(p, _)| p < pos);
        self.pending.retain(|p| p.pos < pos);
        self.returns.retain(|&p| p < pos);
        self.depth = depth;
        self.last_access = None;
    }

    pub(super) fn in_module_scope(&self) -> bool {
        self.kind == FuncKind::Module && self.scopes.is_empty()
    }
}

/// Net stack effect of one instruction.
pub(super) fn stack_effect(op: Op, small: u16) -> i32 {
    let n = small as i32;
    match op {
        Op::PushNil
        | Op::PushTrue
        | Op::PushFalse
        | Op::PushInt
        | Op::PushConst
        | Op::LoadLocal
        | Op::LoadName
        | Op::Dup
        | Op::PushHandler
        | Op::ForNext => 1,
        Op::Dup2 => 2,
        Op::Pop
        | Op::StoreLocal
        | Op::StoreName
        | Op::JumpIfFalse
        | Op::JumpIfTrue
        | Op::JumpIfNotNil
        | Op::JumpIfFalseOrPop
        | Op::JumpIfTrueOrPop
        | Op::Throw
        | Op::Rethrow
        | Op::PopHandler
        | Op::Yield => -1,
        Op::PopN | Op::Return | Op::Call | Op::CallMethod | Op::CallSuper | Op::CallSuperCtor => -n,
        Op::BuildString | Op::BuildList | Op::MakeClosure => 1 - n,
        Op::SetAttr => -2,
        _ => 0,
    }
}

impl Compiler<'_> {
    pub(super) fn begin_scope(&mut self) {
        let f = self.f();
        let scope = Scope { depth: f.depth, locals_len: f.locals.len() };
        f.scopes.push(scope);
    }

    /// Close the innermost scope, popping its locals off the stack.
    pub(super) fn end_scope(&mut self) {
        let Some(scope) = self.f().scopes.pop() else {
            return;
        };
        let extra = self.f().depth - scope.depth;
        if extra > 0 {
            self.emit(Op::PopN, extra as u16);
        }
        let f = self.f();
        f.locals.truncate(scope.locals_len);
        f.depth = scope.depth;
    }

    /// Bind `name` to the value on top of the stack.
    pub(super) fn declare_local(&mut self, name: &str, mutable: bool) -> CResult<u16> {
        let f = self.f_ref();
        let scope_start = f.scopes.last().map_or(0, |s| s.locals_len);
        if f.locals[scope_start..].iter().any(|l| l.name == name) {
            return Err(self.error(ErrorKind::Define, format!("'{name}' is already defined")));
        }
        let slot = self.f_ref().depth - 1;
        if slot > u16::MAX as i32 / 2 {
            return Err(self.error(ErrorKind::Define, "too many local variables"));
        }
        let slot = slot as u16;
        self.f().locals.push(Local { name: name.to_string(), slot, mutable });
        Ok(slot)
    }

    /// Find `name` among the locals and captures of function `level`,
    /// capturing it through enclosing closures as needed.
    pub(super) fn resolve_var(&mut self, level: usize, name: &str) -> Option<VarRef> {
        let f = &self.funcs[level];
        if let Some(local) = f.locals.iter().rev().find(|l| l.name == name) {
            return Some(VarRef::Local { slot: local.slot, mutable: local.mutable });
        }
        if name == "this" && f.kind.has_receiver() {
            return Some(VarRef::Local { slot: 0, mutable: false });
        }
        if let Some(i) = f.captures.iter().position(|c| c.name == name) {
            return Some(VarRef::Capture(i as u16));
        }
        if f.kind != FuncKind::Closure || level == 0 {
            return None;
        }
        let source = match self.resolve_var(level - 1, name)? {
            VarRef::Local { slot, .. } => CaptureSource::Slot(slot),
            VarRef::Capture(i) => CaptureSource::Capture(i),
        };
        let f = &mut self.funcs[level];
        if name == "this" {
            f.flags |= FuncFlags::CAPTURES_THIS;
        }
        f.captures.push(Capture { name: name.to_string(), source });
        Some(VarRef::Capture((f.captures.len() - 1) as u16))
    }

    pub(super) fn load_capture(&mut self, idx: u16) {
        let pos = self.emit(Op::LoadLocal, 0);
        self.f().capture_refs.push((pos, idx));
    }

    /// Turn a finished function state into a descriptor, in the slot
    /// `reserved` when the function was bound before its body compiled.
    pub(super) fn finish_function(&mut self, mut state: FuncState, reserved: Option<FuncId>) -> FuncId {
        let ncap = state.captures.len() as u16;
        let first_local = state.first_local();
        for &pos in &state.local_refs {
            let slot = state.builder.read_small(pos);
            if slot >= first_local {
                state.builder.patch_small(pos, slot + ncap);
            }
        }
        for &(pos, idx) in &state.capture_refs {
            state.builder.patch_small(pos, first_local + idx);
        }
        if state.flags.contains(FuncFlags::GENERATOR) {
            for &pos in &state.returns {
                state.builder.set_op(pos, Op::GenReturn);
            }
        }
        if ncap > 0 {
            state.flags |= FuncFlags::CLOSURE;
        }

        let id = reserved.unwrap_or_else(|| {
            self.rt.functions.push(FuncDesc::placeholder(&state.name, self.module, state.line));
            FuncId((self.rt.functions.len() - 1) as u32)
        });
        for p in state.pending.drain(..) {
            self.rt.patches.push(PatchRecord {
                name: p.name,
                module: self.module,
                target: p.target,
                site: PatchSite::Code { func: id, pos: p.pos },
                kind: p.kind,
                line: p.line,
            });
        }
        let desc = &mut self.rt.functions[id.index()];
        desc.name = state.name;
        desc.class = state.class;
        desc.code = state.builder.into_bytes();
        desc.constants = state.constants;
        desc.lines = state.lines.finish();
        desc.params = state.params;
        desc.required = state.required;
        desc.captures = ncap;
        desc.flags = state.flags;
        desc.max_stack = (state.max_depth.max(1) as u32) + ncap as u32;
        desc.line = state.line;
        id
    }

    /// Reserve a descriptor so the function can be referred to (and bound)
    /// before its body is compiled.
    pub(super) fn reserve_function(&mut self, name: &str, line: u32) -> FuncId {
        self.rt.functions.push(FuncDesc::placeholder(name, self.module, line));
        FuncId((self.rt.functions.len() - 1) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_forgets_recorded_positions() {
        let mut f = FuncState::new("f", FuncKind::Function, None, 1);
        let a = f.builder.emit(Op::LoadLocal, 1);
        f.local_refs.push(a);
        let b = f.builder.emit(Op::LoadLocal, 2);
        f.local_refs.push(b);
        f.returns.push(b);
        f.truncate(b, 2);
        assert_eq!(f.local_refs, vec![a]);
        assert!(f.returns.is_empty());
        assert_eq!(f.builder.current_offset(), b);
        assert_eq!(f.depth, 2);
    }

    #[test]
    fn effects_of_calls_and_builders() {
        assert_eq!(stack_effect(Op::CallMethod, 2), -2);
        assert_eq!(stack_effect(Op::BuildList, 0), 1);
        assert_eq!(stack_effect(Op::BuildString, 3), -2);
        assert_eq!(stack_effect(Op::Return, 0), 0);
        assert_eq!(stack_effect(Op::SetAttr, 0), -2);
        assert_eq!(stack_effect(Op::CatchTest, 0), 0);
    }
}
