//! Descriptor nodes: modules, classes, functions, natives and constants.
//!
//! Descriptors are created by the compiler or by native registration, live
//! in the runtime's arenas for its whole lifetime and are never refcounted.
//! Values refer to them by index.

use std::path::PathBuf;

use fox_bytecode::NameKind;
use fox_object::{ClassId, FuncId, ModuleId, NativeId, Symbol, Value};
use rustc_hash::FxHashMap;

use crate::Runtime;
use crate::error::VmResult;
use crate::native::ForeignFn;

/// Index of a lazily evaluated module constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstId(pub u32);

impl ConstId {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Modules ────────────────────────────────────────────────────────

/// What a module-level name is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Global { slot: u32, mutable: bool },
    Function(FuncId),
    Native(NativeId),
    Class(ClassId),
    Constant(ConstId),
    Module(ModuleId),
}

impl Binding {
    /// `LoadName` operands reaching this binding from any module.
    pub fn operands(self, owner: ModuleId) -> (NameKind, u32, u32) {
        match self {
            Binding::Global { slot, .. } => (NameKind::Global, owner.0, slot),
            Binding::Function(f) => (NameKind::Function, f.0, 0),
            Binding::Native(n) => (NameKind::Native, n.0, 0),
            Binding::Class(c) => (NameKind::Class, c.0, 0),
            Binding::Constant(c) => (NameKind::Constant, c.0, 0),
            Binding::Module(m) => (NameKind::Module, m.0, 0),
        }
    }

    pub fn kind_name(self) -> &'static str {
        match self {
            Binding::Global { mutable: true, .. } => "variable",
            Binding::Global { mutable: false, .. } => "immutable variable",
            Binding::Function(_) | Binding::Native(_) => "function",
            Binding::Class(_) => "class",
            Binding::Constant(_) => "constant",
            Binding::Module(_) => "module",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Compiling,
    Compiled,
    Initializing,
    Initialized,
    Failed,
}

#[derive(Debug)]
pub struct ModuleDesc {
    pub name: String,
    pub path: Option<PathBuf>,
    pub table: FxHashMap<Symbol, Binding>,
    pub globals: Vec<Value>,
    pub init: Option<FuncId>,
    pub state: ModuleState,
    /// `#@mode trace`.
    pub trace: bool,
}

impl ModuleDesc {
    pub fn new(name: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path,
            table: FxHashMap::default(),
            globals: Vec::new(),
            init: None,
            state: ModuleState::Compiling,
            trace: false,
        }
    }

    pub fn lookup(&self, name: Symbol) -> Option<Binding> {
        self.table.get(&name).copied()
    }

    pub fn add_global(&mut self, mutable: bool) -> Binding {
        let slot = self.globals.len() as u32;
        self.globals.push(Value::Nil);
        Binding::Global { slot, mutable }
    }
}

// ── Classes ────────────────────────────────────────────────────────

/// A method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Bytecode(FuncId),
    Native(NativeId),
}

impl Method {
    pub fn value(self) -> Value {
        match self {
            Method::Bytecode(f) => Value::Function(f),
            Method::Native(n) => Value::Native(n),
        }
    }
}

/// How calling a class produces a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctor {
    /// Instances cannot be created with arguments.
    None,
    /// Allocate an instance, then run this with `this` in slot 0.
    Init(Method),
    /// Native factory returning the value directly (builtin value classes).
    Factory(NativeId),
}

#[derive(Debug)]
pub struct ClassDesc {
    pub name: String,
    pub module: ModuleId,
    pub base: Option<ClassId>,
    /// Field layout, base fields first. Complete once `flattened`.
    pub fields: Vec<Symbol>,
    pub field_index: FxHashMap<Symbol, u16>,
    /// Fields declared by this class itself.
    pub own_fields: Vec<Symbol>,
    /// Method table including inherited entries. Complete once `flattened`.
    pub methods: FxHashMap<Symbol, Method>,
    pub own_methods: FxHashMap<Symbol, Method>,
    pub ctor: Ctor,
    /// Take the base's constructor when flattened (no own header
    /// parameters, no field initializers).
    pub inherits_ctor: bool,
    /// `__del__` declared by this class itself.
    pub destructor: Option<Method>,
    /// Some class on the chain declares `__del__`.
    pub has_destructor: bool,
    /// Inherited entries were copied in.
    pub flattened: bool,
    pub line: u32,
}

impl ClassDesc {
    pub fn new(name: impl Into<String>, module: ModuleId, line: u32) -> Self {
        Self {
            name: name.into(),
            module,
            base: None,
            fields: Vec::new(),
            field_index: FxHashMap::default(),
            own_fields: Vec::new(),
            methods: FxHashMap::default(),
            own_methods: FxHashMap::default(),
            ctor: Ctor::None,
            inherits_ctor: false,
            destructor: None,
            has_destructor: false,
            flattened: false,
            line,
        }
    }

    pub fn field(&self, name: Symbol) -> Option<usize> {
        self.field_index.get(&name).map(|&i| i as usize)
    }
}

// ── Functions ──────────────────────────────────────────────────────

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FuncFlags: u8 {
        /// Extra arguments are collected into a list in the last parameter.
        const VARIADIC = 1 << 0;
        /// Contains `yield`: calling it returns a suspended generator.
        const GENERATOR = 1 << 1;
        /// Slot 0 is `this`.
        const METHOD = 1 << 2;
        /// Class initializer.
        const CTOR = 1 << 3;
        /// Built by `MakeClosure`; captured values follow the parameters.
        const CLOSURE = 1 << 4;
        /// One of the captures is `this`.
        const CAPTURES_THIS = 1 << 5;
    }
}

#[derive(Debug)]
pub struct FuncDesc {
    pub name: String,
    pub module: ModuleId,
    pub class: Option<ClassId>,
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    /// Encoded [`fox_bytecode::LineTableBuilder`] output.
    pub lines: Vec<u8>,
    /// Parameter slots, including the rest parameter of variadic functions.
    pub params: u16,
    pub required: u16,
    pub captures: u16,
    pub flags: FuncFlags,
    /// Highest number of stack entries the frame uses above its base.
    pub max_stack: u32,
    pub line: u32,
}

impl FuncDesc {
    /// A reserved descriptor filled in once its body is compiled.
    pub fn placeholder(name: impl Into<String>, module: ModuleId, line: u32) -> Self {
        Self {
            name: name.into(),
            module,
            class: None,
            code: Vec::new(),
            constants: Vec::new(),
            lines: Vec::new(),
            params: 0,
            required: 0,
            captures: 0,
            flags: FuncFlags::empty(),
            max_stack: 1,
            line,
        }
    }

    pub fn is_variadic(&self) -> bool {
        self.flags.contains(FuncFlags::VARIADIC)
    }

    pub fn is_generator(&self) -> bool {
        self.flags.contains(FuncFlags::GENERATOR)
    }

    /// Positional parameters, not counting the rest list.
    pub fn fixed_params(&self) -> u16 {
        if self.is_variadic() { self.params - 1 } else { self.params }
    }

    pub fn line_at(&self, pc: usize) -> u32 {
        fox_bytecode::line_for_pc(&self.lines, pc as u32).unwrap_or(self.line)
    }
}

// ── Natives ────────────────────────────────────────────────────────

/// Native function: runtime, receiver (or the callee itself for plain
/// calls) and borrowed arguments. The result carries its own count.
pub type RustFn = fn(&mut Runtime, Value, &[Value]) -> VmResult<Value>;

#[derive(Clone, Copy)]
pub enum NativeFn {
    Rust(RustFn),
    Foreign(ForeignFn),
}

impl std::fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeFn::Rust(_) => f.write_str("Rust"),
            NativeFn::Foreign(_) => f.write_str("Foreign"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: u16,
    /// `None` for any number of arguments.
    pub max: Option<u16>,
}

impl Arity {
    pub const fn exact(n: u16) -> Self {
        Self { min: n, max: Some(n) }
    }

    pub const fn range(min: u16, max: u16) -> Self {
        Self { min, max: Some(max) }
    }

    pub const fn at_least(min: u16) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(self, argc: usize) -> bool {
        argc >= self.min as usize && self.max.is_none_or(|m| argc <= m as usize)
    }
}

#[derive(Debug)]
pub struct NativeDesc {
    pub name: String,
    pub module: ModuleId,
    pub arity: Arity,
    pub func: NativeFn,
}

// ── Constants ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstState {
    /// Not evaluated yet; the function computes it.
    Pending(FuncId),
    Evaluating(FuncId),
    Ready(Value),
}

#[derive(Debug)]
pub struct ConstDesc {
    pub name: String,
    pub module: ModuleId,
    pub state: ConstState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_bounds() {
        assert!(Arity::exact(2).accepts(2));
        assert!(!Arity::exact(2).accepts(1));
        assert!(Arity::range(1, 2).accepts(1));
        assert!(!Arity::range(1, 2).accepts(3));
        assert!(Arity::at_least(1).accepts(10));
        assert!(!Arity::at_least(1).accepts(0));
    }

    #[test]
    fn binding_operands() {
        let m = ModuleId(3);
        assert_eq!(
            Binding::Global { slot: 7, mutable: true }.operands(m),
            (NameKind::Global, 3, 7)
        );
        assert_eq!(Binding::Class(ClassId(2)).operands(m), (NameKind::Class, 2, 0));
    }

    #[test]
    fn variadic_fixed_params() {
        let mut f = FuncDesc::placeholder("f", ModuleId(0), 1);
        f.params = 3;
        f.flags = FuncFlags::VARIADIC;
        assert_eq!(f.fixed_params(), 2);
    }
}
