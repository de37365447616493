//! The `builtins` module: core classes, their native methods, the global
//! functions and the bundled native extensions.
//!
//! Builtin classes get fixed ids so the runtime can name them without a
//! lookup. They are declared in id order by [`install`].

mod errors;
pub mod extensions;
mod globals;
mod lists;
pub mod numbers;
pub(crate) mod strings;

use fox_object::{ClassId, ModuleId, Payload, Symbol, Symbols, Value};

use crate::descriptor::ModuleState;
use crate::error::{ErrorKind, VmResult};
use crate::interpreter;
use crate::native::ModuleBuilder;
use crate::Runtime;

pub const BUILTINS: ModuleId = ModuleId(0);

pub const OBJECT: ClassId = ClassId(0);
pub const NIL: ClassId = ClassId(1);
pub const BOOL: ClassId = ClassId(2);
pub const INT: ClassId = ClassId(3);
pub const BIG_INT: ClassId = ClassId(4);
pub const RATIONAL: ClassId = ClassId(5);
pub const FLOAT: ClassId = ClassId(6);
pub const STRING: ClassId = ClassId(7);
pub const BYTES: ClassId = ClassId(8);
pub const REGEX: ClassId = ClassId(9);
pub const LIST: ClassId = ClassId(10);
pub const RANGE: ClassId = ClassId(11);
pub const FUNCTION: ClassId = ClassId(12);
pub const GENERATOR: ClassId = ClassId(13);
pub const ITERATOR: ClassId = ClassId(14);
pub const CLASS: ClassId = ClassId(15);
pub const MODULE: ClassId = ClassId(16);
pub const WEAK: ClassId = ClassId(17);
pub const ERROR: ClassId = ClassId(18);
const FIRST_ERROR_KIND: u32 = 19;

/// Classes below `Object`, in id order.
const VALUE_CLASSES: [&str; 18] = [
    "Nil", "Bool", "Int", "BigInt", "Rational", "Float", "String", "Bytes", "Regex", "List",
    "Range", "Function", "Generator", "Iterator", "Class", "Module", "Weak", "Error",
];

/// Class of a builtin error kind.
pub fn error_class(kind: ErrorKind) -> ClassId {
    let index = ErrorKind::ALL.iter().position(|&k| k == kind).unwrap_or(0);
    ClassId(FIRST_ERROR_KIND + index as u32)
}

/// Interned names the runtime dispatches on.
#[derive(Debug, Clone)]
pub struct Syms {
    pub add: Symbol,
    pub sub: Symbol,
    pub mul: Symbol,
    pub div: Symbol,
    pub rem: Symbol,
    pub eq: Symbol,
    pub lt: Symbol,
    pub le: Symbol,
    pub gt: Symbol,
    pub ge: Symbol,
    pub contains: Symbol,
    pub range: Symbol,
    pub shl: Symbol,
    pub shr: Symbol,
    pub bit_or: Symbol,
    pub bit_xor: Symbol,
    pub bit_and: Symbol,
    pub neg: Symbol,
    pub invert: Symbol,
    pub getitem: Symbol,
    pub setitem: Symbol,
    pub str: Symbol,
    pub iter: Symbol,
    pub next: Symbol,
    pub del: Symbol,
    pub message: Symbol,
    pub this: Symbol,
}

impl Syms {
    pub fn new(symbols: &mut Symbols) -> Self {
        Self {
            add: symbols.intern("__add__"),
            sub: symbols.intern("__sub__"),
            mul: symbols.intern("__mul__"),
            div: symbols.intern("__div__"),
            rem: symbols.intern("__mod__"),
            eq: symbols.intern("__eq__"),
            lt: symbols.intern("__lt__"),
            le: symbols.intern("__le__"),
            gt: symbols.intern("__gt__"),
            ge: symbols.intern("__ge__"),
            contains: symbols.intern("__contains__"),
            range: symbols.intern("__range__"),
            shl: symbols.intern("__shl__"),
            shr: symbols.intern("__shr__"),
            bit_or: symbols.intern("__or__"),
            bit_xor: symbols.intern("__xor__"),
            bit_and: symbols.intern("__and__"),
            neg: symbols.intern("__neg__"),
            invert: symbols.intern("__invert__"),
            getitem: symbols.intern("__getitem__"),
            setitem: symbols.intern("__setitem__"),
            str: symbols.intern("__str__"),
            iter: symbols.intern("__iter__"),
            next: symbols.intern("next"),
            del: symbols.intern("__del__"),
            message: symbols.intern("message"),
            this: symbols.intern("this"),
        }
    }
}

/// Populate module 0 with the builtin classes and functions.
pub(crate) fn install(rt: &mut Runtime) {
    let module = rt.new_module("builtins", None);
    debug_assert_eq!(module, BUILTINS);
    let mut b = ModuleBuilder::new(rt, module);
    b.class("Object", None);
    for name in VALUE_CLASSES {
        b.class(name, Some(OBJECT));
    }
    for kind in ErrorKind::ALL {
        let class = b.class(kind.class_name(), Some(ERROR));
        debug_assert_eq!(class, error_class(kind));
    }
    globals::install(&mut b);
    numbers::install(&mut b);
    strings::install(&mut b);
    lists::install(&mut b);
    errors::install(&mut b);
    b.finish();

    rt.modules[module.index()].state = ModuleState::Initialized;
    let message = rt.permanent_string("object quota exhausted");
    let memory_error = rt.heap.alloc_permanent(
        error_class(ErrorKind::Memory),
        vec![message],
        Payload::None,
    );
    rt.memory_error = Value::Object(memory_error);
}

// ── Rendering ──────────────────────────────────────────────────────

/// `__str__` of `v`: what `print` and interpolation show.
pub fn display(rt: &mut Runtime, v: Value) -> VmResult<String> {
    match v {
        Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) => return Ok(v.to_string()),
        Value::Object(_) => {
            if let Some(s) = rt.str_of(v) {
                return Ok(s.to_string());
            }
        }
        _ => {}
    }
    let name = rt.syms.str;
    let result = interpreter::call_method(rt, v, name, &[])?;
    let text = rt.str_of(result).map(str::to_string);
    rt.release(result);
    match text {
        Some(text) => Ok(text),
        None => {
            let class = rt.class_name_of(v).to_string();
            Err(rt.raise(
                ErrorKind::Type,
                format!("__str__ of {class} returned a non-string"),
            ))
        }
    }
}

/// Like [`display`], but strings are quoted (list elements).
pub fn repr(rt: &mut Runtime, v: Value) -> VmResult<String> {
    match rt.str_of(v) {
        Some(s) => Ok(format!("{s:?}")),
        None => display(rt, v),
    }
}

/// Rendering of values whose class does not define `__str__`.
pub(crate) fn default_str(rt: &Runtime, v: Value) -> String {
    match v {
        Value::Class(c) => format!("<class {}>", rt.classes[c.index()].name),
        Value::Function(f) => format!("<fn {}>", rt.functions[f.index()].name),
        Value::Native(n) => format!("<native fn {}>", rt.natives[n.index()].name),
        Value::Module(m) => format!("<module {}>", rt.modules[m.index()].name),
        Value::Object(r) => {
            let Some(instance) = rt.heap.get(r) else {
                return "<freed>".to_string();
            };
            match &instance.payload {
                Payload::Str(s) => s.clone(),
                Payload::BigInt(n) => n.to_string(),
                Payload::Rational(q) => format!("{}/{}", q.numer(), q.denom()),
                Payload::Bytes(b) => format!("b\"{}\"", b.escape_ascii()),
                Payload::Regex(re) => format!("re\"{}\"", re.as_str()),
                Payload::Range { start, end } => format!("{start}..{end}"),
                Payload::Closure(f) => format!("<fn {}>", rt.functions[f.index()].name),
                Payload::BoundMethod => {
                    let method = instance.fields.get(1).copied().unwrap_or(Value::Nil);
                    format!("<bound {}>", default_str(rt, method).trim_matches(['<', '>']))
                }
                Payload::Generator(g) => {
                    format!("<generator {}>", rt.functions[g.func.index()].name)
                }
                Payload::Weak(w) => match rt.heap.upgrade(*w) {
                    Some(target) => format!("<weak {}>", rt.class_name_of(Value::Object(target))),
                    None => "<weak dead>".to_string(),
                },
                _ => format!("<{} instance>", rt.class_name_of(v)),
            }
        }
        other => other.to_string(),
    }
}

// ── Equality ───────────────────────────────────────────────────────

/// `a == b` as the language defines it, running `__eq__` when needed.
pub fn values_equal(rt: &mut Runtime, a: Value, b: Value) -> VmResult<bool> {
    if let Some(eq) = numbers::quick_eq(a, b) {
        return Ok(eq);
    }
    if a.is_same(b) {
        return Ok(true);
    }
    if let (Some(x), Some(y)) = (rt.str_of(a), rt.str_of(b)) {
        return Ok(x == y);
    }
    let name = rt.syms.eq;
    let result = interpreter::call_method(rt, a, name, &[b])?;
    rt.release(result);
    Ok(result.is_truthy())
}

// ── Argument helpers ───────────────────────────────────────────────

pub(crate) fn expect_int(rt: &mut Runtime, v: Value, what: &str) -> VmResult<i64> {
    match v {
        Value::Int(n) => Ok(n),
        other => {
            let class = rt.class_name_of(other).to_string();
            Err(rt.raise(ErrorKind::Type, format!("{what} must be Int, not {class}")))
        }
    }
}

pub(crate) fn expect_str(rt: &mut Runtime, v: Value, what: &str) -> VmResult<String> {
    match rt.str_of(v) {
        Some(s) => Ok(s.to_string()),
        None => {
            let class = rt.class_name_of(v).to_string();
            Err(rt.raise(ErrorKind::Type, format!("{what} must be String, not {class}")))
        }
    }
}

/// Resolve a possibly negative index against `len`.
pub(crate) fn index_in(rt: &mut Runtime, index: i64, len: usize) -> VmResult<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(rt.raise(
            ErrorKind::Index,
            format!("index {index} out of range for length {len}"),
        ));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::run_source;

    #[test]
    fn builtin_class_ids_match_names() {
        let rt = Runtime::default();
        assert_eq!(rt.classes[OBJECT.index()].name, "Object");
        assert_eq!(rt.classes[LIST.index()].name, "List");
        assert_eq!(rt.classes[ERROR.index()].name, "Error");
        assert_eq!(
            rt.classes[error_class(ErrorKind::StopIteration).index()].name,
            "StopIteration"
        );
        assert!(rt.is_subclass(error_class(ErrorKind::Index), ERROR));
        assert!(rt.classes.iter().all(|c| c.flattened));
    }

    #[test]
    fn print_renders_every_kind() {
        let out = run_source(
            "print(nil, true, 3, 2.5, \"s\", [1, \"a\", [nil]], 1..3, b\"hi\", re\"a+\")",
        );
        assert_eq!(out, "nil true 3 2.5 s [1, \"a\", [nil]] 1..3 b\"hi\" re\"a+\"\n");
    }

    #[test]
    fn user_str_is_used() {
        let out = run_source(
            "class P(x) {\n  var x = x\n  def __str__() { return \"P(${this.x})\" }\n}\nprint(P(4))\nprint(\"got ${P(5)}\")",
        );
        assert_eq!(out, "P(4)\ngot P(5)\n");
    }

    #[test]
    fn default_instance_rendering() {
        assert_eq!(run_source("class Q {}\nprint(Q())\nprint(Q)"), "<Q instance>\n<class Q>\n");
    }

    #[test]
    fn user_equality() {
        let out = run_source(
            "class V(n) {\n  var n = n\n  def __eq__(o) { return this.n == o.n }\n}\nprint(V(1) == V(1), V(1) != V(2), [V(3)] == [V(3)])",
        );
        assert_eq!(out, "true true true\n");
    }

    #[test]
    fn isinstance_and_type_name() {
        let out = run_source(
            "class A {}\nclass B extends A {}\nprint(isinstance(B(), A), isinstance(A(), B), type_name(1), type_name(B()))",
        );
        assert_eq!(out, "true false Int B\n");
    }

    #[test]
    fn weak_references_do_not_keep_objects_alive() {
        let out = run_source(
            "class T {}\nvar t = T()\nlet w = weakref(t)\nprint(w.alive(), w.get() == t)\nt = nil\nprint(w.alive(), w.get())",
        );
        assert_eq!(out, "true true\nfalse nil\n");
    }
}
