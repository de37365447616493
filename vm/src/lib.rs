//! The fox runtime: compiler, link pass, interpreter, builtins and the
//! module boundary.
//!
//! A [`Runtime`] owns every descriptor arena, the heap and the operand
//! stack. Hosts drive it through [`Runtime::run_source`],
//! [`Runtime::run_file`], [`Runtime::eval`] and [`Runtime::call`].

pub mod builtins;
pub mod compiler;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod interpreter;
pub mod link;
pub mod module;
pub mod native;

use std::fs;
use std::io::Write;
use std::mem;
use std::path::Path;

use fox_object::{
    ClassId, FuncId, Heap, HeaderFlags, ModuleId, ObjRef, Payload, StackEntry,
    Symbol, Symbols,
};
use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::builtins::Syms;
use crate::descriptor::{
    Binding, ClassDesc, ConstDesc, FuncDesc, ModuleDesc, ModuleState, NativeDesc,
};
use crate::interpreter::Frame;
use crate::link::PatchRecord;
use crate::module::Loader;

pub use crate::config::Config;
pub use fox_object::Value;
pub use crate::error::{Diagnostic, ErrorKind, FoxError, Raised, TraceEntry, VmResult};

/// Deepest container nesting that rendering and comparison will walk.
const MAX_VISIT_DEPTH: usize = 128;

/// Where `print` and `sys.write` go.
#[derive(Debug)]
pub enum Output {
    Stdout,
    Buffer(Vec<u8>),
}

pub struct Runtime {
    pub config: Config,
    pub heap: Heap,
    pub symbols: Symbols,
    /// Well-known method and field names.
    pub syms: Syms,
    pub modules: Vec<ModuleDesc>,
    pub classes: Vec<ClassDesc>,
    pub functions: Vec<FuncDesc>,
    pub natives: Vec<NativeDesc>,
    pub constants: Vec<ConstDesc>,
    pub loader: Loader,
    pub(crate) stack: Vec<StackEntry>,
    pub(crate) frames: Vec<Frame>,
    /// The exception in flight, if any. Holds one count.
    pub(crate) current_error: Option<Value>,
    pub(crate) trace: Vec<TraceEntry>,
    pub(crate) patches: Vec<PatchRecord>,
    pub(crate) output: Output,
    pub(crate) finalizing: bool,
    /// Raised without allocating when the heap quota is exhausted.
    pub(crate) memory_error: Value,
    /// Containers whose rendering or comparison is in progress.
    pub(crate) visiting: Vec<ObjRef>,
    /// Code sites a failed link left unpatched, with the error they raise
    /// when reached.
    pub(crate) unresolved: FxHashMap<(FuncId, usize), (ErrorKind, String)>,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        let mut symbols = Symbols::new();
        let syms = Syms::new(&mut symbols);
        let mut rt = Self {
            heap: Heap::new(config.heap.clone()),
            loader: Loader::new(config.import_dirs.clone()),
            config,
            symbols,
            syms,
            modules: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            natives: Vec::new(),
            constants: Vec::new(),
            stack: Vec::new(),
            frames: Vec::new(),
            current_error: None,
            trace: Vec::new(),
            patches: Vec::new(),
            output: Output::Stdout,
            finalizing: false,
            memory_error: Value::Nil,
            visiting: Vec::new(),
            unresolved: FxHashMap::default(),
        };
        builtins::install(&mut rt);
        rt
    }

    // ── Host entry points ──────────────────────────────────────────

    /// Compile, link and run `source` as a new module named `name`.
    /// Returns the module's result (nil unless it ends in `return`).
    pub fn run_source(&mut self, name: &str, source: &str) -> Result<Value, FoxError> {
        let module = self.new_module(name, None);
        self.load_source(module, source)?;
        self.init_module(module)
    }

    pub fn run_file(&mut self, path: &Path) -> Result<Value, FoxError> {
        let source = fs::read_to_string(path).map_err(|source| FoxError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(dir) = path.parent() {
            let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
            if !self.loader.import_dirs.iter().any(|d| d == dir) {
                self.loader.import_dirs.insert(0, dir.to_path_buf());
            }
        }
        let name = path
            .file_stem()
            .map_or_else(|| "main".to_string(), |s| s.to_string_lossy().into_owned());
        let module = self.new_module(&name, Some(path.to_path_buf()));
        self.load_source(module, &source)?;
        self.init_module(module)
    }

    /// Compile and link `source` into `module` without running it.
    pub fn load_source(&mut self, module: ModuleId, source: &str) -> Result<FuncId, FoxError> {
        let init = compiler::compile_module(self, module, source).inspect_err(|_| {
            link::abandon(self);
        })?;
        link::link(self).map_err(FoxError::Link)?;
        Ok(init)
    }

    /// Run one interactive fragment in `module`. Names it defines stay in
    /// the module for later fragments; a trailing expression is the result.
    pub fn eval(&mut self, module: ModuleId, source: &str) -> Result<Value, FoxError> {
        let func = compiler::compile_fragment(self, module, source).inspect_err(|_| {
            link::abandon(self);
        })?;
        link::link(self).map_err(FoxError::Link)?;
        let result = interpreter::call_value(self, Value::Function(func), &[]);
        self.finish(result)
    }

    /// Call any callable value with borrowed arguments.
    pub fn call(&mut self, callee: Value, args: &[Value]) -> Result<Value, FoxError> {
        let result = interpreter::call_value(self, callee, args);
        self.finish(result)
    }

    /// Run the init function of `module` unless it already ran.
    pub fn init_module(&mut self, module: ModuleId) -> Result<Value, FoxError> {
        let result = interpreter::init_module(self, module);
        self.finish(result)
    }

    /// Import `dotted` as if by an `import` statement at top level.
    pub fn import(&mut self, dotted: &str) -> Result<ModuleId, FoxError> {
        let module = module::import(self, dotted, None, 0).inspect_err(|_| {
            link::abandon(self);
        })?;
        link::link(self).map_err(FoxError::Link)?;
        self.init_module(module)?;
        Ok(module)
    }

    /// `__str__` of `value`, as `print` renders it.
    pub fn display(&mut self, value: Value) -> Result<String, FoxError> {
        let result = builtins::display(self, value);
        self.finish(result)
    }

    fn finish<T>(&mut self, result: VmResult<T>) -> Result<T, FoxError> {
        result.map_err(|Raised| self.take_error())
    }

    /// Turn the exception in flight into a host error.
    pub fn take_error(&mut self) -> FoxError {
        let trace = mem::take(&mut self.trace);
        let Some(error) = self.current_error.take() else {
            return FoxError::Runtime {
                class: "Error".into(),
                message: "no exception in flight".into(),
                trace,
            };
        };
        let class = self.class_name_of(error).to_string();
        let message = self.error_message(error);
        self.release(error);
        FoxError::Runtime { class, message, trace }
    }

    // ── Output ─────────────────────────────────────────────────────

    /// Collect output in memory instead of writing to stdout.
    pub fn capture_output(&mut self) {
        self.output = Output::Buffer(Vec::new());
    }

    /// Output collected since the last call.
    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            Output::Buffer(buf) => String::from_utf8_lossy(&mem::take(buf)).into_owned(),
            Output::Stdout => String::new(),
        }
    }

    pub fn write_out(&mut self, text: &str) {
        match &mut self.output {
            Output::Buffer(buf) => buf.extend_from_slice(text.as_bytes()),
            Output::Stdout => {
                let mut out = std::io::stdout().lock();
                if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
                    warn!("stdout write failed: {err}");
                }
            }
        }
    }

    // ── Modules ────────────────────────────────────────────────────

    pub fn new_module(&mut self, name: &str, path: Option<std::path::PathBuf>) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(ModuleDesc::new(name, path));
        debug!("module m{} = {name}", id.0);
        id
    }

    pub fn module(&self, id: ModuleId) -> &ModuleDesc {
        &self.modules[id.index()]
    }

    /// Current value of a module-level name.
    pub fn global(&self, module: ModuleId, name: &str) -> Option<Value> {
        let sym = self.symbols.lookup(name)?;
        let m = &self.modules[module.index()];
        Some(match m.lookup(sym)? {
            Binding::Global { slot, .. } => m.globals[slot as usize],
            Binding::Function(f) => Value::Function(f),
            Binding::Native(n) => Value::Native(n),
            Binding::Class(c) => Value::Class(c),
            Binding::Module(m) => Value::Module(m),
            Binding::Constant(c) => match self.constants[c.index()].state {
                descriptor::ConstState::Ready(v) => v,
                _ => return None,
            },
        })
    }

    pub fn module_state(&self, id: ModuleId) -> ModuleState {
        self.modules[id.index()].state
    }

    /// Disassembly of every function defined in `module`.
    pub fn dump_module(&self, module: ModuleId) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        for (i, f) in self.functions.iter().enumerate() {
            if f.module != module {
                continue;
            }
            let _ = writeln!(
                out,
                "== fn{i} {} (params {}, captures {}, stack {}) ==",
                f.name, f.params, f.captures, f.max_stack
            );
            out.push_str(&fox_bytecode::disassemble(&f.code));
            for (k, c) in f.constants.iter().enumerate() {
                let _ = writeln!(out, "  #{k} = {}", self.debug_value(*c));
            }
        }
        out
    }

    // ── Values ─────────────────────────────────────────────────────

    #[inline]
    pub fn intern(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    #[inline]
    pub fn retain(&mut self, v: Value) {
        self.heap.retain(v);
    }

    /// Drop one count of `v`, running destructors that became due.
    #[inline]
    pub fn release(&mut self, v: Value) {
        self.heap.release(v);
        if !self.finalizing && self.heap.has_pending_finalizers() {
            interpreter::run_finalizers(self);
        }
    }

    /// Allocate an instance; quota exhaustion raises MemoryError and drops
    /// the counts `fields` carried.
    pub fn alloc(
        &mut self,
        class: ClassId,
        fields: Vec<Value>,
        payload: Payload,
    ) -> VmResult<Value> {
        if let Err(err) = self.heap.check_alloc(fields.len()) {
            debug!("allocation of {} failed: {err}", self.classes[class.index()].name);
            let mut payload = payload;
            let mut refs = Vec::new();
            payload.drain_refs(&mut refs);
            for v in fields.into_iter().chain(refs.into_iter().map(Value::Object)) {
                self.release(v);
            }
            return Err(self.raise_memory_error());
        }
        let r = match self.heap.alloc(class, fields, payload) {
            Ok(r) => r,
            Err(_) => return Err(self.raise_memory_error()),
        };
        if self.classes[class.index()].has_destructor {
            if let Some(instance) = self.heap.get_mut(r) {
                instance.header.flags.insert(HeaderFlags::HAS_DESTRUCTOR);
            }
        }
        Ok(Value::Object(r))
    }

    /// Allocate with only a payload.
    pub fn alloc_payload(&mut self, class: ClassId, payload: Payload) -> VmResult<Value> {
        self.alloc(class, Vec::new(), payload)
    }

    pub fn new_string(&mut self, s: impl Into<String>) -> VmResult<Value> {
        self.alloc_payload(builtins::STRING, Payload::Str(s.into()))
    }

    /// A list taking over the counts of `items`.
    pub fn new_list(&mut self, items: Vec<Value>) -> VmResult<Value> {
        if let Err(raised) = self.check_items(items.len()) {
            for v in items {
                self.release(v);
            }
            return Err(raised);
        }
        self.alloc_payload(builtins::LIST, Payload::List(items))
    }

    /// MemoryError unless a list of `len` items fits the heap limits.
    pub fn check_items(&mut self, len: usize) -> VmResult<()> {
        match self.heap.check_items(len) {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!("list allocation failed: {err}");
                Err(self.raise_memory_error())
            }
        }
    }

    /// Mark `v` as being walked by a recursive builtin. Re-entering the
    /// same container raises LoopReferenceError. Pair with `leave`.
    pub(crate) fn enter(&mut self, v: Value) -> VmResult<()> {
        let Some(r) = v.as_object() else {
            return Ok(());
        };
        if self.visiting.contains(&r) {
            let class = self.class_name_of(v).to_string();
            return Err(self.raise(
                ErrorKind::LoopReference,
                format!("{class} contains itself"),
            ));
        }
        if self.visiting.len() >= MAX_VISIT_DEPTH {
            return Err(self.raise(ErrorKind::StackOverflow, "containers nested too deeply"));
        }
        self.visiting.push(r);
        Ok(())
    }

    pub(crate) fn leave(&mut self, v: Value) {
        if let Some(r) = v.as_object() {
            if let Some(at) = self.visiting.iter().rposition(|&x| x == r) {
                self.visiting.remove(at);
            }
        }
    }

    /// Permanent string for constant pools.
    pub fn permanent_string(&mut self, s: impl Into<String>) -> Value {
        Value::Object(self.heap.alloc_permanent(
            builtins::STRING,
            Vec::new(),
            Payload::Str(s.into()),
        ))
    }

    pub fn instance(&self, v: Value) -> Option<&fox_object::Instance> {
        self.heap.get(v.as_object()?)
    }

    pub fn str_of(&self, v: Value) -> Option<&str> {
        self.instance(v)?.as_str()
    }

    pub fn class_of(&self, v: Value) -> ClassId {
        match v {
            Value::Nil => builtins::NIL,
            Value::Bool(_) => builtins::BOOL,
            Value::Int(_) => builtins::INT,
            Value::Float(_) => builtins::FLOAT,
            Value::Object(r) => self.heap.class_of(r).unwrap_or(builtins::OBJECT),
            Value::Class(_) => builtins::CLASS,
            Value::Function(_) | Value::Native(_) => builtins::FUNCTION,
            Value::Module(_) => builtins::MODULE,
        }
    }

    pub fn class_name_of(&self, v: Value) -> &str {
        &self.classes[self.class_of(v).index()].name
    }

    pub fn is_subclass(&self, mut class: ClassId, ancestor: ClassId) -> bool {
        loop {
            if class == ancestor {
                return true;
            }
            match self.classes[class.index()].base {
                Some(base) => class = base,
                None => return ancestor == builtins::OBJECT,
            }
        }
    }

    pub fn is_instance(&self, v: Value, class: ClassId) -> bool {
        self.is_subclass(self.class_of(v), class)
    }

    /// Message field of an error instance.
    pub fn error_message(&self, error: Value) -> String {
        self.instance(error)
            .and_then(|i| i.fields.first().copied())
            .and_then(|m| self.str_of(m))
            .unwrap_or_default()
            .to_string()
    }

    /// Short rendering for logs and listings; never runs user code.
    pub fn debug_value(&self, v: Value) -> String {
        match v {
            Value::Object(r) => match self.heap.get(r).map(|i| &i.payload) {
                Some(Payload::Str(s)) => format!("{s:?}"),
                Some(Payload::BigInt(n)) => format!("{n}n"),
                Some(Payload::Rational(q)) => format!("{q}r"),
                Some(Payload::Regex(re)) => format!("re{:?}", re.as_str()),
                Some(Payload::Bytes(b)) => format!("b{:?}", String::from_utf8_lossy(b)),
                Some(_) => format!("<{} {}.{}>", self.class_name_of(v), r.index, r.generation),
                None => format!("<freed {}.{}>", r.index, r.generation),
            },
            Value::Class(c) => format!("<class {}>", self.classes[c.index()].name),
            Value::Function(f) => format!("<fn {}>", self.functions[f.index()].name),
            Value::Native(n) => format!("<native {}>", self.natives[n.index()].name),
            Value::Module(m) => format!("<module {}>", self.modules[m.index()].name),
            other => other.to_string(),
        }
    }

    // ── Raising ────────────────────────────────────────────────────

    /// Raise a builtin error with `message`.
    pub fn raise(&mut self, kind: ErrorKind, message: impl Into<String>) -> Raised {
        self.raise_class(builtins::error_class(kind), message)
    }

    pub fn raise_class(&mut self, class: ClassId, message: impl Into<String>) -> Raised {
        let message = message.into();
        debug!("raise {}: {message}", self.classes[class.index()].name);
        let text = match self.new_string(message) {
            Ok(v) => v,
            Err(raised) => return raised,
        };
        let mut fields = vec![text];
        fields.resize(self.classes[class.index()].fields.len().max(1), Value::Nil);
        match self.alloc(class, fields, Payload::None) {
            Ok(error) => self.set_error(error),
            Err(raised) => raised,
        }
    }

    pub(crate) fn raise_memory_error(&mut self) -> Raised {
        self.heap.retain(self.memory_error);
        self.set_error(self.memory_error)
    }

    /// Make `error` (whose count moves in) the exception in flight.
    pub(crate) fn set_error(&mut self, error: Value) -> Raised {
        if let Some(old) = self.current_error.replace(error) {
            self.release(old);
        }
        self.trace.clear();
        Raised
    }

    /// Discard the exception in flight.
    pub fn clear_error(&mut self) {
        self.trace.clear();
        if let Some(old) = self.current_error.take() {
            self.release(old);
        }
    }

    /// Class of the exception in flight.
    pub fn error_class(&self) -> Option<ClassId> {
        self.current_error.map(|e| self.class_of(e))
    }

    /// Operand stack depth; zero between host calls.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Run `source` as module `main`, returning what it printed.
    pub fn run_source(source: &str) -> String {
        let mut rt = Runtime::default();
        rt.capture_output();
        if let Err(err) = rt.run_source("main", source) {
            panic!("script failed: {err}\noutput so far:\n{}", rt.take_output());
        }
        rt.take_output()
    }

    /// Run `source`, expecting it to fail; returns the error and the output.
    pub fn run_failing(source: &str) -> (FoxError, String) {
        let mut rt = Runtime::default();
        rt.capture_output();
        let err = rt
            .run_source("main", source)
            .expect_err("script should have failed");
        (err, rt.take_output())
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn precedence() {
        assert_eq!(run_source("print(2 + 3 * 4)\nprint((2 + 3) * 4)"), "14\n20\n");
    }

    #[test]
    fn stack_is_empty_after_run() {
        let mut rt = Runtime::default();
        rt.capture_output();
        rt.run_source("main", "let x = [1, 2, 3]\nprint(len(x))").expect("runs");
        assert_eq!(rt.stack_depth(), 0);
        assert_eq!(rt.call_depth(), 0);
    }

    #[test]
    fn runtime_error_reaches_host() {
        let (err, _) = run_failing("def f() { return 1 / 0 }\nf()");
        match err {
            FoxError::Runtime { class, message, trace } => {
                assert_eq!(class, "ValueError");
                assert_eq!(message, "division by zero");
                assert_eq!(trace.first().map(|t| t.function.as_str()), Some("f"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn eval_keeps_module_scope() {
        let mut rt = Runtime::default();
        rt.capture_output();
        let repl = rt.new_module("repl", None);
        rt.eval(repl, "var total = 40").expect("define");
        let v = rt.eval(repl, "total + 2").expect("read back");
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn names_left_by_a_failed_link_raise_when_reached() {
        let mut rt = Runtime::default();
        rt.capture_output();
        let repl = rt.new_module("repl", None);
        let err = rt
            .eval(repl, "def f() {\n  try { throw ValueError(\"x\") } catch Missing { print(\"swallowed\") }\n}")
            .expect_err("link fails");
        assert!(matches!(err, FoxError::Link(_)), "{err:?}");
        rt.eval(repl, "def g(x: Missing) { return x }").expect_err("link fails");
        rt.eval(repl, "def h() { later = 1 }").expect_err("link fails");

        for call in ["f()", "g(1)", "h()"] {
            match rt.eval(repl, call) {
                Err(FoxError::Runtime { class, message, .. }) => {
                    assert_eq!(class, "NameError", "{call}");
                    let name = if call == "h()" { "later" } else { "Missing" };
                    assert_eq!(message, format!("undefined name '{name}'"), "{call}");
                }
                other => panic!("{call}: unexpected {other:?}"),
            }
        }
        assert_eq!(rt.take_output(), "");
        assert_eq!(rt.stack_depth(), 0);
    }

    #[test]
    fn names_left_by_a_failed_compile_raise_when_reached() {
        let mut rt = Runtime::default();
        rt.capture_output();
        let repl = rt.new_module("repl", None);
        rt.eval(repl, "class A {}").expect("defines");
        let err = rt
            .eval(repl, "def A.m(x: Pending) { return x }\nlet = 3")
            .expect_err("syntax error");
        assert!(matches!(err, FoxError::Compile(_)), "{err:?}");
        match rt.eval(repl, "A().m(1)") {
            Err(FoxError::Runtime { class, message, .. }) => {
                assert_eq!(class, "NameError");
                assert_eq!(message, "undefined name 'Pending'");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn host_call() {
        let mut rt = Runtime::default();
        rt.capture_output();
        let m = rt.new_module("main", None);
        rt.load_source(m, "def add(a, b) { return a + b }").expect("compiles");
        let add = rt.global(m, "add").expect("bound");
        assert_eq!(rt.call(add, &[Value::Int(2), Value::Int(5)]).expect("calls"), Value::Int(7));
    }
}
