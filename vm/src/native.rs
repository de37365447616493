//! Native modules: the Rust-side registration API and the C ABI used by
//! extension libraries.
//!
//! A library exports two symbols:
//!
//! ```c
//! const char *fox_version(void);
//! int fox_register(ModuleHandle *module, const RuntimeServices *services,
//!                  StateHandle *state);
//! ```
//!
//! `fox_register` populates the module through the services table and
//! returns 0 on success. Functions it defines are called as
//! [`ForeignFn`]s with borrowed arguments. The value written to `out` must
//! carry one count for the runtime: values from `alloc_string` already do,
//! anything else (an argument handed back, say) is `retain`ed first. A
//! library keeping an object past the call holds its own count and gives
//! it back with `release`.

use std::ffi::{CStr, c_char};
use std::path::{Path, PathBuf};

use fox_object::{ClassId, FuncId, ModuleId, NativeId, ObjRef, Value};
use libloading::Library;
use log::debug;

use crate::Runtime;
use crate::descriptor::{
    Arity, Binding, ClassDesc, ConstDesc, ConstId, ConstState, Ctor, Method, NativeDesc,
    NativeFn, RustFn,
};
use crate::error::{ErrorKind, Raised, VmResult};

/// Version of [`RuntimeServices`]; libraries compare it on registration.
pub const ABI_VERSION: u32 = 2;

const REGISTER_SYMBOL: &[u8] = b"fox_register\0";
const VERSION_SYMBOL: &[u8] = b"fox_version\0";

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("cannot load extension {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("extension {} does not export {symbol}", .path.display())]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("registration of extension {module} failed with code {code}")]
    Registration { module: String, code: i32 },
}

// ── Values across the boundary ─────────────────────────────────────

/// A [`Value`] as C sees it: a tag and 64 bits of payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfiValue {
    pub tag: u32,
    pub bits: u64,
}

impl FfiValue {
    pub const TAG_NIL: u32 = 0;
    pub const TAG_BOOL: u32 = 1;
    pub const TAG_INT: u32 = 2;
    pub const TAG_FLOAT: u32 = 3;
    pub const TAG_OBJECT: u32 = 4;
    pub const TAG_CLASS: u32 = 5;
    pub const TAG_FUNCTION: u32 = 6;
    pub const TAG_NATIVE: u32 = 7;
    pub const TAG_MODULE: u32 = 8;

    pub const NIL: FfiValue = FfiValue { tag: Self::TAG_NIL, bits: 0 };

    pub fn int(n: i64) -> Self {
        Self { tag: Self::TAG_INT, bits: n as u64 }
    }

    pub fn float(x: f64) -> Self {
        Self { tag: Self::TAG_FLOAT, bits: x.to_bits() }
    }

    pub fn from_value(v: Value) -> Self {
        let (tag, bits) = match v {
            Value::Nil => (Self::TAG_NIL, 0),
            Value::Bool(b) => (Self::TAG_BOOL, b as u64),
            Value::Int(n) => (Self::TAG_INT, n as u64),
            Value::Float(x) => (Self::TAG_FLOAT, x.to_bits()),
            Value::Object(r) => (Self::TAG_OBJECT, (r.generation as u64) << 32 | r.index as u64),
            Value::Class(c) => (Self::TAG_CLASS, c.0 as u64),
            Value::Function(f) => (Self::TAG_FUNCTION, f.0 as u64),
            Value::Native(n) => (Self::TAG_NATIVE, n.0 as u64),
            Value::Module(m) => (Self::TAG_MODULE, m.0 as u64),
        };
        Self { tag, bits }
    }

    /// `None` for an unknown tag.
    pub fn to_value(self) -> Option<Value> {
        Some(match self.tag {
            Self::TAG_NIL => Value::Nil,
            Self::TAG_BOOL => Value::Bool(self.bits != 0),
            Self::TAG_INT => Value::Int(self.bits as i64),
            Self::TAG_FLOAT => Value::Float(f64::from_bits(self.bits)),
            Self::TAG_OBJECT => Value::Object(ObjRef {
                index: self.bits as u32,
                generation: (self.bits >> 32) as u32,
            }),
            Self::TAG_CLASS => Value::Class(ClassId(self.bits as u32)),
            Self::TAG_FUNCTION => Value::Function(FuncId(self.bits as u32)),
            Self::TAG_NATIVE => Value::Native(NativeId(self.bits as u32)),
            Self::TAG_MODULE => Value::Module(ModuleId(self.bits as u32)),
            _ => return None,
        })
    }
}

/// Opaque to C: the module being registered.
pub struct ModuleHandle {
    rt: *mut Runtime,
    module: ModuleId,
}

/// Opaque to C: the runtime a native function runs in.
pub struct StateHandle {
    rt: *mut Runtime,
}

/// Native function exported by an extension library. Returns false when it
/// raised (or failed without raising, which becomes a TypeError).
pub type ForeignFn = unsafe extern "C" fn(
    state: *mut StateHandle,
    args: *const FfiValue,
    argc: usize,
    out: *mut FfiValue,
) -> bool;

/// `fox_register` entry point.
pub type RegisterFn = unsafe extern "C" fn(
    module: *mut ModuleHandle,
    services: *const RuntimeServices,
    state: *mut StateHandle,
) -> i32;

/// Function table handed to `fox_register`.
#[repr(C)]
pub struct RuntimeServices {
    pub abi_version: u32,
    /// `max_args < 0` accepts any number of arguments.
    pub define_function: unsafe extern "C" fn(
        module: *mut ModuleHandle,
        name: *const c_char,
        min_args: u16,
        max_args: i32,
        func: ForeignFn,
    ) -> bool,
    pub define_int: unsafe extern "C" fn(*mut ModuleHandle, *const c_char, i64) -> bool,
    pub define_float: unsafe extern "C" fn(*mut ModuleHandle, *const c_char, f64) -> bool,
    pub define_str:
        unsafe extern "C" fn(*mut ModuleHandle, *const c_char, *const c_char) -> bool,
    pub intern: unsafe extern "C" fn(state: *mut StateHandle, name: *const c_char) -> u32,
    pub alloc_string: unsafe extern "C" fn(
        state: *mut StateHandle,
        data: *const u8,
        len: usize,
        out: *mut FfiValue,
    ) -> bool,
    /// Borrowed UTF-8 bytes of a string value, or null.
    pub string_data:
        unsafe extern "C" fn(state: *mut StateHandle, value: FfiValue, len: *mut usize) -> *const u8,
    /// `kind` indexes the builtin error classes, SyntaxError = 0.
    pub raise_error: unsafe extern "C" fn(state: *mut StateHandle, kind: u32, message: *const c_char),
    pub write_stdout: unsafe extern "C" fn(state: *mut StateHandle, data: *const u8, len: usize),
    /// Take a count on a live value; false for a dead or forged object.
    pub retain: unsafe extern "C" fn(state: *mut StateHandle, value: FfiValue) -> bool,
    /// Give back a count taken with `retain` or received from `alloc_string`.
    pub release: unsafe extern "C" fn(state: *mut StateHandle, value: FfiValue),
}

pub static SERVICES: RuntimeServices = RuntimeServices {
    abi_version: ABI_VERSION,
    define_function: svc_define_function,
    define_int: svc_define_int,
    define_float: svc_define_float,
    define_str: svc_define_str,
    intern: svc_intern,
    alloc_string: svc_alloc_string,
    string_data: svc_string_data,
    raise_error: svc_raise_error,
    write_stdout: svc_write_stdout,
    retain: svc_retain,
    release: svc_release,
};

unsafe fn c_str<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    // SAFETY: caller passes a NUL-terminated string valid for the call.
    unsafe { CStr::from_ptr(p) }.to_str().ok()
}

unsafe fn module_of<'a>(handle: *mut ModuleHandle) -> Option<(&'a mut Runtime, ModuleId)> {
    // SAFETY: handles only live for the duration of `fox_register`, during
    // which the runtime is exclusively borrowed by `register_with`.
    let handle = unsafe { handle.as_mut() }?;
    let rt = unsafe { handle.rt.as_mut() }?;
    Some((rt, handle.module))
}

unsafe fn runtime_of<'a>(state: *mut StateHandle) -> Option<&'a mut Runtime> {
    // SAFETY: see `module_of`; state handles live for one native call.
    unsafe { state.as_mut()?.rt.as_mut() }
}

unsafe extern "C" fn svc_define_function(
    module: *mut ModuleHandle,
    name: *const c_char,
    min_args: u16,
    max_args: i32,
    func: ForeignFn,
) -> bool {
    let (Some((rt, module)), Some(name)) = (unsafe { module_of(module) }, unsafe { c_str(name) })
    else {
        return false;
    };
    let arity = match u16::try_from(max_args) {
        Ok(max) => Arity::range(min_args, max),
        Err(_) => Arity::at_least(min_args),
    };
    ModuleBuilder::new(rt, module).native(name, arity, NativeFn::Foreign(func));
    true
}

unsafe fn define_value(
    module: *mut ModuleHandle,
    name: *const c_char,
    make: impl FnOnce(&mut Runtime) -> Value,
) -> bool {
    let (Some((rt, module)), Some(name)) = (unsafe { module_of(module) }, unsafe { c_str(name) })
    else {
        return false;
    };
    let value = make(rt);
    ModuleBuilder::new(rt, module).constant(name, value);
    true
}

unsafe extern "C" fn svc_define_int(module: *mut ModuleHandle, name: *const c_char, v: i64) -> bool {
    unsafe { define_value(module, name, |_| Value::Int(v)) }
}

unsafe extern "C" fn svc_define_float(module: *mut ModuleHandle, name: *const c_char, v: f64) -> bool {
    unsafe { define_value(module, name, |_| Value::Float(v)) }
}

unsafe extern "C" fn svc_define_str(
    module: *mut ModuleHandle,
    name: *const c_char,
    text: *const c_char,
) -> bool {
    let Some(text) = (unsafe { c_str(text) }) else {
        return false;
    };
    unsafe { define_value(module, name, |rt| rt.permanent_string(text)) }
}

unsafe extern "C" fn svc_intern(state: *mut StateHandle, name: *const c_char) -> u32 {
    match (unsafe { runtime_of(state) }, unsafe { c_str(name) }) {
        (Some(rt), Some(name)) => rt.intern(name).0,
        _ => u32::MAX,
    }
}

unsafe extern "C" fn svc_alloc_string(
    state: *mut StateHandle,
    data: *const u8,
    len: usize,
    out: *mut FfiValue,
) -> bool {
    let Some(rt) = (unsafe { runtime_of(state) }) else {
        return false;
    };
    if data.is_null() || out.is_null() {
        return false;
    }
    // SAFETY: the library passes `len` readable bytes.
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };
    let text = String::from_utf8_lossy(bytes).into_owned();
    match rt.new_string(text) {
        Ok(v) => {
            unsafe { out.write(FfiValue::from_value(v)) };
            true
        }
        Err(Raised) => false,
    }
}

unsafe extern "C" fn svc_string_data(
    state: *mut StateHandle,
    value: FfiValue,
    len: *mut usize,
) -> *const u8 {
    let Some(rt) = (unsafe { runtime_of(state) }) else {
        return std::ptr::null();
    };
    match value.to_value().and_then(|v| rt.str_of(v)) {
        Some(s) => {
            if !len.is_null() {
                unsafe { len.write(s.len()) };
            }
            s.as_ptr()
        }
        None => std::ptr::null(),
    }
}

unsafe extern "C" fn svc_raise_error(state: *mut StateHandle, kind: u32, message: *const c_char) {
    let Some(rt) = (unsafe { runtime_of(state) }) else {
        return;
    };
    let kind = ErrorKind::ALL
        .get(kind as usize)
        .copied()
        .unwrap_or(ErrorKind::Value);
    let message = unsafe { c_str(message) }.unwrap_or("native error").to_string();
    rt.raise(kind, message);
}

unsafe extern "C" fn svc_write_stdout(state: *mut StateHandle, data: *const u8, len: usize) {
    let Some(rt) = (unsafe { runtime_of(state) }) else {
        return;
    };
    if data.is_null() {
        return;
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };
    rt.write_out(&String::from_utf8_lossy(bytes));
}

/// `value` as a [`Value`] if it names something that exists: a live
/// instance or an allocated descriptor.
fn checked_value(rt: &Runtime, value: FfiValue) -> Option<Value> {
    let v = value.to_value()?;
    let exists = match v {
        Value::Object(r) => rt.heap.is_live(r),
        Value::Class(c) => c.index() < rt.classes.len(),
        Value::Function(f) => f.index() < rt.functions.len(),
        Value::Native(n) => n.index() < rt.natives.len(),
        Value::Module(m) => m.index() < rt.modules.len(),
        Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) => true,
    };
    exists.then_some(v)
}

unsafe extern "C" fn svc_retain(state: *mut StateHandle, value: FfiValue) -> bool {
    let Some(rt) = (unsafe { runtime_of(state) }) else {
        return false;
    };
    match checked_value(rt, value) {
        Some(v) => {
            rt.retain(v);
            true
        }
        None => false,
    }
}

unsafe extern "C" fn svc_release(state: *mut StateHandle, value: FfiValue) {
    let Some(rt) = (unsafe { runtime_of(state) }) else {
        return;
    };
    match checked_value(rt, value) {
        Some(v) => rt.release(v),
        None => log::warn!("extension released a dead value (tag {})", value.tag),
    }
}

/// Call a foreign function with borrowed `args`.
pub(crate) fn call_foreign(rt: &mut Runtime, f: ForeignFn, args: &[Value]) -> VmResult<Value> {
    let ffi_args: Vec<FfiValue> = args.iter().copied().map(FfiValue::from_value).collect();
    let mut out = FfiValue::NIL;
    let mut state = StateHandle { rt: rt as *mut Runtime };
    // SAFETY: the pointers stay valid for the duration of the call and the
    // runtime is not touched through `rt` until it returns.
    let ok = unsafe { f(&mut state, ffi_args.as_ptr(), ffi_args.len(), &mut out) };
    if !ok {
        if rt.current_error.is_none() {
            return Err(rt.raise(ErrorKind::Type, "native function failed"));
        }
        return Err(Raised);
    }
    match checked_value(rt, out) {
        Some(v) => Ok(v),
        None if out.to_value().is_none() => Err(rt.raise(
            ErrorKind::Type,
            format!("native function returned a value with unknown tag {}", out.tag),
        )),
        None => Err(rt.raise(
            ErrorKind::Type,
            "native function returned a dead or invalid reference",
        )),
    }
}

// ── Registration ───────────────────────────────────────────────────

/// Run a registration entry point against `module`.
pub fn register_with(
    rt: &mut Runtime,
    module: ModuleId,
    register: RegisterFn,
) -> Result<(), ExtensionError> {
    let mut handle = ModuleHandle { rt: rt as *mut Runtime, module };
    let mut state = StateHandle { rt: rt as *mut Runtime };
    // SAFETY: both handles point at `rt`, which outlives the call.
    let code = unsafe { register(&mut handle, &SERVICES, &mut state) };
    if code != 0 {
        return Err(ExtensionError::Registration {
            module: rt.modules[module.index()].name.clone(),
            code,
        });
    }
    Ok(())
}

/// Load an extension library into `module` and keep it loaded.
pub fn load_library(rt: &mut Runtime, path: &Path, module: ModuleId) -> Result<(), ExtensionError> {
    // SAFETY: loading runs the library's initializers; extension libraries
    // are trusted like the scripts that import them.
    let library = unsafe { Library::new(path) }.map_err(|source| ExtensionError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    let register: RegisterFn = unsafe {
        *library
            .get::<RegisterFn>(REGISTER_SYMBOL)
            .map_err(|source| ExtensionError::MissingSymbol {
                path: path.to_path_buf(),
                symbol: "fox_register",
                source,
            })?
    };
    if let Ok(version) = unsafe { library.get::<unsafe extern "C" fn() -> *const c_char>(VERSION_SYMBOL) } {
        let text = unsafe { c_str(version()) }.unwrap_or("?");
        debug!("extension {} version {text}", path.display());
    }
    register_with(rt, module, register)?;
    rt.loader.libraries.push(library);
    Ok(())
}

/// Populates a module with native functions, constants and classes.
pub struct ModuleBuilder<'rt> {
    rt: &'rt mut Runtime,
    module: ModuleId,
    classes: Vec<ClassId>,
}

impl<'rt> ModuleBuilder<'rt> {
    pub fn new(rt: &'rt mut Runtime, module: ModuleId) -> Self {
        Self { rt, module, classes: Vec::new() }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn runtime(&mut self) -> &mut Runtime {
        self.rt
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        let sym = self.rt.intern(name);
        let table = &mut self.rt.modules[self.module.index()].table;
        if table.insert(sym, binding).is_some() {
            log::warn!(
                "native module {} redefines {name}",
                self.rt.modules[self.module.index()].name
            );
        }
    }

    fn new_native(&mut self, name: String, arity: Arity, func: NativeFn) -> NativeId {
        let id = NativeId(self.rt.natives.len() as u32);
        self.rt.natives.push(NativeDesc { name, module: self.module, arity, func });
        id
    }

    /// Define and bind a native function.
    pub fn native(&mut self, name: &str, arity: Arity, func: NativeFn) -> NativeId {
        let id = self.new_native(name.to_string(), arity, func);
        self.bind(name, Binding::Native(id));
        id
    }

    pub fn function(&mut self, name: &str, arity: Arity, func: RustFn) -> NativeId {
        self.native(name, arity, NativeFn::Rust(func))
    }

    /// Bind an already evaluated constant.
    pub fn constant(&mut self, name: &str, value: Value) {
        let id = ConstId(self.rt.constants.len() as u32);
        self.rt.constants.push(ConstDesc {
            name: name.to_string(),
            module: self.module,
            state: ConstState::Ready(value),
        });
        self.bind(name, Binding::Constant(id));
    }

    /// Declare a class; it is flattened by [`finish`](Self::finish).
    pub fn class(&mut self, name: &str, base: Option<ClassId>) -> ClassId {
        let id = ClassId(self.rt.classes.len() as u32);
        let mut desc = ClassDesc::new(name, self.module, 0);
        desc.base = base;
        desc.inherits_ctor = true;
        self.rt.classes.push(desc);
        self.bind(name, Binding::Class(id));
        self.classes.push(id);
        id
    }

    pub fn field(&mut self, class: ClassId, name: &str) {
        let sym = self.rt.intern(name);
        self.rt.classes[class.index()].own_fields.push(sym);
    }

    pub fn method(&mut self, class: ClassId, name: &str, arity: Arity, func: RustFn) -> NativeId {
        let qualified = format!("{}.{name}", self.rt.classes[class.index()].name);
        let id = self.new_native(qualified, arity, NativeFn::Rust(func));
        let sym = self.rt.intern(name);
        let desc = &mut self.rt.classes[class.index()];
        desc.own_methods.insert(sym, Method::Native(id));
        if sym == self.rt.syms.del {
            desc.destructor = Some(Method::Native(id));
        }
        id
    }

    /// Constructor run on a freshly allocated instance.
    pub fn init(&mut self, class: ClassId, arity: Arity, func: RustFn) {
        let name = self.rt.classes[class.index()].name.clone();
        let id = self.new_native(name, arity, NativeFn::Rust(func));
        let desc = &mut self.rt.classes[class.index()];
        desc.ctor = Ctor::Init(Method::Native(id));
        desc.inherits_ctor = false;
    }

    /// Constructor returning the value itself (value classes).
    pub fn factory(&mut self, class: ClassId, arity: Arity, func: RustFn) {
        let name = self.rt.classes[class.index()].name.clone();
        let id = self.new_native(name, arity, NativeFn::Rust(func));
        let desc = &mut self.rt.classes[class.index()];
        desc.ctor = Ctor::Factory(id);
        desc.inherits_ctor = false;
    }

    /// Flatten the declared classes, bases first.
    pub fn finish(self) {
        for class in self.classes {
            crate::link::flatten(self.rt, class);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn triple(
        _state: *mut StateHandle,
        args: *const FfiValue,
        argc: usize,
        out: *mut FfiValue,
    ) -> bool {
        let args = unsafe { std::slice::from_raw_parts(args, argc) };
        match args[0].to_value() {
            Some(Value::Int(n)) => {
                unsafe { out.write(FfiValue::int(n * 3)) };
                true
            }
            _ => false,
        }
    }

    unsafe extern "C" fn shout(
        state: *mut StateHandle,
        args: *const FfiValue,
        argc: usize,
        out: *mut FfiValue,
    ) -> bool {
        let services = &SERVICES;
        let args = unsafe { std::slice::from_raw_parts(args, argc) };
        let mut len = 0usize;
        let data = unsafe { (services.string_data)(state, args[0], &mut len) };
        if data.is_null() {
            let msg = c"expected a string";
            unsafe { (services.raise_error)(state, 3, msg.as_ptr()) };
            return false;
        }
        let text = unsafe { std::slice::from_raw_parts(data, len) }.to_ascii_uppercase();
        unsafe { (services.alloc_string)(state, text.as_ptr(), text.len(), out) }
    }

    /// Hands its argument back with the count the runtime expects.
    unsafe extern "C" fn identity(
        state: *mut StateHandle,
        args: *const FfiValue,
        argc: usize,
        out: *mut FfiValue,
    ) -> bool {
        let args = unsafe { std::slice::from_raw_parts(args, argc) };
        if !unsafe { (SERVICES.retain)(state, args[0]) } {
            return false;
        }
        unsafe { out.write(args[0]) };
        true
    }

    /// Reinterprets an Int as object bits.
    unsafe extern "C" fn as_object(
        _state: *mut StateHandle,
        args: *const FfiValue,
        argc: usize,
        out: *mut FfiValue,
    ) -> bool {
        let args = unsafe { std::slice::from_raw_parts(args, argc) };
        unsafe { out.write(FfiValue { tag: FfiValue::TAG_OBJECT, bits: args[0].bits }) };
        true
    }

    unsafe extern "C" fn register(
        module: *mut ModuleHandle,
        services: *const RuntimeServices,
        _state: *mut StateHandle,
    ) -> i32 {
        let services = unsafe { &*services };
        if services.abi_version != ABI_VERSION {
            return 1;
        }
        unsafe {
            (services.define_function)(module, c"triple".as_ptr(), 1, 1, triple);
            (services.define_function)(module, c"shout".as_ptr(), 1, 1, shout);
            (services.define_function)(module, c"identity".as_ptr(), 1, 1, identity);
            (services.define_function)(module, c"as_object".as_ptr(), 1, 1, as_object);
            (services.define_int)(module, c"ANSWER".as_ptr(), 42);
            (services.define_str)(module, c"GREETING".as_ptr(), c"hi".as_ptr());
        }
        0
    }

    unsafe extern "C" fn refuse(
        _module: *mut ModuleHandle,
        _services: *const RuntimeServices,
        _state: *mut StateHandle,
    ) -> i32 {
        7
    }

    fn runtime_with_ext() -> (Runtime, ModuleId) {
        let mut rt = Runtime::default();
        rt.capture_output();
        let ext = rt.new_module("ext", None);
        register_with(&mut rt, ext, register).expect("registers");
        rt.modules[ext.index()].state = crate::descriptor::ModuleState::Initialized;
        (rt, ext)
    }

    #[test]
    fn ffi_value_round_trips_every_tag() {
        let r = ObjRef { index: 9, generation: 4 };
        for v in [
            Value::Nil,
            Value::Bool(true),
            Value::Int(-5),
            Value::Float(2.5),
            Value::Object(r),
            Value::Class(ClassId(3)),
            Value::Module(ModuleId(1)),
        ] {
            assert_eq!(FfiValue::from_value(v).to_value(), Some(v));
        }
        assert_eq!(FfiValue { tag: 99, bits: 0 }.to_value(), None);
    }

    #[test]
    fn registered_functions_are_callable() {
        let (mut rt, ext) = runtime_with_ext();
        let triple = rt.global(ext, "triple").expect("bound");
        assert_eq!(rt.call(triple, &[Value::Int(14)]).expect("calls"), Value::Int(42));
        assert_eq!(rt.global(ext, "ANSWER"), Some(Value::Int(42)));
    }

    #[test]
    fn foreign_strings_and_errors() {
        let (mut rt, ext) = runtime_with_ext();
        let shout = rt.global(ext, "shout").expect("bound");
        let arg = rt.new_string("quiet").expect("alloc");
        let loud = rt.call(shout, &[arg]).expect("calls");
        assert_eq!(rt.str_of(loud), Some("QUIET"));
        let err = rt.call(shout, &[Value::Int(1)]).expect_err("raises");
        assert_eq!(err.class_name(), "TypeError");
        assert_eq!(err.to_string(), "TypeError: expected a string");
    }

    #[test]
    fn returned_arguments_keep_one_count_per_holder() {
        let (mut rt, ext) = runtime_with_ext();
        let identity = rt.global(ext, "identity").expect("bound");
        let before = rt.heap.stats().live;
        let t = rt.new_list(Vec::new()).expect("alloc");
        let u = rt.call(identity, &[t]).expect("calls");
        assert_eq!(u, t);
        let r = t.as_object().expect("object");
        assert_eq!(rt.heap.refcount(r), Some(2));
        rt.release(t);
        assert_eq!(rt.heap.refcount(r), Some(1));
        rt.release(u);
        assert!(!rt.heap.is_live(r));
        assert_eq!(rt.heap.stats().live, before);
    }

    #[test]
    fn dead_and_forged_references_are_rejected() {
        let (mut rt, ext) = runtime_with_ext();
        let as_object = rt.global(ext, "as_object").expect("bound");
        let s = rt.new_string("gone").expect("alloc");
        let bits = FfiValue::from_value(s).bits as i64;
        rt.release(s);
        for bits in [bits, i64::MAX] {
            let err = rt.call(as_object, &[Value::Int(bits)]).expect_err("rejected");
            assert_eq!(err.class_name(), "TypeError");
        }
        assert_eq!(rt.stack_depth(), 0);
    }

    #[test]
    fn failed_registration_reports_code() {
        let mut rt = Runtime::default();
        let ext = rt.new_module("bad", None);
        match register_with(&mut rt, ext, refuse) {
            Err(ExtensionError::Registration { code, module }) => {
                assert_eq!(code, 7);
                assert_eq!(module, "bad");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let mut rt = Runtime::default();
        let ext = rt.new_module("ghost", None);
        let err = load_library(&mut rt, Path::new("/nonexistent/libghost.so"), ext)
            .expect_err("no such library");
        assert!(matches!(err, ExtensionError::Load { .. }));
    }
}
