use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

id_type!(
    /// Index of a class descriptor.
    ClassId
);
id_type!(
    /// Index of a bytecode function descriptor.
    FuncId
);
id_type!(
    /// Index of a native function descriptor.
    NativeId
);
id_type!(
    /// Index of a module descriptor.
    ModuleId
);

/// Reference to a heap instance: arena slot plus the generation it was
/// allocated in. A stale reference never aliases a newer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub index: u32,
    pub generation: u32,
}

/// A runtime value.
///
/// Heap instances are refcounted; every other variant is either inline data
/// or a reference to a permanent descriptor and needs no counting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Object(ObjRef),
    Class(ClassId),
    Function(FuncId),
    Native(NativeId),
    Module(ModuleId),
}

impl Value {
    /// Only `nil` and `false` are falsy.
    #[inline(always)]
    pub fn is_truthy(self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    #[inline(always)]
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline(always)]
    pub fn as_object(self) -> Option<ObjRef> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Identity comparison: same object, same descriptor or equal inline
    /// data. Floats compare by value.
    pub fn is_same(self, other: Value) -> bool {
        self == other
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Object(r) => write!(f, "<object {}.{}>", r.index, r.generation),
            Value::Class(c) => write!(f, "<class {}>", c.0),
            Value::Function(id) => write!(f, "<function {}>", id.0),
            Value::Native(id) => write!(f, "<native {}>", id.0),
            Value::Module(id) => write!(f, "<module {}>", id.0),
        }
    }
}

/// An installed exception handler, recorded on the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchMarker {
    /// Offset of the first catch-test instruction in the owning function.
    pub handler_pc: u32,
}

/// One operand-stack entry. Catch markers live only here; no user-facing
/// operation accepts or produces a [`StackEntry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackEntry {
    Value(Value),
    Catch(CatchMarker),
}

impl StackEntry {
    #[inline(always)]
    pub fn value(self) -> Option<Value> {
        match self {
            StackEntry::Value(v) => Some(v),
            StackEntry::Catch(_) => None,
        }
    }
}

impl From<Value> for StackEntry {
    fn from(v: Value) -> Self {
        StackEntry::Value(v)
    }
}
