use num_bigint::BigInt;
use num_rational::BigRational;
use regex::Regex;

use crate::header::Header;
use crate::value::{FuncId, ObjRef, StackEntry, Value};

/// Weak reference: a checked lookup into the arena, never a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakRef {
    pub index: u32,
    pub generation: u32,
}

impl From<ObjRef> for WeakRef {
    fn from(r: ObjRef) -> Self {
        Self {
            index: r.index,
            generation: r.generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenStatus {
    /// Created or stopped at a `yield`.
    Suspended,
    /// Its frame is on the call stack right now.
    Running,
    /// Ran to the end (or returned); every further resumption raises
    /// StopIteration.
    Exhausted,
}

/// Snapshot of a suspended generator frame.
///
/// `window` is the exact operand-stack slice of the frame (callee slot,
/// parameters, captures, locals, temporaries and catch markers) at the
/// moment it suspended.
#[derive(Debug)]
pub struct GeneratorFrame {
    pub func: FuncId,
    pub pc: u32,
    pub window: Vec<StackEntry>,
    pub status: GenStatus,
}

/// Native data carried by an instance next to its fields.
#[derive(Debug, Default)]
pub enum Payload {
    #[default]
    None,
    Str(String),
    Bytes(Vec<u8>),
    BigInt(BigInt),
    Rational(BigRational),
    Regex(Regex),
    List(Vec<Value>),
    /// Closure over the function; captured values are the fields.
    Closure(FuncId),
    /// Method bound to a receiver: field 0 is the receiver, field 1 the
    /// method.
    BoundMethod,
    Generator(Box<GeneratorFrame>),
    /// Iterator over the list stored in field 0.
    ListIter { index: usize },
    Range { start: i64, end: i64 },
    RangeIter { next: i64, end: i64 },
    Weak(WeakRef),
}

impl Payload {
    /// Move every strong reference held by the payload into `out`.
    pub fn drain_refs(&mut self, out: &mut Vec<ObjRef>) {
        match self {
            Payload::List(items) => {
                out.extend(items.drain(..).filter_map(Value::as_object));
            }
            Payload::Generator(frame) => {
                out.extend(
                    frame
                        .window
                        .drain(..)
                        .filter_map(StackEntry::value)
                        .filter_map(Value::as_object),
                );
            }
            _ => {}
        }
    }
}

/// Header plus field slots plus payload.
#[derive(Debug)]
pub struct Instance {
    pub header: Header,
    pub fields: Vec<Value>,
    pub payload: Payload,
}

impl Instance {
    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match &self.payload {
            Payload::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.payload {
            Payload::List(items) => Some(items),
            _ => None,
        }
    }
}
