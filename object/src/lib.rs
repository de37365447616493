//! Value and object model of the fox runtime.
//!
//! * [`Value`]: what instructions compute with. Inline integers, floats and
//!   booleans, references to permanent descriptors, and [`ObjRef`]s into
//!   the [`Heap`].
//! * [`StackEntry`]: what the operand stack holds, a value or a
//!   [`CatchMarker`].
//! * [`Heap`]: a generational arena of refcounted [`Instance`]s.

use std::fmt;

mod header;
mod heap;
mod instance;
mod symbol;
mod value;

pub use header::{Header, HeaderFlags, PERMANENT};
pub use heap::{AllocError, Heap, HeapConfig, HeapStats};
pub use instance::{GenStatus, GeneratorFrame, Instance, Payload, WeakRef};
pub use symbol::{Symbol, Symbols};
pub use value::{
    CatchMarker, ClassId, FuncId, ModuleId, NativeId, ObjRef, StackEntry, Value,
};

/// Report a runtime invariant violation and abort the process.
///
/// These are not catchable: once one happens the runtime's state can no
/// longer be trusted.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        $crate::fatal_error(format_args!($($arg)*))
    };
}

#[cold]
pub fn fatal_error(args: fmt::Arguments<'_>) -> ! {
    log::error!("FatalError: {args}");
    eprintln!("FatalError: {args}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
        assert!(Value::Class(ClassId(0)).is_truthy());
    }

    #[test]
    fn catch_markers_are_not_values() {
        let marker = StackEntry::Catch(CatchMarker { handler_pc: 12 });
        assert_eq!(marker.value(), None);
        assert_eq!(StackEntry::from(Value::Int(3)).value(), Some(Value::Int(3)));
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Int(-4).to_string(), "-4");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }
}
