//! `Error` and the builtin error taxonomy.

use fox_object::Value;

use super::{ERROR, display};
use crate::descriptor::Arity;
use crate::error::VmResult;
use crate::native::ModuleBuilder;
use crate::Runtime;

pub(super) fn install(b: &mut ModuleBuilder) {
    b.field(ERROR, "message");
    b.init(ERROR, Arity::range(0, 1), error_init);
    b.method(ERROR, "__str__", Arity::exact(0), error_str);
}

/// `Error(message?)`: any argument is rendered into the message field.
fn error_init(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let message = match args.first() {
        Some(&v) if rt.str_of(v).is_some() => {
            rt.retain(v);
            v
        }
        Some(&v) => {
            let text = display(rt, v)?;
            rt.new_string(text)?
        }
        None => rt.new_string("")?,
    };
    let slot = this
        .as_object()
        .and_then(|r| rt.heap.get_mut(r))
        .and_then(|i| i.fields.first_mut());
    match slot {
        Some(slot) => {
            let old = std::mem::replace(slot, message);
            rt.release(old);
        }
        None => rt.release(message),
    }
    Ok(Value::Nil)
}

fn error_str(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let class = rt.class_name_of(this).to_string();
    let message = rt.error_message(this);
    let text = if message.is_empty() { class } else { format!("{class}: {message}") };
    rt.new_string(text)
}

#[cfg(test)]
mod tests {
    use crate::test_util::{run_failing, run_source};

    #[test]
    fn error_renders_class_and_message() {
        let out = run_source(
            "try { throw IndexError(\"no slot\") } catch IndexError as e { print(e) }\nprint(Error())",
        );
        assert_eq!(out, "IndexError: no slot\nError\n");
    }

    #[test]
    fn non_string_message_is_rendered() {
        assert_eq!(run_source("print(ValueError(42).message)"), "42\n");
    }

    #[test]
    fn user_error_subclass_keeps_message() {
        let (err, _) = run_failing("class Oops extends ValueError {}\nthrow Oops(\"bad input\")");
        assert_eq!(err.class_name(), "Oops");
        assert_eq!(err.to_string(), "Oops: bad input");
    }

    #[test]
    fn throwing_a_non_error_is_a_type_error() {
        let (err, _) = run_failing("throw 3");
        assert_eq!(err.class_name(), "TypeError");
    }
}
