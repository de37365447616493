//! Global functions and the methods of the structural builtin classes.

use fox_object::{PERMANENT, Payload, Value};

use super::{
    BOOL, CLASS, GENERATOR, ITERATOR, OBJECT, RANGE, WEAK, default_str, display, expect_int,
};
use crate::descriptor::Arity;
use crate::error::{ErrorKind, VmResult};
use crate::interpreter;
use crate::native::ModuleBuilder;
use crate::Runtime;

pub(super) fn install(b: &mut ModuleBuilder) {
    b.function("print", Arity::at_least(0), print);
    b.function("str", Arity::exact(1), str);
    b.function("len", Arity::exact(1), len);
    b.function("type_name", Arity::exact(1), type_name);
    b.function("isinstance", Arity::exact(2), isinstance);
    b.function("weakref", Arity::exact(1), weakref);
    b.function("refcount", Arity::exact(1), refcount);
    b.function("range", Arity::range(1, 2), range);

    b.method(OBJECT, "__str__", Arity::exact(0), object_str);
    b.method(OBJECT, "__eq__", Arity::exact(1), object_eq);
    b.factory(BOOL, Arity::exact(1), bool_new);
    b.method(CLASS, "name", Arity::exact(0), class_name);

    b.factory(WEAK, Arity::exact(1), weak_new);
    b.method(WEAK, "get", Arity::exact(0), weak_get);
    b.method(WEAK, "alive", Arity::exact(0), weak_alive);

    b.method(GENERATOR, "next", Arity::exact(0), generator_next);
    b.method(GENERATOR, "__iter__", Arity::exact(0), itself);
    b.method(ITERATOR, "next", Arity::exact(0), iterator_next);
    b.method(ITERATOR, "__iter__", Arity::exact(0), itself);
}

fn print(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let mut line = String::new();
    for (i, &arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&display(rt, arg)?);
    }
    line.push('\n');
    rt.write_out(&line);
    Ok(Value::Nil)
}

fn str(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    if rt.str_of(args[0]).is_some() {
        rt.retain(args[0]);
        return Ok(args[0]);
    }
    let text = display(rt, args[0])?;
    rt.new_string(text)
}

fn len(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let n = match rt.instance(args[0]).map(|i| &i.payload) {
        Some(Payload::Str(s)) => s.chars().count(),
        Some(Payload::Bytes(b)) => b.len(),
        Some(Payload::List(items)) => items.len(),
        Some(&Payload::Range { start, end }) => end.saturating_sub(start).max(0) as usize,
        _ => {
            let class = rt.class_name_of(args[0]).to_string();
            return Err(rt.raise(
                ErrorKind::Type,
                format!("object of type {class} has no length"),
            ));
        }
    };
    Ok(Value::Int(n as i64))
}

fn type_name(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let name = rt.class_name_of(args[0]).to_string();
    rt.new_string(name)
}

fn isinstance(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let Value::Class(class) = args[1] else {
        let got = rt.class_name_of(args[1]).to_string();
        return Err(rt.raise(
            ErrorKind::Type,
            format!("isinstance() needs a class, not {got}"),
        ));
    };
    Ok(Value::Bool(rt.is_instance(args[0], class)))
}

fn weakref(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    weak_new(rt, Value::Class(WEAK), args)
}

fn refcount(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let count = match args[0] {
        Value::Object(r) => match rt.heap.refcount(r) {
            Some(PERMANENT) => -1,
            Some(n) => n as i64,
            None => 0,
        },
        _ => 0,
    };
    Ok(Value::Int(count))
}

fn range(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let (start, end) = match args {
        [end] => (0, expect_int(rt, *end, "range() bound")?),
        [start, end, ..] => (
            expect_int(rt, *start, "range() start")?,
            expect_int(rt, *end, "range() end")?,
        ),
        [] => (0, 0),
    };
    rt.alloc_payload(RANGE, Payload::Range { start, end })
}

// ── Object ─────────────────────────────────────────────────────────

fn object_str(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let text = default_str(rt, this);
    rt.new_string(text)
}

fn object_eq(_: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Bool(this.is_same(args[0])))
}

fn bool_new(_: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Bool(args[0].is_truthy()))
}

fn class_name(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let name = match this {
        Value::Class(c) => rt.classes[c.index()].name.clone(),
        other => rt.class_name_of(other).to_string(),
    };
    rt.new_string(name)
}

fn itself(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    rt.retain(this);
    Ok(this)
}

// ── Weak ───────────────────────────────────────────────────────────

fn weak_new(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let target = match args[0] {
        Value::Object(r) if rt.heap.refcount(r) != Some(PERMANENT) => r,
        other => {
            let class = rt.class_name_of(other).to_string();
            return Err(rt.raise(
                ErrorKind::Type,
                format!("cannot create a weak reference to {class}"),
            ));
        }
    };
    let Some(weak) = rt.heap.downgrade(target) else {
        return Err(rt.raise(ErrorKind::Value, "weak reference to a freed instance"));
    };
    rt.alloc_payload(WEAK, Payload::Weak(weak))
}

fn weak_target(rt: &Runtime, this: Value) -> Option<Value> {
    match rt.instance(this).map(|i| &i.payload) {
        Some(Payload::Weak(w)) => rt.heap.upgrade(*w).map(Value::Object),
        _ => None,
    }
}

fn weak_get(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let target = weak_target(rt, this).unwrap_or(Value::Nil);
    rt.retain(target);
    Ok(target)
}

fn weak_alive(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    Ok(Value::Bool(weak_target(rt, this).is_some()))
}

// ── Iteration ──────────────────────────────────────────────────────

fn generator_next(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    match this {
        Value::Object(r) => interpreter::next_nested(rt, r),
        _ => Err(rt.raise(ErrorKind::Type, "next() of a non-generator")),
    }
}

fn iterator_next(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let Some(r) = this.as_object() else {
        return Err(rt.raise(ErrorKind::Type, "next() of a non-iterator"));
    };
    let (list, index) = match rt.heap.get_mut(r).map(|i| (i.fields.first().copied(), &mut i.payload)) {
        Some((_, Payload::RangeIter { next, end })) => {
            if *next >= *end {
                return Err(rt.raise(ErrorKind::StopIteration, "iterator exhausted"));
            }
            *next += 1;
            return Ok(Value::Int(*next - 1));
        }
        Some((Some(list), Payload::ListIter { index })) => {
            *index += 1;
            (list, *index - 1)
        }
        _ => return Err(rt.raise(ErrorKind::Type, "next() of a non-iterator")),
    };
    let item = rt
        .instance(list)
        .and_then(|l| l.as_list())
        .and_then(|items| items.get(index).copied());
    match item {
        Some(v) => {
            rt.retain(v);
            Ok(v)
        }
        None => Err(rt.raise(ErrorKind::StopIteration, "iterator exhausted")),
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::{run_failing, run_source};

    #[test]
    fn len_of_collections() {
        assert_eq!(
            run_source("print(len(\"héllo\"), len([1, 2]), len(b\"abc\"), len(2..7), len(range(3)))"),
            "5 2 3 5 3\n"
        );
    }

    #[test]
    fn len_of_int_fails() {
        assert_eq!(run_failing("len(3)").0.class_name(), "TypeError");
    }

    #[test]
    fn explicit_iterator_protocol() {
        let out = run_source(
            "let it = [10, 20].__iter__()\nprint(it.next(), it.next())\ntry { it.next() } catch StopIteration { print(\"done\") }",
        );
        assert_eq!(out, "10 20\ndone\n");
    }

    #[test]
    fn refcount_counts_holders() {
        let out = run_source("let a = [1]\nlet b = a\nprint(refcount(a))");
        assert_eq!(out, "3\n");
    }

    #[test]
    fn str_and_class_name() {
        assert_eq!(run_source("class K {}\nprint(str(12) + \"!\", K.name())"), "12! K\n");
    }
}
