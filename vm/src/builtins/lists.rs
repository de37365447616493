//! `List` and `Range`, plus draining arbitrary iterables.

use std::cmp::Ordering;

use fox_object::{Payload, Value};

use super::{
    ITERATOR, LIST, RANGE, expect_int, index_in, numbers, repr, values_equal,
};
use crate::descriptor::Arity;
use crate::error::{ErrorKind, VmResult};
use crate::interpreter;
use crate::native::ModuleBuilder;
use crate::Runtime;

pub(super) fn install(b: &mut ModuleBuilder) {
    b.factory(LIST, Arity::range(0, 1), list_new);
    b.method(LIST, "__str__", Arity::exact(0), list_str);
    b.method(LIST, "__getitem__", Arity::exact(1), getitem);
    b.method(LIST, "__setitem__", Arity::exact(2), setitem);
    b.method(LIST, "__contains__", Arity::exact(1), contains);
    b.method(LIST, "__eq__", Arity::exact(1), list_eq);
    b.method(LIST, "__add__", Arity::exact(1), concat);
    b.method(LIST, "__iter__", Arity::exact(0), list_iter);
    b.method(LIST, "push", Arity::exact(1), push);
    b.method(LIST, "pop", Arity::exact(0), pop);
    b.method(LIST, "insert", Arity::exact(2), insert);
    b.method(LIST, "remove", Arity::exact(1), remove);
    b.method(LIST, "extend", Arity::exact(1), extend);
    b.method(LIST, "clear", Arity::exact(0), clear);
    b.method(LIST, "index", Arity::exact(1), index);
    b.method(LIST, "reverse", Arity::exact(0), reverse);
    b.method(LIST, "sort", Arity::exact(0), sort);
    b.method(LIST, "copy", Arity::exact(0), copy);
    b.method(LIST, "map", Arity::exact(1), map);
    b.method(LIST, "filter", Arity::exact(1), filter);

    b.method(RANGE, "__contains__", Arity::exact(1), range_contains);
    b.method(RANGE, "__eq__", Arity::exact(1), range_eq);
    b.method(RANGE, "__iter__", Arity::exact(0), range_iter);
    b.method(RANGE, "start", Arity::exact(0), range_start);
    b.method(RANGE, "end", Arity::exact(0), range_end);
    b.method(RANGE, "to_list", Arity::exact(0), range_to_list);
}

/// Snapshot of a list's items. No counts are taken, so the snapshot must
/// not outlive user code; see [`borrowed_items`].
fn items_of(rt: &mut Runtime, v: Value) -> VmResult<Vec<Value>> {
    match rt.instance(v).and_then(|i| i.as_list()) {
        Some(items) => Ok(items.clone()),
        None => {
            let class = rt.class_name_of(v).to_string();
            Err(rt.raise(ErrorKind::Type, format!("expected a List, got {class}")))
        }
    }
}

/// Snapshot with one count per item, for walks that run user code.
/// Hand the items back through [`release_all`].
fn borrowed_items(rt: &mut Runtime, v: Value) -> VmResult<Vec<Value>> {
    let items = items_of(rt, v)?;
    for &item in &items {
        rt.retain(item);
    }
    Ok(items)
}

/// Run `f` over a counted snapshot of `v` while `v` is marked as visited.
fn walk<T>(
    rt: &mut Runtime,
    v: Value,
    f: impl FnOnce(&mut Runtime, &[Value]) -> VmResult<T>,
) -> VmResult<T> {
    rt.enter(v)?;
    let result = match borrowed_items(rt, v) {
        Ok(items) => {
            let result = f(rt, &items);
            release_all(rt, items);
            result
        }
        Err(raised) => Err(raised),
    };
    rt.leave(v);
    result
}

/// Mutate the list behind `v`.
fn with_items<T>(
    rt: &mut Runtime,
    v: Value,
    f: impl FnOnce(&mut Vec<Value>) -> T,
) -> VmResult<T> {
    match v.as_object().and_then(|r| rt.heap.get_mut(r)).and_then(|i| i.as_list_mut()) {
        Some(items) => Ok(f(items)),
        None => Err(rt.raise(ErrorKind::Type, "receiver is not a List")),
    }
}

/// A new list holding its own counts of `items`.
fn list_of_borrowed(rt: &mut Runtime, items: Vec<Value>) -> VmResult<Value> {
    for &v in &items {
        rt.retain(v);
    }
    rt.new_list(items)
}

fn release_all(rt: &mut Runtime, items: Vec<Value>) {
    for v in items {
        rt.release(v);
    }
}

/// Drain any iterable into owned values: lists, ranges and strings
/// directly, everything else through `__iter__` and `next`.
pub(crate) fn collect_iterable(rt: &mut Runtime, v: Value) -> VmResult<Vec<Value>> {
    match rt.instance(v).map(|i| &i.payload) {
        Some(Payload::List(items)) => {
            let items = items.clone();
            for &item in &items {
                rt.retain(item);
            }
            return Ok(items);
        }
        Some(&Payload::Range { start, end }) => {
            let len = end.max(start).abs_diff(start);
            rt.check_items(usize::try_from(len).unwrap_or(usize::MAX))?;
            return Ok((start..end.max(start)).map(Value::Int).collect());
        }
        _ => {}
    }
    let (iter, next) = (rt.syms.iter, rt.syms.next);
    let class = rt.class_of(v);
    let iterator = if rt.classes[class.index()].methods.contains_key(&iter) {
        interpreter::call_method(rt, v, iter, &[])?
    } else if rt.classes[class.index()].methods.contains_key(&next) {
        rt.retain(v);
        v
    } else {
        let name = rt.classes[class.index()].name.clone();
        return Err(rt.raise(ErrorKind::Type, format!("'{name}' object is not iterable")));
    };
    let mut out = Vec::new();
    loop {
        if let Err(raised) = rt.check_items(out.len() + 1) {
            release_all(rt, out);
            rt.release(iterator);
            return Err(raised);
        }
        match interpreter::call_method(rt, iterator, next, &[]) {
            Ok(item) => out.push(item),
            Err(_) if rt.error_is(ErrorKind::StopIteration) => {
                rt.clear_error();
                break;
            }
            Err(raised) => {
                release_all(rt, out);
                rt.release(iterator);
                return Err(raised);
            }
        }
    }
    rt.release(iterator);
    Ok(out)
}

// ── List ───────────────────────────────────────────────────────────

fn list_new(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let items = match args.first() {
        Some(&source) => collect_iterable(rt, source)?,
        None => Vec::new(),
    };
    rt.new_list(items)
}

fn list_str(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let text = walk(rt, this, |rt, items| {
        let mut parts = Vec::with_capacity(items.len());
        for &item in items {
            parts.push(repr(rt, item)?);
        }
        Ok(format!("[{}]", parts.join(", ")))
    })?;
    rt.new_string(text)
}

fn getitem(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let items = items_of(rt, this)?;
    if let Some(&Payload::Range { start, end }) = rt.instance(args[0]).map(|i| &i.payload) {
        let clamp = |i: i64| i.clamp(0, items.len() as i64) as usize;
        let (start, end) = (clamp(start), clamp(end));
        return list_of_borrowed(rt, items[start..end.max(start)].to_vec());
    }
    let index = expect_int(rt, args[0], "list index")?;
    let at = index_in(rt, index, items.len())?;
    rt.retain(items[at]);
    Ok(items[at])
}

fn setitem(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let len = items_of(rt, this)?.len();
    let index = expect_int(rt, args[0], "list index")?;
    let at = index_in(rt, index, len)?;
    let value = args[1];
    rt.retain(value);
    let old = with_items(rt, this, |items| std::mem::replace(&mut items[at], value))?;
    rt.release(old);
    Ok(Value::Nil)
}

fn contains(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let found = walk(rt, this, |rt, items| {
        for &item in items {
            if values_equal(rt, item, args[0])? {
                return Ok(true);
            }
        }
        Ok(false)
    })?;
    Ok(Value::Bool(found))
}

fn list_eq(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let other = args[0];
    if rt.instance(other).and_then(|i| i.as_list()).is_none() {
        return Ok(Value::Bool(false));
    }
    let equal = walk(rt, this, |rt, items| {
        let theirs = borrowed_items(rt, other)?;
        let mut equal = items.len() == theirs.len();
        let mut failed = None;
        for (&a, &b) in items.iter().zip(&theirs) {
            if !equal {
                break;
            }
            match values_equal(rt, a, b) {
                Ok(eq) => equal = eq,
                Err(raised) => {
                    failed = Some(raised);
                    break;
                }
            }
        }
        release_all(rt, theirs);
        match failed {
            Some(raised) => Err(raised),
            None => Ok(equal),
        }
    })?;
    Ok(Value::Bool(equal))
}

fn concat(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let mut items = items_of(rt, this)?;
    items.extend(items_of(rt, args[0])?);
    rt.check_items(items.len())?;
    list_of_borrowed(rt, items)
}

fn list_iter(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    rt.retain(this);
    rt.alloc(ITERATOR, vec![this], Payload::ListIter { index: 0 })
}

fn push(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let len = items_of(rt, this)?.len();
    rt.check_items(len + 1)?;
    let value = args[0];
    rt.retain(value);
    if let Err(raised) = with_items(rt, this, |items| items.push(value)) {
        rt.release(value);
        return Err(raised);
    }
    Ok(Value::Nil)
}

fn pop(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    match with_items(rt, this, Vec::pop)? {
        Some(v) => Ok(v),
        None => Err(rt.raise(ErrorKind::Index, "pop from empty list")),
    }
}

fn insert(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let len = items_of(rt, this)?.len();
    let index = expect_int(rt, args[0], "insert position")?;
    rt.check_items(len + 1)?;
    let at = if index < 0 { index + len as i64 } else { index };
    if at < 0 || at > len as i64 {
        return Err(rt.raise(
            ErrorKind::Index,
            format!("insert position {index} out of range for length {len}"),
        ));
    }
    let value = args[1];
    rt.retain(value);
    with_items(rt, this, |items| items.insert(at as usize, value))?;
    Ok(Value::Nil)
}

/// Remove and return the item at an index.
fn remove(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let len = items_of(rt, this)?.len();
    let index = expect_int(rt, args[0], "list index")?;
    let at = index_in(rt, index, len)?;
    with_items(rt, this, |items| items.remove(at))
}

fn extend(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let more = collect_iterable(rt, args[0])?;
    let len = match items_of(rt, this) {
        Ok(items) => items.len(),
        Err(raised) => {
            release_all(rt, more);
            return Err(raised);
        }
    };
    if let Err(raised) = rt.check_items(len + more.len()) {
        release_all(rt, more);
        return Err(raised);
    }
    with_items(rt, this, |items| items.extend(more))?;
    Ok(Value::Nil)
}

fn clear(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let old = with_items(rt, this, std::mem::take)?;
    release_all(rt, old);
    Ok(Value::Nil)
}

fn index(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let at = walk(rt, this, |rt, items| {
        for (i, &item) in items.iter().enumerate() {
            if values_equal(rt, item, args[0])? {
                return Ok(i as i64);
            }
        }
        Ok(-1)
    })?;
    Ok(Value::Int(at))
}

fn reverse(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    with_items(rt, this, |items| items.reverse())?;
    Ok(Value::Nil)
}

fn order(rt: &mut Runtime, a: Value, b: Value) -> VmResult<Ordering> {
    if let Some(ord) = numbers::sort_key_cmp(rt, a, b) {
        return Ok(ord);
    }
    if let (Some(x), Some(y)) = (rt.str_of(a), rt.str_of(b)) {
        return Ok(x.cmp(y));
    }
    let lt = rt.syms.lt;
    let less = interpreter::call_method(rt, a, lt, &[b])?;
    rt.release(less);
    if less.is_truthy() {
        return Ok(Ordering::Less);
    }
    let greater = interpreter::call_method(rt, b, lt, &[a])?;
    rt.release(greater);
    Ok(if greater.is_truthy() { Ordering::Greater } else { Ordering::Equal })
}

/// Stable merge sort with a comparison that may raise.
fn merge_sort(rt: &mut Runtime, mut items: Vec<Value>) -> VmResult<Vec<Value>> {
    if items.len() < 2 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(rt, items)?;
    let right = merge_sort(rt, right)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(&a), Some(&b)) = (left.peek(), right.peek()) {
        if order(rt, b, a)? == Ordering::Less {
            out.push(b);
            right.next();
        } else {
            out.push(a);
            left.next();
        }
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

/// Sorts in place. If a comparison rewrote the list, the rewrite wins and
/// the sorted order is dropped.
fn sort(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let before = items_of(rt, this)?;
    let sorted = walk(rt, this, |rt, items| merge_sort(rt, items.to_vec()))?;
    with_items(rt, this, |items| {
        let untouched = items.len() == before.len()
            && items.iter().zip(&before).all(|(a, b)| match (a, b) {
                (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
                _ => a.is_same(*b),
            });
        if untouched {
            *items = sorted;
        }
    })?;
    Ok(Value::Nil)
}

fn copy(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let items = items_of(rt, this)?;
    list_of_borrowed(rt, items)
}

fn map(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let items = borrowed_items(rt, this)?;
    let mut out = Vec::with_capacity(items.len());
    let mut failed = None;
    for &item in &items {
        match interpreter::call_value(rt, args[0], &[item]) {
            Ok(v) => out.push(v),
            Err(raised) => {
                failed = Some(raised);
                break;
            }
        }
    }
    release_all(rt, items);
    match failed {
        Some(raised) => {
            release_all(rt, out);
            Err(raised)
        }
        None => rt.new_list(out),
    }
}

fn filter(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let items = borrowed_items(rt, this)?;
    let mut kept = Vec::new();
    let mut failed = None;
    for item in items {
        if failed.is_some() {
            rt.release(item);
            continue;
        }
        match interpreter::call_value(rt, args[0], &[item]) {
            Ok(keep) => {
                rt.release(keep);
                if keep.is_truthy() {
                    kept.push(item);
                } else {
                    rt.release(item);
                }
            }
            Err(raised) => {
                failed = Some(raised);
                rt.release(item);
            }
        }
    }
    match failed {
        Some(raised) => {
            release_all(rt, kept);
            Err(raised)
        }
        None => rt.new_list(kept),
    }
}

// ── Range ──────────────────────────────────────────────────────────

fn bounds(rt: &mut Runtime, this: Value) -> VmResult<(i64, i64)> {
    match rt.instance(this).map(|i| &i.payload) {
        Some(&Payload::Range { start, end }) => Ok((start, end)),
        _ => Err(rt.raise(ErrorKind::Type, "receiver is not a Range")),
    }
}

fn range_contains(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let (start, end) = bounds(rt, this)?;
    Ok(Value::Bool(matches!(args[0], Value::Int(n) if start <= n && n < end)))
}

fn range_eq(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let mine = bounds(rt, this)?;
    let theirs = match rt.instance(args[0]).map(|i| &i.payload) {
        Some(&Payload::Range { start, end }) => Some((start, end)),
        _ => None,
    };
    Ok(Value::Bool(theirs == Some(mine)))
}

fn range_iter(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let (start, end) = bounds(rt, this)?;
    rt.alloc_payload(ITERATOR, Payload::RangeIter { next: start, end })
}

fn range_start(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    Ok(Value::Int(bounds(rt, this)?.0))
}

fn range_end(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    Ok(Value::Int(bounds(rt, this)?.1))
}

fn range_to_list(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let items = collect_iterable(rt, this)?;
    rt.new_list(items)
}

#[cfg(test)]
mod tests {
    use crate::test_util::{run_failing, run_source};
    use crate::{Config, Runtime};

    #[test]
    fn list_mutation() {
        let out = run_source(
            "let xs = [3, 1]\nxs.push(2)\nxs.insert(0, 9)\nprint(xs, xs.pop(), xs.remove(0), xs)\nxs[0] = 7\nxs.extend(0..2)\nprint(xs, len(xs))",
        );
        assert_eq!(out, "[3, 1] 2 9 [3, 1]\n[7, 1, 0, 1] 4\n");
    }

    #[test]
    fn indexing_and_slices() {
        let out = run_source("let xs = [1, 2, 3, 4]\nprint(xs[-1], xs[1..3], xs[2..10], 3 in xs, xs.index(4))");
        assert_eq!(out, "4 [2, 3] [3, 4] true 3\n");
        assert_eq!(run_failing("[1][5]").0.class_name(), "IndexError");
        assert_eq!(run_failing("[].pop()").0.class_name(), "IndexError");
    }

    #[test]
    fn sorting_numbers_strings_and_user_objects() {
        let out = run_source(
            "let xs = [3, 1.5, 2, 10000000000000000000]\nxs.sort()\nprint(xs)\nlet ws = [\"pear\", \"apple\"]\nws.sort()\nprint(ws)\nclass N(v) {\n  var v = v\n  def __lt__(o) { return this.v < o.v }\n}\nlet ns = [N(2), N(0), N(1)]\nns.sort()\nprint(ns.map(fn(n) => n.v))",
        );
        assert_eq!(
            out,
            "[1.5, 2, 3, 10000000000000000000]\n[\"apple\", \"pear\"]\n[0, 1, 2]\n"
        );
    }

    #[test]
    fn map_filter_and_concat() {
        let out = run_source(
            "let xs = [1, 2, 3, 4]\nprint(xs.map(fn(x) => x * x), xs.filter(fn(x) => x % 2 == 0), [0] + xs[0..1])",
        );
        assert_eq!(out, "[1, 4, 9, 16] [2, 4] [0, 1]\n");
    }

    #[test]
    fn list_from_generator() {
        let out = run_source(
            "def evens(n) {\n  for i in 0..n { if i % 2 == 0 { yield i } }\n}\nprint(List(evens(7)), List(\"ab\"), (2..5).to_list())",
        );
        assert_eq!(out, "[0, 2, 4, 6] [\"a\", \"b\"] [2, 3, 4]\n");
    }

    #[test]
    fn range_methods() {
        let out = run_source("let r = 2..5\nprint(3 in r, 5 in r, r.start(), r.end(), r == 2..5)");
        assert_eq!(out, "true false 2 5 true\n");
    }

    #[test]
    fn clear_releases_items() {
        let out = run_source(
            "class T {\n  def __del__() { print(\"freed\") }\n}\nlet xs = [T()]\nxs.clear()\nprint(len(xs))",
        );
        assert_eq!(out, "freed\n0\n");
    }

    #[test]
    fn callbacks_may_clear_the_list_being_walked() {
        let out = run_source(
            "class K {}\nvar xs = [K(), K()]\nprint(xs.map(fn(x) {\n  xs.clear()\n  return 1\n}), len(xs))\nvar ys = [K(), K()]\nprint(len(ys.filter(fn(y) {\n  ys.clear()\n  return true\n})), len(ys))",
        );
        assert_eq!(out, "[1, 1] 0\n2 0\n");
    }

    #[test]
    fn eq_may_clear_the_list_being_compared() {
        let out = run_source(
            "class E {\n  def __eq__(o) {\n    zs.clear()\n    return true\n  }\n}\nvar zs = [E(), E()]\nprint(zs == [E(), E()], len(zs))",
        );
        assert_eq!(out, "true 0\n");
    }

    #[test]
    fn self_containing_lists_raise_loop_reference() {
        let out = run_source(
            "var a = [1]\na.push(a)\ntry { print(a) } catch LoopReferenceError { print(\"loop\") }\nprint(len(a), a == a)",
        );
        assert_eq!(out, "loop\n2 true\n");
        let (err, _) = run_failing("var b = [1]\nb.push(b)\nvar c = [1]\nc.push(c)\nprint(b == c)");
        assert_eq!(err.class_name(), "LoopReferenceError");
    }

    #[test]
    fn nested_lists_render_after_a_loop_error() {
        let out = run_source(
            "var a = []\na.push(a)\ntry { str(a) } catch LoopReferenceError {}\nprint([[1], [2, [3]]])",
        );
        assert_eq!(out, "[[1], [2, [3]]]\n");
    }

    #[test]
    fn deeply_nested_lists_overflow_cleanly() {
        let out = run_source(
            "var a = []\nfor i in 0..100000 { a = [a] }\ntry { print(a) } catch StackOverflowError as e { print(e.message) }\na = nil\nprint(\"ok\")",
        );
        assert_eq!(out, "containers nested too deeply\nok\n");
    }

    #[test]
    fn list_length_is_bounded() {
        let mut config = Config::default();
        config.heap.max_items = 100;
        let mut rt = Runtime::new(config);
        rt.capture_output();
        rt.run_source(
            "main",
            "try { (0..4000000000).to_list() } catch MemoryError { print(\"too big\") }\nvar xs = []\ntry {\n  while true { xs.push(0) }\n} catch MemoryError { print(len(xs)) }",
        )
        .expect("runs");
        assert_eq!(rt.take_output(), "too big\n100\n");
    }
}
