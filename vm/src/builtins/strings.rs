//! `String`, `Bytes` and `Regex`.

use fox_object::{Payload, Value};
use regex::Regex;

use super::{BYTES, ITERATOR, REGEX, STRING, display, expect_int, expect_str, index_in, numbers};
use crate::descriptor::Arity;
use crate::error::{ErrorKind, VmResult};
use crate::native::ModuleBuilder;
use crate::Runtime;

/// Largest string `*` builds.
const MAX_REPEAT_BYTES: usize = 1 << 28;

pub(super) fn install(b: &mut ModuleBuilder) {
    b.factory(STRING, Arity::exact(1), string_new);
    b.method(STRING, "__add__", Arity::exact(1), str_add);
    b.method(STRING, "__mul__", Arity::exact(1), str_mul);
    b.method(STRING, "__eq__", Arity::exact(1), str_eq);
    b.method(STRING, "__lt__", Arity::exact(1), str_lt);
    b.method(STRING, "__le__", Arity::exact(1), str_le);
    b.method(STRING, "__gt__", Arity::exact(1), str_gt);
    b.method(STRING, "__ge__", Arity::exact(1), str_ge);
    b.method(STRING, "__contains__", Arity::exact(1), str_contains);
    b.method(STRING, "__getitem__", Arity::exact(1), str_getitem);
    b.method(STRING, "__iter__", Arity::exact(0), str_iter);
    b.method(STRING, "upper", Arity::exact(0), upper);
    b.method(STRING, "lower", Arity::exact(0), lower);
    b.method(STRING, "trim", Arity::exact(0), trim);
    b.method(STRING, "split", Arity::range(0, 1), split);
    b.method(STRING, "join", Arity::exact(1), join);
    b.method(STRING, "starts_with", Arity::exact(1), starts_with);
    b.method(STRING, "ends_with", Arity::exact(1), ends_with);
    b.method(STRING, "find", Arity::exact(1), find);
    b.method(STRING, "replace", Arity::exact(2), replace);
    b.method(STRING, "chars", Arity::exact(0), chars);
    b.method(STRING, "to_int", Arity::exact(0), str_to_int);
    b.method(STRING, "to_float", Arity::exact(0), str_to_float);
    b.method(STRING, "bytes", Arity::exact(0), str_bytes);

    b.factory(BYTES, Arity::exact(1), bytes_new);
    b.method(BYTES, "__add__", Arity::exact(1), bytes_add);
    b.method(BYTES, "__eq__", Arity::exact(1), bytes_eq);
    b.method(BYTES, "__getitem__", Arity::exact(1), bytes_getitem);
    b.method(BYTES, "__contains__", Arity::exact(1), bytes_contains);
    b.method(BYTES, "decode", Arity::exact(0), decode);
    b.method(BYTES, "hex", Arity::exact(0), hex);

    b.factory(REGEX, Arity::exact(1), regex_new);
    b.method(REGEX, "matches", Arity::exact(1), matches);
    b.method(REGEX, "find", Arity::exact(1), regex_find);
    b.method(REGEX, "find_all", Arity::exact(1), find_all);
    b.method(REGEX, "groups", Arity::exact(1), groups);
    b.method(REGEX, "replace", Arity::exact(2), regex_replace);
    b.method(REGEX, "split", Arity::exact(1), regex_split);
    b.method(REGEX, "pattern", Arity::exact(0), pattern);
}

/// Strings as a new list of strings.
fn string_list(rt: &mut Runtime, parts: Vec<String>) -> VmResult<Value> {
    let mut items = Vec::with_capacity(parts.len());
    for part in parts {
        match rt.new_string(part) {
            Ok(v) => items.push(v),
            Err(raised) => {
                for v in items {
                    rt.release(v);
                }
                return Err(raised);
            }
        }
    }
    rt.new_list(items)
}

/// Iterator over a freshly built list.
fn list_iter(rt: &mut Runtime, list: Value) -> VmResult<Value> {
    rt.alloc(ITERATOR, vec![list], Payload::ListIter { index: 0 })
}

fn bool_of(v: bool) -> VmResult<Value> {
    Ok(Value::Bool(v))
}

// ── String ─────────────────────────────────────────────────────────

fn this_str(rt: &mut Runtime, this: Value) -> VmResult<String> {
    expect_str(rt, this, "receiver")
}

fn string_new(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let text = display(rt, args[0])?;
    rt.new_string(text)
}

fn str_add(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let Some(rhs) = rt.str_of(args[0]) else {
        let class = rt.class_name_of(args[0]).to_string();
        return Err(rt.raise(
            ErrorKind::Type,
            format!("can only concatenate String to String, not {class}"),
        ));
    };
    let text = format!("{}{rhs}", rt.str_of(this).unwrap_or_default());
    rt.new_string(text)
}

fn str_mul(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let times = expect_int(rt, args[0], "repeat count")?;
    let text = this_str(rt, this)?;
    let len = text.len().saturating_mul(times.max(0) as usize);
    if len > MAX_REPEAT_BYTES {
        return Err(rt.raise(ErrorKind::Memory, format!("string of {len} bytes is too long")));
    }
    rt.new_string(text.repeat(times.max(0) as usize))
}

fn str_eq(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    bool_of(rt.str_of(args[0]).is_some_and(|s| Some(s) == rt.str_of(this)))
}

fn str_ordering(rt: &mut Runtime, this: Value, other: Value) -> VmResult<std::cmp::Ordering> {
    match (rt.str_of(this), rt.str_of(other)) {
        (Some(a), Some(b)) => Ok(a.cmp(b)),
        _ => {
            let class = rt.class_name_of(other).to_string();
            Err(rt.raise(ErrorKind::Type, format!("cannot compare String with {class}")))
        }
    }
}

fn str_lt(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    bool_of(str_ordering(rt, this, args[0])?.is_lt())
}

fn str_le(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    bool_of(str_ordering(rt, this, args[0])?.is_le())
}

fn str_gt(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    bool_of(str_ordering(rt, this, args[0])?.is_gt())
}

fn str_ge(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    bool_of(str_ordering(rt, this, args[0])?.is_ge())
}

fn str_contains(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let needle = expect_str(rt, args[0], "substring")?;
    bool_of(rt.str_of(this).is_some_and(|s| s.contains(&needle)))
}

fn str_getitem(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let chars: Vec<char> = this_str(rt, this)?.chars().collect();
    if let Some(&Payload::Range { start, end }) = rt.instance(args[0]).map(|i| &i.payload) {
        let clamp = |i: i64| i.clamp(0, chars.len() as i64) as usize;
        let (start, end) = (clamp(start), clamp(end));
        let slice: String = chars[start..end.max(start)].iter().collect();
        return rt.new_string(slice);
    }
    let index = expect_int(rt, args[0], "string index")?;
    let at = index_in(rt, index, chars.len())?;
    rt.new_string(chars[at].to_string())
}

fn str_iter(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let parts = this_str(rt, this)?.chars().map(String::from).collect();
    let list = string_list(rt, parts)?;
    list_iter(rt, list)
}

fn upper(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let text = this_str(rt, this)?.to_uppercase();
    rt.new_string(text)
}

fn lower(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let text = this_str(rt, this)?.to_lowercase();
    rt.new_string(text)
}

fn trim(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let text = this_str(rt, this)?.trim().to_string();
    rt.new_string(text)
}

/// `split()` splits on whitespace runs, `split(sep)` on `sep`.
fn split(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let text = this_str(rt, this)?;
    let parts = match args.first() {
        Some(&sep) => {
            let sep = expect_str(rt, sep, "separator")?;
            if sep.is_empty() {
                return Err(rt.raise(ErrorKind::Value, "empty separator"));
            }
            text.split(sep.as_str()).map(String::from).collect()
        }
        None => text.split_whitespace().map(String::from).collect(),
    };
    string_list(rt, parts)
}

fn join(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let sep = this_str(rt, this)?;
    let Some(items) = rt.instance(args[0]).and_then(|i| i.as_list()).cloned() else {
        let class = rt.class_name_of(args[0]).to_string();
        return Err(rt.raise(ErrorKind::Type, format!("join() needs a List, not {class}")));
    };
    for &item in &items {
        rt.retain(item);
    }
    let mut parts = Vec::with_capacity(items.len());
    let mut failed = None;
    for &item in &items {
        match display(rt, item) {
            Ok(part) => parts.push(part),
            Err(raised) => {
                failed = Some(raised);
                break;
            }
        }
    }
    for item in items {
        rt.release(item);
    }
    match failed {
        Some(raised) => Err(raised),
        None => rt.new_string(parts.join(&sep)),
    }
}

fn starts_with(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let prefix = expect_str(rt, args[0], "prefix")?;
    bool_of(this_str(rt, this)?.starts_with(&prefix))
}

fn ends_with(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let suffix = expect_str(rt, args[0], "suffix")?;
    bool_of(this_str(rt, this)?.ends_with(&suffix))
}

/// Character index of the first occurrence, or -1.
fn find(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let needle = expect_str(rt, args[0], "substring")?;
    let text = this_str(rt, this)?;
    let index = text
        .find(&needle)
        .map_or(-1, |byte| text[..byte].chars().count() as i64);
    Ok(Value::Int(index))
}

fn replace(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let from = expect_str(rt, args[0], "pattern")?;
    let to = expect_str(rt, args[1], "replacement")?;
    let text = this_str(rt, this)?.replace(&from, &to);
    rt.new_string(text)
}

fn chars(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let parts = this_str(rt, this)?.chars().map(String::from).collect();
    string_list(rt, parts)
}

fn str_to_int(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let text = this_str(rt, this)?.trim().replace('_', "");
    match numbers::parse_int(&text) {
        Some(n) => numbers::make_big(rt, n),
        None => Err(rt.raise(ErrorKind::Value, format!("invalid integer: {text:?}"))),
    }
}

fn str_to_float(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let text = this_str(rt, this)?;
    match text.trim().parse::<f64>() {
        Ok(x) => Ok(Value::Float(x)),
        Err(_) => Err(rt.raise(ErrorKind::Value, format!("invalid float: {text:?}"))),
    }
}

fn str_bytes(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let bytes = this_str(rt, this)?.into_bytes();
    rt.alloc_payload(BYTES, Payload::Bytes(bytes))
}

// ── Bytes ──────────────────────────────────────────────────────────

fn bytes_of(rt: &Runtime, v: Value) -> Option<&[u8]> {
    match rt.instance(v).map(|i| &i.payload) {
        Some(Payload::Bytes(b)) => Some(b),
        _ => None,
    }
}

fn expect_bytes(rt: &mut Runtime, v: Value) -> VmResult<Vec<u8>> {
    match bytes_of(rt, v) {
        Some(b) => Ok(b.to_vec()),
        None => {
            let class = rt.class_name_of(v).to_string();
            Err(rt.raise(ErrorKind::Type, format!("expected Bytes, got {class}")))
        }
    }
}

fn byte_value(rt: &mut Runtime, v: Value) -> VmResult<u8> {
    let n = expect_int(rt, v, "byte")?;
    u8::try_from(n).map_err(|_| rt.raise(ErrorKind::Value, format!("byte out of range: {n}")))
}

/// `Bytes(text)` encodes UTF-8, `Bytes([ints])` takes the values.
fn bytes_new(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    if let Some(text) = rt.str_of(args[0]) {
        let bytes = text.as_bytes().to_vec();
        return rt.alloc_payload(BYTES, Payload::Bytes(bytes));
    }
    let Some(items) = rt.instance(args[0]).and_then(|i| i.as_list()).cloned() else {
        let class = rt.class_name_of(args[0]).to_string();
        return Err(rt.raise(ErrorKind::Type, format!("cannot make Bytes from {class}")));
    };
    let mut bytes = Vec::with_capacity(items.len());
    for item in items {
        bytes.push(byte_value(rt, item)?);
    }
    rt.alloc_payload(BYTES, Payload::Bytes(bytes))
}

fn bytes_add(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let mut bytes = expect_bytes(rt, this)?;
    bytes.extend(expect_bytes(rt, args[0])?);
    rt.alloc_payload(BYTES, Payload::Bytes(bytes))
}

fn bytes_eq(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    bool_of(bytes_of(rt, args[0]).is_some_and(|b| Some(b) == bytes_of(rt, this)))
}

fn bytes_getitem(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let bytes = expect_bytes(rt, this)?;
    let index = expect_int(rt, args[0], "byte index")?;
    let at = index_in(rt, index, bytes.len())?;
    Ok(Value::Int(bytes[at] as i64))
}

fn bytes_contains(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let byte = byte_value(rt, args[0])?;
    bool_of(bytes_of(rt, this).is_some_and(|b| b.contains(&byte)))
}

fn decode(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let bytes = expect_bytes(rt, this)?;
    match String::from_utf8(bytes) {
        Ok(text) => rt.new_string(text),
        Err(err) => Err(rt.raise(ErrorKind::Value, format!("invalid UTF-8: {err}"))),
    }
}

fn hex(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let text: String = expect_bytes(rt, this)?.iter().map(|b| format!("{b:02x}")).collect();
    rt.new_string(text)
}

// ── Regex ──────────────────────────────────────────────────────────

pub(crate) fn compile_regex(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|err| err.to_string())
}

fn this_regex(rt: &mut Runtime, this: Value) -> VmResult<Regex> {
    match rt.instance(this).map(|i| &i.payload) {
        Some(Payload::Regex(re)) => Ok(re.clone()),
        _ => Err(rt.raise(ErrorKind::Type, "receiver is not a Regex")),
    }
}

fn regex_new(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let source = expect_str(rt, args[0], "pattern")?;
    match compile_regex(&source) {
        Ok(re) => rt.alloc_payload(REGEX, Payload::Regex(re)),
        Err(err) => Err(rt.raise(ErrorKind::Value, format!("invalid regex: {err}"))),
    }
}

fn matches(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let re = this_regex(rt, this)?;
    let text = expect_str(rt, args[0], "subject")?;
    bool_of(re.is_match(&text))
}

fn regex_find(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let re = this_regex(rt, this)?;
    let text = expect_str(rt, args[0], "subject")?;
    match re.find(&text) {
        Some(m) => rt.new_string(m.as_str()),
        None => Ok(Value::Nil),
    }
}

fn find_all(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let re = this_regex(rt, this)?;
    let text = expect_str(rt, args[0], "subject")?;
    let parts = re.find_iter(&text).map(|m| m.as_str().to_string()).collect();
    string_list(rt, parts)
}

/// Capture groups of the first match (nil for groups that did not take
/// part), or nil without a match.
fn groups(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let re = this_regex(rt, this)?;
    let text = expect_str(rt, args[0], "subject")?;
    let Some(caps) = re.captures(&text) else {
        return Ok(Value::Nil);
    };
    let mut items = Vec::with_capacity(caps.len());
    for group in caps.iter().skip(1) {
        let v = match group {
            Some(m) => match rt.new_string(m.as_str()) {
                Ok(v) => v,
                Err(raised) => {
                    for v in items {
                        rt.release(v);
                    }
                    return Err(raised);
                }
            },
            None => Value::Nil,
        };
        items.push(v);
    }
    rt.new_list(items)
}

fn regex_replace(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let re = this_regex(rt, this)?;
    let text = expect_str(rt, args[0], "subject")?;
    let with = expect_str(rt, args[1], "replacement")?;
    let out = re.replace_all(&text, with.as_str()).into_owned();
    rt.new_string(out)
}

fn regex_split(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let re = this_regex(rt, this)?;
    let text = expect_str(rt, args[0], "subject")?;
    let parts = re.split(&text).map(String::from).collect();
    string_list(rt, parts)
}

fn pattern(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let source = this_regex(rt, this)?.as_str().to_string();
    rt.new_string(source)
}
