//! Native extension modules shipped with the runtime: `math` and `sys`.
//!
//! They are found by `import` and `#@native` before any dynamic library
//! of the same name.

use std::f64::consts;

use fox_object::{ModuleId, Value};
use num_bigint::BigInt;
use num_traits::{Pow, ToPrimitive};

use super::{display, expect_str, numbers};
use crate::descriptor::{Arity, ModuleState};
use crate::error::{ErrorKind, VmResult};
use crate::native::ModuleBuilder;
use crate::Runtime;

/// Create the bundled module `name`, if there is one.
pub(crate) fn load(rt: &mut Runtime, name: &str) -> Option<ModuleId> {
    let install: fn(&mut ModuleBuilder) = match name {
        "math" => install_math,
        "sys" => install_sys,
        _ => return None,
    };
    let module = rt.new_module(name, None);
    let mut b = ModuleBuilder::new(rt, module);
    install(&mut b);
    b.finish();
    rt.modules[module.index()].state = ModuleState::Initialized;
    Some(module)
}

// ── math ───────────────────────────────────────────────────────────

fn install_math(b: &mut ModuleBuilder) {
    b.constant("PI", Value::Float(consts::PI));
    b.constant("E", Value::Float(consts::E));
    b.function("sqrt", Arity::exact(1), sqrt);
    b.function("floor", Arity::exact(1), floor);
    b.function("ceil", Arity::exact(1), ceil);
    b.function("pow", Arity::exact(2), pow);
    b.function("min", Arity::at_least(1), min);
    b.function("max", Arity::at_least(1), max);
}

fn as_f64(rt: &mut Runtime, v: Value) -> VmResult<f64> {
    match numbers::float_of(rt, v) {
        Some(x) => Ok(x),
        None => {
            let class = rt.class_name_of(v).to_string();
            Err(rt.raise(ErrorKind::Type, format!("expected a number, got {class}")))
        }
    }
}

fn sqrt(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let x = as_f64(rt, args[0])?;
    if x < 0.0 {
        return Err(rt.raise(ErrorKind::Value, "square root of a negative number"));
    }
    Ok(Value::Float(x.sqrt()))
}

fn rounded(rt: &mut Runtime, v: Value, round: fn(f64) -> f64) -> VmResult<Value> {
    if let Value::Int(_) = v {
        return Ok(v);
    }
    let x = round(as_f64(rt, v)?);
    match x.to_i64() {
        Some(n) => Ok(Value::Int(n)),
        None => Err(rt.raise(ErrorKind::Value, format!("cannot convert {x} to Int"))),
    }
}

fn floor(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    rounded(rt, args[0], f64::floor)
}

fn ceil(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    rounded(rt, args[0], f64::ceil)
}

/// Exact for integer bases with small non-negative Int exponents.
fn pow(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    if let (Value::Int(base), Value::Int(exp)) = (args[0], args[1])
        && let Ok(exp) = u32::try_from(exp)
        && exp <= 1 << 16
    {
        return numbers::make_big(rt, Pow::pow(BigInt::from(base), exp));
    }
    let base = as_f64(rt, args[0])?;
    let exp = as_f64(rt, args[1])?;
    Ok(Value::Float(base.powf(exp)))
}

fn extreme(rt: &mut Runtime, args: &[Value], op: numbers::CmpOp) -> VmResult<Value> {
    let mut best = args[0];
    for &candidate in &args[1..] {
        if numbers::compare(rt, op, candidate, best)? {
            best = candidate;
        }
    }
    rt.retain(best);
    Ok(best)
}

fn min(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    extreme(rt, args, numbers::CmpOp::Lt)
}

fn max(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    extreme(rt, args, numbers::CmpOp::Gt)
}

// ── sys ────────────────────────────────────────────────────────────

fn install_sys(b: &mut ModuleBuilder) {
    let version = b.runtime().permanent_string(env!("CARGO_PKG_VERSION"));
    b.constant("VERSION", version);
    b.function("write", Arity::at_least(0), write);
    b.function("env", Arity::exact(1), env);
    b.function("path", Arity::exact(0), path);
}

fn write(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let mut text = String::new();
    for &arg in args {
        text.push_str(&display(rt, arg)?);
    }
    rt.write_out(&text);
    Ok(Value::Nil)
}

/// Value of an environment variable, `#@env` settings first.
fn env(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let name = expect_str(rt, args[0], "variable name")?;
    match rt.loader.env_var(&name) {
        Some(value) => rt.new_string(value),
        None => Ok(Value::Nil),
    }
}

fn path(rt: &mut Runtime, _: Value, _: &[Value]) -> VmResult<Value> {
    let dirs: Vec<String> = rt
        .loader
        .import_dirs
        .iter()
        .map(|d| d.display().to_string())
        .collect();
    let mut items = Vec::with_capacity(dirs.len());
    for dir in dirs {
        match rt.new_string(dir) {
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

#[cfg(test)]
mod tests {
    use crate::test_util::{run_failing, run_source};

    #[test]
    fn math_functions() {
        let out = run_source(
            "import math\nprint(math.sqrt(16), math.floor(2.7), math.ceil(-2.5), math.floor(3))\nprint(math.pow(2, 70), math.pow(2, 0.5) > 1.41, math.min(3, 1.5, 2), math.max(1, 7r / 2))",
        );
        assert_eq!(out, "4.0 2 -2 3\n1180591620717411303424 true 1.5 7/2\n");
    }

    #[test]
    fn math_constants() {
        assert_eq!(run_source("import math\nprint(math.PI > 3.14, math.E < 2.72)"), "true true\n");
    }

    #[test]
    fn sqrt_of_negative() {
        assert_eq!(run_failing("import math\nmath.sqrt(-1)").0.class_name(), "ValueError");
    }

    #[test]
    fn sys_write_and_env_directive() {
        let out = run_source(
            "#@env FOX_TEST_GREETING=hello\nimport sys\nsys.write(\"a\", 1, \"\\n\")\nprint(sys.env(\"FOX_TEST_GREETING\"), sys.env(\"FOX_SURELY_UNSET_VARIABLE\"))",
        );
        assert_eq!(out, "a1\nhello nil\n");
    }

    #[test]
    fn native_directive_binds_module() {
        assert_eq!(run_source("#@native math\nprint(math.floor(1.5))"), "1\n");
    }
}
