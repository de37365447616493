//! The numeric tower: Int → BigInt → Rational → Float.
//!
//! Int arithmetic that overflows continues in BigInt; BigInt results that
//! fit an i64 come back as Int. Mixed operands are raised to the higher
//! rank before the operation. `/` on integers is floor division.

use std::cmp::Ordering;

use fox_object::{Payload, Symbol, Value};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

use super::{BIG_INT, FLOAT, INT, RANGE, RATIONAL, Syms, expect_int};
use crate::descriptor::Arity;
use crate::error::{ErrorKind, Raised, VmResult};
use crate::native::ModuleBuilder;
use crate::Runtime;

/// Shifts beyond this many bits are refused rather than allocated.
const MAX_SHIFT: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    And,
    Or,
    Xor,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn test(self, ord: Option<Ordering>) -> bool {
        match (self, ord) {
            (_, None) => false,
            (CmpOp::Eq, Some(o)) => o == Ordering::Equal,
            (CmpOp::Lt, Some(o)) => o == Ordering::Less,
            (CmpOp::Le, Some(o)) => o != Ordering::Greater,
            (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
            (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

enum Operator {
    Bin(BinOp),
    Cmp(CmpOp),
}

fn classify(syms: &Syms, name: Symbol) -> Option<Operator> {
    let op = match name {
        n if n == syms.add => Operator::Bin(BinOp::Add),
        n if n == syms.sub => Operator::Bin(BinOp::Sub),
        n if n == syms.mul => Operator::Bin(BinOp::Mul),
        n if n == syms.div => Operator::Bin(BinOp::Div),
        n if n == syms.rem => Operator::Bin(BinOp::Mod),
        n if n == syms.shl => Operator::Bin(BinOp::Shl),
        n if n == syms.shr => Operator::Bin(BinOp::Shr),
        n if n == syms.bit_and => Operator::Bin(BinOp::And),
        n if n == syms.bit_or => Operator::Bin(BinOp::Or),
        n if n == syms.bit_xor => Operator::Bin(BinOp::Xor),
        n if n == syms.eq => Operator::Cmp(CmpOp::Eq),
        n if n == syms.lt => Operator::Cmp(CmpOp::Lt),
        n if n == syms.le => Operator::Cmp(CmpOp::Le),
        n if n == syms.gt => Operator::Cmp(CmpOp::Gt),
        n if n == syms.ge => Operator::Cmp(CmpOp::Ge),
        _ => return None,
    };
    Some(op)
}

// ── Inline fast path ───────────────────────────────────────────────

/// Operator on two inline numbers without a method lookup. `None` when the
/// operands or the operator are not covered.
pub(crate) fn fast_binary(
    rt: &mut Runtime,
    name: Symbol,
    a: Value,
    b: Value,
) -> VmResult<Option<Value>> {
    if !matches!(
        (a, b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_))
    ) {
        return Ok(None);
    }
    let Some(op) = classify(&rt.syms, name) else {
        return Ok(None);
    };
    let v = match (op, a, b) {
        (Operator::Cmp(c), Value::Int(x), Value::Int(y)) => Value::Bool(c.test(Some(x.cmp(&y)))),
        (Operator::Cmp(c), _, _) => Value::Bool(c.test(inline_f64(a).partial_cmp(&inline_f64(b)))),
        (Operator::Bin(op), Value::Int(x), Value::Int(y)) => int_binary(rt, op, x, y)?,
        (Operator::Bin(op), _, _) => float_binary(rt, op, inline_f64(a), inline_f64(b))?,
    };
    Ok(Some(v))
}

/// Equality of two inline numbers.
pub(crate) fn quick_eq(a: Value, b: Value) -> Option<bool> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x == y),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Some(inline_f64(a) == inline_f64(b))
        }
        _ => None,
    }
}

fn inline_f64(v: Value) -> f64 {
    match v {
        Value::Int(n) => n as f64,
        Value::Float(x) => x,
        _ => f64::NAN,
    }
}

fn div_zero(rt: &mut Runtime) -> Raised {
    rt.raise(ErrorKind::Value, "division by zero")
}

fn shift_count(rt: &mut Runtime, n: &BigInt) -> VmResult<usize> {
    if n.is_negative() {
        return Err(rt.raise(ErrorKind::Value, "negative shift count"));
    }
    match n.to_usize() {
        Some(n) if n <= MAX_SHIFT => Ok(n),
        _ => Err(rt.raise(ErrorKind::Value, "shift count too large")),
    }
}

fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) { Some(q - 1) } else { Some(q) }
}

fn floor_mod(x: i64, y: i64) -> i64 {
    let r = x.checked_rem(y).unwrap_or(0);
    if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }
}

fn int_binary(rt: &mut Runtime, op: BinOp, x: i64, y: i64) -> VmResult<Value> {
    let result = match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => {
            if y == 0 {
                return Err(div_zero(rt));
            }
            floor_div(x, y)
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(div_zero(rt));
            }
            Some(floor_mod(x, y))
        }
        BinOp::Shl => {
            if y < 0 {
                return Err(rt.raise(ErrorKind::Value, "negative shift count"));
            }
            (y < 63)
                .then(|| x << y)
                .filter(|shifted| shifted >> y == x)
        }
        BinOp::Shr => {
            if y < 0 {
                return Err(rt.raise(ErrorKind::Value, "negative shift count"));
            }
            Some(if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y })
        }
        BinOp::And => Some(x & y),
        BinOp::Or => Some(x | y),
        BinOp::Xor => Some(x ^ y),
    };
    match result {
        Some(n) => Ok(Value::Int(n)),
        None => big_binary(rt, op, BigInt::from(x), BigInt::from(y)),
    }
}

fn float_binary(rt: &mut Runtime, op: BinOp, x: f64, y: f64) -> VmResult<Value> {
    let r = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(div_zero(rt));
            }
            x / y
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(div_zero(rt));
            }
            x - y * (x / y).floor()
        }
        other => {
            return Err(rt.raise(
                ErrorKind::Type,
                format!("unsupported operand type for {}: 'Float'", other.symbol()),
            ));
        }
    };
    Ok(Value::Float(r))
}

fn big_binary(rt: &mut Runtime, op: BinOp, x: BigInt, y: BigInt) -> VmResult<Value> {
    let r = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y.is_zero() {
                return Err(div_zero(rt));
            }
            let (q, r) = (&x / &y, &x % &y);
            if !r.is_zero() && (r.is_negative() != y.is_negative()) { q - 1 } else { q }
        }
        BinOp::Mod => {
            if y.is_zero() {
                return Err(div_zero(rt));
            }
            let r = &x % &y;
            if !r.is_zero() && (r.is_negative() != y.is_negative()) { r + y } else { r }
        }
        BinOp::Shl => x << shift_count(rt, &y)?,
        BinOp::Shr => x >> shift_count(rt, &y)?,
        BinOp::And => x & y,
        BinOp::Or => x | y,
        BinOp::Xor => x ^ y,
    };
    make_big(rt, r)
}

fn rat_binary(rt: &mut Runtime, op: BinOp, x: BigRational, y: BigRational) -> VmResult<Value> {
    let r = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y.is_zero() {
                return Err(div_zero(rt));
            }
            x / y
        }
        BinOp::Mod => {
            if y.is_zero() {
                return Err(div_zero(rt));
            }
            let q = (&x / &y).floor();
            x - y * q
        }
        other => {
            return Err(rt.raise(
                ErrorKind::Type,
                format!("unsupported operand type for {}: 'Rational'", other.symbol()),
            ));
        }
    };
    rt.alloc_payload(RATIONAL, Payload::Rational(r))
}

/// An integer result: inline when it fits.
pub(crate) fn make_big(rt: &mut Runtime, n: BigInt) -> VmResult<Value> {
    match n.to_i64() {
        Some(small) => Ok(Value::Int(small)),
        None => rt.alloc_payload(BIG_INT, Payload::BigInt(n)),
    }
}

// ── General path ───────────────────────────────────────────────────

enum Num {
    Int(i64),
    Big(BigInt),
    Rat(BigRational),
    Float(f64),
}

impl Num {
    fn rank(&self) -> u8 {
        match self {
            Num::Int(_) => 0,
            Num::Big(_) => 1,
            Num::Rat(_) => 2,
            Num::Float(_) => 3,
        }
    }

    fn to_big(&self) -> BigInt {
        match self {
            Num::Int(n) => BigInt::from(*n),
            Num::Big(n) => n.clone(),
            Num::Rat(q) => q.to_integer(),
            Num::Float(x) => BigInt::from(*x as i64),
        }
    }

    fn to_rat(&self) -> BigRational {
        match self {
            Num::Rat(q) => q.clone(),
            Num::Float(x) => BigRational::from_float(*x).unwrap_or_default(),
            other => BigRational::from_integer(other.to_big()),
        }
    }

    fn to_f64(&self) -> f64 {
        match self {
            Num::Int(n) => *n as f64,
            Num::Big(n) => n.to_f64().unwrap_or(f64::NAN),
            Num::Rat(q) => q.to_f64().unwrap_or(f64::NAN),
            Num::Float(x) => *x,
        }
    }
}

/// Any number as an `f64`.
pub(crate) fn float_of(rt: &Runtime, v: Value) -> Option<f64> {
    num_of(rt, v).map(|n| n.to_f64())
}

fn num_of(rt: &Runtime, v: Value) -> Option<Num> {
    match v {
        Value::Int(n) => Some(Num::Int(n)),
        Value::Float(x) => Some(Num::Float(x)),
        Value::Object(_) => match &rt.instance(v)?.payload {
            Payload::BigInt(n) => Some(Num::Big(n.clone())),
            Payload::Rational(q) => Some(Num::Rat(q.clone())),
            _ => None,
        },
        _ => None,
    }
}

fn binary(rt: &mut Runtime, op: BinOp, a: Value, b: Value) -> VmResult<Value> {
    let (Some(x), Some(y)) = (num_of(rt, a), num_of(rt, b)) else {
        let (left, right) = (rt.class_name_of(a).to_string(), rt.class_name_of(b).to_string());
        return Err(rt.raise(
            ErrorKind::Type,
            format!("unsupported operand types for {}: '{left}' and '{right}'", op.symbol()),
        ));
    };
    match x.rank().max(y.rank()) {
        0 => match (x, y) {
            (Num::Int(x), Num::Int(y)) => int_binary(rt, op, x, y),
            _ => unreachable!("rank 0 is Int"),
        },
        1 => big_binary(rt, op, x.to_big(), y.to_big()),
        2 => rat_binary(rt, op, x.to_rat(), y.to_rat()),
        _ => float_binary(rt, op, x.to_f64(), y.to_f64()),
    }
}

/// Numeric comparison; `==` between a number and anything else is false.
pub(crate) fn compare(rt: &mut Runtime, op: CmpOp, a: Value, b: Value) -> VmResult<bool> {
    let (Some(x), Some(y)) = (num_of(rt, a), num_of(rt, b)) else {
        if op == CmpOp::Eq {
            return Ok(false);
        }
        let (left, right) = (rt.class_name_of(a).to_string(), rt.class_name_of(b).to_string());
        return Err(rt.raise(
            ErrorKind::Type,
            format!("'{}' not supported between '{left}' and '{right}'", op.symbol()),
        ));
    };
    let ord = match x.rank().max(y.rank()) {
        0 | 1 => Some(x.to_big().cmp(&y.to_big())),
        2 => Some(x.to_rat().cmp(&y.to_rat())),
        _ => x.to_f64().partial_cmp(&y.to_f64()),
    };
    Ok(op.test(ord))
}

/// Total order for sorting numbers; NaN sorts last.
pub(crate) fn sort_key_cmp(rt: &Runtime, a: Value, b: Value) -> Option<Ordering> {
    let (x, y) = (num_of(rt, a)?, num_of(rt, b)?);
    Some(match x.rank().max(y.rank()) {
        0 | 1 => x.to_big().cmp(&y.to_big()),
        2 => x.to_rat().cmp(&y.to_rat()),
        _ => x.to_f64().total_cmp(&y.to_f64()),
    })
}

// ── Methods ────────────────────────────────────────────────────────

macro_rules! binary_methods {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            fn $name(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
                binary(rt, $op, this, args[0])
            }
        )*
    };
}

macro_rules! compare_methods {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            fn $name(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
                compare(rt, $op, this, args[0]).map(Value::Bool)
            }
        )*
    };
}

binary_methods! {
    num_add => BinOp::Add,
    num_sub => BinOp::Sub,
    num_mul => BinOp::Mul,
    num_div => BinOp::Div,
    num_mod => BinOp::Mod,
    num_shl => BinOp::Shl,
    num_shr => BinOp::Shr,
    num_and => BinOp::And,
    num_or => BinOp::Or,
    num_xor => BinOp::Xor,
}

compare_methods! {
    num_eq => CmpOp::Eq,
    num_lt => CmpOp::Lt,
    num_le => CmpOp::Le,
    num_gt => CmpOp::Gt,
    num_ge => CmpOp::Ge,
}

type Method = fn(&mut Runtime, Value, &[Value]) -> VmResult<Value>;

const OPERATORS: [(&str, Method); 15] = [
    ("__add__", num_add),
    ("__sub__", num_sub),
    ("__mul__", num_mul),
    ("__div__", num_div),
    ("__mod__", num_mod),
    ("__shl__", num_shl),
    ("__shr__", num_shr),
    ("__and__", num_and),
    ("__or__", num_or),
    ("__xor__", num_xor),
    ("__eq__", num_eq),
    ("__lt__", num_lt),
    ("__le__", num_le),
    ("__gt__", num_gt),
    ("__ge__", num_ge),
];

pub(super) fn install(b: &mut ModuleBuilder) {
    for class in [INT, BIG_INT, RATIONAL, FLOAT] {
        for (name, method) in OPERATORS {
            b.method(class, name, Arity::exact(1), method);
        }
        b.method(class, "__neg__", Arity::exact(0), neg);
        b.method(class, "abs", Arity::exact(0), abs);
        b.method(class, "to_float", Arity::exact(0), to_float);
        b.method(class, "to_int", Arity::exact(0), to_int);
    }
    b.method(INT, "__invert__", Arity::exact(0), invert);
    b.method(BIG_INT, "__invert__", Arity::exact(0), invert);
    b.method(INT, "__range__", Arity::exact(1), int_range);
    b.method(RATIONAL, "numerator", Arity::exact(0), numerator);
    b.method(RATIONAL, "denominator", Arity::exact(0), denominator);

    b.factory(INT, Arity::exact(1), int_new);
    b.factory(BIG_INT, Arity::exact(1), int_new);
    b.factory(FLOAT, Arity::exact(1), float_new);
    b.factory(RATIONAL, Arity::range(1, 2), rational_new);
}

fn operand(rt: &mut Runtime, v: Value) -> VmResult<Num> {
    match num_of(rt, v) {
        Some(n) => Ok(n),
        None => {
            let class = rt.class_name_of(v).to_string();
            Err(rt.raise(ErrorKind::Type, format!("expected a number, got {class}")))
        }
    }
}

fn num_value(rt: &mut Runtime, n: Num) -> VmResult<Value> {
    match n {
        Num::Int(n) => Ok(Value::Int(n)),
        Num::Big(n) => make_big(rt, n),
        Num::Rat(q) => rt.alloc_payload(RATIONAL, Payload::Rational(q)),
        Num::Float(x) => Ok(Value::Float(x)),
    }
}

fn neg(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let n = match operand(rt, this)? {
        Num::Int(n) => match n.checked_neg() {
            Some(n) => Num::Int(n),
            None => Num::Big(-BigInt::from(n)),
        },
        Num::Big(n) => Num::Big(-n),
        Num::Rat(q) => Num::Rat(-q),
        Num::Float(x) => Num::Float(-x),
    };
    num_value(rt, n)
}

fn abs(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let n = match operand(rt, this)? {
        Num::Int(n) => match n.checked_abs() {
            Some(n) => Num::Int(n),
            None => Num::Big(BigInt::from(n).abs()),
        },
        Num::Big(n) => Num::Big(n.abs()),
        Num::Rat(q) => Num::Rat(q.abs()),
        Num::Float(x) => Num::Float(x.abs()),
    };
    num_value(rt, n)
}

fn invert(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    match operand(rt, this)? {
        Num::Int(n) => Ok(Value::Int(!n)),
        Num::Big(n) => make_big(rt, !n),
        _ => Err(rt.raise(ErrorKind::Type, "~ needs an integer")),
    }
}

fn to_float(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    Ok(Value::Float(operand(rt, this)?.to_f64()))
}

/// Floor towards negative infinity.
fn to_int(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    match operand(rt, this)? {
        Num::Float(x) if !x.is_finite() => {
            Err(rt.raise(ErrorKind::Value, format!("cannot convert {x} to Int")))
        }
        Num::Float(x) => match BigRational::from_float(x.floor()) {
            Some(q) => make_big(rt, q.to_integer()),
            None => Err(rt.raise(ErrorKind::Value, format!("cannot convert {x} to Int"))),
        },
        Num::Rat(q) => make_big(rt, q.floor().to_integer()),
        other => make_big(rt, other.to_big()),
    }
}

fn int_range(rt: &mut Runtime, this: Value, args: &[Value]) -> VmResult<Value> {
    let start = expect_int(rt, this, "range start")?;
    let end = expect_int(rt, args[0], "range end")?;
    rt.alloc_payload(RANGE, Payload::Range { start, end })
}

fn numerator(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let q = operand(rt, this)?.to_rat();
    make_big(rt, q.numer().clone())
}

fn denominator(rt: &mut Runtime, this: Value, _: &[Value]) -> VmResult<Value> {
    let q = operand(rt, this)?.to_rat();
    make_big(rt, q.denom().clone())
}

fn int_new(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    if let Some(text) = rt.str_of(args[0]) {
        let text = text.trim().replace('_', "");
        return match parse_int(&text) {
            Some(n) => make_big(rt, n),
            None => Err(rt.raise(ErrorKind::Value, format!("invalid integer: {text:?}"))),
        };
    }
    match args[0] {
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        v => to_int(rt, v, &[]),
    }
}

fn float_new(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    if let Some(text) = rt.str_of(args[0]) {
        let text = text.trim().to_string();
        return match text.parse::<f64>() {
            Ok(x) => Ok(Value::Float(x)),
            Err(_) => Err(rt.raise(ErrorKind::Value, format!("invalid float: {text:?}"))),
        };
    }
    to_float(rt, args[0], &[])
}

fn rational_new(rt: &mut Runtime, _: Value, args: &[Value]) -> VmResult<Value> {
    let numer = operand(rt, args[0])?.to_rat();
    let denom = match args.get(1) {
        Some(&d) => operand(rt, d)?.to_rat(),
        None => BigRational::from_integer(BigInt::from(1)),
    };
    if denom.is_zero() {
        return Err(div_zero(rt));
    }
    rt.alloc_payload(RATIONAL, Payload::Rational(numer / denom))
}

/// Decimal or `0x`/`0o`/`0b` prefixed integer text, optionally signed.
pub(crate) fn parse_int(text: &str) -> Option<BigInt> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = match digits.get(..2) {
        Some("0x" | "0X") => (16, &digits[2..]),
        Some("0o" | "0O") => (8, &digits[2..]),
        Some("0b" | "0B") => (2, &digits[2..]),
        _ => (10, digits),
    };
    let n = parse_digits(digits, radix)?;
    Some(if negative { -n } else { n })
}

/// Digits of a literal in `radix`, `_` separators already removed.
pub(crate) fn parse_digits(digits: &str, radix: u32) -> Option<BigInt> {
    if digits.is_empty() {
        return None;
    }
    BigInt::parse_bytes(digits.as_bytes(), radix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{run_failing, run_source};

    #[test]
    fn floor_division_and_modulo() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_div(i64::MIN, -1), None);
        assert_eq!(floor_mod(-7, 3), 2);
        assert_eq!(floor_mod(7, -3), -2);
        assert_eq!(run_source("print(-7 / 2, -7 % 3, 7.5 / 2)"), "-4 2 3.75\n");
    }

    #[test]
    fn invert_covers_both_integer_widths() {
        assert_eq!(
            run_source("let b = ~(1 << 70)\nprint(~5, b, ~b, type_name(~b))"),
            "-6 -1180591620717411303425 1180591620717411303424 BigInt\n"
        );
    }

    #[test]
    fn overflow_promotes_and_demotes() {
        let out = run_source(
            "let big = 9223372036854775807 + 1\nprint(big, type_name(big))\nlet back = big - 1\nprint(back, type_name(back))",
        );
        assert_eq!(
            out,
            "9223372036854775808 BigInt\n9223372036854775807 Int\n"
        );
    }

    #[test]
    fn big_literals_and_shifts() {
        assert_eq!(
            run_source("print(12345678901234567890n * 10, 1 << 70, (1 << 70) >> 69)"),
            "123456789012345678900 1180591620717411303424 2\n"
        );
    }

    #[test]
    fn rationals() {
        assert_eq!(
            run_source("let third = 1r / 3\nprint(third, third * 3, type_name(third + 1))"),
            "1/3 1/1 Rational\n"
        );
    }

    #[test]
    fn mixed_comparisons() {
        assert_eq!(
            run_source("print(1 < 1.5, 2 == 2.0, 1r / 2 < 1, 10n > 9, 3 == \"3\")"),
            "true true true true false\n"
        );
    }

    #[test]
    fn division_by_zero_is_a_value_error() {
        for src in ["1 / 0", "1.0 / 0", "5n % 0", "1r / 0"] {
            assert_eq!(run_failing(src).0.class_name(), "ValueError", "{src}");
        }
    }

    #[test]
    fn conversions() {
        assert_eq!(
            run_source("print(Int(\"0x1f\"), Int(-2.5), Float(\"1.5\"), 7.to_float(), Rational(6, 4))"),
            "31 -3 1.5 7.0 3/2\n"
        );
    }

    #[test]
    fn parse_int_prefixes() {
        assert_eq!(parse_int("-0b101"), Some(BigInt::from(-5)));
        assert_eq!(parse_int("0o17"), Some(BigInt::from(15)));
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("12a"), None);
    }
}
