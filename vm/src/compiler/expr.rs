//! Expressions: precedence climbing straight into bytecode.
//!
//! Loosest to tightest: `?:`, `or`/`||`, `and`/`&&`, `not`, comparisons
//! and `in`, `..`, shifts, `|`, `^`, `&`, `+ -`, `* / %`, prefix
//! operators, then calls, member access and indexing. Every overridable
//! operator is a `CallMethod` on the left operand.

use fox_bytecode::{JumpList, NameKind, Op};
use fox_object::{ModuleId, Payload, Symbol, Value};
use fox_parser::{Keyword, TokenKind};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::ToPrimitive;

use super::scope::{Access, CaptureSource, FuncKind, FuncState, LastAccess, VarRef};
use super::{CResult, Compiler};
use crate::builtins::{self, BUILTINS, numbers, strings};
use crate::descriptor::Binding;
use crate::error::ErrorKind;
use crate::link::PatchKind;

#[derive(Debug, Clone, Copy)]
enum Level {
    Shift,
    BitOr,
    BitXor,
    BitAnd,
    Additive,
    Multiplicative,
}

impl Level {
    fn next(self) -> Option<Level> {
        match self {
            Level::Shift => Some(Level::BitOr),
            Level::BitOr => Some(Level::BitXor),
            Level::BitXor => Some(Level::BitAnd),
            Level::BitAnd => Some(Level::Additive),
            Level::Additive => Some(Level::Multiplicative),
            Level::Multiplicative => None,
        }
    }
}

impl Compiler<'_> {
    pub(super) fn starts_expression(&mut self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Int(_)
                | TokenKind::Float(_)
                | TokenKind::BigInt { .. }
                | TokenKind::Rational { .. }
                | TokenKind::Str(_)
                | TokenKind::StrStart(_)
                | TokenKind::Bytes(_)
                | TokenKind::Regex(_)
                | TokenKind::Name(_)
                | TokenKind::TypeName(_)
                | TokenKind::ConstName(_)
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::Minus
                | TokenKind::Tilde
                | TokenKind::Bang
                | TokenKind::Kw(
                    Keyword::Fn
                        | Keyword::This
                        | Keyword::Super
                        | Keyword::Nil
                        | Keyword::True
                        | Keyword::False
                        | Keyword::Not
                )
        )
    }

    /// Compile one expression, leaving its value on the stack.
    pub(super) fn expression(&mut self) -> CResult<()> {
        self.nested("expression", Self::conditional)
    }

    /// `cond ? a : b`, or a plain `or` expression.
    fn conditional(&mut self) -> CResult<()> {
        self.or_expr()?;
        if !self.check(&TokenKind::Question) {
            return Ok(());
        }
        self.advance();
        self.skip_line_breaks();
        let otherwise = self.jump(Op::JumpIfFalse);
        let depth = self.f_ref().depth;
        self.expression()?;
        self.expect(TokenKind::Colon)?;
        self.skip_line_breaks();
        let end = self.jump(Op::Jump);
        self.bind(otherwise);
        self.f().depth = depth;
        self.expression()?;
        self.bind(end);
        self.f().last_access = None;
        Ok(())
    }

    fn or_expr(&mut self) -> CResult<()> {
        self.and_expr()?;
        let mut done = JumpList::new();
        while self.check_kw(Keyword::Or) || self.check(&TokenKind::OrOr) {
            self.advance();
            self.skip_line_breaks();
            self.jump_to_list(Op::JumpIfTrueOrPop, &mut done);
            self.and_expr()?;
        }
        if !done.is_empty() {
            self.bind_list(done);
            self.f().last_access = None;
        }
        Ok(())
    }

    fn and_expr(&mut self) -> CResult<()> {
        self.not_expr()?;
        let mut done = JumpList::new();
        while self.check_kw(Keyword::And) || self.check(&TokenKind::AndAnd) {
            self.advance();
            self.skip_line_breaks();
            self.jump_to_list(Op::JumpIfFalseOrPop, &mut done);
            self.not_expr()?;
        }
        if !done.is_empty() {
            self.bind_list(done);
            self.f().last_access = None;
        }
        Ok(())
    }

    fn not_expr(&mut self) -> CResult<()> {
        if self.eat_kw(Keyword::Not) {
            self.nested("expression", Self::not_expr)?;
            self.emit(Op::Not, 0);
            return Ok(());
        }
        self.comparison()
    }

    fn comparison(&mut self) -> CResult<()> {
        self.range_expr()?;
        loop {
            let kind = self.peek().clone();
            let not_in = kind == TokenKind::Kw(Keyword::Not)
                && matches!(self.peek_at(1), TokenKind::Kw(Keyword::In));
            let syms = &self.rt.syms;
            let (sym, negate, swap) = match kind {
                TokenKind::EqEq => (syms.eq, false, false),
                TokenKind::NotEq => (syms.eq, true, false),
                TokenKind::Lt => (syms.lt, false, false),
                TokenKind::Le => (syms.le, false, false),
                TokenKind::Gt => (syms.gt, false, false),
                TokenKind::Ge => (syms.ge, false, false),
                TokenKind::Kw(Keyword::In) => (syms.contains, false, true),
                _ if not_in => (syms.contains, true, true),
                _ => return Ok(()),
            };
            if not_in {
                self.advance();
            }
            self.advance();
            self.skip_line_breaks();
            self.range_expr()?;
            if swap {
                self.emit(Op::Swap, 0);
            }
            self.call_method(sym, 1);
            if negate {
                self.emit(Op::Not, 0);
            }
        }
    }

    fn range_expr(&mut self) -> CResult<()> {
        self.binary(Level::Shift)?;
        if self.eat(&TokenKind::DotDot) {
            self.skip_line_breaks();
            self.binary(Level::Shift)?;
            let range = self.rt.syms.range;
            self.call_method(range, 1);
        }
        Ok(())
    }

    fn operator_at(&mut self, level: Level) -> Option<Symbol> {
        let syms = &self.rt.syms;
        let sym = match (level, self.tokens.peek_kind(0)) {
            (Level::Shift, TokenKind::Shl) => syms.shl,
            (Level::Shift, TokenKind::Shr) => syms.shr,
            (Level::BitOr, TokenKind::Pipe) => syms.bit_or,
            (Level::BitXor, TokenKind::Caret) => syms.bit_xor,
            (Level::BitAnd, TokenKind::Amp) => syms.bit_and,
            (Level::Additive, TokenKind::Plus) => syms.add,
            (Level::Additive, TokenKind::Minus) => syms.sub,
            (Level::Multiplicative, TokenKind::Star) => syms.mul,
            (Level::Multiplicative, TokenKind::Slash) => syms.div,
            (Level::Multiplicative, TokenKind::Percent) => syms.rem,
            _ => return None,
        };
        Some(sym)
    }

    fn operand(&mut self, level: Level) -> CResult<()> {
        match level.next() {
            Some(next) => self.binary(next),
            None => self.unary(),
        }
    }

    fn binary(&mut self, level: Level) -> CResult<()> {
        self.operand(level)?;
        while let Some(sym) = self.operator_at(level) {
            self.advance();
            self.skip_line_breaks();
            self.operand(level)?;
            self.call_method(sym, 1);
        }
        Ok(())
    }

    fn unary(&mut self) -> CResult<()> {
        match self.peek() {
            TokenKind::Minus => {
                self.advance();
                if self.negative_literal()? {
                    return Ok(());
                }
                self.nested("expression", Self::unary)?;
                let neg = self.rt.syms.neg;
                self.call_method(neg, 0);
            }
            TokenKind::Tilde => {
                self.advance();
                self.nested("expression", Self::unary)?;
                let invert = self.rt.syms.invert;
                self.call_method(invert, 0);
            }
            TokenKind::Bang => {
                self.advance();
                self.nested("expression", Self::unary)?;
                self.emit(Op::Not, 0);
            }
            _ => self.postfix()?,
        }
        Ok(())
    }

    /// `-` directly before a number literal folds into the literal, unless
    /// the literal is the receiver of a call or index (`-7.abs()`).
    fn negative_literal(&mut self) -> CResult<bool> {
        let is_number = matches!(
            self.peek(),
            TokenKind::Int(_) | TokenKind::Float(_) | TokenKind::BigInt { .. } | TokenKind::Rational { .. }
        );
        if !is_number
            || matches!(self.peek_at(1), TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen)
        {
            return Ok(false);
        }
        match self.advance().kind {
            TokenKind::Int(n) => self.push_int(-n),
            TokenKind::Float(x) => self.push_const(Value::Float(-x)),
            TokenKind::BigInt { digits, radix } => {
                let n = self.big_literal(&digits, radix)?;
                self.push_big(-n);
            }
            TokenKind::Rational { digits, radix } => {
                let n = self.big_literal(&digits, radix)?;
                self.push_rational(-n);
            }
            _ => unreachable!("checked above"),
        }
        Ok(true)
    }

    fn postfix(&mut self) -> CResult<()> {
        self.primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let name = match self.peek().clone() {
                        TokenKind::Name(n) | TokenKind::TypeName(n) | TokenKind::ConstName(n) => n,
                        _ => return Err(self.unexpected("member name")),
                    };
                    self.advance();
                    let sym = self.rt.intern(&name);
                    if self.check(&TokenKind::LParen) {
                        let argc = self.arguments()?;
                        self.call_method(sym, argc);
                        self.f().last_access = None;
                    } else {
                        let (start, depth) = (self.offset(), self.f_ref().depth);
                        self.emit_a(Op::GetAttr, 0, sym.0);
                        self.record_access(Access::Attr(sym), name, start, depth);
                    }
                }
                TokenKind::LParen => {
                    let argc = self.arguments()?;
                    self.emit(Op::Call, argc);
                    self.f().last_access = None;
                }
                TokenKind::LBracket => {
                    self.advance();
                    self.expression()?;
                    self.expect(TokenKind::RBracket)?;
                    let (start, depth) = (self.offset(), self.f_ref().depth);
                    let getitem = self.rt.syms.getitem;
                    self.call_method(getitem, 1);
                    self.record_access(Access::Index, String::new(), start, depth);
                }
                _ => return Ok(()),
            }
        }
    }

    /// `( expr, ... )`, returning the argument count.
    pub(super) fn arguments(&mut self) -> CResult<u16> {
        self.expect(TokenKind::LParen)?;
        let mut argc: u16 = 0;
        while !self.check(&TokenKind::RParen) {
            self.expression()?;
            argc = argc
                .checked_add(1)
                .ok_or_else(|| self.syntax("too many arguments"))?;
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(argc)
    }

    fn primary(&mut self) -> CResult<()> {
        let token = self.tokens.peek(0).clone();
        match token.kind {
            TokenKind::Int(n) => {
                self.advance();
                self.push_int(n);
            }
            TokenKind::Float(x) => {
                self.advance();
                self.push_const(Value::Float(x));
            }
            TokenKind::BigInt { digits, radix } => {
                self.advance();
                let n = self.big_literal(&digits, radix)?;
                self.push_big(n);
            }
            TokenKind::Rational { digits, radix } => {
                self.advance();
                let n = self.big_literal(&digits, radix)?;
                self.push_rational(n);
            }
            TokenKind::Str(s) => {
                self.advance();
                self.push_string(&s);
            }
            TokenKind::StrStart(s) => {
                self.advance();
                self.interpolation(s)?;
            }
            TokenKind::Bytes(bytes) => {
                self.advance();
                let obj = self.rt.heap.alloc_permanent(builtins::BYTES, Vec::new(), Payload::Bytes(bytes));
                self.push_const(Value::Object(obj));
            }
            TokenKind::Regex(pattern) => {
                self.advance();
                let re = strings::compile_regex(&pattern)
                    .map_err(|err| self.syntax(format!("invalid regex: {err}")))?;
                let obj = self.rt.heap.alloc_permanent(builtins::REGEX, Vec::new(), Payload::Regex(re));
                self.push_const(Value::Object(obj));
            }
            TokenKind::Kw(Keyword::Nil) => {
                self.advance();
                self.emit(Op::PushNil, 0);
            }
            TokenKind::Kw(Keyword::True) => {
                self.advance();
                self.emit(Op::PushTrue, 0);
            }
            TokenKind::Kw(Keyword::False) => {
                self.advance();
                self.emit(Op::PushFalse, 0);
            }
            TokenKind::Kw(Keyword::This) => {
                self.advance();
                let top = self.funcs.len() - 1;
                if self.resolve_var(top, "this").is_none() {
                    return Err(self.syntax("'this' used outside a method"));
                }
                self.load_var("this")?;
            }
            TokenKind::Kw(Keyword::Super) => {
                self.advance();
                self.super_call()?;
            }
            TokenKind::Kw(Keyword::Fn) => {
                self.advance();
                let line = self.line;
                self.closure("<fn>", line)?;
            }
            TokenKind::Name(name) | TokenKind::TypeName(name) | TokenKind::ConstName(name) => {
                self.advance();
                self.load_var(&name)?;
            }
            TokenKind::LParen => {
                self.advance();
                self.expression()?;
                self.expect(TokenKind::RParen)?;
            }
            TokenKind::LBracket => {
                self.advance();
                let mut count: u16 = 0;
                while !self.check(&TokenKind::RBracket) {
                    self.expression()?;
                    count = count
                        .checked_add(1)
                        .ok_or_else(|| self.syntax("list literal too long"))?;
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                self.emit(Op::BuildList, count);
            }
            _ => return Err(self.unexpected("expression")),
        }
        Ok(())
    }

    fn interpolation(&mut self, head: String) -> CResult<()> {
        let mut parts: u16 = 0;
        if !head.is_empty() {
            self.push_string(&head);
            parts += 1;
        }
        loop {
            self.expression()?;
            parts += 1;
            let (text, last) = match self.peek().clone() {
                TokenKind::StrMid(s) => (s, false),
                TokenKind::StrEnd(s) => (s, true),
                _ => return Err(self.unexpected("end of interpolation")),
            };
            self.advance();
            if !text.is_empty() {
                self.push_string(&text);
                parts += 1;
            }
            if last {
                break;
            }
        }
        self.emit(Op::BuildString, parts);
        Ok(())
    }

    fn super_call(&mut self) -> CResult<()> {
        let f = self.f_ref();
        let class = match (f.kind, f.class) {
            (FuncKind::Method | FuncKind::Ctor, Some(class)) => class,
            _ => return Err(self.syntax("'super' used outside a method")),
        };
        self.expect(TokenKind::Dot)?;
        let name = self.expect_name("method name")?;
        let sym = self.rt.intern(&name);
        self.emit(Op::LoadLocal, 0);
        let argc = self.arguments()?;
        self.emit_ab(Op::CallSuper, argc, sym.0, class.0);
        Ok(())
    }

    // ── names ──────────────────────────────────────────────────────

    pub(super) fn record_access(&mut self, access: Access, name: String, start: usize, depth_before: i32) {
        let end = self.offset();
        self.f().last_access = Some(LastAccess { access, name, start, end, depth_before });
    }

    /// Binding of `sym` visible from this module: its own table, then the
    /// builtins.
    pub(super) fn lookup_binding(&self, sym: Symbol) -> Option<(Binding, ModuleId)> {
        self.rt.modules[self.module.index()]
            .lookup(sym)
            .map(|b| (b, self.module))
            .or_else(|| self.rt.modules[BUILTINS.index()].lookup(sym).map(|b| (b, BUILTINS)))
    }

    /// Push the value of a variable or module-level name.
    pub(super) fn load_var(&mut self, name: &str) -> CResult<()> {
        let start = self.offset();
        let depth = self.f_ref().depth;
        let top = self.funcs.len() - 1;
        let access = match self.resolve_var(top, name) {
            Some(VarRef::Local { slot, mutable }) => {
                self.load_local(slot);
                Access::Local { slot, mutable }
            }
            Some(VarRef::Capture(idx)) => {
                self.load_capture(idx);
                Access::Capture
            }
            None => {
                let sym = self.rt.intern(name);
                match self.lookup_binding(sym) {
                    Some((binding, owner)) => {
                        self.load_binding(binding, owner);
                        match binding {
                            Binding::Global { .. } => Access::Global { binding },
                            other => Access::Fixed(other),
                        }
                    }
                    None => {
                        let pos = self.emit_ab(Op::LoadName, NameKind::Unresolved as u16, sym.0, 0);
                        self.pending(pos, sym, PatchKind::Load, None);
                        Access::Unresolved(sym)
                    }
                }
            }
        };
        self.record_access(access, name.to_string(), start, depth);
        Ok(())
    }

    // ── literals ───────────────────────────────────────────────────

    fn push_int(&mut self, n: i64) {
        match i16::try_from(n) {
            Ok(small) => {
                self.emit(Op::PushInt, small as u16);
            }
            Err(_) => self.push_const(Value::Int(n)),
        }
    }

    pub(super) fn push_const(&mut self, v: Value) {
        let idx = self.f().add_constant(v);
        self.emit_a(Op::PushConst, 0, idx);
    }

    pub(super) fn push_string(&mut self, s: &str) {
        let idx = match self.f().string_constant(s) {
            Some(idx) => idx,
            None => {
                let v = self.rt.permanent_string(s);
                let f = self.f();
                let idx = f.add_constant(v);
                f.remember_string(s, idx);
                idx
            }
        };
        self.emit_a(Op::PushConst, 0, idx);
    }

    fn big_literal(&self, digits: &str, radix: u32) -> CResult<BigInt> {
        numbers::parse_digits(digits, radix).ok_or_else(|| self.syntax("invalid integer literal"))
    }

    fn push_big(&mut self, n: BigInt) {
        match n.to_i64() {
            Some(small) => self.push_int(small),
            None => {
                let obj = self.rt.heap.alloc_permanent(builtins::BIG_INT, Vec::new(), Payload::BigInt(n));
                self.push_const(Value::Object(obj));
            }
        }
    }

    fn push_rational(&mut self, n: BigInt) {
        let r = BigRational::from_integer(n);
        let obj = self.rt.heap.alloc_permanent(builtins::RATIONAL, Vec::new(), Payload::Rational(r));
        self.push_const(Value::Object(obj));
    }

    // ── closures ───────────────────────────────────────────────────

    /// `(params) => expr` or `(params) { ... }` after `fn`, or the
    /// signature and body of a nested `def`. Leaves the function value on
    /// the stack of the enclosing function.
    pub(super) fn closure(&mut self, name: &str, line: u32) -> CResult<()> {
        let class = self.f_ref().class;
        self.funcs.push(FuncState::new(name, FuncKind::Closure, class, line));
        self.parameters()?;
        if self.eat(&TokenKind::FatArrow) {
            self.skip_line_breaks();
            self.expression()?;
            self.emit(Op::Return, 1);
        } else {
            if self.eat(&TokenKind::Arrow) {
                let ty = self.type_ref()?;
                self.f().return_type = Some(ty);
            }
            self.block_body()?;
            self.emit(Op::Return, 0);
        }
        let state = self.pop_func();
        let sources: Vec<CaptureSource> = state.captures.iter().map(|c| c.source).collect();
        let id = self.finish_function(state, None);
        if sources.is_empty() {
            self.emit_ab(Op::LoadName, NameKind::Function as u16, id.0, 0);
        } else {
            for source in &sources {
                match *source {
                    CaptureSource::Slot(slot) => {
                        self.load_local(slot);
                    }
                    CaptureSource::Capture(idx) => self.load_capture(idx),
                }
            }
            self.emit_a(Op::MakeClosure, sources.len() as u16, id.0);
        }
        self.f().last_access = None;
        Ok(())
    }

    // ── assignment ─────────────────────────────────────────────────

    pub(super) fn at_assignment(&mut self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Assign
                | TokenKind::PlusAssign
                | TokenKind::MinusAssign
                | TokenKind::StarAssign
                | TokenKind::SlashAssign
        )
    }

    /// The expression just compiled (starting at `stmt_start`) turns out to
    /// be the target of `=` or a compound assignment.
    pub(super) fn assignment_tail(&mut self, stmt_start: usize) -> CResult<()> {
        let op = self.advance().kind;
        let offset = self.offset();
        let target = self
            .f_ref()
            .last_access
            .clone()
            .filter(|a| a.end == offset && a.start >= stmt_start)
            .ok_or_else(|| self.syntax("invalid assignment target"))?;
        self.skip_line_breaks();
        let syms = &self.rt.syms;
        let compound = match op {
            TokenKind::PlusAssign => Some(syms.add),
            TokenKind::MinusAssign => Some(syms.sub),
            TokenKind::StarAssign => Some(syms.mul),
            TokenKind::SlashAssign => Some(syms.div),
            _ => None,
        };
        let name = target.name.as_str();
        // Plain assignment drops the load of the old value.
        let rewind = compound.is_none();

        match target.access {
            Access::Local { slot, mutable } => {
                if !mutable {
                    return Err(self.error(
                        ErrorKind::Define,
                        format!("cannot assign to immutable variable '{name}'"),
                    ));
                }
                if rewind {
                    self.f().truncate(target.start, target.depth_before);
                }
                self.assigned_value(compound)?;
                self.store_local(slot);
            }
            Access::Capture => {
                return Err(self.error(
                    ErrorKind::Define,
                    format!("cannot assign to captured variable '{name}'"),
                ));
            }
            Access::Global { binding } | Access::Fixed(binding) => {
                if !matches!(binding, Binding::Global { mutable: true, .. }) {
                    return Err(self.error(
                        ErrorKind::Define,
                        format!("cannot assign to {} '{name}'", binding.kind_name()),
                    ));
                }
                if rewind {
                    self.f().truncate(target.start, target.depth_before);
                }
                self.assigned_value(compound)?;
                let (kind, a, b) = binding.operands(self.module);
                self.emit_ab(Op::StoreName, kind as u16, a, b);
            }
            Access::Unresolved(sym) => {
                if rewind {
                    self.f().truncate(target.start, target.depth_before);
                }
                self.assigned_value(compound)?;
                let pos = self.emit_ab(Op::StoreName, NameKind::Unresolved as u16, sym.0, 0);
                self.pending(pos, sym, PatchKind::Store, None);
            }
            Access::Attr(sym) => {
                self.f().truncate(target.start, target.depth_before);
                if compound.is_some() {
                    self.emit(Op::Dup, 0);
                    self.emit_a(Op::GetAttr, 0, sym.0);
                }
                self.assigned_value(compound)?;
                self.emit_a(Op::SetAttr, 0, sym.0);
            }
            Access::Index => {
                self.f().truncate(target.start, target.depth_before);
                if compound.is_some() {
                    self.emit(Op::Dup2, 0);
                    let getitem = self.rt.syms.getitem;
                    self.call_method(getitem, 1);
                }
                self.assigned_value(compound)?;
                let setitem = self.rt.syms.setitem;
                self.call_method(setitem, 2);
                self.emit(Op::Pop, 0);
            }
        }
        self.f().last_access = None;
        Ok(())
    }

    /// Right-hand side of an assignment; for compound forms the current
    /// value is already on the stack.
    fn assigned_value(&mut self, compound: Option<Symbol>) -> CResult<()> {
        self.expression()?;
        if let Some(op) = compound {
            self.call_method(op, 1);
        }
        Ok(())
    }
}
