//! Statements, control flow, imports and directives.

use std::mem;

use fox_bytecode::{CHECK_TOP, JumpList, Op};
use fox_object::ModuleId;
use fox_parser::{Keyword, TokenKind};
use log::debug;

use super::scope::{FuncKind, FuncState, Local, LoopCtx};
use super::{CResult, Compiler};
use crate::builtins::extensions;
use crate::descriptor::{Binding, ConstDesc, ConstId, ConstState, FuncFlags};
use crate::error::ErrorKind;
use crate::module;

impl Compiler<'_> {
    pub(super) fn statement(&mut self) -> CResult<()> {
        self.nested("block", Self::simple_or_compound)
    }

    fn simple_or_compound(&mut self) -> CResult<()> {
        if let TokenKind::Directive(text) = self.peek().clone() {
            self.advance();
            return self.directive(&text);
        }
        self.prologue = false;
        let keyword = match self.peek() {
            TokenKind::Kw(k) => Some(*k),
            _ => None,
        };
        match keyword {
            Some(Keyword::Let) => {
                self.advance();
                self.binding_statement(false)
            }
            Some(Keyword::Var) => {
                self.advance();
                self.binding_statement(true)
            }
            Some(Keyword::Def) => {
                self.advance();
                self.def_statement()
            }
            Some(Keyword::Class) => {
                self.advance();
                self.class_statement()
            }
            Some(Keyword::If) => {
                self.advance();
                self.if_statement()
            }
            Some(Keyword::While) => {
                self.advance();
                self.while_statement()
            }
            Some(Keyword::For) => {
                self.advance();
                self.for_statement()
            }
            Some(Keyword::Switch) => {
                self.advance();
                self.switch_statement()
            }
            Some(Keyword::Try) => {
                self.advance();
                self.try_statement()
            }
            Some(Keyword::Return) => {
                self.advance();
                self.return_statement()
            }
            Some(Keyword::Throw) => {
                self.advance();
                self.expression()?;
                self.emit(Op::Throw, 0);
                self.end_statement()
            }
            Some(Keyword::Yield) => {
                self.advance();
                self.yield_statement()
            }
            Some(Keyword::Break) => {
                self.advance();
                self.break_statement()
            }
            Some(Keyword::Continue) => {
                self.advance();
                self.continue_statement()
            }
            Some(Keyword::Import) => {
                self.advance();
                self.import_statement()
            }
            _ if self.check(&TokenKind::LBrace) => self.block(),
            _ => self.expression_statement(),
        }
    }

    /// A line break or `;`; a closing `}` or the end of input also ends a
    /// statement but is left for the caller.
    pub(super) fn end_statement(&mut self) -> CResult<()> {
        match self.peek() {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    pub(super) fn block(&mut self) -> CResult<()> {
        self.begin_scope();
        self.block_body()?;
        self.end_scope();
        Ok(())
    }

    fn expression_statement(&mut self) -> CResult<()> {
        let start = self.offset();
        self.expression()?;
        if self.at_assignment() {
            self.assignment_tail(start)?;
        } else {
            self.emit(Op::Pop, 0);
        }
        self.end_statement()
    }

    fn at_module_level(&self) -> bool {
        self.funcs.len() == 1 && self.f_ref().in_module_scope()
    }

    // ── bindings ───────────────────────────────────────────────────

    fn binding_statement(&mut self, mutable: bool) -> CResult<()> {
        let name = match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                name
            }
            TokenKind::ConstName(name) => {
                self.advance();
                if mutable {
                    return Err(self.syntax(format!("constant {name} must be declared with let")));
                }
                if !self.at_module_level() {
                    return Err(self.syntax("constants must be defined at module level"));
                }
                return self.constant_decl(&name);
            }
            TokenKind::TypeName(name) => {
                return Err(self.syntax(format!(
                    "'{name}' looks like a type; variables start with a lowercase letter"
                )));
            }
            _ => return Err(self.unexpected("variable name")),
        };
        let ty = if self.eat(&TokenKind::Colon) { Some(self.type_ref()?) } else { None };
        if self.eat(&TokenKind::Assign) {
            self.skip_line_breaks();
            self.expression()?;
        } else if mutable {
            self.emit(Op::PushNil, 0);
        } else {
            return Err(self.unexpected("`=`"));
        }
        if let Some(ty) = ty {
            self.emit_type_check(CHECK_TOP, &ty)?;
        }

        if self.at_module_level() {
            let sym = self.rt.intern(&name);
            let m = &mut self.rt.modules[self.module.index()];
            if m.table.contains_key(&sym) {
                return Err(self.error(ErrorKind::Define, format!("'{name}' is already defined")));
            }
            let binding = m.add_global(mutable);
            m.table.insert(sym, binding);
            let (kind, a, b) = binding.operands(self.module);
            self.emit_ab(Op::StoreName, kind as u16, a, b);
        } else {
            self.declare_local(&name, mutable)?;
        }
        self.end_statement()
    }

    /// `let NAME = expr` at module level: the initializer becomes its own
    /// function, run on first use.
    fn constant_decl(&mut self, name: &str) -> CResult<()> {
        let line = self.line;
        let func = self.reserve_function(name, line);
        let id = ConstId(self.rt.constants.len() as u32);
        self.define(name, Binding::Constant(id))?;
        self.rt.constants.push(ConstDesc {
            name: name.to_string(),
            module: self.module,
            state: ConstState::Pending(func),
        });
        self.expect(TokenKind::Assign)?;
        self.skip_line_breaks();

        self.funcs.push(FuncState::new(name, FuncKind::Constant, None, line));
        self.expression()?;
        self.emit(Op::Return, 1);
        let state = self.pop_func();
        self.finish_function(state, Some(func));
        debug!("constant {name} deferred to function {}", func.0);
        self.end_statement()
    }

    // ── control flow ───────────────────────────────────────────────

    fn if_statement(&mut self) -> CResult<()> {
        let mut ends = JumpList::new();
        self.expression()?;
        let mut next = self.jump(Op::JumpIfFalse);
        self.block()?;
        loop {
            if !self.continues_with(&[Keyword::Elif, Keyword::Else]) {
                self.bind(next);
                break;
            }
            self.jump_to_list(Op::Jump, &mut ends);
            self.bind(next);
            if self.eat_kw(Keyword::Elif) || (self.eat_kw(Keyword::Else) && self.eat_kw(Keyword::If)) {
                self.expression()?;
                next = self.jump(Op::JumpIfFalse);
                self.block()?;
            } else {
                self.block()?;
                break;
            }
        }
        self.bind_list(ends);
        Ok(())
    }

    fn while_statement(&mut self) -> CResult<()> {
        let top = self.offset();
        self.expression()?;
        let exit = self.jump(Op::JumpIfFalse);
        let base_depth = self.f_ref().depth;
        self.f().loops.push(LoopCtx { base_depth, continue_target: top, breaks: JumpList::new() });
        let body = self.block();
        let ctx = self.f().loops.pop();
        body?;
        self.jump_back(Op::Jump, top);
        self.bind(exit);
        if let Some(ctx) = ctx {
            self.bind_list(ctx.breaks);
        }
        Ok(())
    }

    fn for_statement(&mut self) -> CResult<()> {
        let name = self.expect_name("loop variable")?;
        self.expect_kw(Keyword::In)?;
        self.expression()?;
        self.emit(Op::GetIter, 0);
        // The iterator stays on the stack under the loop variable.
        let base_depth = self.f_ref().depth;
        let top = self.offset();
        let exit = self.jump(Op::ForNext);
        self.begin_scope();
        // The loop variable belongs to the body scope.
        if let Some(scope) = self.f().scopes.last_mut() {
            scope.depth = base_depth;
        }
        self.declare_local(&name, true)?;
        self.f().loops.push(LoopCtx { base_depth, continue_target: top, breaks: JumpList::new() });
        let body = self.block();
        let ctx = self.f().loops.pop();
        body?;
        self.end_scope();
        self.jump_back(Op::Jump, top);
        self.bind(exit);
        self.f().depth = base_depth;
        if let Some(ctx) = ctx {
            self.bind_list(ctx.breaks);
        }
        self.emit(Op::Pop, 0);
        Ok(())
    }

    fn switch_statement(&mut self) -> CResult<()> {
        self.expression()?;
        self.expect(TokenKind::LBrace)?;
        self.tokens.push_newlines(true);
        let mut ends = JumpList::new();
        let mut seen_default = false;
        loop {
            self.tokens.skip_newlines();
            if self.check(&TokenKind::RBrace) {
                break;
            }
            if self.eat_kw(Keyword::Case) {
                if seen_default {
                    return Err(self.syntax("case after default"));
                }
                let mut hits = JumpList::new();
                loop {
                    self.emit(Op::Dup, 0);
                    self.expression()?;
                    let eq = self.rt.syms.eq;
                    self.call_method(eq, 1);
                    self.jump_to_list(Op::JumpIfTrue, &mut hits);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                let miss = self.jump(Op::Jump);
                self.bind_list(hits);
                self.block()?;
                self.jump_to_list(Op::Jump, &mut ends);
                self.bind(miss);
            } else if self.eat_kw(Keyword::Default) {
                if seen_default {
                    return Err(self.syntax("duplicate default in switch"));
                }
                seen_default = true;
                self.block()?;
            } else {
                return Err(self.unexpected("`case` or `default`"));
            }
        }
        self.tokens.pop_newlines();
        self.advance();
        self.bind_list(ends);
        self.emit(Op::Pop, 0);
        Ok(())
    }

    fn try_statement(&mut self) -> CResult<()> {
        let before = self.f_ref().depth;
        let handler = self.jump(Op::PushHandler);
        self.block()?;
        self.emit(Op::PopHandler, 0);
        let mut ends = JumpList::new();
        self.jump_to_list(Op::Jump, &mut ends);

        // The handler starts with the error where the marker was.
        self.bind(handler);
        self.f().depth = before + 1;
        let mut clauses = 0;
        let mut catch_all = false;
        while self.continues_with(&[Keyword::Catch]) {
            self.advance();
            if catch_all {
                return Err(self.syntax("a catch-all clause must be the last one"));
            }
            clauses += 1;
            let miss = if self.check(&TokenKind::LBrace) {
                catch_all = true;
                None
            } else {
                let ty = self.type_ref()?;
                Some(self.emit_catch_test(&ty)?)
            };
            self.begin_scope();
            if self.eat_kw(Keyword::As) {
                let name = self.expect_name("error variable")?;
                self.f().locals.push(Local { name, slot: before as u16, mutable: false });
            }
            self.block()?;
            self.end_scope();
            self.emit(Op::Pop, 0);
            self.jump_to_list(Op::Jump, &mut ends);
            if let Some(miss) = miss {
                self.bind(miss);
            }
            self.f().depth = before + 1;
        }
        if clauses == 0 {
            return Err(self.unexpected("`catch`"));
        }
        if !catch_all {
            self.emit(Op::Rethrow, 0);
        }
        self.bind_list(ends);
        self.f().depth = before;
        Ok(())
    }

    fn return_statement(&mut self) -> CResult<()> {
        let at_end = matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        );
        if self.f_ref().kind == FuncKind::Ctor && !at_end {
            return Err(self.syntax("a constructor cannot return a value"));
        }
        if at_end {
            self.emit(Op::Return, 0);
        } else {
            self.expression()?;
            if let Some(ty) = self.f().return_type.take() {
                let checked = self.emit_type_check(CHECK_TOP, &ty);
                self.f().return_type = Some(ty);
                checked?;
            }
            self.emit(Op::Return, 1);
        }
        self.end_statement()
    }

    fn yield_statement(&mut self) -> CResult<()> {
        match self.f_ref().kind {
            FuncKind::Module | FuncKind::Constant => {
                return Err(self.syntax("'yield' outside a function"));
            }
            FuncKind::Ctor => return Err(self.syntax("a constructor cannot yield")),
            _ => {}
        }
        self.f().flags |= FuncFlags::GENERATOR;
        self.expression()?;
        self.emit(Op::Yield, 0);
        self.end_statement()
    }

    fn break_statement(&mut self) -> CResult<()> {
        let Some(base) = self.f_ref().loops.last().map(|l| l.base_depth) else {
            return Err(self.syntax("'break' outside a loop"));
        };
        self.pop_to(base);
        let mut breaks = match self.f().loops.last_mut() {
            Some(ctx) => mem::take(&mut ctx.breaks),
            None => JumpList::new(),
        };
        self.jump_to_list(Op::Jump, &mut breaks);
        if let Some(ctx) = self.f().loops.last_mut() {
            ctx.breaks = breaks;
        }
        self.end_statement()
    }

    fn continue_statement(&mut self) -> CResult<()> {
        let Some((base, target)) = self
            .f_ref()
            .loops
            .last()
            .map(|l| (l.base_depth, l.continue_target))
        else {
            return Err(self.syntax("'continue' outside a loop"));
        };
        self.pop_to(base);
        self.jump_back(Op::Jump, target);
        self.end_statement()
    }

    // ── modules ────────────────────────────────────────────────────

    fn import_statement(&mut self) -> CResult<()> {
        if !self.at_module_level() {
            return Err(self.syntax("imports are only allowed at module level"));
        }
        let line = self.line;
        let mut dotted = self.expect_name("module name")?;
        while self.eat(&TokenKind::Dot) {
            dotted.push('.');
            dotted.push_str(&self.expect_name("module name")?);
        }
        let alias = if self.eat(&TokenKind::Arrow) {
            match self.peek().clone() {
                TokenKind::Name(alias) | TokenKind::TypeName(alias) => {
                    self.advance();
                    alias
                }
                _ => return Err(self.unexpected("alias")),
            }
        } else {
            dotted.rsplit('.').next().unwrap_or(&dotted).to_string()
        };

        let m = module::import(self.rt, &dotted, Some(self.module), line)?;
        self.bind_module(&alias, m)?;
        self.emit_a(Op::InitModule, 0, m.0);
        self.end_statement()
    }

    /// Bind `alias` to a module; importing the same module twice is fine.
    fn bind_module(&mut self, alias: &str, m: ModuleId) -> CResult<()> {
        let sym = self.rt.intern(alias);
        match self.rt.modules[self.module.index()].lookup(sym) {
            Some(Binding::Module(existing)) if existing == m => Ok(()),
            Some(_) => Err(self.error(ErrorKind::Define, format!("'{alias}' is already defined"))),
            None => {
                self.rt.modules[self.module.index()].table.insert(sym, Binding::Module(m));
                Ok(())
            }
        }
    }

    fn directive(&mut self, text: &str) -> CResult<()> {
        if !self.prologue {
            return Err(self.syntax("directives must come before any statement"));
        }
        let (word, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let rest = rest.trim();
        match word {
            "env" => {
                let Some((name, value)) = rest.split_once('=') else {
                    return Err(self.syntax(format!("expected NAME=value after #@env, found '{rest}'")));
                };
                match name.strip_suffix('+') {
                    Some(name) => self.rt.loader.append_env(name.trim(), value.trim()),
                    None => self.rt.loader.set_env(name.trim(), value.trim()),
                }
            }
            "mode" => match rest {
                "trace" => self.rt.modules[self.module.index()].trace = true,
                other => return Err(self.syntax(format!("unknown mode '{other}'"))),
            },
            "native" => {
                let existing = self.rt.loader.loaded.get(rest).copied();
                let Some(m) = existing.or_else(|| extensions::load(self.rt, rest)) else {
                    return Err(self.error(
                        ErrorKind::Import,
                        format!("no native extension named '{rest}'"),
                    ));
                };
                self.rt.loader.loaded.insert(rest.to_string(), m);
                let alias = rest.rsplit('.').next().unwrap_or(rest).to_string();
                self.bind_module(&alias, m)?;
            }
            other => return Err(self.syntax(format!("unknown directive '{other}'"))),
        }
        self.end_statement()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::test_util::{run_failing, run_source};
    use crate::{ErrorKind, FoxError, Runtime, Value};

    #[test]
    fn if_elif_else_chain() {
        let out = run_source(
            "def grade(n) {\n  if n > 89 { return \"a\" }\n  elif n > 79 { return \"b\" }\n  else if n > 69 { return \"c\" }\n  else { return \"f\" }\n}\nprint(grade(95), grade(85), grade(75), grade(10))",
        );
        assert_eq!(out, "a b c f\n");
    }

    #[test]
    fn while_with_continue() {
        let out = run_source(
            "var i = 0\nvar odd = 0\nwhile i < 10 {\n  i += 1\n  if i % 2 == 0 { continue }\n  odd += i\n}\nprint(odd)",
        );
        assert_eq!(out, "25\n");
    }

    #[test]
    fn nested_loops_break_inner_only() {
        let out = run_source(
            "var hits = []\nfor a in 0..3 {\n  for b in 0..3 {\n    let s = a + b\n    if b == a { break }\n    hits.push(s)\n  }\n}\nprint(hits)",
        );
        assert_eq!(out, "[1, 2, 3]\n");
    }

    #[test]
    fn switch_cases_and_default() {
        let out = run_source(
            "def name(n) {\n  var r = \"many\"\n  switch n {\n    case 0 { r = \"none\" }\n    case 1, 2 { r = \"few\" }\n    default { r = \"lots\" }\n  }\n  return r\n}\nprint(name(0), name(2), name(9))",
        );
        assert_eq!(out, "none few lots\n");
    }

    #[test]
    fn unmatched_error_propagates() {
        let (err, out) = run_failing(
            "class A extends Error {}\nclass C extends Error {}\ntry {\n  throw A(\"out\")\n} catch C {\n  print(\"wrong\")\n}",
        );
        assert_eq!(err.class_name(), "A");
        assert_eq!(out, "");
    }

    #[test]
    fn handler_leaves_no_stack_behind() {
        let mut rt = Runtime::default();
        rt.capture_output();
        rt.run_source(
            "main",
            "def f(xs) {\n  let a = [1, 2]\n  try {\n    let b = [3]\n    return xs[10]\n  } catch IndexError {\n    return len(a)\n  }\n}\nfor i in 0..20 { f([]) }",
        )
        .expect("runs");
        assert_eq!(rt.stack_depth(), 0);
    }

    #[test]
    fn generator_statement_yields() {
        let out = run_source(
            "def count(n) {\n  var i = 0\n  while i < n {\n    yield i\n    i += 1\n  }\n}\nvar total = 0\nfor v in count(4) { total += v }\nprint(total)",
        );
        assert_eq!(out, "6\n");
    }

    #[test]
    fn lazy_constant_runs_once_on_first_use() {
        let out = run_source(
            "let LIMIT = compute()\ndef compute() {\n  print(\"computing\")\n  return 40 + 2\n}\nprint(\"start\")\nprint(LIMIT, LIMIT)",
        );
        assert_eq!(out, "start\ncomputing\n42 42\n");
    }

    #[test]
    fn native_directive_binds_module() {
        assert_eq!(run_source("#@native math\nprint(math.floor(2.5))"), "2\n");
    }

    #[test]
    fn env_directive_appends() {
        let mut rt = Runtime::default();
        rt.capture_output();
        rt.run_source("main", "#@env FOX_DIRECTIVE_TEST=a\n#@env FOX_DIRECTIVE_TEST+=b\nprint(1)")
            .expect("runs");
        let sep = if cfg!(windows) { ";" } else { ":" };
        assert_eq!(rt.loader.env_var("FOX_DIRECTIVE_TEST"), Some(format!("a{sep}b")));
    }

    #[test]
    fn import_binds_last_segment_once() {
        let mut rt = Runtime::default();
        rt.capture_output();
        let v = rt.run_source("main", "import math\nimport math\nreturn math.max(3, 9)");
        assert_eq!(v.expect("runs"), Value::Int(9));
        let clash = rt.run_source("clash", "var math = 1\nimport math");
        assert!(matches!(clash, Err(FoxError::Compile(ref d)) if d.kind == ErrorKind::Define));
        let m = rt.new_module("other", None);
        rt.load_source(m, "import math -> m\nvar best = m.max(3, 9)").expect("compiles");
        rt.init_module(m).expect("runs");
        assert_eq!(rt.global(m, "best"), Some(Value::Int(9)));
    }

    #[test]
    fn statements_need_separators() {
        let mut rt = Runtime::default();
        match rt.run_source("main", "var a = 1 var b = 2") {
            Err(FoxError::Compile(d)) => assert!(d.message.starts_with("expected end of statement")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(run_source("var a = 1; var b = 2; print(a + b)"), "3\n");
    }
}
