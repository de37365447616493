//! Single-pass compiler from `.fox` source to bytecode.
//!
//! There is no syntax tree: the compiler pulls tokens from a
//! [`TokenStream`] and emits straight into one [`BytecodeBuilder`] per
//! function. Names it cannot resolve yet (forward references, classes of
//! modules still compiling) become placeholder instructions plus a
//! [`PatchRecord`](crate::link::PatchRecord) for the link pass.
//!
//! [`BytecodeBuilder`]: fox_bytecode::BytecodeBuilder

mod decl;
mod expr;
mod scope;
mod stmt;

use fox_bytecode::{JumpList, Label, Op};
use fox_object::{FuncId, ModuleId, Symbol};
use fox_parser::{Keyword, LOOKAHEAD, Lexer, Token, TokenKind, TokenStream};
use log::debug;

use crate::descriptor::{Binding, ModuleState};
use crate::error::{Diagnostic, ErrorKind};
use crate::link::PatchKind;
use crate::Runtime;

use scope::{FuncKind, FuncState, Pending, stack_effect};

type CResult<T> = Result<T, Diagnostic>;

/// Deepest nesting of expressions and blocks the recursive descent accepts.
const MAX_NESTING: usize = 128;

/// Compile `source` as the body of `module`. The module's init function
/// is returned and recorded; it runs on first `InitModule`.
pub fn compile_module(rt: &mut Runtime, module: ModuleId, source: &str) -> Result<FuncId, Diagnostic> {
    let name = rt.modules[module.index()].name.clone();
    let init = Compiler::new(rt, module, source, false).compile_body(&name)?;
    let m = &mut rt.modules[module.index()];
    m.init = Some(init);
    m.state = ModuleState::Compiled;
    Ok(init)
}

/// Compile an interactive fragment into the scope of `module`. Its
/// definitions land in the module; a trailing expression is returned.
pub fn compile_fragment(rt: &mut Runtime, module: ModuleId, source: &str) -> Result<FuncId, Diagnostic> {
    let saved = rt.modules[module.index()].table.clone();
    let func = Compiler::new(rt, module, source, true)
        .compile_body("<fragment>")
        .inspect_err(|_| rt.modules[module.index()].table = saved)?;
    rt.modules[module.index()].state = ModuleState::Initialized;
    Ok(func)
}

pub(crate) struct Compiler<'a> {
    rt: &'a mut Runtime,
    module: ModuleId,
    tokens: TokenStream<&'a [u8]>,
    /// Functions being compiled, innermost last.
    funcs: Vec<FuncState>,
    /// Line of the last consumed token.
    line: u32,
    /// Nothing but directives seen so far.
    prologue: bool,
    fragment: bool,
    /// Open expressions and statements, bounded by [`MAX_NESTING`].
    nesting: usize,
}

impl<'a> Compiler<'a> {
    fn new(rt: &'a mut Runtime, module: ModuleId, source: &'a str, fragment: bool) -> Self {
        Self {
            rt,
            module,
            tokens: TokenStream::new(Lexer::from_str(source)),
            funcs: Vec::new(),
            line: 1,
            prologue: true,
            fragment,
            nesting: 0,
        }
    }

    fn compile_body(mut self, name: &str) -> CResult<FuncId> {
        self.funcs.push(FuncState::new(name, FuncKind::Module, None, 1));
        loop {
            self.tokens.skip_newlines();
            if self.check(&TokenKind::Eof) {
                break;
            }
            if self.fragment && self.trailing_expression()? {
                break;
            }
            self.statement()?;
        }
        self.emit(Op::Return, 0);
        let state = self.pop_func();
        let (code_len, patches) = (state.builder.current_offset(), state.pending.len());
        let id = self.finish_function(state, None);
        debug!(
            "compiled {} ({}): {code_len} bytes of init code, {} functions, {patches} pending names",
            name,
            self.module_name(),
            self.rt.functions.len()
        );
        Ok(id)
    }

    /// In a fragment, an expression statement that ends the input is the
    /// fragment's result.
    fn trailing_expression(&mut self) -> CResult<bool> {
        if !self.starts_expression() {
            return Ok(false);
        }
        self.prologue = false;
        let start = self.offset();
        self.expression()?;
        if self.at_assignment() {
            self.assignment_tail(start)?;
            self.end_statement()?;
            return Ok(false);
        }
        let mut i = 0;
        while i + 1 < LOOKAHEAD
            && matches!(self.tokens.peek_kind(i), TokenKind::Newline | TokenKind::Semicolon)
        {
            i += 1;
        }
        if matches!(self.tokens.peek_kind(i), TokenKind::Eof) {
            self.emit(Op::Return, 1);
            self.tokens.skip_newlines();
            return Ok(true);
        }
        self.emit(Op::Pop, 0);
        self.end_statement()?;
        Ok(false)
    }

    // ── functions ──────────────────────────────────────────────────

    fn f(&mut self) -> &mut FuncState {
        let top = self.funcs.len() - 1;
        &mut self.funcs[top]
    }

    fn f_ref(&self) -> &FuncState {
        &self.funcs[self.funcs.len() - 1]
    }

    fn pop_func(&mut self) -> FuncState {
        match self.funcs.pop() {
            Some(state) => state,
            None => unreachable!("function stack underflow"),
        }
    }

    fn module_name(&self) -> String {
        self.rt.modules[self.module.index()].name.clone()
    }

    // ── tokens ─────────────────────────────────────────────────────

    fn peek(&mut self) -> &TokenKind {
        self.tokens.peek_kind(0)
    }

    fn peek_at(&mut self, n: usize) -> &TokenKind {
        self.tokens.peek_kind(n)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens.next_token();
        self.line = token.line();
        token
    }

    fn check(&mut self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn check_kw(&mut self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Kw(k) if *k == kw)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        let found = self.check(kind);
        if found {
            self.advance();
        }
        found
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        let found = self.check_kw(kw);
        if found {
            self.advance();
        }
        found
    }

    fn expect(&mut self, kind: TokenKind) -> CResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kind.name()))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> CResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(kw.as_str()))
        }
    }

    fn expect_name(&mut self, what: &str) -> CResult<String> {
        match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_type_name(&mut self, what: &str) -> CResult<String> {
        match self.peek().clone() {
            TokenKind::TypeName(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn skip_line_breaks(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    /// Whether one of `keywords` follows, possibly after line breaks. The
    /// breaks are consumed when it does.
    fn continues_with(&mut self, keywords: &[Keyword]) -> bool {
        let mut i = 0;
        while i + 1 < LOOKAHEAD && matches!(self.peek_at(i), TokenKind::Newline) {
            i += 1;
        }
        let found = matches!(self.peek_at(i), TokenKind::Kw(k) if keywords.contains(k));
        if found {
            self.skip_line_breaks();
        }
        found
    }

    // ── diagnostics ────────────────────────────────────────────────

    fn unexpected(&mut self, expected: &str) -> Diagnostic {
        let token = self.tokens.peek(0).clone();
        let message = match &token.kind {
            TokenKind::Error(msg) => msg.clone(),
            TokenKind::Unterminated(what) => format!("unterminated {what}"),
            other => format!("expected {expected}, found {}", other.name()),
        };
        Diagnostic::new(ErrorKind::Syntax, message, self.module_name(), token.line())
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(kind, message, self.module_name(), self.line)
    }

    fn syntax(&self, message: impl Into<String>) -> Diagnostic {
        self.error(ErrorKind::Syntax, message)
    }

    /// Run one level of recursive descent.
    fn nested<T>(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut Self) -> CResult<T>,
    ) -> CResult<T> {
        if self.nesting >= MAX_NESTING {
            return Err(self.syntax(format!("{what} nested too deeply")));
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    // ── emission ───────────────────────────────────────────────────

    fn offset(&mut self) -> usize {
        self.f().builder.current_offset()
    }

    fn emit(&mut self, op: Op, small: u16) -> usize {
        let line = self.line;
        let f = self.f();
        let pos = f.builder.emit(op, small);
        f.note(pos, line, stack_effect(op, small));
        if op == Op::Return {
            f.returns.push(pos);
        }
        pos
    }

    fn emit_a(&mut self, op: Op, small: u16, a: u32) -> usize {
        let line = self.line;
        let f = self.f();
        let pos = f.builder.emit_a(op, small, a);
        f.note(pos, line, stack_effect(op, small));
        pos
    }

    fn emit_ab(&mut self, op: Op, small: u16, a: u32, b: u32) -> usize {
        let line = self.line;
        let f = self.f();
        let pos = f.builder.emit_ab(op, small, a, b);
        f.note(pos, line, stack_effect(op, small));
        pos
    }

    fn load_local(&mut self, slot: u16) -> usize {
        let pos = self.emit(Op::LoadLocal, slot);
        if slot >= self.f_ref().first_local() {
            self.f().local_refs.push(pos);
        }
        pos
    }

    fn store_local(&mut self, slot: u16) -> usize {
        let pos = self.emit(Op::StoreLocal, slot);
        if slot >= self.f_ref().first_local() {
            self.f().local_refs.push(pos);
        }
        pos
    }

    fn call_method(&mut self, sym: Symbol, argc: u16) -> usize {
        self.emit_a(Op::CallMethod, argc, sym.0)
    }

    fn load_binding(&mut self, binding: Binding, owner: ModuleId) -> usize {
        let (kind, a, b) = binding.operands(owner);
        self.emit_ab(Op::LoadName, kind as u16, a, b)
    }

    fn jump(&mut self, op: Op) -> Label {
        let line = self.line;
        let f = self.f();
        let pos = f.builder.current_offset();
        let label = f.builder.jump(op);
        f.note(pos, line, stack_effect(op, 0));
        label
    }

    fn jump_to_list(&mut self, op: Op, list: &mut JumpList) {
        let line = self.line;
        let f = self.f();
        let pos = f.builder.current_offset();
        f.builder.jump_to_list(op, list);
        f.note(pos, line, stack_effect(op, 0));
    }

    fn jump_back(&mut self, op: Op, target: usize) {
        let line = self.line;
        let f = self.f();
        let pos = f.builder.current_offset();
        f.builder.jump_back(op, target);
        f.note(pos, line, stack_effect(op, 0));
    }

    fn bind(&mut self, label: Label) {
        self.f().builder.bind(label);
    }

    fn bind_list(&mut self, list: JumpList) {
        self.f().builder.bind_list(list);
    }

    fn pending(&mut self, pos: usize, name: Symbol, kind: PatchKind, target: Option<ModuleId>) {
        let line = self.line;
        self.f().pending.push(Pending { pos, name, kind, target, line });
    }

    /// Pop every stack entry above `depth` without touching the tracked
    /// depth (the code that follows is not reached by fall-through).
    fn pop_to(&mut self, depth: i32) {
        let extra = self.f_ref().depth - depth;
        if extra > 0 {
            self.emit(Op::PopN, extra as u16);
            self.f().adjust(extra);
        }
    }
}

#[cfg(test)]
mod tests {
    use fox_bytecode::disassemble;

    use super::*;
    use crate::test_util::run_source;
    use crate::{FoxError, Value};

    fn compile_error(source: &str) -> Diagnostic {
        let mut rt = Runtime::default();
        let m = rt.new_module("main", None);
        match compile_module(&mut rt, m, source) {
            Err(d) => d,
            Ok(_) => panic!("expected a compile error for {source:?}"),
        }
    }

    fn init_code(source: &str) -> String {
        let mut rt = Runtime::default();
        let m = rt.new_module("main", None);
        let init = compile_module(&mut rt, m, source).expect("compiles");
        disassemble(&rt.functions[init.index()].code)
    }

    #[test]
    fn syntax_error_carries_line() {
        let d = compile_error("let a = 1\nlet b = (2 +\n)");
        assert_eq!(d.kind, ErrorKind::Syntax);
        assert_eq!(d.line, 3);
        assert!(d.message.starts_with("expected expression"), "{}", d.message);
    }

    #[test]
    fn unterminated_string_is_reported() {
        let d = compile_error("print(\"abc");
        assert_eq!(d.kind, ErrorKind::Syntax);
        assert!(d.message.starts_with("unterminated"), "{}", d.message);
    }

    #[test]
    fn redefinition_is_a_define_error() {
        let d = compile_error("var x = 1\ndef x() { }");
        assert_eq!(d.kind, ErrorKind::Define);
        assert_eq!(d.message, "'x' is already defined");
    }

    #[test]
    fn assignment_to_immutable_local() {
        let d = compile_error("def f() {\n  let a = 1\n  a = 2\n}");
        assert_eq!(d.kind, ErrorKind::Define);
        assert_eq!(d.line, 3);
    }

    #[test]
    fn assignment_to_capture_is_rejected() {
        let d = compile_error("def f() {\n  var n = 0\n  return fn() { n = 1 }\n}");
        assert_eq!(d.message, "cannot assign to captured variable 'n'");
    }

    #[test]
    fn yield_outside_function() {
        assert_eq!(compile_error("yield 1").kind, ErrorKind::Syntax);
        assert_eq!(compile_error("class K(a) {\n  var x = a\n  yield x\n}").kind, ErrorKind::Syntax);
    }

    #[test]
    fn constants_cannot_be_var() {
        let d = compile_error("let X = 1\nvar Y = 2");
        assert_eq!(d.kind, ErrorKind::Syntax);
        assert_eq!(d.line, 2);
    }

    #[test]
    fn directives_only_in_prologue() {
        let d = compile_error("print(1)\n#@env A=b");
        assert_eq!(d.kind, ErrorKind::Syntax);
        assert_eq!(d.line, 2);
        assert_eq!(compile_error("#@mode turbo").kind, ErrorKind::Syntax);
        assert_eq!(compile_error("#@native no_such_native_ext").kind, ErrorKind::Import);
    }

    #[test]
    fn small_ints_are_inline() {
        let code = init_code("var a = 7");
        assert!(code.contains("PushInt 7"), "{code}");
        assert!(!code.contains("PushConst"), "{code}");
    }

    #[test]
    fn forward_reference_emits_placeholder() {
        let code = init_code("later()\ndef later() { }");
        assert!(code.contains("LoadName"), "{code}");
    }

    #[test]
    fn operator_precedence() {
        let out = run_source(
            "print(1 + 2 * 3 - 4 / 2, 2 * (3 + 4), 1 << 2 + 1, 6 & 3 | 8, 5 ^ 1)\nprint(1 < 2 == true, -2 * -3, not 1 == 2, 10 - 2 - 3)",
        );
        assert_eq!(out, "5 14 8 10 4\ntrue 6 true 5\n");
    }

    #[test]
    fn compound_assignment_on_fields_and_items() {
        let out = run_source(
            "class Box {\n  var n = 1\n}\nlet b = Box()\nb.n += 4\nb.n *= 2\nlet xs = [1, 2]\nxs[1] -= 5\nprint(b.n, xs)",
        );
        assert_eq!(out, "10 [1, -3]\n");
    }

    #[test]
    fn string_interpolation() {
        let out = run_source("let n = 3\nprint(\"n=${n}, twice ${n * 2}!\")");
        assert_eq!(out, "n=3, twice 6!\n");
    }

    #[test]
    fn nested_closures_capture_through_levels() {
        let out = run_source(
            "def outer(a) {\n  let b = a + 1\n  return fn(c) {\n    return fn() => a + b + c\n  }\n}\nprint(outer(1)(10)())",
        );
        assert_eq!(out, "13\n");
    }

    #[test]
    fn nested_def_is_a_local_closure() {
        let out = run_source(
            "def f(x) {\n  def g(y) { return x * y }\n  return g(3)\n}\nprint(f(5))",
        );
        assert_eq!(out, "15\n");
    }

    #[test]
    fn fragment_returns_trailing_expression() {
        let mut rt = Runtime::default();
        rt.capture_output();
        let m = rt.new_module("repl", None);
        assert_eq!(rt.eval(m, "def sq(x) { return x * x }\n").expect("defines"), Value::Nil);
        assert_eq!(rt.eval(m, "var k = sq(4)\nk + 1\n\n").expect("evaluates"), Value::Int(17));
        assert_eq!(rt.eval(m, "k = 2\nk").expect("assigns"), Value::Int(2));
    }

    #[test]
    fn fragment_errors_do_not_poison_module() {
        let mut rt = Runtime::default();
        rt.capture_output();
        let m = rt.new_module("repl", None);
        assert!(matches!(rt.eval(m, "let = 4"), Err(FoxError::Compile(_))));
        assert_eq!(rt.eval(m, "1 + 1").expect("still usable"), Value::Int(2));
    }

    #[test]
    fn super_calls_reach_base_methods() {
        let out = run_source(
            "class Animal(name) {\n  var name = name\n  def speak() { return this.name + \" makes a sound\" }\n}\nclass Dog(name) extends Animal(name) {\n  def speak() { return super.speak() + \": woof\" }\n}\nprint(Dog(\"rex\").speak())",
        );
        assert_eq!(out, "rex makes a sound: woof\n");
    }

    #[test]
    fn methods_added_outside_the_class() {
        let out = run_source("class P {\n  var v = 2\n}\ndef P.double() { return this.v * 2 }\nprint(P().double())");
        assert_eq!(out, "4\n");
    }

    #[test]
    fn try_catch_binds_error_in_function() {
        let out = run_source(
            "def f() {\n  let before = 1\n  try {\n    let inside = 2\n    throw ValueError(\"v\")\n  } catch TypeError {\n    return \"type\"\n  } catch ValueError as e {\n    return \"${before} ${e.message}\"\n  }\n}\nprint(f())",
        );
        assert_eq!(out, "1 v\n");
    }

    #[test]
    fn break_out_of_try_inside_loop() {
        let out = run_source(
            "var n = 0\nfor i in 0..10 {\n  try {\n    if i == 3 { break }\n    n += i\n  } catch { }\n}\nprint(n)",
        );
        assert_eq!(out, "3\n");
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("print({}1{})", "(".repeat(100_000), ")".repeat(100_000));
        let d = compile_error(&deep);
        assert_eq!(d.kind, ErrorKind::Syntax);
        assert_eq!(d.message, "expression nested too deeply");
        assert_eq!(compile_error(&format!("print({}1)", "-".repeat(100_000))).message, "expression nested too deeply");
        let blocks = format!("{}{}", "{\n".repeat(10_000), "}\n".repeat(10_000));
        assert_eq!(compile_error(&blocks).message, "block nested too deeply");

        let shallow = format!("print({}1{})", "(".repeat(60), ")".repeat(60));
        assert_eq!(run_source(&shallow), "1\n");
    }
}
