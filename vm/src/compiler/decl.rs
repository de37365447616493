//! Declarations: functions, parameters, type annotations and classes.

use fox_bytecode::{CHECK_NULLABLE, CHECK_TOP, Label, Op, UNRESOLVED_CLASS};
use fox_object::{ClassId, FuncId, Symbol};
use fox_parser::{Keyword, TokenKind};
use log::debug;

use super::scope::{FuncKind, FuncState, TypeRef};
use super::{CResult, Compiler};
use crate::builtins::OBJECT;
use crate::descriptor::{Binding, ClassDesc, Ctor, FuncFlags, Method};
use crate::error::ErrorKind;
use crate::link::{self, PatchKind, PatchRecord, PatchSite};

impl Compiler<'_> {
    /// `(a, b?, c = 1, d: Int, *rest)` into the function on top.
    pub(super) fn parameters(&mut self) -> CResult<()> {
        self.expect(TokenKind::LParen)?;
        // Default and type-check code runs with every parameter already in
        // place, deeper than the compile-time depth at that point.
        let mut peak = 0;
        while !self.check(&TokenKind::RParen) {
            if self.eat(&TokenKind::Star) {
                let name = self.expect_name("parameter name")?;
                self.add_param(&name)?;
                self.f().flags |= FuncFlags::VARIADIC;
                if !self.check(&TokenKind::RParen) {
                    return Err(self.syntax("rest parameter must be last"));
                }
                break;
            }
            let name = self.expect_name("parameter name")?;
            let optional = self.eat(&TokenKind::Question);
            let mut ty = if self.eat(&TokenKind::Colon) { Some(self.type_ref()?) } else { None };
            let slot = self.add_param(&name)?;
            let has_default = self.check(&TokenKind::Assign);
            if optional || has_default {
                self.f().seen_optional = true;
            } else if self.f_ref().seen_optional {
                return Err(self.syntax(format!("required parameter '{name}' after an optional one")));
            } else {
                self.f().required += 1;
            }

            let base = self.f_ref().depth;
            let saved_max = self.f_ref().max_depth;
            self.f().max_depth = base;
            if has_default {
                self.advance();
                self.load_local(slot);
                let skip = self.jump(Op::JumpIfNotNil);
                self.expression()?;
                self.store_local(slot);
                self.bind(skip);
                if ty.is_none() && self.eat(&TokenKind::Colon) {
                    ty = Some(self.type_ref()?);
                }
            }
            if let Some(mut ty) = ty {
                ty.nullable |= optional && !has_default;
                self.emit_type_check(slot, &ty)?;
            }
            let f = self.f();
            peak = peak.max(f.max_depth - base);
            f.max_depth = saved_max;

            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let f = self.f();
        f.adjust(peak);
        f.adjust(-peak);
        Ok(())
    }

    fn add_param(&mut self, name: &str) -> CResult<u16> {
        if self.f_ref().params == u8::MAX as u16 {
            return Err(self.syntax("too many parameters"));
        }
        let f = self.f();
        f.params += 1;
        f.adjust(1);
        self.declare_local(name, true)
    }

    /// `Type`, `module.Type`, either optionally followed by `?`.
    pub(super) fn type_ref(&mut self) -> CResult<TypeRef> {
        let (name, target) = match self.peek().clone() {
            TokenKind::TypeName(name) => {
                self.advance();
                (name, None)
            }
            TokenKind::Name(module) if self.peek_at(1) == &TokenKind::Dot => {
                self.advance();
                self.advance();
                let sym = self.rt.intern(&module);
                let target = match self.lookup_binding(sym) {
                    Some((Binding::Module(m), _)) => m,
                    Some((other, _)) => {
                        return Err(self.error(
                            ErrorKind::Define,
                            format!("'{module}' is a {}, not a module", other.kind_name()),
                        ));
                    }
                    None => {
                        return Err(self.error(ErrorKind::Name, format!("undefined module '{module}'")));
                    }
                };
                (self.expect_type_name("type name")?, Some(target))
            }
            _ => return Err(self.unexpected("type name")),
        };
        let nullable = self.eat(&TokenKind::Question);
        Ok(TypeRef { name, target, nullable })
    }

    fn class_binding(&mut self, ty: &TypeRef) -> (Symbol, Option<Binding>) {
        let sym = self.rt.intern(&ty.name);
        let binding = match ty.target {
            Some(m) => self.rt.modules[m.index()].lookup(sym),
            None => self.lookup_binding(sym).map(|(b, _)| b),
        };
        (sym, binding)
    }

    fn not_a_class(&self, ty: &TypeRef, binding: Binding) -> crate::error::Diagnostic {
        let name = match ty.target {
            Some(m) => format!("{}.{}", self.rt.modules[m.index()].name, ty.name),
            None => ty.name.clone(),
        };
        self.error(ErrorKind::Define, format!("'{name}' is a {}, not a class", binding.kind_name()))
    }

    /// `CheckType` of parameter `slot`, or of the stack top for
    /// [`CHECK_TOP`].
    pub(super) fn emit_type_check(&mut self, slot: u16, ty: &TypeRef) -> CResult<()> {
        let operand = if ty.nullable { slot | CHECK_NULLABLE } else { slot };
        match self.class_binding(ty) {
            (_, Some(Binding::Class(class))) => {
                self.emit_a(Op::CheckType, operand, class.0);
            }
            (_, Some(other)) => return Err(self.not_a_class(ty, other)),
            (sym, None) => {
                let pos = self.emit_a(Op::CheckType, operand, UNRESOLVED_CLASS);
                self.pending(pos, sym, PatchKind::TypeCheck, ty.target);
            }
        }
        Ok(())
    }

    /// `CatchTest` for a catch clause; returns the mismatch label.
    pub(super) fn emit_catch_test(&mut self, ty: &TypeRef) -> CResult<Label> {
        let (class, pending) = match self.class_binding(ty) {
            (_, Some(Binding::Class(class))) => (class.0, None),
            (_, Some(other)) => return Err(self.not_a_class(ty, other)),
            (sym, None) => (UNRESOLVED_CLASS, Some(sym)),
        };
        let line = self.line;
        let f = self.f();
        let (pos, label) = f.builder.catch_test(class);
        f.note(pos, line, 0);
        if let Some(sym) = pending {
            self.pending(pos, sym, PatchKind::CatchClass, ty.target);
        }
        Ok(label)
    }

    /// `{ statements }` of a function or loop body, without opening a scope.
    pub(super) fn block_body(&mut self) -> CResult<()> {
        self.expect(TokenKind::LBrace)?;
        self.tokens.push_newlines(true);
        loop {
            self.tokens.skip_newlines();
            if self.check(&TokenKind::RBrace) {
                break;
            }
            if self.check(&TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            self.statement()?;
        }
        self.tokens.pop_newlines();
        self.advance();
        Ok(())
    }

    /// Parameters, optional return type and body of a function whose
    /// `FuncState` is on top.
    fn signature_and_body(&mut self) -> CResult<()> {
        self.parameters()?;
        if self.eat(&TokenKind::Arrow) {
            let ty = self.type_ref()?;
            self.f().return_type = Some(ty);
        }
        self.block_body()?;
        self.emit(Op::Return, 0);
        Ok(())
    }

    fn function(
        &mut self,
        name: String,
        kind: FuncKind,
        class: Option<ClassId>,
        reserved: Option<FuncId>,
        line: u32,
    ) -> CResult<FuncId> {
        let mut state = FuncState::new(name, kind, class, line);
        if kind == FuncKind::Method {
            state.flags |= FuncFlags::METHOD;
        }
        self.funcs.push(state);
        self.signature_and_body()?;
        let state = self.pop_func();
        Ok(self.finish_function(state, reserved))
    }

    /// Bind `sym` in this module, refusing redefinitions.
    pub(super) fn define(&mut self, name: &str, binding: Binding) -> CResult<()> {
        let sym = self.rt.intern(name);
        let table = &mut self.rt.modules[self.module.index()].table;
        if table.contains_key(&sym) {
            return Err(self.error(ErrorKind::Define, format!("'{name}' is already defined")));
        }
        table.insert(sym, binding);
        Ok(())
    }

    /// After `def`.
    pub(super) fn def_statement(&mut self) -> CResult<()> {
        let line = self.line;
        if let TokenKind::TypeName(class_name) = self.peek().clone() {
            return self.method_outside_class(class_name, line);
        }
        let name = self.expect_name("function name")?;
        if self.funcs.len() == 1 && self.f_ref().in_module_scope() {
            let id = self.reserve_function(&name, line);
            self.define(&name, Binding::Function(id))?;
            self.function(name, FuncKind::Function, None, Some(id), line)?;
        } else {
            self.closure(&name, line)?;
            self.declare_local(&name, false)?;
        }
        Ok(())
    }

    /// `def Class.name(...) { }` adds a method to a class of this module.
    fn method_outside_class(&mut self, class_name: String, line: u32) -> CResult<()> {
        if !(self.funcs.len() == 1 && self.f_ref().in_module_scope()) {
            return Err(self.syntax("methods can only be added at module level"));
        }
        self.advance();
        self.expect(TokenKind::Dot)?;
        let method = self.expect_name("method name")?;
        let sym = self.rt.intern(&class_name);
        let class = match self.lookup_binding(sym) {
            Some((Binding::Class(c), owner)) if owner == self.module => c,
            Some((Binding::Class(_), _)) => {
                return Err(self.error(
                    ErrorKind::Define,
                    format!("cannot add methods to {class_name} outside its module"),
                ));
            }
            _ => {
                return Err(self.error(ErrorKind::Define, format!("undefined class '{class_name}'")));
            }
        };
        let id = self.function(format!("{class_name}.{method}"), FuncKind::Method, Some(class), None, line)?;
        self.add_method(class, &method, id);
        Ok(())
    }

    fn add_method(&mut self, class: ClassId, name: &str, id: FuncId) {
        let sym = self.rt.intern(name);
        let is_destructor = sym == self.rt.syms.del;
        let desc = &mut self.rt.classes[class.index()];
        let method = Method::Bytecode(id);
        desc.own_methods.insert(sym, method);
        if desc.flattened {
            desc.methods.insert(sym, method);
        }
        if is_destructor {
            desc.destructor = Some(method);
            desc.has_destructor = true;
        }
    }

    /// After `class`.
    pub(super) fn class_statement(&mut self) -> CResult<()> {
        if !(self.funcs.len() == 1 && self.f_ref().in_module_scope()) {
            return Err(self.syntax("classes can only be defined at module level"));
        }
        let line = self.line;
        let name = self.expect_type_name("class name")?;
        let id = ClassId(self.rt.classes.len() as u32);
        self.define(&name, Binding::Class(id))?;
        self.rt.classes.push(ClassDesc::new(name.clone(), self.module, line));

        // The constructor collects header parameters, the base constructor
        // call and field initializers. It is only kept if it does anything.
        let mut ctor = FuncState::new(name.clone(), FuncKind::Ctor, Some(id), line);
        ctor.flags |= FuncFlags::CTOR | FuncFlags::METHOD;
        self.funcs.push(ctor);
        let mut own_ctor = false;
        if self.check(&TokenKind::LParen) {
            self.parameters()?;
            own_ctor = true;
        }
        let base = if self.eat_kw(Keyword::Extends) {
            let base = self.superclass(id)?;
            self.emit(Op::LoadLocal, 0);
            let argc = if self.check(&TokenKind::LParen) {
                own_ctor = true;
                self.arguments()?
            } else {
                0
            };
            self.emit_a(Op::CallSuperCtor, argc, id.0);
            self.emit(Op::Pop, 0);
            base
        } else {
            Some(OBJECT)
        };
        self.rt.classes[id.index()].base = base;
        let mut ctor = self.pop_func();

        self.expect(TokenKind::LBrace)?;
        self.tokens.push_newlines(true);
        loop {
            self.tokens.skip_newlines();
            match self.peek() {
                TokenKind::RBrace => break,
                TokenKind::Kw(Keyword::Var | Keyword::Let) => {
                    self.advance();
                    self.funcs.push(ctor);
                    let result = self.field(id);
                    ctor = self.pop_func();
                    own_ctor |= result?;
                    self.end_statement()?;
                }
                TokenKind::Kw(Keyword::Def) => {
                    self.advance();
                    let method_line = self.line;
                    let method = self.expect_name("method name")?;
                    let fid = self.function(
                        format!("{name}.{method}"),
                        FuncKind::Method,
                        Some(id),
                        None,
                        method_line,
                    )?;
                    self.add_method(id, &method, fid);
                }
                _ => return Err(self.unexpected("field or method")),
            }
        }
        self.tokens.pop_newlines();
        self.advance();

        if own_ctor {
            self.funcs.push(ctor);
            self.emit(Op::Return, 0);
            let ctor = self.pop_func();
            let fid = self.finish_function(ctor, None);
            self.rt.classes[id.index()].ctor = Ctor::Init(Method::Bytecode(fid));
        } else {
            self.rt.classes[id.index()].inherits_ctor = true;
        }

        let ready = base.is_some_and(|b| {
            let b = &self.rt.classes[b.index()];
            b.flattened && !matches!(b.ctor, Ctor::Factory(_))
        });
        if ready {
            link::flatten(self.rt, id);
        }
        debug!("class {name}: base {base:?}, own constructor {own_ctor}, flattened {ready}");
        Ok(())
    }

    /// Base class after `extends`; `None` while it is left to the link pass.
    fn superclass(&mut self, class: ClassId) -> CResult<Option<ClassId>> {
        let ty = self.type_ref()?;
        if ty.nullable {
            return Err(self.syntax("a base class cannot be nullable"));
        }
        match self.class_binding(&ty) {
            (_, Some(Binding::Class(base))) => Ok(Some(base)),
            (_, Some(other)) => Err(self.error(
                ErrorKind::Define,
                format!("cannot extend '{}': it is a {}", ty.name, other.kind_name()),
            )),
            (sym, None) => {
                self.rt.patches.push(PatchRecord {
                    name: sym,
                    module: self.module,
                    target: ty.target,
                    site: PatchSite::Superclass(class),
                    kind: PatchKind::Superclass,
                    line: self.line,
                });
                Ok(None)
            }
        }
    }

    /// `var name (: Type)? (= expr)?` in a class body, with the constructor
    /// on top. Returns whether it added constructor code.
    fn field(&mut self, class: ClassId) -> CResult<bool> {
        let name = self.expect_name("field name")?;
        let sym = self.rt.intern(&name);
        let desc = &mut self.rt.classes[class.index()];
        if desc.own_fields.contains(&sym) {
            return Err(self.error(ErrorKind::Define, format!("field '{name}' is already defined")));
        }
        desc.own_fields.push(sym);
        let ty = if self.eat(&TokenKind::Colon) { Some(self.type_ref()?) } else { None };
        let has_value = self.eat(&TokenKind::Assign);
        if !has_value && ty.is_none() {
            return Ok(false);
        }
        self.emit(Op::LoadLocal, 0);
        if has_value {
            self.skip_line_breaks();
            self.expression()?;
        } else {
            self.emit(Op::PushNil, 0);
        }
        if let Some(ty) = ty {
            self.emit_type_check(CHECK_TOP, &ty)?;
        }
        self.emit_a(Op::SetAttr, 0, sym.0);
        Ok(true)
    }
}
