//! The link pass.
//!
//! The compiler resolves what it can on the spot and leaves a
//! [`PatchRecord`] for every name it could not: forward references, names
//! of modules still compiling, superclasses declared later. After a
//! compile (and everything it imported) finished, [`link`] resolves the
//! records, flattens the classes that are still open and rewrites the
//! recorded instructions in place. Unresolvable names are reported all at
//! once.

use std::mem;

use fox_bytecode::{Op, patch_a_in, patch_b_in, patch_small_in};
use fox_object::{ClassId, FuncId, ModuleId, Symbol};
use log::debug;

use crate::builtins::BUILTINS;
use crate::descriptor::{Binding, Ctor};
use crate::error::{Diagnostic, ErrorKind};
use crate::Runtime;

/// Where a pending name is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSite {
    /// Instruction at `pos` in the code of `func`.
    Code { func: FuncId, pos: usize },
    /// `extends` clause of a class.
    Superclass(ClassId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// `LoadName`: any binding.
    Load,
    /// `StoreName`: a mutable global.
    Store,
    /// `CheckType`: a class.
    TypeCheck,
    /// `CatchTest`: a class.
    CatchClass,
    Superclass,
}

/// A name the compiler left for the link pass.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    pub name: Symbol,
    /// Module whose code refers to the name.
    pub module: ModuleId,
    /// Qualified lookups (`geo.Shape`) name the module to search; plain
    /// names search `module`, then the builtins.
    pub target: Option<ModuleId>,
    pub site: PatchSite,
    pub kind: PatchKind,
    pub line: u32,
}

fn lookup(rt: &Runtime, record: &PatchRecord) -> Option<(Binding, ModuleId)> {
    match record.target {
        Some(m) => rt.modules[m.index()].lookup(record.name).map(|b| (b, m)),
        None => rt.modules[record.module.index()]
            .lookup(record.name)
            .map(|b| (b, record.module))
            .or_else(|| rt.modules[BUILTINS.index()].lookup(record.name).map(|b| (b, BUILTINS))),
    }
}

fn diagnostic(rt: &Runtime, record: &PatchRecord, kind: ErrorKind, message: String) -> Diagnostic {
    Diagnostic::new(kind, message, rt.modules[record.module.index()].name.clone(), record.line)
}

fn display_name(rt: &Runtime, record: &PatchRecord) -> String {
    let name = rt.symbols.resolve(record.name);
    match record.target {
        Some(m) => format!("{}.{name}", rt.modules[m.index()].name),
        None => name.to_string(),
    }
}

/// Copy inherited fields and methods into `class`. Its base must be
/// flattened already.
pub(crate) fn flatten(rt: &mut Runtime, class: ClassId) {
    let base = rt.classes[class.index()].base;
    let (mut fields, mut methods, inherited_destructor, base_ctor) = match base {
        Some(b) => {
            let b = &rt.classes[b.index()];
            (b.fields.clone(), b.methods.clone(), b.has_destructor, b.ctor)
        }
        None => (Vec::new(), Default::default(), false, Ctor::None),
    };
    let desc = &mut rt.classes[class.index()];
    for &f in &desc.own_fields {
        if !fields.contains(&f) {
            fields.push(f);
        }
    }
    methods.extend(desc.own_methods.iter().map(|(&k, &v)| (k, v)));
    desc.field_index = fields
        .iter()
        .enumerate()
        .map(|(i, &f)| (f, i as u16))
        .collect();
    desc.fields = fields;
    desc.methods = methods;
    desc.has_destructor = inherited_destructor || desc.destructor.is_some();
    if desc.inherits_ctor {
        desc.ctor = base_ctor;
    }
    desc.flattened = true;
    debug!(
        "flatten {}: {} fields, {} methods",
        desc.name,
        desc.fields.len(),
        desc.methods.len()
    );
}

/// Flatten `class` after its bases, reporting cycles and bases that cannot
/// be extended.
fn flatten_chain(rt: &mut Runtime, class: ClassId, errors: &mut Vec<Diagnostic>) {
    let mut chain = Vec::new();
    let mut cursor = Some(class);
    while let Some(c) = cursor {
        let desc = &rt.classes[c.index()];
        if desc.flattened {
            break;
        }
        if chain.contains(&c) {
            let names: Vec<&str> = chain
                .iter()
                .map(|&c: &ClassId| rt.classes[c.index()].name.as_str())
                .collect();
            let first = &rt.classes[class.index()];
            errors.push(Diagnostic::new(
                ErrorKind::Define,
                format!("inheritance cycle through {}", names.join(", ")),
                rt.modules[first.module.index()].name.clone(),
                first.line,
            ));
            // Break the cycle so the classes stay usable for reporting.
            for &c in &chain {
                rt.classes[c.index()].base = None;
                rt.classes[c.index()].flattened = true;
            }
            return;
        }
        chain.push(c);
        cursor = desc.base;
    }
    for &c in chain.iter().rev() {
        if let Some(base) = rt.classes[c.index()].base
            && let Ctor::Factory(_) = rt.classes[base.index()].ctor
        {
            let (desc, base_name) = (&rt.classes[c.index()], &rt.classes[base.index()].name);
            errors.push(Diagnostic::new(
                ErrorKind::Define,
                format!("cannot extend builtin class {base_name}"),
                rt.modules[desc.module.index()].name.clone(),
                desc.line,
            ));
        }
        flatten(rt, c);
    }
}

fn code_of(rt: &mut Runtime, func: FuncId) -> &mut Vec<u8> {
    &mut rt.functions[func.index()].code
}

fn patch_code(
    rt: &mut Runtime,
    record: &PatchRecord,
    func: FuncId,
    pos: usize,
    binding: Binding,
    owner: ModuleId,
) -> Result<(), Diagnostic> {
    match record.kind {
        PatchKind::Load => {
            let (kind, a, b) = binding.operands(owner);
            let code = code_of(rt, func);
            patch_small_in(code, pos, kind as u16);
            patch_a_in(code, pos, a);
            patch_b_in(code, pos, b);
        }
        PatchKind::Store => match binding {
            Binding::Global { mutable: true, .. } => {
                let (kind, a, b) = binding.operands(owner);
                let code = code_of(rt, func);
                patch_small_in(code, pos, kind as u16);
                patch_a_in(code, pos, a);
                patch_b_in(code, pos, b);
            }
            other => {
                let message = format!(
                    "cannot assign to {} '{}'",
                    other.kind_name(),
                    display_name(rt, record)
                );
                return Err(diagnostic(rt, record, ErrorKind::Define, message));
            }
        },
        PatchKind::TypeCheck | PatchKind::CatchClass => match binding {
            Binding::Class(class) => patch_a_in(code_of(rt, func), pos, class.0),
            other => {
                let message = format!(
                    "'{}' is a {}, not a class",
                    display_name(rt, record),
                    other.kind_name()
                );
                return Err(diagnostic(rt, record, ErrorKind::Define, message));
            }
        },
        PatchKind::Superclass => unreachable!("superclass records patch classes"),
    }
    Ok(())
}

/// Drop the records of a compile that failed. Code sites they point at
/// raise NameError if an already-bound function reaches them.
pub(crate) fn abandon(rt: &mut Runtime) {
    for record in mem::take(&mut rt.patches) {
        if let PatchSite::Code { func, pos } = record.site {
            let message = format!("undefined name '{}'", display_name(rt, &record));
            rt.unresolved.insert((func, pos), (ErrorKind::Name, message));
        }
    }
}

/// Resolve every pending record, flatten open classes and patch code.
pub fn link(rt: &mut Runtime) -> Result<(), Vec<Diagnostic>> {
    let records = mem::take(&mut rt.patches);
    let mut errors = Vec::new();
    debug!("link: {} records", records.len());

    for record in records.iter().filter(|r| r.kind == PatchKind::Superclass) {
        let PatchSite::Superclass(class) = record.site else {
            continue;
        };
        match lookup(rt, record) {
            Some((Binding::Class(base), _)) => rt.classes[class.index()].base = Some(base),
            Some((other, _)) => {
                let message = format!(
                    "cannot extend '{}': it is a {}",
                    display_name(rt, record),
                    other.kind_name()
                );
                errors.push(diagnostic(rt, record, ErrorKind::Define, message));
            }
            None => {
                let message = format!("undefined class '{}'", display_name(rt, record));
                errors.push(diagnostic(rt, record, ErrorKind::Name, message));
            }
        }
    }

    for i in 0..rt.classes.len() {
        if !rt.classes[i].flattened {
            flatten_chain(rt, ClassId(i as u32), &mut errors);
        }
    }

    for record in records.iter().filter(|r| r.kind != PatchKind::Superclass) {
        let PatchSite::Code { func, pos } = record.site else {
            continue;
        };
        debug_assert!(matches!(
            Op::try_from(rt.functions[func.index()].code[pos]),
            Ok(Op::LoadName | Op::StoreName | Op::CheckType | Op::CatchTest)
        ));
        let failed = match lookup(rt, record) {
            Some((binding, owner)) => patch_code(rt, record, func, pos, binding, owner).err(),
            None => {
                let message = format!("undefined name '{}'", display_name(rt, record));
                Some(diagnostic(rt, record, ErrorKind::Name, message))
            }
        };
        if let Some(err) = failed {
            // Already-bound functions may still reach the site.
            rt.unresolved.insert((func, pos), (err.kind, err.message.clone()));
            errors.push(err);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::run_source;
    use crate::{ErrorKind, FoxError, Runtime};

    fn link_errors(source: &str) -> Vec<(ErrorKind, String, u32)> {
        let mut rt = Runtime::default();
        match rt.run_source("main", source) {
            Err(FoxError::Link(ds)) => ds.into_iter().map(|d| (d.kind, d.message, d.line)).collect(),
            other => panic!("expected link errors, got {other:?}"),
        }
    }

    #[test]
    fn forward_references_resolve() {
        let out = run_source(
            "def first() { return second() + 1 }\ndef second() { return 41 }\nprint(first())",
        );
        assert_eq!(out, "42\n");
    }

    #[test]
    fn forward_superclass() {
        let out = run_source(
            "class Leaf extends Base {\n  def who() { return \"leaf of \" + this.base() }\n}\nclass Base {\n  def base() { return \"base\" }\n}\nprint(Leaf().who())",
        );
        assert_eq!(out, "leaf of base\n");
    }

    #[test]
    fn all_undefined_names_are_reported() {
        let errors = link_errors("def f() {\n  return missing_a\n}\nprint(missing_b)");
        assert_eq!(
            errors,
            vec![
                (ErrorKind::Name, "undefined name 'missing_a'".to_string(), 2),
                (ErrorKind::Name, "undefined name 'missing_b'".to_string(), 4),
            ]
        );
    }

    #[test]
    fn assignment_to_a_later_function_is_rejected() {
        let errors = link_errors("def f() { g = 1 }\ndef g() { }");
        assert_eq!(errors[0].0, ErrorKind::Define);
        assert_eq!(errors[0].1, "cannot assign to function 'g'");
    }

    #[test]
    fn inheritance_cycle() {
        let errors = link_errors("class A extends B {}\nclass B extends A {}");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, ErrorKind::Define);
        assert!(errors[0].1.starts_with("inheritance cycle"));
    }

    #[test]
    fn extending_a_value_class_is_rejected() {
        let errors = link_errors("class Wrapped extends Later {}\nclass Later extends Int {}");
        assert!(errors.iter().all(|e| e.0 == ErrorKind::Define));
        assert!(errors.iter().any(|e| e.1 == "cannot extend builtin class Int"));
    }

    #[test]
    fn type_annotation_must_name_a_class() {
        let errors = link_errors("def f(x: Later) { }\ndef Later() { }");
        assert_eq!(errors[0].1, "'Later' is a function, not a class");
    }
}
