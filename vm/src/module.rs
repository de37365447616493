//! Module loading: the import search path, the table of loaded modules and
//! the `#@env` overlay.
//!
//! `import a.b` looks, in order, for an already loaded `a.b`, for
//! `a/b.fox` under each import directory, for a bundled native extension
//! and finally for an extension library named after the last segment
//! (`a/libb.so` on Linux).

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};

use fox_object::ModuleId;
use libloading::Library;
use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::builtins::extensions;
use crate::compiler;
use crate::descriptor::ModuleState;
use crate::error::{Diagnostic, ErrorKind};
use crate::native;
use crate::Runtime;

#[derive(Debug, Default)]
pub struct Loader {
    pub import_dirs: Vec<PathBuf>,
    /// Dotted name to module, for every module `import` produced.
    pub loaded: FxHashMap<String, ModuleId>,
    /// Extension libraries stay mapped for the runtime's lifetime.
    pub libraries: Vec<Library>,
    /// Variables set by `#@env`, consulted before the process environment.
    pub env: FxHashMap<String, String>,
}

impl Loader {
    pub fn new(import_dirs: Vec<PathBuf>) -> Self {
        Self { import_dirs, ..Self::default() }
    }

    pub fn env_var(&self, name: &str) -> Option<String> {
        self.env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    /// `#@env NAME=value`.
    pub fn set_env(&mut self, name: &str, value: &str) {
        self.env.insert(name.to_string(), value.to_string());
    }

    /// `#@env NAME+=value`: append with the platform path separator.
    pub fn append_env(&mut self, name: &str, value: &str) {
        let joined = match self.env_var(name).filter(|v| !v.is_empty()) {
            Some(old) => {
                let sep = if cfg!(windows) { ';' } else { ':' };
                format!("{old}{sep}{value}")
            }
            None => value.to_string(),
        };
        self.env.insert(name.to_string(), joined);
    }

    /// Source file for `dotted` under the import directories.
    fn find_source(&self, dotted: &str) -> Option<PathBuf> {
        let mut rel: PathBuf = dotted.split('.').collect();
        rel.set_extension("fox");
        self.import_dirs
            .iter()
            .map(|dir| dir.join(&rel))
            .find(|p| p.is_file())
    }

    /// Extension library for `dotted`: the last segment gets the platform
    /// prefix and suffix, the others are directories.
    fn find_library(&self, dotted: &str) -> Option<PathBuf> {
        let mut segments: Vec<&str> = dotted.split('.').collect();
        let last = segments.pop()?;
        let file = format!("{DLL_PREFIX}{last}{DLL_SUFFIX}");
        let rel: PathBuf = segments.iter().collect::<PathBuf>().join(file);
        self.import_dirs
            .iter()
            .map(|dir| dir.join(&rel))
            .find(|p| p.is_file())
    }
}

fn importer_name(rt: &Runtime, from: Option<ModuleId>) -> String {
    from.map_or_else(|| "<host>".to_string(), |m| rt.modules[m.index()].name.clone())
}

fn valid_dotted(dotted: &str) -> bool {
    !dotted.is_empty()
        && dotted.split('.').all(|seg| {
            let mut chars = seg.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Find, compile and register the module `dotted`. Its init function does
/// not run here; the importer emits `InitModule` for that.
pub fn import(
    rt: &mut Runtime,
    dotted: &str,
    from: Option<ModuleId>,
    line: u32,
) -> Result<ModuleId, Diagnostic> {
    if let Some(&m) = rt.loader.loaded.get(dotted) {
        return Ok(m);
    }
    if !valid_dotted(dotted) {
        return Err(Diagnostic::new(
            ErrorKind::Import,
            format!("invalid module name '{dotted}'"),
            importer_name(rt, from),
            line,
        ));
    }
    if let Some(path) = rt.loader.find_source(dotted) {
        return import_source(rt, dotted, &path, from, line);
    }
    if let Some(m) = extensions::load(rt, dotted) {
        debug!("import {dotted}: bundled extension");
        rt.loader.loaded.insert(dotted.to_string(), m);
        return Ok(m);
    }
    if let Some(path) = rt.loader.find_library(dotted) {
        let m = rt.new_module(dotted, Some(path.clone()));
        native::load_library(rt, &path, m).map_err(|err| {
            rt.modules[m.index()].state = ModuleState::Failed;
            Diagnostic::new(ErrorKind::Import, err.to_string(), importer_name(rt, from), line)
        })?;
        rt.modules[m.index()].state = ModuleState::Initialized;
        info!("import {dotted}: loaded {}", path.display());
        rt.loader.loaded.insert(dotted.to_string(), m);
        return Ok(m);
    }
    Err(Diagnostic::new(
        ErrorKind::Import,
        format!("no module named '{dotted}'"),
        importer_name(rt, from),
        line,
    ))
}

fn import_source(
    rt: &mut Runtime,
    dotted: &str,
    path: &Path,
    from: Option<ModuleId>,
    line: u32,
) -> Result<ModuleId, Diagnostic> {
    let source = fs::read_to_string(path).map_err(|err| {
        Diagnostic::new(
            ErrorKind::Import,
            format!("cannot read {}: {err}", path.display()),
            importer_name(rt, from),
            line,
        )
    })?;
    let m = rt.new_module(dotted, Some(path.to_path_buf()));
    // Registered before compiling so cyclic imports find it.
    rt.loader.loaded.insert(dotted.to_string(), m);
    debug!("import {dotted}: compiling {}", path.display());
    if let Err(diagnostic) = compiler::compile_module(rt, m, &source) {
        rt.modules[m.index()].state = ModuleState::Failed;
        return Err(diagnostic);
    }
    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_env_joins_with_separator() {
        let mut loader = Loader::new(Vec::new());
        loader.set_env("FOX_TEST_LIST", "a");
        loader.append_env("FOX_TEST_LIST", "b");
        let sep = if cfg!(windows) { ";" } else { ":" };
        assert_eq!(loader.env_var("FOX_TEST_LIST"), Some(format!("a{sep}b")));
        loader.append_env("FOX_TEST_FRESH_LIST", "x");
        assert_eq!(loader.env_var("FOX_TEST_FRESH_LIST").as_deref(), Some("x"));
    }

    #[test]
    fn dotted_names() {
        assert!(valid_dotted("geo.shapes"));
        assert!(valid_dotted("_x1"));
        assert!(!valid_dotted("geo..shapes"));
        assert!(!valid_dotted("1geo"));
        assert!(!valid_dotted(""));
    }

    #[test]
    fn missing_module_is_an_import_error() {
        let mut rt = Runtime::default();
        let err = import(&mut rt, "surely_not_here", None, 3).expect_err("missing");
        assert_eq!(err.kind, ErrorKind::Import);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn bundled_extension_is_memoized() {
        let mut rt = Runtime::default();
        let a = import(&mut rt, "math", None, 0).expect("math");
        let b = import(&mut rt, "math", None, 0).expect("math again");
        assert_eq!(a, b);
        assert_eq!(rt.module_state(a), ModuleState::Initialized);
    }
}
