use std::fmt;
use std::path::PathBuf;

use crate::native::ExtensionError;

/// Marker returned when an exception is in flight. The exception itself
/// lives in [`Runtime::current_error`](crate::Runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Raised;

pub type VmResult<T> = Result<T, Raised>;

/// The builtin error classes below `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    Define,
    Name,
    Type,
    Argument,
    Value,
    Index,
    Import,
    Memory,
    StackOverflow,
    LoopReference,
    StopIteration,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::Syntax,
        ErrorKind::Define,
        ErrorKind::Name,
        ErrorKind::Type,
        ErrorKind::Argument,
        ErrorKind::Value,
        ErrorKind::Index,
        ErrorKind::Import,
        ErrorKind::Memory,
        ErrorKind::StackOverflow,
        ErrorKind::LoopReference,
        ErrorKind::StopIteration,
    ];

    pub const fn class_name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Define => "DefineError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Argument => "ArgumentError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Memory => "MemoryError",
            ErrorKind::StackOverflow => "StackOverflowError",
            ErrorKind::LoopReference => "LoopReferenceError",
            ErrorKind::StopIteration => "StopIteration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// A compile or link time error with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub module: String,
    pub line: u32,
}

impl Diagnostic {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        module: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            module: module.into(),
            line,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}: {}", self.module, self.line, self.kind, self.message)
    }
}

impl std::error::Error for Diagnostic {}

/// One frame an exception propagated out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub module: String,
    pub function: String,
    pub line: u32,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {} ({}:{})", self.function, self.module, self.line)
    }
}

/// Errors reported to the embedding host.
#[derive(Debug, thiserror::Error)]
pub enum FoxError {
    #[error("{0}")]
    Compile(Diagnostic),

    #[error("{}", join_lines(.0))]
    Link(Vec<Diagnostic>),

    #[error("{class}: {message}")]
    Runtime {
        class: String,
        message: String,
        trace: Vec<TraceEntry>,
    },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Extension(#[from] ExtensionError),
}

impl FoxError {
    /// Name of the error class, as a script would see it.
    pub fn class_name(&self) -> &str {
        match self {
            FoxError::Compile(d) => d.kind.class_name(),
            FoxError::Link(ds) => ds
                .first()
                .map_or(ErrorKind::Name.class_name(), |d| d.kind.class_name()),
            FoxError::Runtime { class, .. } => class,
            FoxError::Io { .. } | FoxError::Extension(_) => {
                ErrorKind::Import.class_name()
            }
        }
    }

    pub fn trace(&self) -> &[TraceEntry] {
        match self {
            FoxError::Runtime { trace, .. } => trace,
            _ => &[],
        }
    }
}

impl From<Diagnostic> for FoxError {
    fn from(d: Diagnostic) -> Self {
        FoxError::Compile(d)
    }
}

fn join_lines(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic::new(ErrorKind::Name, "undefined name 'x'", "main", 3);
        assert_eq!(d.to_string(), "main:3: NameError: undefined name 'x'");
    }

    #[test]
    fn link_errors_render_one_per_line() {
        let err = FoxError::Link(vec![
            Diagnostic::new(ErrorKind::Name, "undefined name 'a'", "m", 1),
            Diagnostic::new(ErrorKind::Define, "cannot assign to 'B'", "m", 2),
        ]);
        assert_eq!(
            err.to_string(),
            "m:1: NameError: undefined name 'a'\nm:2: DefineError: cannot assign to 'B'"
        );
        assert_eq!(err.class_name(), "NameError");
    }

    #[test]
    fn every_kind_has_a_distinct_class() {
        let mut names: Vec<_> = ErrorKind::ALL.iter().map(|k| k.class_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ErrorKind::ALL.len());
    }
}
