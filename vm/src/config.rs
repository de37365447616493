use std::env;
use std::path::PathBuf;

use fox_object::HeapConfig;

/// Environment variable holding extra import directories, separated like
/// `PATH`.
pub const FOX_PATH: &str = "FOX_PATH";

/// Runtime limits and search paths.
#[derive(Debug, Clone)]
pub struct Config {
    /// Searched in order by `import`.
    pub import_dirs: Vec<PathBuf>,
    /// Maximum number of in-flight calls.
    pub max_call_depth: usize,
    /// Maximum operand stack entries.
    pub stack_limit: usize,
    pub heap: HeapConfig,
    /// Trace every instruction of every module, not only `#@mode trace`
    /// ones.
    pub trace_all: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            import_dirs: vec![PathBuf::from(".")],
            max_call_depth: 256,
            stack_limit: 65_536,
            heap: HeapConfig::default(),
            trace_all: false,
        }
    }
}

impl Config {
    /// Append the directories listed in `FOX_PATH`.
    pub fn with_env_paths(mut self) -> Self {
        if let Some(paths) = env::var_os(FOX_PATH) {
            self.import_dirs.extend(env::split_paths(&paths));
        }
        self
    }

    pub fn with_import_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.import_dirs.push(dir.into());
        self
    }
}
