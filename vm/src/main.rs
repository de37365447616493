use clap::Parser as ClapParser;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process,
};

use fox_parser::fragment_is_complete;
use fox_vm::{Config, FoxError, Runtime, Value};
use log::{LevelFilter, debug};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input source files to execute in order
    #[arg(required = false, help = "The .fox files to execute")]
    files: Vec<PathBuf>,

    /// Extra import directories, searched before FOX_PATH
    #[arg(short = 'I', long = "import-dir", value_name = "DIR")]
    import_dirs: Vec<PathBuf>,

    #[arg(long, value_name = "CALLS", help = "Maximum number of in-flight calls")]
    max_depth: Option<usize>,

    #[arg(long, value_name = "ENTRIES", help = "Maximum operand stack entries")]
    stack_limit: Option<usize>,

    #[arg(long, value_name = "COUNT", help = "Maximum number of live heap instances")]
    max_objects: Option<usize>,

    /// Print bytecode and constants instead of executing
    #[arg(long, help = "Dump bytecode + constant pool for inputs")]
    dump_bytecode: bool,

    /// Start REPL after executing files (default if no files)
    #[arg(long, help = "Force REPL mode after file execution")]
    repl: bool,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Log more (-v debug, -vv trace, -vvv every instruction)")]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::default();
        for dir in &self.import_dirs {
            config = config.with_import_dir(dir);
        }
        let mut config = config.with_env_paths();
        if let Some(depth) = self.max_depth {
            config.max_call_depth = depth;
        }
        if let Some(limit) = self.stack_limit {
            config.stack_limit = limit;
        }
        if let Some(count) = self.max_objects {
            config.heap.max_objects = count;
        }
        config.trace_all = self.verbose > 2;
        config
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut rt = Runtime::new(cli.config());
    debug!("import dirs: {:?}", rt.loader.import_dirs);

    for path in &cli.files {
        if cli.dump_bytecode {
            if let Err(err) = dump_file(&mut rt, path) {
                eprintln!("Error compiling {}: {err}", path.display());
                process::exit(1);
            }
            continue;
        }
        if let Err(err) = rt.run_file(path) {
            report(&err);
            process::exit(1);
        }
    }

    if cli.dump_bytecode {
        return;
    }

    if cli.repl || cli.files.is_empty() {
        run_repl(&mut rt);
    }
}

fn dump_file(rt: &mut Runtime, path: &Path) -> Result<(), FoxError> {
    let source = fs::read_to_string(path).map_err(|source| FoxError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        rt.loader.import_dirs.insert(0, dir.to_path_buf());
    }
    let name = path
        .file_stem()
        .map_or_else(|| "main".to_string(), |s| s.to_string_lossy().into_owned());
    let module = rt.new_module(&name, Some(path.to_path_buf()));
    rt.load_source(module, &source)?;
    println!("== {} ==", path.display());
    print!("{}", rt.dump_module(module));
    Ok(())
}

fn report(err: &FoxError) {
    eprintln!("Error: {err}");
    for entry in err.trace() {
        eprintln!("    {entry}");
    }
}

fn run_repl(rt: &mut Runtime) {
    println!("fox REPL");
    println!("Type 'exit' to quit.");

    let module = rt.new_module("repl", None);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input_buffer = String::new();

    loop {
        print!("{}", if input_buffer.is_empty() { "> " } else { ". " });
        if let Err(err) = stdout.flush() {
            eprintln!("Error flushing stdout: {err}");
            break;
        }

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if input_buffer.is_empty() {
                    let input = line.trim();
                    if input == "exit" {
                        break;
                    }
                    if input.is_empty() {
                        continue;
                    }
                }
                input_buffer.push_str(&line);
                if !fragment_is_complete(&input_buffer) {
                    continue;
                }

                match rt.eval(module, &input_buffer) {
                    Ok(Value::Nil) => {}
                    Ok(value) => {
                        match rt.display(value) {
                            Ok(text) => println!("{text}"),
                            Err(err) => report(&err),
                        }
                        rt.release(value);
                    }
                    Err(err) => report(&err),
                }
                input_buffer.clear();
            }
            Err(err) => {
                eprintln!("Error reading input: {err}");
                break;
            }
        }
    }
}
