//! Lumen compiler CLI.
//!
//! Command-line front end around [`lumenc::compile`]/[`lumenc::compile_to_closure`].
//! There is no virtual machine in this crate (spec Non-goals) — `-x` exists only to
//! name the intended next step explicitly rather than silently doing nothing.

use clap::Parser as ClapParser;
use lumen_runtime::{ClassObject, FunctionHandle, FunctionObject};
use lumenc::{CompileError, CompilerConfig, Delegate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "lumenc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Lumen compiler front end", long_about = None)]
struct Cli {
    /// Source file to compile (bare positional form of `-c`).
    file: Option<PathBuf>,

    /// Compile the given input file to a serialized module closure.
    #[arg(short = 'c', long = "compile", value_name = "INPUT")]
    compile: Option<PathBuf>,

    /// Output path for `-c`; defaults to the input path with a `.lmc` extension.
    #[arg(short = 'o', long = "output", value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Load and execute a previously compiled module. Not supported: this crate is a
    /// front end only, with no virtual machine to run the bytecode it emits.
    #[arg(short = 'x', long = "execute", value_name = "COMPILED")]
    execute: Option<PathBuf>,

    /// Compile a literal source string instead of reading a file.
    #[arg(short = 'i', long = "source", value_name = "SOURCE")]
    inline_source: Option<String>,

    /// Suppress the tracing subscriber.
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Path to a `lumenc.toml` config file declaring extern globals and pipeline
    /// options.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
}

/// On-disk form of a compiled module. `RuntimeArena`/`ModuleClosure` don't derive
/// `Serialize` themselves (the arena is an internal compiler sandbox, not a stable
/// wire format); this is the CLI's own narrow persisted shape, built from the pieces
/// that do (`FunctionObject`/`ClassObject`), matching spec.md §6.5's "opaque blob the
/// VM can load" without this crate needing to own that format's long-term stability.
#[derive(Serialize, Deserialize)]
struct SerializedModule {
    entry: FunctionHandle,
    functions: Vec<FunctionObject>,
    classes: Vec<ClassObject>,
}

fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }

    if let Some(compiled) = cli.execute {
        eprintln!(
            "lumenc: execution is out of scope for this crate (no VM); \
             {} was compiled, not run",
            compiled.display()
        );
        process::exit(1);
    }

    let config = match load_config(cli.config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("lumenc: {e}");
            process::exit(2);
        }
    };

    let input = cli.compile.clone().or_else(|| cli.file.clone());

    if let Some(source) = cli.inline_source {
        run_compile_source(source, 0, &config, cli.output.as_deref());
        return;
    }

    match input {
        Some(path) => run_compile_file(&path, &config, cli.output.as_deref()),
        None => {
            eprintln!("lumenc: no input; pass a file, -c <input>, or -i <source>");
            process::exit(2);
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<CompilerConfig, String> {
    let Some(path) = path else {
        return Ok(CompilerConfig::new());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    CompilerConfig::from_toml_str(&text)
        .map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

fn run_compile_file(input: &std::path::Path, config: &CompilerConfig, output: Option<&std::path::Path>) {
    let mut delegate = Delegate::default();
    match lumenc::compile_to_closure(input, config, &mut delegate) {
        Ok(closure) => {
            let default_output = input.with_extension("lmc");
            let output = output.unwrap_or(&default_output);
            write_closure(&closure, output);
            println!("compiled {} -> {}", input.display(), output.display());
        }
        Err(errors) => exit_on_errors(&errors),
    }
}

fn run_compile_source(
    source: String,
    file_id: u32,
    config: &CompilerConfig,
    output: Option<&std::path::Path>,
) {
    let mut delegate = Delegate::default();
    match lumenc::compile(source, file_id, config, &mut delegate) {
        Ok(closure) => {
            if let Some(output) = output {
                write_closure(&closure, output);
                println!("compiled inline source -> {}", output.display());
            } else {
                println!(
                    "compiled inline source: {} function(s), {} class(es)",
                    closure.arena().function_count(),
                    closure.arena().class_count()
                );
            }
        }
        Err(errors) => exit_on_errors(&errors),
    }
}

fn write_closure(closure: &lumenc::ModuleClosure, output: &std::path::Path) {
    let serialized = SerializedModule {
        entry: closure.entry(),
        functions: closure.arena().functions().map(|(_, f)| f.clone()).collect(),
        classes: closure.arena().classes().map(|(_, c)| c.clone()).collect(),
    };
    let bytes = match serde_json::to_vec(&serialized) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("lumenc: failed to serialize module: {e}");
            process::exit(2);
        }
    };
    if let Err(e) = std::fs::write(output, bytes) {
        eprintln!("lumenc: failed to write {}: {e}", output.display());
        process::exit(2);
    }
}

fn exit_on_errors(errors: &[CompileError]) -> ! {
    for err in errors {
        eprintln!("{err}");
    }
    let is_io = errors.len() == 1 && errors[0].kind == lumenc::ErrorKind::Io;
    process::exit(if is_io { 2 } else { 1 });
}
