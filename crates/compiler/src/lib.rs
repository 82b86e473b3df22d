//! Compiler front-end and bytecode generator for the Lumen scripting language.
//!
//! `compile()`/`compile_to_closure()` wire together the five pipeline stages this
//! crate otherwise exposes as separate modules (lexer is driven internally by
//! [`parser::parse`]; then [`sema1::run`], [`sema2::run`], [`codegen::generate`]) into
//! the one entry point a host embedding this crate actually wants. Nothing here
//! installs a global `tracing` subscriber — that is the CLI's job (see `main.rs`), not
//! a library's.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod delegate;
pub mod error;
pub mod ircode;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod sema1;
pub mod sema2;
pub mod symtab;
pub mod token;

pub use config::{CompilerConfig, ExternalBuiltin, OptimizationLevel};
pub use delegate::{Delegate, LoadedFile, UnitTestExpectation};
pub use error::{CompileError, ErrorKind};
pub use lumen_runtime::ModuleClosure;

use symtab::SymTabArena;

/// Compiles `source` under `file_id` with the given delegate and configuration, running
/// every stage (parse, sema1, sema2, codegen) in sequence and stopping at the first
/// stage that accumulates an error, matching spec.md §7's "abort between stages on
/// accumulated errors, continue within a stage" policy. On success, returns the
/// resulting [`ModuleClosure`]; on failure, every diagnostic collected by whichever
/// stage failed, plus everything before it.
pub fn compile(
    source: impl Into<String>,
    file_id: u32,
    config: &CompilerConfig,
    delegate: &mut Delegate,
) -> Result<ModuleClosure, Vec<CompileError>> {
    let span = tracing::span!(tracing::Level::DEBUG, "compile", file_id);
    let _guard = span.enter();

    tracing::debug!("lexing + parsing");
    let parser::ParseOutput {
        mut ast,
        root,
        errors: parse_errors,
        warnings: parse_warnings,
    } = parser::parse(source, file_id, delegate);

    for warning in &parse_warnings {
        (delegate.error)(warning);
    }
    if !parse_errors.is_empty() {
        for err in &parse_errors {
            (delegate.error)(err);
        }
        return Err(parse_errors);
    }

    let mut symtabs = SymTabArena::new();
    let mut errors = error::ErrorSink::new();

    tracing::debug!("sema1: declaration collection");
    let global = sema1::run(&mut ast, &mut symtabs, &root, &mut errors);
    if errors.has_errors() {
        return Err(report_and_return(delegate, errors));
    }

    tracing::debug!("sema2: identifier resolution");
    sema2::run(&mut ast, &mut symtabs, global, &root, config, &mut errors);
    if errors.has_errors() {
        return Err(report_and_return(delegate, errors));
    }

    tracing::debug!("codegen: AST -> IR -> bytecode");
    match codegen::generate(&mut ast, &symtabs, &root, config, &mut errors) {
        Some(closure) => {
            for warning in errors.warnings() {
                (delegate.error)(warning);
            }
            Ok(closure)
        }
        None => Err(report_and_return(delegate, errors)),
    }
}

/// Same as [`compile`] but takes the source from disk, tagging every diagnostic with
/// an [`ErrorKind::Io`] entry on read failure instead of panicking.
pub fn compile_to_closure(
    path: impl AsRef<std::path::Path>,
    config: &CompilerConfig,
    delegate: &mut Delegate,
) -> Result<ModuleClosure, Vec<CompileError>> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| {
        vec![CompileError::new(
            ErrorKind::Io,
            0,
            0,
            0,
            0,
            format!("failed to read {}: {e}", path.display()),
        )]
    })?;
    compile(source, 0, config, delegate)
}

fn report_and_return(delegate: &mut Delegate, errors: error::ErrorSink) -> Vec<CompileError> {
    for warning in errors.warnings() {
        (delegate.error)(warning);
    }
    let errors = errors.into_errors();
    for err in &errors {
        (delegate.error)(err);
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_trivial_source_to_a_closure() {
        let config = CompilerConfig::new();
        let mut delegate = Delegate::default();
        let closure = compile("var x = 1;", 0, &config, &mut delegate).unwrap();
        assert!(closure.arena().function_count() >= 1);
    }

    #[test]
    fn syntax_error_is_reported_and_returned() {
        let config = CompilerConfig::new();
        let mut delegate = Delegate::default();
        let result = compile("var x = ;", 0, &config, &mut delegate);
        assert!(result.is_err());
        assert!(!result.unwrap_err().is_empty());
    }

    #[test]
    fn unresolved_identifier_is_a_semantic_error() {
        let config = CompilerConfig::new();
        let mut delegate = Delegate::default();
        let result = compile("func f() { return nope; }", 0, &config, &mut delegate);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .iter()
            .any(|e| e.kind == ErrorKind::Semantic));
    }

    #[test]
    fn read_failure_reports_io_error() {
        let config = CompilerConfig::new();
        let mut delegate = Delegate::default();
        let result = compile_to_closure("/nonexistent/path/does-not-exist.lm", &config, &mut delegate);
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Io);
    }
}
