//! nic compiler library.
//!
//! Compiles nic source (a small C-like language for MCU boards) into the
//! textual object image executed by the on-target interpreter. The pipeline:
//! tokenizer -> statement parser (expression lists, infix-to-postfix,
//! peephole optimizer) -> forward-reference resolution -> object writer.
//!
//! All compilation state lives in one owned [`ast::Program`]; a compilation
//! leaves nothing behind, so the compiler can be invoked any number of times
//! from the same process.

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod expr;
pub mod functions;
pub mod lint;
pub mod optimizer;
pub mod parser;
pub mod postfix;
pub mod stats;
pub mod symbols;
pub mod token;
pub mod types;

pub use ast::Program;
pub use config::CompilerConfig;
pub use lint::{format_diagnostics, Diagnostic, LintConfig, Severity};
pub use parser::{Compilation, Parser};
pub use stats::{CompileStats, PoolReport};

use std::fs;
use std::path::{Path, PathBuf};

/// Result of [`compile_file`]: the full compilation (diagnostics included)
/// and the object path, present only when emission happened.
#[derive(Debug)]
pub struct CompileOutcome {
    pub compilation: Compilation,
    pub object_path: Option<PathBuf>,
}

/// Load the effective lint configuration: embedded defaults plus the user
/// file named by the config, if any.
pub fn load_lint_config(config: &CompilerConfig) -> Result<LintConfig, String> {
    let mut lint = LintConfig::default_config()?;
    if let Some(path) = &config.lint_config {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read lint config '{}': {}", path.display(), e))?;
        lint.merge(LintConfig::from_toml(&content)?);
    }
    Ok(lint)
}

/// Compile a source string. Always returns the compilation; check
/// [`Compilation::has_errors`] before emitting. The warning pass runs here
/// and configured-away warnings are dropped.
pub fn compile_source(source: &str, config: &CompilerConfig) -> Result<Compilation, String> {
    let lint_config = load_lint_config(config)?;
    let mut compilation = Parser::new().parse(source);
    compilation
        .diagnostics
        .extend(lint::check_program(&compilation.program));
    compilation.diagnostics.retain(|d| lint_config.keeps(d));
    compilation.diagnostics.sort_by_key(|d| d.line);
    Ok(compilation)
}

/// Compile a source file and, if it is error-free, write the object image
/// next to it (or to the configured output path).
pub fn compile_file(source_path: &Path, config: &CompilerConfig) -> Result<CompileOutcome, String> {
    let source = fs::read_to_string(source_path)
        .map_err(|e| format!("failed to read {}: {}", source_path.display(), e))?;
    let compilation = compile_source(&source, config)?;

    if compilation.has_errors() {
        return Ok(CompileOutcome {
            compilation,
            object_path: None,
        });
    }

    let image = codegen::write_object(&compilation.program).map_err(|e| e.to_string())?;
    let path = config
        .output
        .clone()
        .unwrap_or_else(|| object_path_for(source_path));
    fs::write(&path, image)
        .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
    Ok(CompileOutcome {
        compilation,
        object_path: Some(path),
    })
}

/// The object file sits next to the source with "ic" appended:
/// `blink.nic` compiles to `blink.nicic`.
pub fn object_path_for(source: &Path) -> PathBuf {
    let mut name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push("ic");
    source.with_file_name(name)
}
