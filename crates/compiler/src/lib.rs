//! Pasc compiler library
//!
//! Compiles a standard Pascal subset to EWVM assembly. The pipeline is
//! lexer → parser (with scope management and type checking) → optional AST
//! optimizer → code generator → optional peephole optimizer → textual
//! export. Diagnostics accumulate in a [`Diagnostics`] sink across all
//! phases; a phase that recorded any error fails the compilation once it
//! finishes its sweep.
//!
//! ```rust,ignore
//! use pasc::{CompilerConfig, Diagnostics, compile_source};
//!
//! let mut diagnostics = Diagnostics::new();
//! let assembly = compile_source(source, &CompilerConfig::new(), &mut diagnostics)?;
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod symbols;
pub mod typechecker;

pub use ast::Program;
pub use config::CompilerConfig;
pub use diagnostics::{Diagnostic, Diagnostics, Severity, Span};
pub use parser::Parser;
pub use symbols::SymbolTable;

use std::fmt;
use std::fs;
use std::path::Path;

use tracing::debug;

/// Which phase aborted the compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Lexer,
    Parser,
    CodeGen(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lexer => f.write_str("Lexer failed. Aborting ..."),
            CompileError::Parser => f.write_str("Parser failed. Aborting ..."),
            CompileError::CodeGen(message) => write!(f, "Code generation failed: {}", message),
        }
    }
}

impl std::error::Error for CompileError {}

/// Compile a source text to EWVM assembly.
///
/// Diagnostics (errors and warnings, including warnings raised while
/// rendering the assembly) end up in `diagnostics`; the caller decides how
/// to present them.
pub fn compile_source(
    source: &str,
    config: &CompilerConfig,
    diagnostics: &mut Diagnostics,
) -> Result<String, CompileError> {
    let tokens = lexer::tokenize(source, diagnostics);
    if diagnostics.has_errors() {
        return Err(CompileError::Lexer);
    }
    debug!(tokens = tokens.len(), "lexing complete");

    let program = Parser::new(tokens, diagnostics).parse();
    let mut program = match program {
        Some(program) if !diagnostics.has_errors() => program,
        _ => return Err(CompileError::Parser),
    };
    debug!(name = %program.name, "parsing complete");

    if config.optimize {
        optimizer::optimize_program(&mut program);
        debug!("ast optimization complete");
    }

    let mut items =
        codegen::generate(&program).map_err(|e| CompileError::CodeGen(e.message))?;
    debug!(items = items.len(), "code generation complete");

    if !config.debug_symbols {
        items = ewvm::remove_comments(items);
    }
    if config.optimize {
        let before = items.len();
        items = ewvm::peephole::optimize(items);
        debug!(before, after = items.len(), "peephole optimization complete");
    }

    let (text, warnings) = ewvm::export_assembly(&items);
    for warning in warnings {
        diagnostics.warning_unlocalized(warning);
    }
    Ok(text)
}

/// Compile a source file to an assembly file, printing diagnostics to
/// stderr along the way.
pub fn compile_file(
    source_path: &Path,
    output_path: &Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let source = fs::read_to_string(source_path)
        .map_err(|e| format!("Failed to open source file: {}", e))?;

    let mut diagnostics = Diagnostics::new();
    let result = compile_source(&source, config, &mut diagnostics);

    if !diagnostics.is_empty() {
        eprint!(
            "{}",
            diagnostics.render(&source_path.display().to_string(), &source)
        );
    }

    match result {
        Ok(assembly) => fs::write(output_path, assembly)
            .map_err(|e| format!("Failed to write to output file: {}", e)),
        Err(error) => Err(error.to_string()),
    }
}
