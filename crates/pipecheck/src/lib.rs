pub mod ast;
pub mod classify;
pub mod compose;
pub mod config;
pub mod driver;
pub mod error;
pub mod generics;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod resolve;
pub mod schema;
pub mod stage;
pub mod subtype;
pub mod token;


use std::path::Path;

use ast::Program;
use config::CheckConfig;
use driver::CheckReport;
use error::Diagnostic;
use loader::SourceMap;

pub use compose::{check_composition, check_edge, CheckContext, Composition, CompositionError, EdgeVerdict};

/// Result of checking an entry file and its imports.
#[derive(Debug, Clone)]
pub struct EntryCheck {
    pub source_map: SourceMap,
    pub report: CheckReport,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn parse_source(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let tokens = lexer::lex(source).map_err(|error| vec![error])?;
    parser::parse(&tokens).map_err(|error| vec![error])
}

pub fn check_source(source: &str) -> Vec<Diagnostic> {
    check_source_with_config(source, &CheckConfig::default()).1
}

pub fn check_source_with_config(source: &str, config: &CheckConfig) -> (CheckReport, Vec<Diagnostic>) {
    let program = match parse_source(source) {
        Ok(program) => program,
        Err(parse_errors) => return (CheckReport::default(), parse_errors),
    };

    let mut diagnostics = Vec::new();
    let report = driver::check_program(&program, config, &mut diagnostics);
    (report, diagnostics)
}

/// Loads `entry` with its imports and checks the combined program. Only
/// load failures are returned as `Err`.
pub fn check_entry(entry: &Path, config: &CheckConfig) -> Result<EntryCheck, Vec<Diagnostic>> {
    let source_map = loader::load_source_map(entry)?;
    let (report, diagnostics) = check_source_with_config(&source_map.combined, config);
    Ok(EntryCheck {
        source_map,
        report,
        diagnostics,
    })
}
