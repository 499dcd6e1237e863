use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Diagnostic, DiagnosticKind, Span};
use crate::lexer;
use crate::token::{Token, TokenKind};

pub const SOURCE_EXTENSION: &str = "pipe";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub source: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceMap {
    pub combined: String,
    pub files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn locate(&self, byte_index: usize) -> Option<&SourceFile> {
        self.files
            .iter()
            .find(|file| byte_index >= file.start && byte_index < file.end)
    }

    /// `path:line:col` for a combined byte offset.
    pub fn render_location(&self, byte_index: usize) -> String {
        match self.locate(byte_index) {
            Some(file) => {
                let relative = byte_index.saturating_sub(file.start);
                let (line, col) = byte_to_line_col(&file.source, relative);
                format!("{}:{line}:{col}", file.path.display())
            }
            None => {
                let (line, col) = byte_to_line_col(&self.combined, byte_index);
                format!("{line}:{col}")
            }
        }
    }
}

/// Loads `entry` and everything it imports, depth first, each file once.
pub fn load_source_map(entry: &Path) -> Result<SourceMap, Vec<Diagnostic>> {
    let mut loader = Loader {
        combined: String::new(),
        files: Vec::new(),
        visited: HashSet::new(),
    };

    loader.load_file(entry)?;
    Ok(SourceMap {
        combined: loader.combined,
        files: loader.files,
    })
}

struct Loader {
    combined: String,
    files: Vec<SourceFile>,
    visited: HashSet<PathBuf>,
}

impl Loader {
    fn load_file(&mut self, path: &Path) -> Result<(), Vec<Diagnostic>> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !self.visited.insert(canonical) {
            return Ok(());
        }

        let source = fs::read_to_string(path).map_err(|error| {
            vec![Diagnostic::error(
                DiagnosticKind::Load,
                format!("failed to read file '{}': {error}", path.display()),
                Span::new(0, 0),
            )]
        })?;
        debug!(path = %path.display(), bytes = source.len(), "loaded pipeline source");

        let tokens =
            lexer::lex(&source).map_err(|error| vec![qualify_diagnostic(path, &source, error)])?;
        let imports = collect_import_paths(&tokens)
            .map_err(|error| vec![qualify_diagnostic(path, &source, error)])?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        for import in imports {
            self.load_file(&resolve_import_path(base_dir, &import))?;
        }

        self.append_file(path, source);
        Ok(())
    }

    fn append_file(&mut self, path: &Path, mut source: String) {
        if !source.ends_with('\n') {
            source.push('\n');
        }
        source.push('\n');

        self.combined
            .push_str(&format!("// --- file: {} ---\n", path.display()));
        let start = self.combined.len();
        self.combined.push_str(&source);
        let end = self.combined.len();

        self.files.push(SourceFile {
            path: path.to_path_buf(),
            source,
            start,
            end,
        });
    }
}

fn collect_import_paths(tokens: &[Token]) -> Result<Vec<String>, Diagnostic> {
    let mut imports = Vec::new();
    let mut idx = 0usize;

    while let Some(token) = tokens.get(idx) {
        if token.kind != TokenKind::KwImport {
            idx += 1;
            continue;
        }

        let span = token.span;
        let Some(path_token) = tokens.get(idx + 1) else {
            return Err(Diagnostic::syntax(
                "import declaration is missing a string literal path",
                span,
            ));
        };
        let TokenKind::StringLiteral(path) = &path_token.kind else {
            return Err(Diagnostic::syntax(
                format!(
                    "import expects string literal path, found {}",
                    path_token.kind.describe()
                ),
                path_token.span,
            ));
        };
        if !matches!(
            tokens.get(idx + 2).map(|token| &token.kind),
            Some(TokenKind::Semicolon)
        ) {
            return Err(Diagnostic::syntax(
                "import declaration must end with ';'",
                span,
            ));
        }

        imports.push(path.clone());
        idx += 3;
    }

    Ok(imports)
}

fn resolve_import_path(base_dir: &Path, raw: &str) -> PathBuf {
    let candidate = Path::new(raw);
    let mut resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    };

    if resolved.extension().is_none() {
        resolved.set_extension(SOURCE_EXTENSION);
    }

    resolved
}

fn qualify_diagnostic(path: &Path, source: &str, diagnostic: Diagnostic) -> Diagnostic {
    let (line, col) = byte_to_line_col(source, diagnostic.span.start);
    let message = format!(
        "{}:{}:{}: {}",
        path.display(),
        line,
        col,
        diagnostic.message
    );
    Diagnostic {
        message,
        span: Span::new(0, 0),
        ..diagnostic
    }
}

pub fn byte_to_line_col(source: &str, byte_index: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (index, ch) in source.char_indices() {
        if index >= byte_index {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
