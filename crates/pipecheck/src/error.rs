use serde::Serialize;

/// Tag every composition failure message starts with.
pub const MISMATCH_TAG: &str = "Stream mismatch:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: Span) -> Self {
        Self::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Load,
    Syntax,
    Declaration,
    UnresolvedSymbol,
    MissingKey,
    FieldTypeMismatch,
    IncompatibleTypes,
    SourceAsTarget,
    UnresolvedGeneric,
    CompositionAfterSink,
    InvalidInstantiation,
    UncheckedComposition,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Syntax => "syntax",
            Self::Declaration => "declaration",
            Self::UnresolvedSymbol => "unresolved_symbol",
            Self::MissingKey => "missing_key",
            Self::FieldTypeMismatch => "field_type_mismatch",
            Self::IncompatibleTypes => "incompatible_types",
            Self::SourceAsTarget => "source_as_target",
            Self::UnresolvedGeneric => "unresolved_generic",
            Self::CompositionAfterSink => "composition_after_sink",
            Self::InvalidInstantiation => "invalid_instantiation",
            Self::UncheckedComposition => "unchecked_composition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Span,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, kind, message.into(), span)
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, kind, message.into(), span)
    }

    /// An error whose message carries the [`MISMATCH_TAG`] prefix.
    pub fn mismatch(kind: DiagnosticKind, message: impl AsRef<str>, span: Span) -> Self {
        Self::error(kind, format!("{MISMATCH_TAG} {}", message.as_ref()), span)
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::error(DiagnosticKind::Syntax, message, span)
    }

    fn new(severity: Severity, kind: DiagnosticKind, message: String, span: Span) -> Self {
        Self {
            severity,
            kind,
            message,
            span,
            field: None,
            expected: None,
            actual: None,
            producer: None,
            consumer: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_types(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    pub fn with_stages(mut self, producer: impl Into<String>, consumer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self.consumer = Some(consumer.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Receiver for diagnostics produced while checking.
///
/// Passed explicitly to the driver so callers (and tests) decide where
/// diagnostics go.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);

    fn report_all(&mut self, diagnostics: Vec<Diagnostic>) {
        for diagnostic in diagnostics {
            self.report(diagnostic);
        }
    }
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}
