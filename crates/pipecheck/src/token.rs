use crate::error::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    KwImport,
    KwType,
    KwSchema,
    KwStage,
    KwSource,
    KwPipeline,
    Ident(String),
    StringLiteral(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LAngle,
    RAngle,
    Comma,
    Colon,
    Semicolon,
    Eq,
    Star,
    At,
    Underscore,
    Arrow,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::KwImport => "'import'",
            TokenKind::KwType => "'type'",
            TokenKind::KwSchema => "'schema'",
            TokenKind::KwStage => "'stage'",
            TokenKind::KwSource => "'source'",
            TokenKind::KwPipeline => "'pipeline'",
            TokenKind::Ident(_) => "identifier",
            TokenKind::StringLiteral(_) => "string literal",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LAngle => "'<'",
            TokenKind::RAngle => "'>'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Eq => "'='",
            TokenKind::Star => "'*'",
            TokenKind::At => "'@'",
            TokenKind::Underscore => "'_'",
            TokenKind::Arrow => "'->'",
            TokenKind::Eof => "end of file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}
