use std::fmt;

use crate::error::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Import(ImportDecl),
    Type(TypeDecl),
    Schema(SchemaDecl),
    Stage(StageDecl),
    Pipeline(PipelineDecl),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    pub path: String,
    pub span: Span,
}

/// `type Int: Float;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: String,
    pub generics: Vec<String>,
    pub parents: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDecl {
    pub name: String,
    pub generics: Vec<String>,
    pub body: SchemaBody,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaBody {
    Record(Vec<FieldDecl>),
    Alias(TypeExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageForm {
    Stage,
    Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDecl {
    pub name: String,
    pub form: StageForm,
    pub generics: Vec<String>,
    pub input: SchemaSlot,
    pub output: SchemaSlot,
    pub marker: Option<Marker>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSlot {
    Undeclared,
    Named(TypeExpr),
    Inline(Vec<FieldDecl>),
}

/// `@identity` and friends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDecl {
    pub name: String,
    pub expr: PipelineExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineExpr {
    Stage(StageRef),
    Compose {
        left: Box<PipelineExpr>,
        right: Box<PipelineExpr>,
        op_span: Span,
    },
}

impl PipelineExpr {
    pub fn span(&self) -> Span {
        match self {
            PipelineExpr::Stage(stage) => stage.span,
            PipelineExpr::Compose { left, right, .. } => left.span().to(right.span()),
        }
    }

    /// Stage references in left-to-right order.
    pub fn stages(&self) -> Vec<&StageRef> {
        let mut out = Vec::new();
        self.collect_stages(&mut out);
        out
    }

    fn collect_stages<'a>(&'a self, out: &mut Vec<&'a StageRef>) {
        match self {
            PipelineExpr::Stage(stage) => out.push(stage),
            PipelineExpr::Compose { left, right, .. } => {
                left.collect_stages(out);
                right.collect_stages(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRef {
    pub name: String,
    pub args: Vec<TypeExpr>,
    pub span: Span,
}

/// A type as written, before names are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExpr {
    pub name: String,
    pub args: Vec<TypeExpr>,
    pub span: Span,
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return f.write_str(&self.name);
        }

        let args = self
            .args
            .iter()
            .map(|arg| arg.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}<{}>", self.name, args)
    }
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return f.write_str(&self.name);
        }

        let args = self
            .args
            .iter()
            .map(|arg| arg.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}<{}>", self.name, args)
    }
}
