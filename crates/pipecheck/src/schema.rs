//! Resolved schema types and the resolver interface the checker consumes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::stage::StageDescriptor;

/// Reference to a schema type, possibly generic, as it appears in a stage
/// slot or a record field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeRef {
    Named { name: String, args: Vec<TypeRef> },
    Var { name: String },
    Any,
}

/// Type variable name → concrete reference, for one instantiation.
pub type GenericBindings = BTreeMap<String, TypeRef>;

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeRef>) -> Self {
        Self::Named {
            name: name.into(),
            args,
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::Var { name: name.into() }
    }

    pub fn head(&self) -> Option<&str> {
        match self {
            TypeRef::Named { name, .. } => Some(name),
            TypeRef::Var { .. } | TypeRef::Any => None,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TypeRef::Any)
    }

    /// Type variables in first-occurrence order, without repeats.
    pub fn free_vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            TypeRef::Var { name } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            TypeRef::Named { args, .. } => {
                for arg in args {
                    arg.collect_vars(out);
                }
            }
            TypeRef::Any => {}
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named { name, args } => write_applied(f, name, args),
            TypeRef::Var { name } => f.write_str(name),
            TypeRef::Any => f.write_str("Any"),
        }
    }
}

fn write_applied(f: &mut fmt::Formatter<'_>, name: &str, args: &[TypeRef]) -> fmt::Result {
    if args.is_empty() {
        return f.write_str(name);
    }

    let args = args
        .iter()
        .map(|arg| arg.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    write!(f, "{name}<{args}>")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSchema {
    pub name: String,
    pub args: Vec<TypeRef>,
    pub type_params: Vec<String>,
    pub fields: IndexMap<String, TypeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NominalSchema {
    pub name: String,
    pub args: Vec<TypeRef>,
    /// Transitive parent chain, nearest first.
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaType {
    Record(RecordSchema),
    Nominal(NominalSchema),
    Any,
    TypeVar { name: String },
}

impl SchemaType {
    pub fn is_any(&self) -> bool {
        matches!(self, SchemaType::Any)
    }

    pub fn as_record(&self) -> Option<&RecordSchema> {
        match self {
            SchemaType::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Field map of a record; `None` for every other shape.
    pub fn fields(&self) -> Option<&IndexMap<String, TypeRef>> {
        self.as_record().map(|record| &record.fields)
    }

    /// Qualified name used for identity comparison.
    pub fn qualified_name(&self) -> String {
        self.to_string()
    }

    pub fn free_vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            SchemaType::Record(record) => {
                for ty in record.args.iter().chain(record.fields.values()) {
                    ty.collect_vars(&mut out);
                }
            }
            SchemaType::Nominal(nominal) => {
                for ty in &nominal.args {
                    ty.collect_vars(&mut out);
                }
            }
            SchemaType::TypeVar { name } => out.push(name.clone()),
            SchemaType::Any => {}
        }
        out
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaType::Record(record) => write_applied(f, &record.name, &record.args),
            SchemaType::Nominal(nominal) => write_applied(f, &nominal.name, &nominal.args),
            SchemaType::Any => f.write_str("Any"),
            SchemaType::TypeVar { name } => f.write_str(name),
        }
    }
}

/// Outcome of a lookup that may need another resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved(T),
    /// Not available yet; retry after the next pass.
    Deferred,
    Unresolvable,
}

impl<T> Resolution<T> {
    pub fn resolved(self) -> Option<T> {
        match self {
            Resolution::Resolved(value) => Some(value),
            Resolution::Deferred | Resolution::Unresolvable => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolution::Deferred)
    }
}

/// What the checker needs from the declaration front end.
pub trait SchemaResolver: Sync {
    fn resolve_stage(&self, identity: &str) -> Resolution<Arc<StageDescriptor>>;

    fn resolve_type(&self, ty: &TypeRef) -> Resolution<SchemaType>;

    /// Whether nominal type `sub` lists `sup` in its parent chain.
    fn is_nominal_subtype(&self, sub: &str, sup: &str) -> bool;
}
