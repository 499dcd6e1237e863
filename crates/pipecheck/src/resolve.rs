//! Declaration front end: turns parsed declarations into a [`Registry`] over
//! a series of resolution passes.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::ast::{
    FieldDecl, Item, Program, SchemaBody, SchemaDecl, SchemaSlot, StageDecl, StageForm, TypeDecl,
    TypeExpr,
};
use crate::error::{Diagnostic, DiagnosticKind, Span};
use crate::generics::substitute_ref;
use crate::schema::{
    GenericBindings, NominalSchema, RecordSchema, Resolution, SchemaResolver, SchemaType, TypeRef,
};
use crate::stage::{Behavior, StageDescriptor};

const MAX_ALIAS_DEPTH: usize = 32;

#[derive(Debug, Clone)]
enum SchemaDef {
    Nominal {
        params: Vec<String>,
        parents: Vec<String>,
    },
    Record {
        params: Vec<String>,
        fields: IndexMap<String, TypeRef>,
    },
    Alias {
        params: Vec<String>,
        target: TypeRef,
    },
}

impl SchemaDef {
    fn params(&self) -> &[String] {
        match self {
            SchemaDef::Nominal { params, .. }
            | SchemaDef::Record { params, .. }
            | SchemaDef::Alias { params, .. } => params,
        }
    }
}

/// Resolved declarations. Read-only once handed to the checker.
#[derive(Debug, Default)]
pub struct Registry {
    schemas: HashMap<String, SchemaDef>,
    stages: HashMap<String, Arc<StageDescriptor>>,
    final_pass: bool,
}

impl Registry {
    pub fn contains_schema(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Registered stages, sorted by identity.
    pub fn stages(&self) -> Vec<&Arc<StageDescriptor>> {
        let mut stages = self.stages.values().collect::<Vec<_>>();
        stages.sort_by(|a, b| a.identity.cmp(&b.identity));
        stages
    }

    fn miss<T>(&self) -> Resolution<T> {
        if self.final_pass {
            Resolution::Unresolvable
        } else {
            Resolution::Deferred
        }
    }

    fn resolve_at(&self, ty: &TypeRef, depth: usize) -> Resolution<SchemaType> {
        let (name, args) = match ty {
            TypeRef::Any => return Resolution::Resolved(SchemaType::Any),
            TypeRef::Var { name } => {
                return Resolution::Resolved(SchemaType::TypeVar { name: name.clone() })
            }
            TypeRef::Named { name, args } => (name, args),
        };

        let Some(def) = self.schemas.get(name) else {
            return self.miss();
        };
        let params = def.params();
        if args.len() > params.len() {
            return Resolution::Unresolvable;
        }

        // Parameters without an argument stay open under a qualified name so
        // they cannot capture a variable of the enclosing stage.
        let bindings = params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                let bound = args
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| TypeRef::var(format!("{name}.{param}")));
                (param.clone(), bound)
            })
            .collect::<GenericBindings>();

        match def {
            SchemaDef::Nominal { parents, .. } => Resolution::Resolved(SchemaType::Nominal(NominalSchema {
                name: name.clone(),
                args: args.clone(),
                parents: parents.clone(),
            })),
            SchemaDef::Record { params, fields } => Resolution::Resolved(SchemaType::Record(RecordSchema {
                name: name.clone(),
                args: args.clone(),
                type_params: params.clone(),
                fields: fields
                    .iter()
                    .map(|(key, ty)| (key.clone(), substitute_ref(ty, &bindings)))
                    .collect(),
            })),
            SchemaDef::Alias { target, .. } => {
                if depth >= MAX_ALIAS_DEPTH {
                    return Resolution::Unresolvable;
                }
                self.resolve_at(&substitute_ref(target, &bindings), depth + 1)
            }
        }
    }
}

impl SchemaResolver for Registry {
    fn resolve_stage(&self, identity: &str) -> Resolution<Arc<StageDescriptor>> {
        match self.stages.get(identity) {
            Some(stage) => Resolution::Resolved(Arc::clone(stage)),
            None => self.miss(),
        }
    }

    fn resolve_type(&self, ty: &TypeRef) -> Resolution<SchemaType> {
        self.resolve_at(ty, 0)
    }

    fn is_nominal_subtype(&self, sub: &str, sup: &str) -> bool {
        matches!(
            self.schemas.get(sub),
            Some(SchemaDef::Nominal { parents, .. }) if parents.iter().any(|parent| parent == sup)
        )
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Type(TypeDecl),
    Alias {
        decl: SchemaDecl,
        target: TypeRef,
    },
    Stage {
        decl: StageDecl,
        behavior: Option<Behavior>,
        input: Option<TypeRef>,
        output: Option<TypeRef>,
    },
}

impl Pending {
    fn describe(&self) -> (&'static str, &str, Span) {
        match self {
            Pending::Type(decl) => ("type", &decl.name, decl.span),
            Pending::Alias { decl, .. } => ("schema", &decl.name, decl.span),
            Pending::Stage { decl, .. } => ("stage", &decl.name, decl.span),
        }
    }
}

/// A reference to validate once every declaration has had its chance.
#[derive(Debug, Clone)]
struct Reference {
    ty: TypeRef,
    owner: String,
    span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome {
    pub resolved: usize,
    pub remaining: usize,
}

pub struct ResolutionSession {
    registry: Registry,
    pending: Vec<Pending>,
    references: Vec<Reference>,
    declared: HashMap<String, Option<Span>>,
    diagnostics: Vec<Diagnostic>,
    passes: usize,
}

impl ResolutionSession {
    /// Takes in the prelude followed by `program`. Duplicate names and
    /// malformed declarations are reported here; everything else waits for
    /// [`run_pass`](Self::run_pass).
    pub fn new(program: &Program) -> Self {
        let mut session = Self {
            registry: Registry::default(),
            pending: Vec::new(),
            references: Vec::new(),
            declared: HashMap::new(),
            diagnostics: Vec::new(),
            passes: 0,
        };

        for item in prelude() {
            session.intake(&item, true);
        }
        for item in &program.items {
            session.intake(item, false);
        }
        session
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn into_registry(self) -> Registry {
        self.registry
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Resolves every pending declaration whose dependencies are available,
    /// in declaration order.
    pub fn run_pass(&mut self) -> PassOutcome {
        self.passes += 1;
        let pending = std::mem::take(&mut self.pending);
        let mut resolved = 0usize;

        for decl in pending {
            if self.try_resolve(&decl) {
                resolved += 1;
            } else {
                self.pending.push(decl);
            }
        }

        let outcome = PassOutcome {
            resolved,
            remaining: self.pending.len(),
        };
        debug!(pass = self.passes, resolved, remaining = outcome.remaining, "resolution pass");
        outcome
    }

    /// Declares the current pass final. Lookups of unknown names become
    /// unresolvable and whatever is still pending is reported.
    pub fn finalize(&mut self) {
        if self.registry.final_pass {
            return;
        }
        self.registry.final_pass = true;

        for decl in &self.pending {
            let (kind, name, span) = decl.describe();
            let message = match self.blocking_dependency(decl) {
                Some(dependency) => format!(
                    "{kind} '{name}' cannot be resolved: '{dependency}' is undeclared or part of a cycle"
                ),
                None => format!(
                    "{kind} '{name}' was not resolved within {} resolution pass(es)",
                    self.passes
                ),
            };
            self.diagnostics
                .push(Diagnostic::error(DiagnosticKind::Declaration, message, span));
        }

        let references = std::mem::take(&mut self.references);
        for reference in &references {
            self.validate_reference(&reference.ty, reference);
        }
        debug!(passes = self.passes, unresolved = self.pending.len(), "resolution finalized");
    }

    fn intake(&mut self, item: &Item, prelude: bool) {
        match item {
            Item::Import(_) | Item::Pipeline(_) => {}
            Item::Type(decl) => {
                if self.declare(&decl.name, decl.span, prelude) {
                    self.check_params(&decl.name, &decl.generics, decl.span);
                    self.pending.push(Pending::Type(decl.clone()));
                }
            }
            Item::Schema(decl) => {
                if !self.declare(&decl.name, decl.span, prelude) {
                    return;
                }
                self.check_params(&decl.name, &decl.generics, decl.span);
                match &decl.body {
                    SchemaBody::Record(fields) => {
                        self.register_record(&decl.name, &decl.generics, fields)
                    }
                    SchemaBody::Alias(target) => {
                        let target = lower_type(target, &decl.generics);
                        self.pending.push(Pending::Alias {
                            decl: decl.clone(),
                            target,
                        });
                    }
                }
            }
            Item::Stage(decl) => {
                if !self.declare(&decl.name, decl.span, prelude) {
                    return;
                }
                self.check_params(&decl.name, &decl.generics, decl.span);
                let behavior = self.stage_behavior(decl);
                let input = self.lower_slot(decl, &decl.input, "Input");
                let output = self.lower_slot(decl, &decl.output, "Output");
                self.pending.push(Pending::Stage {
                    decl: decl.clone(),
                    behavior,
                    input,
                    output,
                });
            }
        }
    }

    fn declare(&mut self, name: &str, span: Span, prelude: bool) -> bool {
        match self.declared.get(name) {
            Some(None) => {
                self.declaration_error(format!("'{name}' is already declared by the prelude"), span);
                false
            }
            Some(Some(_)) => {
                self.declaration_error(format!("duplicate declaration '{name}'"), span);
                false
            }
            None => {
                self.declared
                    .insert(name.to_string(), if prelude { None } else { Some(span) });
                true
            }
        }
    }

    fn check_params(&mut self, owner: &str, params: &[String], span: Span) {
        for (index, param) in params.iter().enumerate() {
            if params[..index].contains(param) {
                self.declaration_error(format!("duplicate type parameter '{param}' in '{owner}'"), span);
            }
        }
    }

    fn stage_behavior(&mut self, decl: &StageDecl) -> Option<Behavior> {
        let marker = decl.marker.as_ref();
        match decl.form {
            StageForm::Source => {
                if let Some(marker) = marker.filter(|marker| marker.name != "source") {
                    self.declaration_error(
                        format!("source '{}' cannot be marked '@{}'", decl.name, marker.name),
                        marker.span,
                    );
                }
                Some(Behavior::Source)
            }
            StageForm::Stage => {
                let marker = marker?;
                let behavior = Behavior::from_marker(&marker.name);
                if behavior.is_none() {
                    self.declaration_error(
                        format!(
                            "unknown stage marker '@{}' on '{}'; expected @identity, @sink, @source or @regular",
                            marker.name, decl.name
                        ),
                        marker.span,
                    );
                }
                behavior
            }
        }
    }

    fn lower_slot(&mut self, decl: &StageDecl, slot: &SchemaSlot, role: &str) -> Option<TypeRef> {
        match slot {
            SchemaSlot::Undeclared => None,
            SchemaSlot::Named(expr) => {
                let ty = lower_type(expr, &decl.generics);
                self.references.push(Reference {
                    ty: ty.clone(),
                    owner: format!("stage '{}'", decl.name),
                    span: expr.span,
                });
                Some(ty)
            }
            SchemaSlot::Inline(fields) => {
                let name = format!("{}.{role}", decl.name);
                self.register_record(&name, &decl.generics, fields);
                let args = decl.generics.iter().map(TypeRef::var).collect();
                Some(TypeRef::generic(name, args))
            }
        }
    }

    fn register_record(&mut self, name: &str, params: &[String], fields: &[FieldDecl]) {
        let mut lowered = IndexMap::new();
        for field in fields {
            if lowered.contains_key(&field.name) {
                self.declaration_error(
                    format!("duplicate field '{}' in schema '{name}'", field.name),
                    field.span,
                );
                continue;
            }
            let ty = lower_type(&field.ty, params);
            self.references.push(Reference {
                ty: ty.clone(),
                owner: format!("field '{}' of schema '{name}'", field.name),
                span: field.ty.span,
            });
            lowered.insert(field.name.clone(), ty);
        }

        trace!(schema = name, fields = lowered.len(), "registered record");
        self.registry.schemas.insert(
            name.to_string(),
            SchemaDef::Record {
                params: params.to_vec(),
                fields: lowered,
            },
        );
    }

    fn try_resolve(&mut self, decl: &Pending) -> bool {
        if self.blocking_dependency(decl).is_some() {
            return false;
        }

        match decl {
            Pending::Type(decl) => {
                let mut chain: Vec<String> = Vec::new();
                let mut rejected = Vec::new();
                for parent in &decl.parents {
                    match self.registry.schemas.get(parent) {
                        Some(SchemaDef::Nominal { parents, .. }) => {
                            for name in std::iter::once(parent).chain(parents) {
                                if !chain.contains(name) {
                                    chain.push(name.clone());
                                }
                            }
                        }
                        _ => rejected.push(parent),
                    }
                }
                for parent in rejected {
                    self.declaration_error(
                        format!(
                            "type '{}' cannot extend '{parent}', which is not a nominal type",
                            decl.name
                        ),
                        decl.span,
                    );
                }
                trace!(ty = %decl.name, parents = ?chain, "resolved type");
                self.registry.schemas.insert(
                    decl.name.clone(),
                    SchemaDef::Nominal {
                        params: decl.generics.clone(),
                        parents: chain,
                    },
                );
            }
            Pending::Alias { decl, target } => {
                self.references.push(Reference {
                    ty: target.clone(),
                    owner: format!("schema '{}'", decl.name),
                    span: decl.span,
                });
                trace!(alias = %decl.name, target = %target, "resolved alias");
                self.registry.schemas.insert(
                    decl.name.clone(),
                    SchemaDef::Alias {
                        params: decl.generics.clone(),
                        target: target.clone(),
                    },
                );
            }
            Pending::Stage {
                decl,
                behavior,
                input,
                output,
            } => {
                let descriptor = StageDescriptor {
                    identity: decl.name.clone(),
                    declared_behavior: *behavior,
                    input: input.clone(),
                    output: output.clone(),
                    type_params: decl.generics.clone(),
                    terminal: false,
                    span: decl.span,
                };
                trace!(stage = %decl.name, "resolved stage");
                self.registry
                    .stages
                    .insert(decl.name.clone(), Arc::new(descriptor));
            }
        }
        true
    }

    /// First name `decl` is still waiting on.
    fn blocking_dependency(&self, decl: &Pending) -> Option<String> {
        let known = |name: &str| self.registry.schemas.contains_key(name);
        match decl {
            Pending::Type(decl) => decl.parents.iter().find(|parent| !known(parent)).cloned(),
            Pending::Alias { target, .. } => target
                .head()
                .filter(|head| !known(head))
                .map(str::to_string),
            Pending::Stage { input, output, .. } => [input, output]
                .into_iter()
                .flatten()
                .filter_map(TypeRef::head)
                .find(|head| !known(head))
                .map(str::to_string),
        }
    }

    fn validate_reference(&mut self, ty: &TypeRef, reference: &Reference) {
        let TypeRef::Named { name, args } = ty else {
            return;
        };

        let arity = self.registry.schemas.get(name).map(|def| def.params().len());
        match arity {
            // Already reported as unresolved.
            None if self.is_pending_schema(name) => {}
            None => self.declaration_error(
                format!("unknown type '{name}' in {}", reference.owner),
                reference.span,
            ),
            Some(expected) if !args.is_empty() && args.len() != expected => {
                self.declaration_error(
                    format!(
                        "'{name}' expects {expected} type argument(s), found {} in {}",
                        args.len(),
                        reference.owner
                    ),
                    reference.span,
                );
            }
            Some(_) => {}
        }

        for arg in args {
            self.validate_reference(arg, reference);
        }
    }

    fn is_pending_schema(&self, name: &str) -> bool {
        self.pending.iter().any(|decl| match decl {
            Pending::Type(decl) => decl.name == name,
            Pending::Alias { decl, .. } => decl.name == name,
            Pending::Stage { .. } => false,
        })
    }

    fn declaration_error(&mut self, message: String, span: Span) {
        self.diagnostics
            .push(Diagnostic::error(DiagnosticKind::Declaration, message, span));
    }
}

/// Runs passes until nothing changes or `max_passes` is reached, then
/// finalizes.
pub fn resolve_program(program: &Program, max_passes: usize) -> (Registry, Vec<Diagnostic>) {
    let mut session = ResolutionSession::new(program);
    loop {
        let outcome = session.run_pass();
        if outcome.resolved == 0 || outcome.remaining == 0 || session.passes() >= max_passes {
            break;
        }
    }
    session.finalize();
    let diagnostics = session.take_diagnostics();
    (session.into_registry(), diagnostics)
}

/// Names in `params` become variables and `Any` the wildcard.
pub fn lower_type(expr: &TypeExpr, params: &[String]) -> TypeRef {
    if expr.args.is_empty() {
        if params.contains(&expr.name) {
            return TypeRef::var(&expr.name);
        }
        if expr.name == "Any" {
            return TypeRef::Any;
        }
    }

    TypeRef::generic(
        expr.name.clone(),
        expr.args.iter().map(|arg| lower_type(arg, params)).collect(),
    )
}

fn prelude() -> Vec<Item> {
    let span = Span::default();
    let nominal = |name: &str, generics: &[&str], parents: &[&str]| {
        Item::Type(TypeDecl {
            name: name.to_string(),
            generics: generics.iter().map(|g| g.to_string()).collect(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            span,
        })
    };
    let stage = |name: &str, output: SchemaSlot| {
        Item::Stage(StageDecl {
            name: name.to_string(),
            form: StageForm::Stage,
            generics: Vec::new(),
            input: SchemaSlot::Undeclared,
            output,
            marker: None,
            span,
        })
    };

    vec![
        nominal("Float", &[], &[]),
        nominal("Int", &[], &["Float"]),
        nominal("Bool", &[], &["Int"]),
        nominal("Str", &[], &[]),
        nominal("Bytes", &[], &[]),
        nominal("None", &[], &[]),
        nominal("List", &["T"], &[]),
        nominal("Dict", &["K", "V"], &[]),
        nominal("Optional", &["T"], &[]),
        Item::Schema(SchemaDecl {
            name: "Void".to_string(),
            generics: Vec::new(),
            body: SchemaBody::Record(Vec::new()),
            span,
        }),
        stage("Print", SchemaSlot::Undeclared),
        stage("Dump", SchemaSlot::Undeclared),
        stage(
            "Stop",
            SchemaSlot::Named(TypeExpr {
                name: "Void".to_string(),
                args: Vec::new(),
                span,
            }),
        ),
    ]
}
