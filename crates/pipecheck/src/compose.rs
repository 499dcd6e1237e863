//! Static checking of a single `A * B` composition edge.
//!
//! An edge moves through
//! `Start → ClassifyRhs → {ShortCircuit | Extract} → Substitute → Compare`
//! and ends in an [`EdgeVerdict`]. Lookups that are not answerable yet end the
//! edge early with [`EdgeVerdict::Deferred`] so the driver can retry it after
//! the next resolution pass.

use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::classify::Classifier;
use crate::config::{AfterSink, CheckConfig, UnboundGenerics};
use crate::error::{Diagnostic, DiagnosticKind, Span};
use crate::generics;
use crate::schema::{GenericBindings, RecordSchema, Resolution, SchemaResolver, SchemaType, TypeRef};
use crate::stage::{Behavior, StageDescriptor, StageInstance};
use crate::subtype::{match_rule, LookupFailure, SubtypeOracle};

/// Read-only inputs shared by every edge of a check.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    pub resolver: &'a dyn SchemaResolver,
    pub classifier: &'a Classifier,
    pub config: &'a CheckConfig,
    /// No further resolution pass will run; a deferral becomes an error.
    pub final_pass: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionEdge {
    pub left: StageInstance,
    pub right: StageInstance,
    /// Span of the `*` operator.
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    Start,
    ClassifyRhs,
    ShortCircuit,
    Extract,
    Substitute,
    Compare,
}

/// A passing edge: the composite that becomes the left side of the next edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    pub instance: StageInstance,
    /// Warnings raised while passing, such as unchecked compositions.
    pub advisories: Vec<Diagnostic>,
}

impl Composition {
    /// Output of the composite, with no type variables left to bind.
    pub fn output(&self) -> Option<&TypeRef> {
        self.instance.descriptor.output.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeVerdict {
    Pass(Composition),
    Fail(Vec<Diagnostic>),
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("composition is waiting on declarations from a later resolution pass")]
    Deferred,
    #[error("composition rejected with {} diagnostic(s)", .0.len())]
    Rejected(Vec<Diagnostic>),
}

pub fn check_composition(
    left: &StageInstance,
    right: &StageInstance,
    span: Span,
    ctx: &CheckContext<'_>,
) -> Result<Composition, CompositionError> {
    let edge = CompositionEdge {
        left: left.clone(),
        right: right.clone(),
        span,
    };
    match check_edge(&edge, ctx) {
        EdgeVerdict::Pass(composition) => Ok(composition),
        EdgeVerdict::Fail(diagnostics) => Err(CompositionError::Rejected(diagnostics)),
        EdgeVerdict::Deferred => Err(CompositionError::Deferred),
    }
}

pub fn check_edge(edge: &CompositionEdge, ctx: &CheckContext<'_>) -> EdgeVerdict {
    EdgeChecker::new(edge, ctx).run()
}

/// Outcome of preparing one side of an edge; `Err` ends the edge.
type Prepared = Result<SchemaType, EdgeVerdict>;

struct EdgeChecker<'e, 'a> {
    edge: &'e CompositionEdge,
    ctx: &'e CheckContext<'a>,
    producer: String,
    consumer: String,
}

impl<'e, 'a> EdgeChecker<'e, 'a> {
    fn new(edge: &'e CompositionEdge, ctx: &'e CheckContext<'a>) -> Self {
        Self {
            edge,
            ctx,
            producer: edge.left.label(),
            consumer: edge.right.label(),
        }
    }

    fn enter(&self, state: EdgeState) {
        trace!(producer = %self.producer, consumer = %self.consumer, ?state, "edge state");
    }

    fn run(self) -> EdgeVerdict {
        self.enter(EdgeState::Start);
        let classifier = self.ctx.classifier;
        if self.ctx.config.after_sink == AfterSink::Error
            && classifier.is_terminal(&self.edge.left.descriptor)
        {
            return self.fail(
                DiagnosticKind::CompositionAfterSink,
                format!(
                    "'{}' is composed after sink '{}'; nothing flows past a sink",
                    self.consumer, self.producer
                ),
            );
        }

        self.enter(EdgeState::ClassifyRhs);
        match classifier.classify(&self.edge.right.descriptor) {
            Behavior::Source => self.fail(
                DiagnosticKind::SourceAsTarget,
                format!(
                    "source stage '{}' cannot consume the output of '{}'; a source may only lead a pipeline",
                    self.consumer, self.producer
                ),
            ),
            Behavior::Identity => {
                self.enter(EdgeState::ShortCircuit);
                let output = self.left_output();
                self.pass(output, Vec::new())
            }
            Behavior::Sink => {
                self.enter(EdgeState::ShortCircuit);
                let output = self.right_output();
                self.pass(output, Vec::new())
            }
            Behavior::Regular => self.check_regular(),
        }
    }

    fn check_regular(self) -> EdgeVerdict {
        self.enter(EdgeState::Extract);
        let produced = if self.left_behavior() == Behavior::Identity {
            None
        } else {
            self.edge.left.descriptor.output.clone()
        };
        let required = self.edge.right.descriptor.input.clone();

        let (Some(produced), Some(required)) = (produced, required) else {
            let missing = if self.edge.left.descriptor.output.is_none()
                || self.left_behavior() == Behavior::Identity
            {
                format!("'{}' declares no output schema", self.producer)
            } else {
                format!("'{}' declares no input schema", self.consumer)
            };
            let advisory = Diagnostic::warning(
                DiagnosticKind::UncheckedComposition,
                format!(
                    "unchecked composition: {missing}; '{}' * '{}' is assumed compatible",
                    self.producer, self.consumer
                ),
                self.edge.span,
            )
            .with_stages(&self.producer, &self.consumer);
            let output = self.right_output();
            return self.pass(output, vec![advisory]);
        };

        self.enter(EdgeState::Substitute);
        let left = &self.edge.left;
        let right = &self.edge.right;
        let produced = self.prepare(&produced, &left.bindings, &self.producer, "output");
        let required = self.prepare(&required, &right.bindings, &self.consumer, "input");
        let (produced, required) = match (produced, required) {
            (Ok(produced), Ok(required)) => (produced, required),
            (Err(EdgeVerdict::Deferred), _) | (_, Err(EdgeVerdict::Deferred)) => {
                return EdgeVerdict::Deferred
            }
            (produced, required) => {
                let diagnostics = [produced.err(), required.err()]
                    .into_iter()
                    .flatten()
                    .flat_map(|verdict| match verdict {
                        EdgeVerdict::Fail(diagnostics) => diagnostics,
                        EdgeVerdict::Pass(_) | EdgeVerdict::Deferred => Vec::new(),
                    })
                    .collect();
                return EdgeVerdict::Fail(diagnostics);
            }
        };

        self.enter(EdgeState::Compare);
        self.compare(&produced, &required)
    }

    fn compare(&self, produced: &SchemaType, required: &SchemaType) -> EdgeVerdict {
        if let Some(rule) = match_rule(produced, required, self.ctx.resolver) {
            trace!(?rule, produced = %produced, required = %required, "edge matched");
            return self.pass(self.right_output(), Vec::new());
        }

        match (produced, required) {
            (SchemaType::Record(produced), SchemaType::Record(required)) => {
                self.compare_fields(produced, required)
            }
            // Unrelated nominals, or a record against a nominal either way.
            _ => self.fail_types(
                DiagnosticKind::IncompatibleTypes,
                format!(
                    "'{}' expects '{required}' but '{}' produces '{produced}'",
                    self.consumer, self.producer
                ),
                required.to_string(),
                produced.to_string(),
            ),
        }
    }

    /// Width subtyping: every key the consumer requires must be produced
    /// with an assignable type. All failing keys are reported together.
    fn compare_fields(&self, produced: &RecordSchema, required: &RecordSchema) -> EdgeVerdict {
        let oracle = SubtypeOracle::new(self.ctx.resolver);
        let mut diagnostics = Vec::new();
        let mut deferred = false;

        for (key, required_ty) in &required.fields {
            let Some(produced_ty) = produced.fields.get(key) else {
                diagnostics.push(
                    Diagnostic::mismatch(
                        DiagnosticKind::MissingKey,
                        format!(
                            "'{}' expects key '{key}' which '{}' does not produce",
                            self.consumer, self.producer
                        ),
                        self.edge.span,
                    )
                    .with_field(key)
                    .with_types(required_ty.to_string(), "<missing>")
                    .with_stages(&self.producer, &self.consumer),
                );
                continue;
            };

            match oracle.assignable(produced_ty, required_ty) {
                Ok(true) => {}
                Ok(false) => diagnostics.push(
                    Diagnostic::mismatch(
                        DiagnosticKind::FieldTypeMismatch,
                        format!(
                            "key '{key}' of '{}' expects '{required_ty}' but '{}' produces '{produced_ty}'",
                            self.consumer, self.producer
                        ),
                        self.edge.span,
                    )
                    .with_field(key)
                    .with_types(required_ty.to_string(), produced_ty.to_string())
                    .with_stages(&self.producer, &self.consumer),
                ),
                Err(LookupFailure::Deferred) if !self.ctx.final_pass => deferred = true,
                Err(LookupFailure::Deferred) => diagnostics.push(self.unresolved_field(key, produced_ty)),
                Err(LookupFailure::Unresolved(ty)) => diagnostics.push(self.unresolved_field(key, &ty)),
            }
        }

        if deferred {
            return EdgeVerdict::Deferred;
        }
        if diagnostics.is_empty() {
            self.pass(self.right_output(), Vec::new())
        } else {
            EdgeVerdict::Fail(diagnostics)
        }
    }

    /// Resolves one side's declared schema, applies that side's bindings,
    /// and deals with variables that are still unbound.
    fn prepare(
        &self,
        declared: &TypeRef,
        bindings: &GenericBindings,
        stage: &str,
        slot: &str,
    ) -> Prepared {
        let resolver = self.ctx.resolver;
        let schema = self.settle(resolver.resolve_type(declared), declared, stage, slot)?;
        let substituted = generics::substitute(&schema, bindings, resolver);
        let schema = self.settle(substituted, declared, stage, slot)?;

        let unbound = schema.free_vars();
        if unbound.is_empty() {
            return Ok(schema);
        }
        if self.ctx.config.unbound_generics == UnboundGenerics::Any {
            return Ok(generics::erase(&schema));
        }

        Err(EdgeVerdict::Fail(
            unbound
                .into_iter()
                .map(|var| {
                    Diagnostic::mismatch(
                        DiagnosticKind::UnresolvedGeneric,
                        format!(
                            "type variable '{var}' in the {slot} schema of '{stage}' is unbound; instantiate it explicitly"
                        ),
                        self.edge.span,
                    )
                    .with_stages(&self.producer, &self.consumer)
                })
                .collect(),
        ))
    }

    fn settle(
        &self,
        resolution: Resolution<SchemaType>,
        declared: &TypeRef,
        stage: &str,
        slot: &str,
    ) -> Prepared {
        match resolution {
            Resolution::Resolved(schema) => Ok(schema),
            Resolution::Deferred if !self.ctx.final_pass => Err(EdgeVerdict::Deferred),
            Resolution::Deferred | Resolution::Unresolvable => {
                let diagnostic = Diagnostic::mismatch(
                    DiagnosticKind::UnresolvedSymbol,
                    format!("cannot resolve {slot} schema '{declared}' of '{stage}'"),
                    self.edge.span,
                )
                .with_stages(&self.producer, &self.consumer);
                Err(EdgeVerdict::Fail(vec![diagnostic]))
            }
        }
    }

    fn unresolved_field(&self, key: &str, ty: &TypeRef) -> Diagnostic {
        Diagnostic::mismatch(
            DiagnosticKind::UnresolvedSymbol,
            format!("cannot resolve type '{ty}' of key '{key}'"),
            self.edge.span,
        )
        .with_field(key)
        .with_stages(&self.producer, &self.consumer)
    }

    fn fail(&self, kind: DiagnosticKind, message: String) -> EdgeVerdict {
        EdgeVerdict::Fail(vec![Diagnostic::mismatch(kind, message, self.edge.span)
            .with_stages(&self.producer, &self.consumer)])
    }

    fn fail_types(
        &self,
        kind: DiagnosticKind,
        message: String,
        expected: String,
        actual: String,
    ) -> EdgeVerdict {
        EdgeVerdict::Fail(vec![Diagnostic::mismatch(kind, message, self.edge.span)
            .with_types(expected, actual)
            .with_stages(&self.producer, &self.consumer)])
    }

    fn left_behavior(&self) -> Behavior {
        self.ctx.classifier.classify(&self.edge.left.descriptor)
    }

    fn left_output(&self) -> Option<TypeRef> {
        if self.left_behavior() == Behavior::Identity {
            return None;
        }
        let left = &self.edge.left;
        left.descriptor
            .output
            .as_ref()
            .map(|output| generics::substitute_ref(output, &left.bindings))
    }

    fn right_output(&self) -> Option<TypeRef> {
        let right = &self.edge.right;
        right
            .descriptor
            .output
            .as_ref()
            .map(|output| generics::substitute_ref(output, &right.bindings))
    }

    fn pass(&self, output: Option<TypeRef>, advisories: Vec<Diagnostic>) -> EdgeVerdict {
        EdgeVerdict::Pass(Composition {
            instance: self.composite(output),
            advisories,
        })
    }

    fn composite(&self, output: Option<TypeRef>) -> StageInstance {
        let left = &self.edge.left;
        let right = &self.edge.right;
        let left_behavior = self.left_behavior();
        let right_behavior = self.ctx.classifier.classify(&right.descriptor);

        let declared_behavior = match (left_behavior, right_behavior) {
            (Behavior::Source, _) => Some(Behavior::Source),
            (Behavior::Identity, Behavior::Identity) => Some(Behavior::Identity),
            _ => None,
        };
        let input = match left_behavior {
            Behavior::Source => None,
            Behavior::Identity => right
                .descriptor
                .input
                .as_ref()
                .map(|input| generics::substitute_ref(input, &right.bindings)),
            Behavior::Sink | Behavior::Regular => left
                .descriptor
                .input
                .as_ref()
                .map(|input| generics::substitute_ref(input, &left.bindings)),
        };

        let descriptor = StageDescriptor {
            identity: format!("{} * {}", self.producer, self.consumer),
            declared_behavior,
            input,
            output,
            type_params: Vec::new(),
            terminal: right_behavior == Behavior::Sink || right.descriptor.terminal,
            span: left.descriptor.span.to(right.descriptor.span),
        };
        StageInstance::new(Arc::new(descriptor))
    }
}
