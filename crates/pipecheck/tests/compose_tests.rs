use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use indexmap::IndexMap;
use pipecheck::classify::Classifier;
use pipecheck::config::{AfterSink, CheckConfig, UnboundGenerics};
use pipecheck::error::{DiagnosticKind, Severity, Span};
use pipecheck::schema::{NominalSchema, RecordSchema, Resolution, SchemaResolver, SchemaType, TypeRef};
use pipecheck::stage::{Behavior, StageDescriptor, StageInstance};
use pipecheck::{check_composition, CheckContext, Composition, CompositionError};

/// Resolver over a fixed table, standing in for the declaration front end.
#[derive(Default)]
struct TableResolver {
    schemas: HashMap<String, SchemaType>,
    settled: bool,
}

impl TableResolver {
    fn settled() -> Self {
        Self {
            settled: true,
            ..Self::default()
        }
        .nominal("Float", &[])
        .nominal("Int", &["Float"])
        .nominal("Str", &[])
    }

    fn nominal(mut self, name: &str, parents: &[&str]) -> Self {
        self.schemas.insert(
            name.to_string(),
            SchemaType::Nominal(NominalSchema {
                name: name.to_string(),
                args: Vec::new(),
                parents: parents.iter().map(|p| p.to_string()).collect(),
            }),
        );
        self
    }

    fn record(mut self, name: &str, fields: &[(&str, &str)]) -> Self {
        let fields = fields
            .iter()
            .map(|(key, ty)| (key.to_string(), TypeRef::named(*ty)))
            .collect::<IndexMap<_, _>>();
        self.schemas.insert(
            name.to_string(),
            SchemaType::Record(RecordSchema {
                name: name.to_string(),
                args: Vec::new(),
                type_params: Vec::new(),
                fields,
            }),
        );
        self
    }
}

impl SchemaResolver for TableResolver {
    fn resolve_stage(&self, _identity: &str) -> Resolution<Arc<StageDescriptor>> {
        Resolution::Unresolvable
    }

    fn resolve_type(&self, ty: &TypeRef) -> Resolution<SchemaType> {
        match ty {
            TypeRef::Any => Resolution::Resolved(SchemaType::Any),
            TypeRef::Var { name } => Resolution::Resolved(SchemaType::TypeVar { name: name.clone() }),
            TypeRef::Named { name, .. } => match self.schemas.get(name) {
                Some(schema) => Resolution::Resolved(schema.clone()),
                None if self.settled => Resolution::Unresolvable,
                None => Resolution::Deferred,
            },
        }
    }

    fn is_nominal_subtype(&self, sub: &str, sup: &str) -> bool {
        matches!(
            self.schemas.get(sub),
            Some(SchemaType::Nominal(nominal)) if nominal.parents.iter().any(|p| p == sup)
        )
    }
}

fn stage(name: &str, input: Option<&str>, output: Option<&str>) -> StageDescriptor {
    let mut descriptor = StageDescriptor::new(name);
    descriptor.input = input.map(TypeRef::named);
    descriptor.output = output.map(TypeRef::named);
    descriptor
}

fn instance(descriptor: StageDescriptor) -> StageInstance {
    StageInstance::new(Arc::new(descriptor))
}

fn source(name: &str, output: &str) -> StageInstance {
    instance(stage(name, None, Some(output)).with_behavior(Behavior::Source))
}

fn regular(name: &str, input: &str, output: Option<&str>) -> StageInstance {
    instance(stage(name, Some(input), output))
}

struct Fixture {
    resolver: TableResolver,
    classifier: Classifier,
    config: CheckConfig,
}

impl Fixture {
    fn new(resolver: TableResolver) -> Self {
        Self {
            resolver,
            classifier: Classifier::default(),
            config: CheckConfig::default(),
        }
    }

    fn check(&self, left: &StageInstance, right: &StageInstance) -> Result<Composition, CompositionError> {
        let ctx = CheckContext {
            resolver: &self.resolver,
            classifier: &self.classifier,
            config: &self.config,
            final_pass: self.resolver.settled,
        };
        check_composition(left, right, Span::new(10, 11), &ctx)
    }
}

fn rejected(result: Result<Composition, CompositionError>) -> Vec<pipecheck::error::Diagnostic> {
    match result {
        Err(CompositionError::Rejected(diagnostics)) => diagnostics,
        other => panic!("expected rejection, got {other:?}"),
    }
}

fn hello_world() -> TableResolver {
    TableResolver::settled()
        .record("HelloMsg", &[("msg", "Str")])
        .record("Count", &[("msg", "Int")])
        .record("Wide", &[("a", "Int"), ("b", "Str")])
        .record("NeedA", &[("a", "Int")])
        .record("NeedAC", &[("a", "Int"), ("c", "Int")])
}

#[test]
fn identity_consumer_keeps_producer_output() {
    let fixture = Fixture::new(hello_world());
    let print = instance(StageDescriptor::new("Print"));
    let composed = fixture
        .check(&source("Hello", "HelloMsg"), &print)
        .expect("identity should pass");

    assert_eq!(composed.output(), Some(&TypeRef::named("HelloMsg")));
    assert_eq!(composed.instance.identity(), "Hello * Print");
    assert_eq!(
        composed.instance.descriptor.declared_behavior,
        Some(Behavior::Source)
    );
    assert!(composed.advisories.is_empty());
}

#[test]
fn source_consumer_is_rejected_with_both_names() {
    let fixture = Fixture::new(hello_world());
    let diagnostics = rejected(fixture.check(
        &regular("Shout", "HelloMsg", Some("HelloMsg")),
        &source("Hello", "HelloMsg"),
    ));

    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::SourceAsTarget);
    assert_eq!(
        diagnostic.message,
        "Stream mismatch: source stage 'Hello' cannot consume the output of 'Shout'; a source may only lead a pipeline"
    );
    assert_eq!(diagnostic.producer.as_deref(), Some("Shout"));
    assert_eq!(diagnostic.consumer.as_deref(), Some("Hello"));
    assert_eq!(diagnostic.span, Span::new(10, 11));
}

#[test]
fn sink_consumer_ends_the_chain() {
    let fixture = Fixture::new(hello_world().record("Void", &[]));
    let stop = instance(stage("Stop", None, Some("Void")));
    let composed = fixture
        .check(&source("Hello", "HelloMsg"), &stop)
        .expect("sink should pass");
    assert_eq!(composed.output(), Some(&TypeRef::named("Void")));
    assert!(composed.instance.descriptor.terminal);

    let after = rejected(fixture.check(&composed.instance, &regular("Shout", "HelloMsg", None)));
    assert_eq!(after[0].kind, DiagnosticKind::CompositionAfterSink);
    assert!(after[0].message.contains("'Shout' is composed after sink 'Hello * Stop'"));
}

#[test]
fn composing_after_a_sink_can_be_allowed() {
    let mut fixture = Fixture::new(hello_world().record("Void", &[]));
    fixture.config.after_sink = AfterSink::Allow;
    let stop = instance(stage("Stop", None, Some("Void")));
    let composed = fixture
        .check(&source("Hello", "HelloMsg"), &stop)
        .expect("sink should pass");

    let diagnostics = rejected(fixture.check(&composed.instance, &regular("Shout", "HelloMsg", None)));
    assert_eq!(diagnostics[0].kind, DiagnosticKind::MissingKey);
}

#[test]
fn width_subtyping_accepts_extra_keys() {
    let fixture = Fixture::new(hello_world());
    let composed = fixture
        .check(&source("W", "Wide"), &regular("N", "NeedA", Some("NeedA")))
        .expect("extra keys are fine");
    assert_eq!(composed.output(), Some(&TypeRef::named("NeedA")));
}

#[test]
fn missing_key_names_the_key() {
    let fixture = Fixture::new(hello_world());
    let diagnostics = rejected(fixture.check(&source("W", "Wide"), &regular("N", "NeedAC", None)));

    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::MissingKey);
    assert_eq!(diagnostic.field.as_deref(), Some("c"));
    assert_eq!(
        diagnostic.message,
        "Stream mismatch: 'N' expects key 'c' which 'W' does not produce"
    );
}

#[test]
fn field_type_mismatch_reports_expected_and_actual() {
    let fixture = Fixture::new(hello_world());
    let diagnostics = rejected(fixture.check(&source("Hello", "HelloMsg"), &regular("Counter", "Count", None)));

    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::FieldTypeMismatch);
    assert_eq!(diagnostic.field.as_deref(), Some("msg"));
    assert_eq!(diagnostic.expected.as_deref(), Some("Int"));
    assert_eq!(diagnostic.actual.as_deref(), Some("Str"));
    assert!(diagnostic.message.starts_with("Stream mismatch: key 'msg'"));
}

#[test]
fn all_field_failures_of_an_edge_are_batched() {
    let fixture = Fixture::new(
        hello_world()
            .record("Produced", &[("a", "Str"), ("b", "Int")])
            .record("Required", &[("a", "Int"), ("b", "Float"), ("c", "Str"), ("d", "Str")]),
    );
    let diagnostics = rejected(fixture.check(&source("P", "Produced"), &regular("R", "Required", None)));
    let summary = diagnostics
        .iter()
        .map(|d| (d.kind, d.field.clone().unwrap_or_default()))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![
            (DiagnosticKind::FieldTypeMismatch, "a".to_string()),
            (DiagnosticKind::MissingKey, "c".to_string()),
            (DiagnosticKind::MissingKey, "d".to_string()),
        ]
    );
}

#[test]
fn nominal_types_never_unify_structurally() {
    let fixture = Fixture::new(hello_world());
    let diagnostics = rejected(fixture.check(&source("Text", "Str"), &regular("Sum", "Int", None)));
    assert_eq!(diagnostics[0].kind, DiagnosticKind::IncompatibleTypes);
    assert_eq!(
        diagnostics[0].message,
        "Stream mismatch: 'Sum' expects 'Int' but 'Text' produces 'Str'"
    );

    let nominal_to_record = rejected(fixture.check(&source("Num", "Int"), &regular("N", "NeedA", None)));
    assert_eq!(nominal_to_record[0].kind, DiagnosticKind::IncompatibleTypes);
}

#[test]
fn nominal_parent_and_wildcard_pass() {
    let fixture = Fixture::new(hello_world());
    assert!(fixture
        .check(&source("Num", "Int"), &regular("Avg", "Float", None))
        .is_ok());

    let mut anything = StageDescriptor::new("Log");
    anything.input = Some(TypeRef::Any);
    assert!(fixture.check(&source("Num", "Str"), &instance(anything)).is_ok());
}

#[test]
fn each_side_uses_its_own_bindings() {
    let fixture = Fixture::new(hello_world());
    let generic = || {
        Arc::new(
            StageDescriptor::new("Keep")
                .with_type_params(["T"])
                .with_input(TypeRef::var("T"))
                .with_output(TypeRef::var("T")),
        )
    };
    let keep_int = StageInstance::instantiate(generic(), vec![TypeRef::named("Int")]).expect("arity");
    let keep_str = StageInstance::instantiate(generic(), vec![TypeRef::named("Str")]).expect("arity");
    assert_eq!(keep_int.label(), "Keep<Int>");

    let composed = fixture
        .check(&source("Num", "Int"), &keep_int)
        .expect("Int flows into Keep<Int>");
    assert_eq!(composed.output(), Some(&TypeRef::named("Int")));

    let diagnostics = rejected(fixture.check(&keep_int, &keep_str));
    assert_eq!(diagnostics[0].kind, DiagnosticKind::IncompatibleTypes);
    assert!(diagnostics[0].message.contains("'Keep<Str>' expects 'Str' but 'Keep<Int>' produces 'Int'"));
}

#[test]
fn unbound_variables_are_reported_or_widened() {
    let mut fixture = Fixture::new(hello_world());
    let open = instance(
        StageDescriptor::new("Keep")
            .with_type_params(["T"])
            .with_input(TypeRef::var("T")),
    );

    let diagnostics = rejected(fixture.check(&source("Num", "Int"), &open));
    assert_eq!(diagnostics[0].kind, DiagnosticKind::UnresolvedGeneric);
    assert!(diagnostics[0].message.contains("type variable 'T' in the input schema of 'Keep'"));

    fixture.config.unbound_generics = UnboundGenerics::Any;
    assert!(fixture.check(&source("Num", "Int"), &open).is_ok());
}

#[test]
fn missing_schema_passes_with_an_advisory() {
    let fixture = Fixture::new(hello_world());
    let opaque = instance(stage("Opaque", None, Some("Count")));
    let composed = fixture
        .check(&source("Hello", "HelloMsg"), &opaque)
        .expect("unchecked edges pass");

    assert_eq!(composed.output(), Some(&TypeRef::named("Count")));
    assert_eq!(composed.advisories.len(), 1);
    assert_eq!(composed.advisories[0].severity, Severity::Warning);
    assert_eq!(composed.advisories[0].kind, DiagnosticKind::UncheckedComposition);
}

#[test]
fn unknown_schemas_defer_until_the_final_pass() {
    let pending = Fixture::new(TableResolver::default().record("HelloMsg", &[("msg", "Str")]));
    let result = pending.check(&source("Hello", "HelloMsg"), &regular("Later", "NotYet", None));
    assert_eq!(result.unwrap_err(), CompositionError::Deferred);

    let settled = Fixture::new(hello_world());
    let diagnostics = rejected(settled.check(&source("Hello", "HelloMsg"), &regular("Later", "NotYet", None)));
    assert_eq!(diagnostics[0].kind, DiagnosticKind::UnresolvedSymbol);
    assert!(diagnostics[0].message.contains("'NotYet'"));
}

#[test]
fn verdicts_do_not_depend_on_threads() {
    let fixture = Fixture::new(hello_world());
    let edges = vec![
        (source("Hello", "HelloMsg"), instance(StageDescriptor::new("Print"))),
        (source("W", "Wide"), regular("N", "NeedAC", None)),
        (source("Hello", "HelloMsg"), regular("Counter", "Count", None)),
        (regular("Shout", "HelloMsg", Some("HelloMsg")), source("Hello", "HelloMsg")),
    ];
    let run = || {
        edges
            .iter()
            .map(|(left, right)| fixture.check(left, right))
            .collect::<Vec<_>>()
    };

    let expected = run();
    let results = thread::scope(|scope| {
        let handles = (0..8).map(|_| scope.spawn(run)).collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("checker thread panicked"))
            .collect::<Vec<_>>()
    });

    for result in results {
        assert_eq!(result, expected);
    }
}
