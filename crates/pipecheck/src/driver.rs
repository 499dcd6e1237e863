use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, debug_span};

use crate::ast::{Item, PipelineDecl, PipelineExpr, Program, StageRef};
use crate::classify::Classifier;
use crate::compose::{check_edge, CheckContext, CompositionEdge, EdgeVerdict};
use crate::config::CheckConfig;
use crate::error::{Diagnostic, DiagnosticKind, DiagnosticSink, Span};
use crate::resolve::{lower_type, ResolutionSession};
use crate::schema::Resolution;
use crate::stage::StageInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub name: String,
    pub status: PipelineStatus,
    /// Output schema of the whole pipeline, when it passed and declares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub edges: usize,
    #[serde(skip)]
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub pipelines: Vec<PipelineReport>,
    pub passes: usize,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        self.pipelines
            .iter()
            .all(|pipeline| pipeline.status == PipelineStatus::Passed)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineReport> {
        self.pipelines.iter().find(|pipeline| pipeline.name == name)
    }
}

enum Walk {
    Done(StageInstance),
    Failed,
    Deferred,
}

enum Settled {
    Done {
        report: PipelineReport,
        diagnostics: Vec<Diagnostic>,
    },
    Deferred,
}

/// Checks every pipeline in `program`, alternating resolution passes with
/// pipeline checks until every pipeline settles or the final pass ran.
///
/// Diagnostics of a pipeline reach `sink` only once it settles, so a
/// deferred attempt never leaks partial results.
pub fn check_program(
    program: &Program,
    config: &CheckConfig,
    sink: &mut dyn DiagnosticSink,
) -> CheckReport {
    let classifier = Classifier::from_config(config);
    let mut session = ResolutionSession::new(program);
    let pipelines = collect_pipelines(program, sink);
    let mut reports: Vec<Option<PipelineReport>> = vec![None; pipelines.len()];
    let mut waiting = (0..pipelines.len()).collect::<Vec<_>>();

    loop {
        let outcome = session.run_pass();
        let final_pass = outcome.resolved == 0
            || outcome.remaining == 0
            || session.passes() >= config.max_passes;
        if final_pass {
            session.finalize();
        }
        sink.report_all(session.take_diagnostics());

        let ctx = CheckContext {
            resolver: session.registry(),
            classifier: &classifier,
            config,
            final_pass,
        };
        waiting.retain(|&index| match check_pipeline(pipelines[index], &ctx) {
            Settled::Deferred => true,
            Settled::Done {
                report,
                diagnostics,
            } => {
                sink.report_all(diagnostics);
                reports[index] = Some(report);
                false
            }
        });
        debug!(
            pass = session.passes(),
            final_pass,
            waiting = waiting.len(),
            "checked pipelines"
        );

        if final_pass {
            break;
        }
    }

    CheckReport {
        pipelines: reports.into_iter().flatten().collect(),
        passes: session.passes(),
    }
}

fn collect_pipelines<'p>(program: &'p Program, sink: &mut dyn DiagnosticSink) -> Vec<&'p PipelineDecl> {
    let mut seen = HashSet::new();
    let mut pipelines = Vec::new();
    for item in &program.items {
        let Item::Pipeline(pipeline) = item else {
            continue;
        };
        if !seen.insert(pipeline.name.as_str()) {
            sink.report(Diagnostic::error(
                DiagnosticKind::Declaration,
                format!("duplicate pipeline '{}'", pipeline.name),
                pipeline.span,
            ));
            continue;
        }
        pipelines.push(pipeline);
    }
    pipelines
}

fn check_pipeline(pipeline: &PipelineDecl, ctx: &CheckContext<'_>) -> Settled {
    let span = debug_span!("pipeline", name = %pipeline.name);
    let _entered = span.enter();

    let mut diagnostics = Vec::new();
    let mut edges = 0usize;
    let walked = walk(&pipeline.expr, ctx, &mut diagnostics, &mut edges);

    let (status, output) = match walked {
        Walk::Deferred => {
            debug!("deferred until the next resolution pass");
            return Settled::Deferred;
        }
        Walk::Failed => (PipelineStatus::Failed, None),
        Walk::Done(instance) => (
            PipelineStatus::Passed,
            instance.descriptor.output.as_ref().map(|output| output.to_string()),
        ),
    };
    debug!(?status, edges, diagnostics = diagnostics.len(), "pipeline settled");

    Settled::Done {
        report: PipelineReport {
            name: pipeline.name.clone(),
            status,
            output,
            edges,
            span: pipeline.span,
        },
        diagnostics,
    }
}

/// Composes left to right. Both operands of an edge are walked even when
/// one of them fails, so failures in independent sub-chains all surface.
fn walk(
    expr: &PipelineExpr,
    ctx: &CheckContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
    edges: &mut usize,
) -> Walk {
    let (left, right, op_span) = match expr {
        PipelineExpr::Stage(stage) => return instantiate(stage, ctx, diagnostics),
        PipelineExpr::Compose {
            left,
            right,
            op_span,
        } => (left, right, *op_span),
    };

    let left = walk(left, ctx, diagnostics, edges);
    let right = walk(right, ctx, diagnostics, edges);
    let (left, right) = match (left, right) {
        (Walk::Done(left), Walk::Done(right)) => (left, right),
        (Walk::Deferred, _) | (_, Walk::Deferred) => return Walk::Deferred,
        _ => return Walk::Failed,
    };

    *edges += 1;
    let edge = CompositionEdge {
        left,
        right,
        span: op_span,
    };
    match check_edge(&edge, ctx) {
        EdgeVerdict::Pass(composition) => {
            diagnostics.extend(composition.advisories);
            Walk::Done(composition.instance)
        }
        EdgeVerdict::Fail(failures) => {
            diagnostics.extend(failures);
            Walk::Failed
        }
        EdgeVerdict::Deferred => Walk::Deferred,
    }
}

fn instantiate(stage: &StageRef, ctx: &CheckContext<'_>, diagnostics: &mut Vec<Diagnostic>) -> Walk {
    let descriptor = match ctx.resolver.resolve_stage(&stage.name) {
        Resolution::Resolved(descriptor) => descriptor,
        Resolution::Deferred if !ctx.final_pass => return Walk::Deferred,
        Resolution::Deferred | Resolution::Unresolvable => {
            diagnostics.push(Diagnostic::mismatch(
                DiagnosticKind::UnresolvedSymbol,
                format!("unknown stage '{}'", stage.name),
                stage.span,
            ));
            return Walk::Failed;
        }
    };

    let mut args = Vec::with_capacity(stage.args.len());
    let mut failed = false;
    for expr in &stage.args {
        let arg = lower_type(expr, &[]);
        match ctx.resolver.resolve_type(&arg) {
            Resolution::Resolved(_) => {}
            Resolution::Deferred if !ctx.final_pass => return Walk::Deferred,
            Resolution::Deferred | Resolution::Unresolvable => {
                diagnostics.push(Diagnostic::mismatch(
                    DiagnosticKind::UnresolvedSymbol,
                    format!("unknown type '{arg}' in type arguments of '{}'", stage.name),
                    expr.span,
                ));
                failed = true;
            }
        }
        args.push(arg);
    }
    if failed {
        return Walk::Failed;
    }

    match StageInstance::instantiate(descriptor, args) {
        Ok(instance) => Walk::Done(instance),
        Err(expected) => {
            diagnostics.push(Diagnostic::error(
                DiagnosticKind::InvalidInstantiation,
                format!(
                    "stage '{}' expects {expected} type argument(s), found {}",
                    stage.name,
                    stage.args.len()
                ),
                stage.span,
            ));
            Walk::Failed
        }
    }
}
