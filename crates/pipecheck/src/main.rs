use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use pipecheck::classify::Classifier;
use pipecheck::config::CheckConfig;
use pipecheck::driver::{PipelineReport, PipelineStatus};
use pipecheck::error::{Diagnostic, Severity};
use pipecheck::loader::{load_source_map, SourceMap};
use pipecheck::resolve::resolve_program;
use pipecheck::{check_source_with_config, parse_source};

const LOG_ENV: &str = "PIPECHECK_LOG";

#[derive(Debug, Parser)]
#[command(name = "pipecheck", version, about = "Static composition checker for typed stream pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Check every pipeline declared in a file and its imports.
    Check {
        file: PathBuf,
        /// Print a JSON report on stdout.
        #[arg(long)]
        json: bool,
        /// Config file; defaults to pipecheck.toml next to FILE.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Print the parsed declarations.
    Ast { file: PathBuf },
    /// List resolved stages with their behavior and schemas.
    Stages {
        file: PathBuf,
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Check { file, json, config } => run_check(&file, json, config.as_deref()),
        Command::Ast { file } => run_ast(&file),
        Command::Stages { file, config } => run_stages(&file, config.as_deref()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_check(file: &Path, json: bool, config_path: Option<&Path>) {
    let config = load_config(file, config_path);
    let source_map = match load_source_map(file) {
        Ok(map) => map,
        Err(errors) => {
            if json {
                print_json(&LoadFailure {
                    ok: false,
                    phase: "load",
                    diagnostics: &errors,
                });
            } else {
                for error in errors {
                    eprintln!("error: {}", error.message);
                }
            }
            process::exit(2);
        }
    };

    let (report, diagnostics) = check_source_with_config(&source_map.combined, &config);
    let has_errors = diagnostics.iter().any(Diagnostic::is_error) || !report.all_passed();

    if json {
        let located = diagnostics
            .iter()
            .map(|diagnostic| LocatedDiagnostic {
                location: source_map.render_location(diagnostic.span.start),
                diagnostic,
            })
            .collect::<Vec<_>>();
        print_json(&JsonReport {
            ok: !has_errors,
            passes: report.passes,
            pipelines: &report.pipelines,
            diagnostics: located,
        });
    } else {
        print_diagnostics(&diagnostics, &source_map);
        print_pipelines(&report.pipelines);
        if !has_errors {
            println!("ok: {} pipeline(s) passed", report.pipelines.len());
        }
    }

    if has_errors {
        process::exit(1);
    }
}

fn run_ast(file: &Path) {
    let source_map = load_or_exit(file);
    match parse_source(&source_map.combined) {
        Ok(program) => println!("{program:#?}"),
        Err(errors) => {
            print_diagnostics(&errors, &source_map);
            process::exit(1);
        }
    }
}

fn run_stages(file: &Path, config_path: Option<&Path>) {
    let config = load_config(file, config_path);
    let source_map = load_or_exit(file);
    let program = match parse_source(&source_map.combined) {
        Ok(program) => program,
        Err(errors) => {
            print_diagnostics(&errors, &source_map);
            process::exit(1);
        }
    };

    let (registry, diagnostics) = resolve_program(&program, config.max_passes);
    print_diagnostics(&diagnostics, &source_map);

    let classifier = Classifier::from_config(&config);
    for stage in registry.stages() {
        let slot = |ty: &Option<pipecheck::schema::TypeRef>| {
            ty.as_ref()
                .map(|ty| ty.to_string())
                .unwrap_or_else(|| "_".to_string())
        };
        let params = if stage.type_params.is_empty() {
            String::new()
        } else {
            format!("<{}>", stage.type_params.join(", "))
        };
        println!(
            "{}{params}: {} {} -> {}",
            stage.identity,
            classifier.classify(stage),
            slot(&stage.input),
            slot(&stage.output)
        );
    }

    if diagnostics.iter().any(Diagnostic::is_error) {
        process::exit(1);
    }
}

fn load_config(file: &Path, explicit: Option<&Path>) -> CheckConfig {
    let loaded = match explicit {
        Some(path) => CheckConfig::load(path),
        None => CheckConfig::discover(file),
    };
    match loaded {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {error}");
            process::exit(2);
        }
    }
}

fn load_or_exit(file: &Path) -> SourceMap {
    match load_source_map(file) {
        Ok(map) => map,
        Err(errors) => {
            for error in errors {
                eprintln!("error: {}", error.message);
            }
            process::exit(2);
        }
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic], source_map: &SourceMap) {
    for diagnostic in diagnostics {
        let level = match diagnostic.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        eprintln!(
            "{level}[{}][{}]: {}",
            diagnostic.kind.as_str(),
            source_map.render_location(diagnostic.span.start),
            diagnostic.message
        );
    }
}

fn print_pipelines(pipelines: &[PipelineReport]) {
    for pipeline in pipelines {
        match (pipeline.status, &pipeline.output) {
            (PipelineStatus::Passed, Some(output)) => {
                println!("passed: {} -> {output}", pipeline.name)
            }
            (PipelineStatus::Passed, None) => println!("passed: {}", pipeline.name),
            (PipelineStatus::Failed, _) => println!("failed: {}", pipeline.name),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    ok: bool,
    passes: usize,
    pipelines: &'a [PipelineReport],
    diagnostics: Vec<LocatedDiagnostic<'a>>,
}

#[derive(Serialize)]
struct LocatedDiagnostic<'a> {
    location: String,
    #[serde(flatten)]
    diagnostic: &'a Diagnostic,
}

#[derive(Serialize)]
struct LoadFailure<'a> {
    ok: bool,
    phase: &'static str,
    diagnostics: &'a [Diagnostic],
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(error) => {
            eprintln!("error: failed to encode json report: {error}");
            process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_check_defaults() {
        let cli = Cli::try_parse_from(["pipecheck", "check", "flow.pipe"]).expect("should parse");
        assert_eq!(
            cli.command,
            Command::Check {
                file: PathBuf::from("flow.pipe"),
                json: false,
                config: None,
            }
        );
    }

    #[test]
    fn parses_check_with_json_and_config() {
        let cli = Cli::try_parse_from([
            "pipecheck",
            "check",
            "flow.pipe",
            "--json",
            "--config",
            "strict.toml",
        ])
        .expect("should parse");
        assert_eq!(
            cli.command,
            Command::Check {
                file: PathBuf::from("flow.pipe"),
                json: true,
                config: Some(PathBuf::from("strict.toml")),
            }
        );
    }

    #[test]
    fn rejects_unknown_option() {
        let error = Cli::try_parse_from(["pipecheck", "check", "flow.pipe", "--bad"])
            .expect_err("should fail");
        assert_eq!(error.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn requires_a_file() {
        assert!(Cli::try_parse_from(["pipecheck", "ast"]).is_err());
    }
}
